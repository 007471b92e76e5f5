//! Structured outcomes the core returns instead of raising across the control
//! loop. The HTTP layer translates them into legacy result codes.

use thiserror::Error;

/// Legacy API result codes, returned as `{"result": N}`.
pub mod result {
    pub const OK: u8 = 1;
    pub const UNAUTHORIZED: u8 = 2;
    pub const MISMATCH: u8 = 3;
    pub const DATA_MISSING: u8 = 16;
    pub const OUT_OF_BOUNDS: u8 = 17;
    pub const FORMAT_ERROR: u8 = 18;
    pub const PAGE_NOT_FOUND: u8 = 32;
    pub const NOT_PERMITTED: u8 = 48;
}

#[derive(Debug, Error)]
pub enum ControlError {
    /// Station or program id outside the current count.
    #[error("id out of range")]
    OutOfRange,

    /// JSON arrays of the wrong shape, unknown option keys, unparseable values.
    #[error("malformed input: {0}")]
    Malformed(String),

    /// Program store or queue at its fixed maximum.
    #[error("store at capacity")]
    Capacity,

    /// Writing to a read-only option.
    #[error("not permitted")]
    NotPermitted,

    /// Pin operation failed. Not recoverable inside the loop.
    #[error("hardware failure")]
    Hardware(#[from] anyhow::Error),
}

impl ControlError {
    pub fn result_code(&self) -> u8 {
        match self {
            ControlError::OutOfRange | ControlError::Capacity => result::OUT_OF_BOUNDS,
            ControlError::Malformed(_) => result::FORMAT_ERROR,
            ControlError::NotPermitted => result::NOT_PERMITTED,
            ControlError::Hardware(_) => result::NOT_PERMITTED,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
