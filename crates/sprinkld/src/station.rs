//! Per-station attributes and the tagged station-kind variants. Stations are
//! identified by their stable 0-based index; board index is `id >> 3`, bit
//! position `id & 7`.

use serde::{Deserialize, Serialize};

use crate::shift::STATIONS_PER_BOARD;

/// Stations in this group ignore sequential serialization entirely.
pub const PARALLEL_GROUP: u8 = 255;
/// Number of sequential group buckets; higher group ids clamp to the last.
pub const SEQ_GROUPS: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StationKind {
    #[default]
    Standard,
    Gpio {
        pin: u8,
        active_high: bool,
    },
    Http {
        host: String,
        port: u16,
        on_cmd: String,
        off_cmd: String,
    },
    RemoteIp {
        host: String,
        port: u16,
        station_id: usize,
    },
    Rf {
        code: String,
    },
}

impl StationKind {
    /// Wire tag used by `/je` and station persistence.
    pub fn tag(&self) -> u8 {
        match self {
            StationKind::Standard => 0,
            StationKind::Gpio { .. } => 1,
            StationKind::Http { .. } => 2,
            StationKind::RemoteIp { .. } => 3,
            StationKind::Rf { .. } => 4,
        }
    }

    pub fn is_standard(&self) -> bool {
        matches!(self, StationKind::Standard)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub name: String,
    #[serde(default)]
    pub kind: StationKind,
    /// Sequential group 0..=3, or `PARALLEL_GROUP`.
    #[serde(default)]
    pub group_id: u8,
    #[serde(default)]
    pub master1_bound: bool,
    #[serde(default)]
    pub master2_bound: bool,
    #[serde(default)]
    pub ignore_sensor1: bool,
    #[serde(default)]
    pub ignore_sensor2: bool,
    #[serde(default)]
    pub ignore_rain: bool,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub activate_relay: bool,
}

impl Station {
    /// Default station for a freshly exposed slot.
    pub fn numbered(id: usize) -> Self {
        Self {
            name: format!("S{:02}", id + 1),
            kind: StationKind::Standard,
            group_id: 0,
            master1_bound: false,
            master2_bound: false,
            ignore_sensor1: false,
            ignore_sensor2: false,
            ignore_rain: false,
            disabled: false,
            activate_relay: false,
        }
    }

    pub fn board(id: usize) -> usize {
        id >> 3
    }

    pub fn board_bit(id: usize) -> u8 {
        (id & 7) as u8
    }
}

/// Pack one attribute into per-board bit bytes for the wire (`/jn`).
pub fn attr_bits(stations: &[Station], boards: usize, f: impl Fn(&Station) -> bool) -> Vec<u8> {
    let mut out = vec![0u8; boards];
    for (id, st) in stations.iter().enumerate().take(boards * STATIONS_PER_BOARD) {
        if f(st) {
            out[Station::board(id)] |= 1 << Station::board_bit(id);
        }
    }
    out
}

/// Unpack per-board bit bytes back into one attribute (`/cs`).
pub fn apply_attr_bits(
    stations: &mut [Station],
    board: usize,
    byte: u8,
    f: impl Fn(&mut Station, bool),
) {
    for bit in 0..STATIONS_PER_BOARD {
        let id = board * STATIONS_PER_BOARD + bit;
        if let Some(st) = stations.get_mut(id) {
            f(st, byte & (1 << bit) != 0);
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
