//! Per-sensor on/off delay state machine over a raw digital input. The
//! debounce timers are absolute epoch times, not countdowns, so the state
//! machine is insensitive to missed ticks.

use serde::{Deserialize, Serialize};

/// Hard minimum for both delays, applied even when configuration says zero.
pub const MIN_DELAY_S: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SensorKind {
    None,
    Rain,
    Soil,
}

impl SensorKind {
    pub fn from_wire(v: i64) -> Self {
        match v {
            1 => SensorKind::Rain,
            2 => SensorKind::Soil,
            _ => SensorKind::None,
        }
    }
}

/// Contact wiring: normally-closed sensors trigger when the circuit opens,
/// normally-open when it closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Contact {
    NormallyClosed,
    NormallyOpen,
}

impl Contact {
    pub fn from_wire(v: i64) -> Self {
        if v == 1 {
            Contact::NormallyOpen
        } else {
            Contact::NormallyClosed
        }
    }
}

#[derive(Debug, Clone)]
pub struct Sensor {
    pub pin: u8,
    pub kind: SensorKind,
    pub contact: Contact,
    on_delay_s: i64,
    off_delay_s: i64,
    pub active: bool,
    /// Epoch time at which a sustained trigger flips `active` on; 0 = unarmed.
    on_timer: i64,
    off_timer: i64,
    pub last_active_time: i64,
}

impl Sensor {
    pub fn new(pin: u8, kind: SensorKind, contact: Contact, on_delay_s: i64, off_delay_s: i64) -> Self {
        Self {
            pin,
            kind,
            contact,
            on_delay_s: on_delay_s.max(MIN_DELAY_S),
            off_delay_s: off_delay_s.max(MIN_DELAY_S),
            active: false,
            on_timer: 0,
            off_timer: 0,
            last_active_time: 0,
        }
    }

    /// Feed one raw pin sample. Returns `Some(new_active)` on a debounced
    /// transition, `None` otherwise.
    pub fn poll(&mut self, raw: bool, now: i64) -> Option<bool> {
        let triggered = raw != (self.contact == Contact::NormallyOpen);

        if triggered {
            if self.on_timer == 0 {
                self.on_timer = now + self.on_delay_s;
                self.off_timer = 0;
            } else if now >= self.on_timer && !self.active {
                self.active = true;
                self.last_active_time = now;
                return Some(true);
            }
        } else if self.off_timer == 0 {
            self.off_timer = now + self.off_delay_s;
            self.on_timer = 0;
        } else if now >= self.off_timer && self.active {
            self.active = false;
            return Some(false);
        }
        None
    }
}

// ===========================================================================
// Tests
// ===========================================================================
