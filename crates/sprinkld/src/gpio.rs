//! GPIO pin contract consumed by the shift-register driver and the sensor
//! debouncers. The `gpio` feature gates the real rppal backend; without it, a
//! mock backend keeps pin levels in memory and logs registrations to stderr.

use anyhow::Result;
use std::collections::HashMap;

// BCM pin assignments (fixed wiring of the stacked output boards).
pub const PIN_SR_LATCH: u8 = 22;
pub const PIN_SR_DATA: u8 = 27;
pub const PIN_SR_DATA_ALT: u8 = 21;
pub const PIN_SR_CLOCK: u8 = 4;
/// Output-enable, active low.
pub const PIN_SR_NOE: u8 = 17;
pub const PIN_SENSOR1: u8 = 14;
pub const PIN_SENSOR2: u8 = 23;

/// Pin mode + digital read/write. Hardware I/O is treated as
/// unbounded-latency but expected to complete in microseconds; a failure
/// here is fatal to control safety, so errors propagate to the loop.
pub trait Pins {
    fn output(&mut self, pin: u8) -> Result<()>;
    fn input(&mut self, pin: u8) -> Result<()>;
    fn write(&mut self, pin: u8, high: bool) -> Result<()>;
    fn read(&mut self, pin: u8) -> Result<bool>;
}

// ---------------------------------------------------------------------------
// Real GPIO backend (production — requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------

#[cfg(feature = "gpio")]
pub use real::RpiPins;

#[cfg(feature = "gpio")]
mod real {
    use super::Pins;
    use anyhow::{anyhow, Context, Result};
    use rppal::gpio::{Gpio, InputPin, OutputPin};
    use std::collections::HashMap;

    enum Line {
        Out(OutputPin),
        In(InputPin),
    }

    pub struct RpiPins {
        gpio: Gpio,
        lines: HashMap<u8, Line>,
    }

    impl RpiPins {
        pub fn new() -> Result<Self> {
            let gpio = Gpio::new().context("failed to open gpio device")?;
            Ok(Self {
                gpio,
                lines: HashMap::new(),
            })
        }
    }

    impl Pins for RpiPins {
        fn output(&mut self, pin: u8) -> Result<()> {
            let line = self
                .gpio
                .get(pin)
                .with_context(|| format!("failed to claim gpio {pin}"))?
                .into_output();
            self.lines.insert(pin, Line::Out(line));
            Ok(())
        }

        fn input(&mut self, pin: u8) -> Result<()> {
            let line = self
                .gpio
                .get(pin)
                .with_context(|| format!("failed to claim gpio {pin}"))?
                .into_input_pullup();
            self.lines.insert(pin, Line::In(line));
            Ok(())
        }

        fn write(&mut self, pin: u8, high: bool) -> Result<()> {
            match self.lines.get_mut(&pin) {
                Some(Line::Out(p)) => {
                    if high {
                        p.set_high();
                    } else {
                        p.set_low();
                    }
                    Ok(())
                }
                _ => Err(anyhow!("gpio {pin} not configured as output")),
            }
        }

        fn read(&mut self, pin: u8) -> Result<bool> {
            match self.lines.get(&pin) {
                Some(Line::In(p)) => Ok(p.is_high()),
                _ => Err(anyhow!("gpio {pin} not configured as input")),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Mock backend (development + tests — no hardware, levels kept in memory)
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockPins {
    levels: HashMap<u8, bool>,
    /// Every `write` in order, so tests can assert on the serialized
    /// clock/data/latch sequence.
    pub writes: Vec<(u8, bool)>,
}

impl MockPins {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drive an input level from a test or the demo harness.
    pub fn set_level(&mut self, pin: u8, high: bool) {
        self.levels.insert(pin, high);
    }

    pub fn level(&self, pin: u8) -> bool {
        self.levels.get(&pin).copied().unwrap_or(false)
    }
}

impl Pins for MockPins {
    fn output(&mut self, pin: u8) -> Result<()> {
        eprintln!("[mock-gpio] gpio {pin} configured as output (not wired)");
        self.levels.entry(pin).or_insert(false);
        Ok(())
    }

    fn input(&mut self, pin: u8) -> Result<()> {
        eprintln!("[mock-gpio] gpio {pin} configured as input (not wired)");
        self.levels.entry(pin).or_insert(false);
        Ok(())
    }

    fn write(&mut self, pin: u8, high: bool) -> Result<()> {
        self.levels.insert(pin, high);
        self.writes.push((pin, high));
        Ok(())
    }

    fn read(&mut self, pin: u8) -> Result<bool> {
        Ok(self.level(pin))
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_write_then_read_round_trips() {
        let mut pins = MockPins::new();
        pins.output(PIN_SR_LATCH).unwrap();
        pins.write(PIN_SR_LATCH, true).unwrap();
        assert!(pins.level(PIN_SR_LATCH));
        pins.write(PIN_SR_LATCH, false).unwrap();
        assert!(!pins.level(PIN_SR_LATCH));
    }

    #[test]
    fn mock_unwired_input_reads_low() {
        let mut pins = MockPins::new();
        pins.input(PIN_SENSOR1).unwrap();
        assert!(!pins.read(PIN_SENSOR1).unwrap());
        pins.set_level(PIN_SENSOR1, true);
        assert!(pins.read(PIN_SENSOR1).unwrap());
    }

    #[test]
    fn mock_records_write_order() {
        let mut pins = MockPins::new();
        pins.write(1, true).unwrap();
        pins.write(2, false).unwrap();
        assert_eq!(pins.writes, vec![(1, true), (2, false)]);
    }
}
