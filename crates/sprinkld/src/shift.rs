//! In-memory bit image of the stacked 74HC595 boards plus the serial
//! shift-out. Bits are toggled freely while the scheduler computes the target
//! set; serialization to the pins happens exactly once per tick via `apply`.

use anyhow::Result;

use crate::gpio::Pins;

pub const STATIONS_PER_BOARD: usize = 8;
pub const MAX_BOARDS: usize = 25;
pub const MAX_STATIONS: usize = MAX_BOARDS * STATIONS_PER_BOARD;

/// What `set_bit` did to the in-memory image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitChange {
    Changed(Edge),
    NoChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    TurnedOn,
    TurnedOff,
}

pub struct ShiftRegister {
    bits: [u8; MAX_BOARDS],
    latch: u8,
    data: u8,
    clock: u8,
    /// Output-enable pin, active low.
    noe: u8,
}

impl ShiftRegister {
    pub fn new(latch: u8, data: u8, clock: u8, noe: u8) -> Self {
        Self {
            bits: [0; MAX_BOARDS],
            latch,
            data,
            clock,
            noe,
        }
    }

    /// Configure the four pins as outputs, drive latch high and enable the
    /// outputs (output-enable is active low).
    pub fn setup(&self, pins: &mut dyn Pins) -> Result<()> {
        pins.output(self.latch)?;
        pins.output(self.data)?;
        pins.output(self.clock)?;
        pins.output(self.noe)?;
        pins.write(self.latch, true)?;
        pins.write(self.noe, false)?;
        Ok(())
    }

    /// Update the in-memory bit only; hardware is untouched until `apply`.
    pub fn set_bit(&mut self, station: usize, on: bool) -> BitChange {
        if station >= MAX_STATIONS {
            return BitChange::NoChange;
        }
        let board = station / STATIONS_PER_BOARD;
        let mask = 1u8 << (station % STATIONS_PER_BOARD);
        let was = self.bits[board] & mask != 0;
        if was == on {
            return BitChange::NoChange;
        }
        if on {
            self.bits[board] |= mask;
            BitChange::Changed(Edge::TurnedOn)
        } else {
            self.bits[board] &= !mask;
            BitChange::Changed(Edge::TurnedOff)
        }
    }

    pub fn get_bit(&self, station: usize) -> bool {
        if station >= MAX_STATIONS {
            return false;
        }
        self.bits[station / STATIONS_PER_BOARD] & (1 << (station % STATIONS_PER_BOARD)) != 0
    }

    pub fn clear_all(&mut self) {
        self.bits = [0; MAX_BOARDS];
    }

    /// Board bytes for the wire `sbits` array.
    pub fn board_bytes(&self, boards: usize) -> Vec<u8> {
        self.bits[..boards.min(MAX_BOARDS)].to_vec()
    }

    /// Shift the image out MSB-first from the highest board down to board
    /// zero, then pulse latch high. With `enabled` false, zeros are shifted
    /// regardless of the in-memory bits (device-disabled and shutdown paths).
    /// Data is driven while the clock is low, valid before the rising edge.
    pub fn apply(&self, pins: &mut dyn Pins, enabled: bool) -> Result<()> {
        pins.write(self.latch, false)?;
        for board in (0..MAX_BOARDS).rev() {
            let byte = if enabled { self.bits[board] } else { 0 };
            for bit in (0..8).rev() {
                pins.write(self.clock, false)?;
                pins.write(self.data, byte & (1 << bit) != 0)?;
                pins.write(self.clock, true)?;
            }
        }
        pins.write(self.latch, true)?;
        Ok(())
    }

    /// Station ids whose bit is currently set, ascending.
    pub fn active_stations(&self) -> impl Iterator<Item = usize> + '_ {
        (0..MAX_STATIONS).filter(|&s| self.get_bit(s))
    }
}

// ===========================================================================
// Tests
// ===========================================================================
