//! Recurring watering programs: wire flag byte, 16-bit start-time encoding
//! with solar offsets, and the minute-resolution matcher the controller runs
//! on every minute boundary.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::clock::Moment;
use crate::error::ControlError;

pub const MAX_PROGRAMS: usize = 40;
/// Reserved program id for manual station runs.
pub const MANUAL_PROGRAM: u8 = 99;
/// Reserved program id for run-once admissions.
pub const RUN_ONCE_PROGRAM: u8 = 254;
/// Cap on any single station run, in seconds (18 hours).
pub const MAX_DURATION_S: i64 = 64_800;

// Start-time slot encoding.
pub const START_DISABLED: u16 = 1 << 15;
pub const START_SUNRISE: u16 = 1 << 14;
pub const START_SUNSET: u16 = 1 << 13;
pub const START_NEGATIVE: u16 = 1 << 12;
pub const START_OFFSET_MASK: u16 = 0x7ff;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgramType {
    Weekly,
    SingleRun,
    Monthly,
    Interval,
}

impl ProgramType {
    fn from_bits(v: u8) -> Self {
        match v & 0x3 {
            1 => ProgramType::SingleRun,
            2 => ProgramType::Monthly,
            3 => ProgramType::Interval,
            _ => ProgramType::Weekly,
        }
    }

    fn bits(self) -> u8 {
        match self {
            ProgramType::Weekly => 0,
            ProgramType::SingleRun => 1,
            ProgramType::Monthly => 2,
            ProgramType::Interval => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OddEven {
    None,
    Odd,
    Even,
}

impl OddEven {
    fn from_bits(v: u8) -> Self {
        match v & 0x3 {
            1 => OddEven::Odd,
            2 => OddEven::Even,
            _ => OddEven::None,
        }
    }

    fn bits(self) -> u8 {
        match self {
            OddEven::None => 0,
            OddEven::Odd => 1,
            OddEven::Even => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub name: String,
    pub enabled: bool,
    pub use_weather: bool,
    pub ptype: ProgramType,
    pub oddeven: OddEven,
    /// True: the four slots are independent fixed start times. False:
    /// slot 0 is the series start, slot 1 the repeat count, slot 2 the
    /// repeat interval in minutes.
    pub fixed_starts: bool,
    /// Interpretation depends on `ptype`; see the matcher.
    pub days: [u8; 2],
    pub start_times: [u16; 4],
    /// Seconds per station; zero means "not in this program".
    pub durations: Vec<u16>,
    pub date_range_enabled: bool,
    /// `(month << 5) | day` endpoints; wraps the year when from > to.
    pub date_range: [u16; 2],
}

impl Default for Program {
    fn default() -> Self {
        Self {
            name: "Program".into(),
            enabled: true,
            use_weather: false,
            ptype: ProgramType::Weekly,
            oddeven: OddEven::None,
            fixed_starts: false,
            days: [0, 0],
            start_times: [START_DISABLED; 4],
            durations: Vec::new(),
            date_range_enabled: false,
            date_range: [0, 0],
        }
    }
}

/// Decode one start-time slot into minutes from local midnight. `None`
/// when the slot is disabled.
pub fn decode_start(encoded: u16, sunrise: u16, sunset: u16) -> Option<i32> {
    if encoded & START_DISABLED != 0 {
        return None;
    }
    let mut offset = (encoded & START_OFFSET_MASK) as i32;
    if encoded & START_NEGATIVE != 0 {
        offset = -offset;
    }
    if encoded & START_SUNRISE != 0 {
        Some((sunrise as i32 + offset).max(0))
    } else if encoded & START_SUNSET != 0 {
        Some((sunset as i32 + offset).clamp(0, 1439))
    } else {
        Some((encoded & START_OFFSET_MASK) as i32)
    }
}

impl Program {
    // ── Wire flag byte ───────────────────────────────────────────

    pub fn flag_byte(&self) -> u8 {
        (self.enabled as u8)
            | (self.use_weather as u8) << 1
            | self.oddeven.bits() << 2
            | self.ptype.bits() << 4
            | (self.fixed_starts as u8) << 6
            | (self.date_range_enabled as u8) << 7
    }

    pub fn apply_flag_byte(&mut self, flag: u8) {
        self.enabled = flag & 0x01 != 0;
        self.use_weather = flag & 0x02 != 0;
        self.oddeven = OddEven::from_bits(flag >> 2);
        self.ptype = ProgramType::from_bits(flag >> 4);
        self.fixed_starts = flag & 0x40 != 0;
        self.date_range_enabled = flag & 0x80 != 0;
    }

    // ── Matching ─────────────────────────────────────────────────

    /// Minute-resolution match. Returns the 1-based run number within the
    /// day, or `None`.
    pub fn check_match(&self, now: &Moment, sunrise: u16, sunset: u16) -> Option<u8> {
        if !self.enabled {
            return None;
        }
        if self.matches_day(now) {
            if let Some(n) = self.matches_time(now.minute_of_day as i32, sunrise, sunset) {
                return Some(n);
            }
        }
        // A repeating series that started yesterday may still be producing
        // runs past midnight; re-test against yesterday's calendar with the
        // minute pushed out by a day.
        if !self.fixed_starts && self.start_times[2] > 0 {
            let yday = now.yesterday();
            if self.matches_day(&yday) {
                return self.matches_time(now.minute_of_day as i32 + 1440, sunrise, sunset);
            }
        }
        None
    }

    fn matches_day(&self, m: &Moment) -> bool {
        let type_match = match self.ptype {
            ProgramType::Weekly => self.days[0] & (1 << m.weekday()) != 0,
            ProgramType::SingleRun => {
                m.epoch_day() == ((self.days[0] as i64) << 8 | self.days[1] as i64)
            }
            ProgramType::Monthly => {
                let dom = self.days[0] & 0x1f;
                if dom == 0 {
                    m.last_day_of_month()
                } else {
                    dom == m.day()
                }
            }
            ProgramType::Interval => {
                let interval = self.days[1] as i64;
                interval > 0 && m.epoch_day().rem_euclid(interval) == self.days[0] as i64
            }
        };
        if !type_match {
            return false;
        }

        match self.oddeven {
            OddEven::None => {}
            OddEven::Odd => {
                // Day 31 and Feb 29 would misalign the odd/even cadence.
                if m.day() == 31 || (m.month() == 2 && m.day() == 29) || m.day() % 2 != 1 {
                    return false;
                }
            }
            OddEven::Even => {
                if m.day() % 2 != 0 {
                    return false;
                }
            }
        }

        if self.date_range_enabled {
            let code = (m.month() as u16) << 5 | m.day() as u16;
            let [from, to] = self.date_range;
            let in_range = if from <= to {
                code >= from && code <= to
            } else {
                // Range wraps the year, e.g. Nov..Feb.
                code >= from || code <= to
            };
            if !in_range {
                return false;
            }
        }
        true
    }

    fn matches_time(&self, minute: i32, sunrise: u16, sunset: u16) -> Option<u8> {
        if self.fixed_starts {
            for (i, &slot) in self.start_times.iter().enumerate() {
                if decode_start(slot, sunrise, sunset) == Some(minute) {
                    return Some(i as u8 + 1);
                }
            }
            return None;
        }

        let start = decode_start(self.start_times[0], sunrise, sunset)?;
        if minute < start {
            return None;
        }
        let repeat_count = self.start_times[1] as i32;
        let interval = self.start_times[2] as i32;
        if interval == 0 {
            return (minute == start).then_some(1);
        }
        let diff = minute - start;
        if diff % interval != 0 {
            return None;
        }
        let k = diff / interval;
        (k <= repeat_count).then(|| (k + 1).min(255) as u8)
    }

    // ── Legacy wire shape ────────────────────────────────────────

    /// `[flag, days0, days1, [st;4], [dur;n], name, [dren, from, to]]`,
    /// durations zero-padded to the station count.
    pub fn to_wire(&self, nstations: usize) -> Value {
        let mut durs: Vec<u16> = self.durations.clone();
        durs.resize(nstations, 0);
        json!([
            self.flag_byte(),
            self.days[0],
            self.days[1],
            self.start_times,
            durs,
            self.name,
            [
                self.date_range_enabled as u16,
                self.date_range[0],
                self.date_range[1]
            ],
        ])
    }

    pub fn from_wire(v: &Value, nstations: usize) -> Result<Self, ControlError> {
        let arr = v
            .as_array()
            .ok_or_else(|| ControlError::Malformed("program data is not an array".into()))?;
        if arr.len() < 5 {
            return Err(ControlError::Malformed("program array too short".into()));
        }

        let mut p = Program::default();
        p.apply_flag_byte(wire_u8(&arr[0], "flag")?);
        p.days = [wire_u8(&arr[1], "days0")?, wire_u8(&arr[2], "days1")?];

        let starts = arr[3]
            .as_array()
            .ok_or_else(|| ControlError::Malformed("start times not an array".into()))?;
        if starts.len() != 4 {
            return Err(ControlError::Malformed("expected 4 start times".into()));
        }
        for (i, s) in starts.iter().enumerate() {
            p.start_times[i] = wire_u16(s, "start time")?;
        }

        let durs = arr[4]
            .as_array()
            .ok_or_else(|| ControlError::Malformed("durations not an array".into()))?;
        if durs.len() > nstations {
            return Err(ControlError::OutOfRange);
        }
        p.durations = durs
            .iter()
            .map(|d| wire_duration(d))
            .collect::<Result<Vec<_>, _>>()?;
        p.durations.resize(nstations, 0);

        if let Some(name) = arr.get(5).and_then(Value::as_str) {
            p.name = name.to_string();
        }
        if let Some(dr) = arr.get(6).and_then(Value::as_array) {
            if dr.len() != 3 {
                return Err(ControlError::Malformed("date range needs 3 values".into()));
            }
            p.date_range_enabled = wire_u16(&dr[0], "date range flag")? != 0;
            p.date_range = [wire_u16(&dr[1], "date range")?, wire_u16(&dr[2], "date range")?];
        }
        Ok(p)
    }
}

fn wire_u8(v: &Value, what: &str) -> Result<u8, ControlError> {
    v.as_u64()
        .filter(|&n| n <= u8::MAX as u64)
        .map(|n| n as u8)
        .ok_or_else(|| ControlError::Malformed(format!("bad {what}")))
}

fn wire_u16(v: &Value, what: &str) -> Result<u16, ControlError> {
    v.as_u64()
        .filter(|&n| n <= u16::MAX as u64)
        .map(|n| n as u16)
        .ok_or_else(|| ControlError::Malformed(format!("bad {what}")))
}

fn wire_duration(v: &Value) -> Result<u16, ControlError> {
    let n = v
        .as_u64()
        .ok_or_else(|| ControlError::Malformed("bad duration".into()))?;
    Ok(n.min(MAX_DURATION_S as u64) as u16)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn weekly(days: u8, starts: [u16; 4], fixed: bool) -> Program {
        Program {
            ptype: ProgramType::Weekly,
            days: [days, 0],
            start_times: starts,
            fixed_starts: fixed,
            ..Program::default()
        }
    }

    // -- Start-time decoding ----------------------------------------------

    #[test]
    fn decode_absolute_minutes() {
        assert_eq!(decode_start(390, 360, 1080), Some(390));
        assert_eq!(decode_start(0, 360, 1080), Some(0));
    }

    #[test]
    fn decode_disabled_slot() {
        assert_eq!(decode_start(START_DISABLED, 360, 1080), None);
        assert_eq!(decode_start(START_DISABLED | 390, 360, 1080), None);
    }

    #[test]
    fn decode_sunrise_relative() {
        assert_eq!(decode_start(START_SUNRISE | 30, 360, 1080), Some(390));
        assert_eq!(
            decode_start(START_SUNRISE | START_NEGATIVE | 30, 360, 1080),
            Some(330)
        );
        // Clamped at midnight going negative.
        assert_eq!(
            decode_start(START_SUNRISE | START_NEGATIVE | 400, 360, 1080),
            Some(0)
        );
    }

    #[test]
    fn decode_sunset_relative_clamps_to_day_end() {
        assert_eq!(decode_start(START_SUNSET | 60, 1080, 1420), Some(1439));
        assert_eq!(
            decode_start(START_SUNSET | START_NEGATIVE | 60, 360, 1080),
            Some(1020)
        );
    }

    // -- Flag byte ---------------------------------------------------------

    #[test]
    fn flag_byte_round_trip() {
        let mut p = Program::default();
        p.enabled = true;
        p.use_weather = true;
        p.oddeven = OddEven::Even;
        p.ptype = ProgramType::Interval;
        p.fixed_starts = true;
        p.date_range_enabled = true;
        let flag = p.flag_byte();
        assert_eq!(flag, 0b1111_1011);

        let mut q = Program::default();
        q.apply_flag_byte(flag);
        assert_eq!(q.flag_byte(), flag);
        assert_eq!(q.ptype, ProgramType::Interval);
        assert_eq!(q.oddeven, OddEven::Even);
    }

    // -- Day matching ------------------------------------------------------

    #[test]
    fn weekly_matches_set_weekday_bits() {
        // Mon + Wed (bits 0 and 2).
        let p = weekly(0b0000_0101, [390, 0, 0, 0], false);
        let monday = Moment::from_ymd_hm(2024, 6, 3, 6, 30);
        let tuesday = Moment::from_ymd_hm(2024, 6, 4, 6, 30);
        let wednesday = Moment::from_ymd_hm(2024, 6, 5, 6, 30);
        assert_eq!(p.check_match(&monday, 360, 1080), Some(1));
        assert_eq!(p.check_match(&tuesday, 360, 1080), None);
        assert_eq!(p.check_match(&wednesday, 360, 1080), Some(1));
    }

    #[test]
    fn single_run_matches_its_epoch_day_only() {
        let day = Moment::from_ymd_hm(2024, 6, 3, 8, 0);
        let ed = day.epoch_day();
        let p = Program {
            ptype: ProgramType::SingleRun,
            days: [(ed >> 8) as u8, (ed & 0xff) as u8],
            start_times: [480, 0, 0, 0],
            ..Program::default()
        };
        assert_eq!(p.check_match(&day, 360, 1080), Some(1));
        let next = Moment::from_ymd_hm(2024, 6, 4, 8, 0);
        assert_eq!(p.check_match(&next, 360, 1080), None);
    }

    #[test]
    fn monthly_day_zero_means_last_day() {
        let p = Program {
            ptype: ProgramType::Monthly,
            days: [0, 0],
            start_times: [600, 0, 0, 0],
            ..Program::default()
        };
        let leap_end = Moment::from_ymd_hm(2024, 2, 29, 10, 0);
        let mid = Moment::from_ymd_hm(2024, 2, 15, 10, 0);
        assert_eq!(p.check_match(&leap_end, 360, 1080), Some(1));
        assert_eq!(p.check_match(&mid, 360, 1080), None);
    }

    #[test]
    fn monthly_specific_day() {
        let p = Program {
            ptype: ProgramType::Monthly,
            days: [15, 0],
            start_times: [600, 0, 0, 0],
            ..Program::default()
        };
        assert_eq!(
            p.check_match(&Moment::from_ymd_hm(2024, 5, 15, 10, 0), 360, 1080),
            Some(1)
        );
        assert_eq!(
            p.check_match(&Moment::from_ymd_hm(2024, 5, 16, 10, 0), 360, 1080),
            None
        );
    }

    #[test]
    fn interval_uses_epoch_day_remainder() {
        let day = Moment::from_ymd_hm(2024, 6, 3, 7, 0);
        let rem = (day.epoch_day() % 3) as u8;
        let p = Program {
            ptype: ProgramType::Interval,
            days: [rem, 3],
            start_times: [420, 0, 0, 0],
            ..Program::default()
        };
        assert_eq!(p.check_match(&day, 360, 1080), Some(1));
        assert_eq!(
            p.check_match(&Moment::from_ymd_hm(2024, 6, 4, 7, 0), 360, 1080),
            None
        );
        assert_eq!(
            p.check_match(&Moment::from_ymd_hm(2024, 6, 6, 7, 0), 360, 1080),
            Some(1)
        );
    }

    #[test]
    fn interval_zero_never_matches() {
        let p = Program {
            ptype: ProgramType::Interval,
            days: [0, 0],
            start_times: [420, 0, 0, 0],
            ..Program::default()
        };
        assert_eq!(
            p.check_match(&Moment::from_ymd_hm(2024, 6, 3, 7, 0), 360, 1080),
            None
        );
    }

    #[test]
    fn odd_restriction_skips_even_days_and_calendar_hazards() {
        let mut p = weekly(0x7f, [60, 0, 0, 0], false);
        p.oddeven = OddEven::Odd;
        assert_eq!(
            p.check_match(&Moment::from_ymd_hm(2024, 6, 3, 1, 0), 360, 1080),
            Some(1)
        );
        assert_eq!(
            p.check_match(&Moment::from_ymd_hm(2024, 6, 4, 1, 0), 360, 1080),
            None
        );
        // Day 31 and Feb 29 are excluded even though they are odd days.
        assert_eq!(
            p.check_match(&Moment::from_ymd_hm(2024, 5, 31, 1, 0), 360, 1080),
            None
        );
        assert_eq!(
            p.check_match(&Moment::from_ymd_hm(2024, 2, 29, 1, 0), 360, 1080),
            None
        );
    }

    #[test]
    fn even_restriction() {
        let mut p = weekly(0x7f, [60, 0, 0, 0], false);
        p.oddeven = OddEven::Even;
        assert_eq!(
            p.check_match(&Moment::from_ymd_hm(2024, 6, 4, 1, 0), 360, 1080),
            Some(1)
        );
        assert_eq!(
            p.check_match(&Moment::from_ymd_hm(2024, 6, 3, 1, 0), 360, 1080),
            None
        );
    }

    #[test]
    fn date_range_wraps_the_year() {
        let mut p = weekly(0x7f, [60, 0, 0, 0], false);
        p.date_range_enabled = true;
        // Nov 1 .. Feb 15.
        p.date_range = [(11 << 5) | 1, (2 << 5) | 15];
        assert_eq!(
            p.check_match(&Moment::from_ymd_hm(2024, 12, 10, 1, 0), 360, 1080),
            Some(1)
        );
        assert_eq!(
            p.check_match(&Moment::from_ymd_hm(2024, 2, 10, 1, 0), 360, 1080),
            Some(1)
        );
        assert_eq!(
            p.check_match(&Moment::from_ymd_hm(2024, 6, 10, 1, 0), 360, 1080),
            None
        );
    }

    // -- Time matching -----------------------------------------------------

    #[test]
    fn sunrise_relative_repeating_start() {
        // Mon/Wed, sunrise + 30 min, no repeats.
        let p = weekly(0b0000_0101, [START_SUNRISE | 30, 0, 0, 0], false);
        let at_630 = Moment::from_ymd_hm(2024, 6, 3, 6, 30);
        let at_631 = Moment::from_ymd_hm(2024, 6, 3, 6, 31);
        assert_eq!(p.check_match(&at_630, 360, 1080), Some(1));
        assert_eq!(p.check_match(&at_631, 360, 1080), None);
    }

    #[test]
    fn fixed_slots_return_slot_number() {
        let p = weekly(0x7f, [300, 600, START_DISABLED, 900], true);
        let m = |h, min| Moment::from_ymd_hm(2024, 6, 3, h, min);
        assert_eq!(p.check_match(&m(5, 0), 360, 1080), Some(1));
        assert_eq!(p.check_match(&m(10, 0), 360, 1080), Some(2));
        assert_eq!(p.check_match(&m(15, 0), 360, 1080), Some(4));
        assert_eq!(p.check_match(&m(7, 0), 360, 1080), None);
    }

    #[test]
    fn repeating_series_counts_runs() {
        // Start 06:00, 3 repeats every 90 min: 06:00 07:30 09:00 10:30.
        let p = weekly(0x7f, [360, 3, 90, 0], false);
        let m = |h, min| Moment::from_ymd_hm(2024, 6, 3, h, min);
        assert_eq!(p.check_match(&m(6, 0), 360, 1080), Some(1));
        assert_eq!(p.check_match(&m(7, 30), 360, 1080), Some(2));
        assert_eq!(p.check_match(&m(10, 30), 360, 1080), Some(4));
        assert_eq!(p.check_match(&m(12, 0), 360, 1080), None);
        assert_eq!(p.check_match(&m(6, 1), 360, 1080), None);
    }

    #[test]
    fn repeating_series_carries_past_midnight() {
        // Tuesdays only: start 23:00, 4 repeats every 60 min. The 01:00
        // Wednesday run belongs to Tuesday's series.
        let p = weekly(0b0000_0010, [1380, 4, 60, 0], false);
        let wed_0100 = Moment::from_ymd_hm(2024, 6, 5, 1, 0);
        assert_eq!(p.check_match(&wed_0100, 360, 1080), Some(3));
        // Past the series end.
        let wed_0400 = Moment::from_ymd_hm(2024, 6, 5, 4, 0);
        assert_eq!(p.check_match(&wed_0400, 360, 1080), None);
    }

    #[test]
    fn disabled_program_never_matches() {
        let mut p = weekly(0x7f, [390, 0, 0, 0], false);
        p.enabled = false;
        assert_eq!(
            p.check_match(&Moment::from_ymd_hm(2024, 6, 3, 6, 30), 360, 1080),
            None
        );
    }

    // -- Wire shape --------------------------------------------------------

    #[test]
    fn wire_round_trip_pads_durations() {
        let mut p = Program::default();
        p.name = "Beds".into();
        p.enabled = true;
        p.days = [0b0101_0101, 0];
        p.start_times = [START_SUNRISE | 15, 2, 45, START_DISABLED];
        p.durations = vec![300, 0, 600];
        p.date_range_enabled = true;
        p.date_range = [(3 << 5) | 1, (10 << 5) | 31];

        let wire = p.to_wire(8);
        assert_eq!(wire[4].as_array().unwrap().len(), 8);

        let back = Program::from_wire(&wire, 8).unwrap();
        assert_eq!(back.name, "Beds");
        assert_eq!(back.flag_byte(), p.flag_byte());
        assert_eq!(back.start_times, p.start_times);
        assert_eq!(&back.durations[..3], &[300, 0, 600]);
        assert_eq!(back.date_range, p.date_range);
    }

    #[test]
    fn wire_rejects_wrong_shapes() {
        assert!(matches!(
            Program::from_wire(&json!({"flag": 1}), 8),
            Err(ControlError::Malformed(_))
        ));
        assert!(matches!(
            Program::from_wire(&json!([1, 0, 0, [0, 0, 0], [0]]), 8),
            Err(ControlError::Malformed(_))
        ));
        // More durations than stations.
        assert!(matches!(
            Program::from_wire(&json!([1, 0, 0, [0, 0, 0, 0], [60, 60, 60]]), 2),
            Err(ControlError::OutOfRange)
        ));
    }
}
