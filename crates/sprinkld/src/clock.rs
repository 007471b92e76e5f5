//! Wall-clock instants decomposed the way the program matcher consumes them.
//! The production loop builds one `Moment` per tick from the local clock;
//! tests construct them from literal dates so every calendar path is
//! deterministic.

use chrono::{DateTime, Datelike, Days, Local, NaiveDate, Timelike};

/// Days from the common era to 1970-01-01, used to derive the epoch day
/// number from a local calendar date.
const CE_TO_UNIX_DAYS: i64 = 719_163;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Moment {
    date: NaiveDate,
    /// Minutes from local midnight, `0..=1439`.
    pub minute_of_day: u16,
    /// Epoch seconds. Drives the per-second tick gate and all queue times.
    pub epoch: i64,
}

impl Moment {
    pub fn from_local(dt: DateTime<Local>) -> Self {
        Self {
            date: dt.date_naive(),
            minute_of_day: (dt.hour() * 60 + dt.minute()) as u16,
            epoch: dt.timestamp(),
        }
    }

    /// Build a moment from literal parts. The epoch is synthesized from the
    /// naive date-time as if it were UTC, which is all the core needs: the
    /// matcher works on calendar fields, the queue on second deltas.
    #[cfg(test)]
    pub fn from_ymd_hm(year: i32, month: u32, day: u32, hour: u32, min: u32) -> Self {
        let date = NaiveDate::from_ymd_opt(year, month, day).unwrap_or_default();
        let epoch = date
            .and_hms_opt(hour, min, 0)
            .unwrap_or_default()
            .and_utc()
            .timestamp();
        Self {
            date,
            minute_of_day: (hour * 60 + min) as u16,
            epoch,
        }
    }

    /// Shift by whole seconds, recomputing the calendar fields. Only valid
    /// for moments built with `from_ymd_hm`, whose epoch is naive; the
    /// production loop always rebuilds from the local clock instead.
    #[cfg(test)]
    pub fn plus_seconds(&self, secs: i64) -> Self {
        let midnight = self
            .date
            .and_hms_opt(0, 0, 0)
            .unwrap_or_default()
            .and_utc();
        let into_day = self.epoch - midnight.timestamp();
        let dt = midnight + chrono::Duration::seconds(into_day + secs);
        Self {
            date: dt.date_naive(),
            minute_of_day: (dt.hour() * 60 + dt.minute()) as u16,
            epoch: self.epoch + secs,
        }
    }

    /// Weekday with Monday = 0.
    pub fn weekday(&self) -> u8 {
        self.date.weekday().num_days_from_monday() as u8
    }

    pub fn day(&self) -> u8 {
        self.date.day() as u8
    }

    pub fn month(&self) -> u8 {
        self.date.month() as u8
    }

    /// Days since 1970-01-01 of the local calendar date.
    pub fn epoch_day(&self) -> i64 {
        self.date.num_days_from_ce() as i64 - CE_TO_UNIX_DAYS
    }

    /// True when tomorrow is in a different month.
    pub fn last_day_of_month(&self) -> bool {
        match self.date.checked_add_days(Days::new(1)) {
            Some(next) => next.month() != self.date.month(),
            None => false,
        }
    }

    /// The same minute of day, one calendar day earlier. Used for repeat
    /// series that started yesterday and run past midnight.
    pub fn yesterday(&self) -> Self {
        Self {
            date: self.date.pred_opt().unwrap_or(self.date),
            minute_of_day: self.minute_of_day,
            epoch: self.epoch - 86_400,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
