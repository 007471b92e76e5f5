//! Run admission: places station runs into the queue while enforcing
//! sequential-group ordering, applies weather scaling, and derives master
//! (pump) timing from the queue. The scheduler is a pure decision engine —
//! it never touches pins and never blocks; the controller translates its
//! output into shift-register bits once per tick.

use tracing::debug;

use crate::program::Program;
use crate::queue::{QueueItem, RunQueue};
use crate::station::{Station, PARALLEL_GROUP, SEQ_GROUPS};

/// Queue placement options for admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Respect sequential-group ordering.
    Normal,
    /// Start immediately regardless of group backlog.
    InsertFront,
    /// Clear the queue and the sequential stop times first.
    Replace,
}

pub struct Scheduler {
    pub queue: RunQueue,
    /// Minutes from local midnight, fed by the daemon's solar updater.
    pub sunrise_min: u16,
    pub sunset_min: u16,
    /// Watering percentage applied to weather-scaled programs.
    pub water_level: i64,
    /// Inter-station dwell added to sequential stop-time bumps.
    pub station_delay_s: i64,
    /// Positive master off-lags. Items bound to a master keep an extra tail
    /// past their end so the off-lag window can still see them.
    pub master_off_tails: [i64; 2],
    seq_stop: [i64; SEQ_GROUPS],
}

impl Default for Scheduler {
    fn default() -> Self {
        Self {
            queue: RunQueue::new(),
            sunrise_min: 360,
            sunset_min: 1080,
            water_level: 100,
            station_delay_s: 0,
            master_off_tails: [0, 0],
            seq_stop: [0; SEQ_GROUPS],
        }
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit one station run. Refused (false) when the station is out of
    /// range, disabled, already queued, or the duration is empty — all
    /// silent no-ops for the caller.
    pub fn schedule_station(
        &mut self,
        stations: &[Station],
        station: usize,
        program: u8,
        duration: i64,
        now: i64,
        place: Placement,
    ) -> bool {
        if place == Placement::Replace {
            self.stop_all();
        }
        let Some(st) = stations.get(station) else {
            return false;
        };
        if st.disabled || duration <= 0 || self.queue.station_queued(station) {
            return false;
        }

        let mut tail = 0;
        if st.master1_bound {
            tail = tail.max(self.master_off_tails[0]);
        }
        if st.master2_bound {
            tail = tail.max(self.master_off_tails[1]);
        }

        let (start, deq) = if place == Placement::InsertFront || st.group_id == PARALLEL_GROUP {
            (now, now + duration + tail)
        } else {
            let g = (st.group_id as usize).min(SEQ_GROUPS - 1);
            let start = now.max(self.seq_stop[g]);
            self.seq_stop[g] = start + duration + self.station_delay_s;
            (start, start + duration + tail)
        };

        debug!(station, program, start, duration, "run admitted");
        self.queue.enqueue(QueueItem {
            station,
            program,
            start,
            duration,
            deq,
        })
    }

    /// Effective duration after weather scaling. Runs shrunk below ten
    /// seconds at very low percentages are skipped outright.
    pub fn scaled_duration(&self, base: i64, use_weather: bool) -> i64 {
        if !use_weather {
            return base;
        }
        let adjusted = base * self.water_level / 100;
        if self.water_level < 20 && adjusted < 10 {
            0
        } else {
            adjusted
        }
    }

    /// Admit every station of a program with a non-zero duration, skipping
    /// those the caller's gate blocks. Returns the number admitted.
    pub fn schedule_program(
        &mut self,
        stations: &[Station],
        prog: &Program,
        program_id: u8,
        now: i64,
        mut blocked: impl FnMut(usize, &Station) -> bool,
    ) -> usize {
        let mut admitted = 0;
        for (sid, st) in stations.iter().enumerate() {
            let base = prog.durations.get(sid).copied().unwrap_or(0) as i64;
            if base == 0 || blocked(sid, st) {
                continue;
            }
            let duration = self.scaled_duration(base, prog.use_weather);
            if duration > 0
                && self.schedule_station(stations, sid, program_id, duration, now, Placement::Normal)
            {
                admitted += 1;
            }
        }
        admitted
    }

    /// True iff some queued item bound to this master satisfies
    /// `start - on_adj <= now < end + off_adj`. A 1-based master id of 0
    /// means "no master configured". The master station itself never
    /// contributes.
    pub fn master_should_be_on(
        &self,
        stations: &[Station],
        now: i64,
        master_index: usize,
        master_station_1b: usize,
        on_adj: i64,
        off_adj: i64,
    ) -> bool {
        if master_station_1b == 0 {
            return false;
        }
        self.queue.items().iter().any(|it| {
            if it.station == master_station_1b - 1 {
                return false;
            }
            let Some(st) = stations.get(it.station) else {
                return false;
            };
            let bound = if master_index == 0 {
                st.master1_bound
            } else {
                st.master2_bound
            };
            bound && it.start - on_adj <= now && now < it.end() + off_adj
        })
    }

    /// Drop every item past its dequeue time, then return the stations
    /// inside their watering window.
    pub fn process_queue(&mut self, now: i64) -> Vec<usize> {
        self.queue.remove_dequeueable(now);
        self.queue.active_station_ids(now)
    }

    /// Clear the queue and zero the sequential stop-time array.
    pub fn stop_all(&mut self) {
        self.queue.clear();
        self.seq_stop = [0; SEQ_GROUPS];
    }

    /// Raise sequential stop times to cover every still-queued future run,
    /// guarding later admissions against underflowing a cleared slot.
    pub fn raise_seq_stops(&mut self, stations: &[Station], now: i64) {
        for it in self.queue.items() {
            if it.end() <= now {
                continue;
            }
            let Some(st) = stations.get(it.station) else {
                continue;
            };
            if st.group_id == PARALLEL_GROUP {
                continue;
            }
            let g = (st.group_id as usize).min(SEQ_GROUPS - 1);
            self.seq_stop[g] = self.seq_stop[g].max(it.end() + self.station_delay_s);
        }
    }

    /// Per-station `(program, remaining, start, duration)` rows for the API;
    /// `(0, 0, 0, 0)` when not queued.
    pub fn program_status(&self, nstations: usize, now: i64) -> Vec<[i64; 4]> {
        (0..nstations)
            .map(|sid| match self.queue.find_by_station(sid) {
                Some(it) => [
                    it.program as i64,
                    (it.end() - now).max(0),
                    it.start,
                    it.duration,
                ],
                None => [0, 0, 0, 0],
            })
            .collect()
    }

    #[cfg(test)]
    pub fn seq_stop(&self, group: usize) -> i64 {
        self.seq_stop[group]
    }

    #[cfg(test)]
    pub fn zero_seq_stops(&mut self) {
        self.seq_stop = [0; SEQ_GROUPS];
    }
}

// ===========================================================================
// Tests
// ===========================================================================
