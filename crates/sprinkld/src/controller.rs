//! Controller loop: one tick per real second. Each tick runs a fixed
//! sequence — rain-delay window, sensor polls, minute-boundary program
//! matching, pause countdown, queue → active set, station and master bits,
//! change detection — and serializes the result to the shift register exactly
//! once. Ticks never raise across the loop; structured events flow out for
//! the daemon to route to the log store, telemetry, and station effectors.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use tracing::info;

use crate::clock::Moment;
use crate::error::ControlError;
use crate::gpio::{
    Pins, PIN_SENSOR1, PIN_SENSOR2, PIN_SR_CLOCK, PIN_SR_DATA, PIN_SR_DATA_ALT, PIN_SR_LATCH,
    PIN_SR_NOE,
};
use crate::options::Options;
use crate::program::{
    Program, ProgramType, MANUAL_PROGRAM, MAX_DURATION_S, MAX_PROGRAMS, RUN_ONCE_PROGRAM,
};
use crate::scheduler::{Placement, Scheduler};
use crate::sensor::{Contact, Sensor, SensorKind};
use crate::shift::{BitChange, Edge, ShiftRegister};
use crate::station::{Station, StationKind};

/// Pseudo station id base for sensor log records.
pub const SENSOR_LOG_STATION: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Program,
    Manual,
    RunOnce,
    Sensor,
    /// Flow metering is out of scope; the record type stays reserved.
    #[allow(dead_code)]
    Flow,
}

impl RecordKind {
    pub fn from_program(pid: u8) -> Self {
        match pid {
            MANUAL_PROGRAM => RecordKind::Manual,
            RUN_ONCE_PROGRAM => RecordKind::RunOnce,
            _ => RecordKind::Program,
        }
    }

    pub fn wire(self) -> u8 {
        match self {
            RecordKind::Program => 0,
            RecordKind::Manual => 1,
            RecordKind::RunOnce => 2,
            RecordKind::Sensor => 3,
            RecordKind::Flow => 4,
        }
    }
}

/// A finished (or sensor) run for the daily log store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub program: u8,
    pub station: usize,
    pub duration: i64,
    pub end: i64,
    pub kind: RecordKind,
}

#[derive(Debug, Clone, Copy)]
pub struct SensorChange {
    /// 1-based sensor number.
    pub sensor: u8,
    pub active: bool,
    pub at: i64,
}

/// Everything a tick produced for the daemon's sinks.
#[derive(Debug, Default)]
pub struct TickEvents {
    pub completed: Vec<RunRecord>,
    pub sensor_changes: Vec<SensorChange>,
    /// Every output edge this tick, masters included.
    pub valve_changes: Vec<(usize, bool)>,
    /// Actuations delegated to the station-kind effector.
    pub kind_effects: Vec<(usize, StationKind, bool)>,
}

pub struct Controller {
    pub options: Options,
    pub stations: Vec<Station>,
    pub programs: Vec<Program>,
    pub scheduler: Scheduler,
    shift: ShiftRegister,
    pins: Box<dyn Pins + Send>,
    sensors: [Option<Sensor>; 2],

    rain_delay_stop: i64,
    rain_delayed: bool,
    paused: bool,
    pause_timer: i64,
    last_tick_second: i64,
    last_checked_minute: i32,
    prev_running: HashSet<usize>,
    /// Program id and on-time of currently watering stations, kept so a
    /// station cleared from the queue can still produce a faithful record.
    active_since: HashMap<usize, (u8, i64)>,
    last_run: Option<RunRecord>,
}

impl Controller {
    pub fn new(
        options: Options,
        stations: Vec<Station>,
        programs: Vec<Program>,
        pins: Box<dyn Pins + Send>,
    ) -> Self {
        let mut ctl = Self {
            options,
            stations,
            programs,
            scheduler: Scheduler::new(),
            shift: ShiftRegister::new(PIN_SR_LATCH, PIN_SR_DATA, PIN_SR_CLOCK, PIN_SR_NOE),
            pins,
            sensors: [None, None],
            rain_delay_stop: 0,
            rain_delayed: false,
            paused: false,
            pause_timer: 0,
            last_tick_second: i64::MIN,
            last_checked_minute: -1,
            prev_running: HashSet::new(),
            active_since: HashMap::new(),
            last_run: None,
        };
        ctl.sync_derived_state();
        ctl
    }

    /// Configure pins and prime the shift register. Called once at boot.
    pub fn setup(&mut self) -> Result<()> {
        self.shift.setup(self.pins.as_mut())?;
        for sensor in self.sensors.iter().flatten() {
            self.pins.input(sensor.pin)?;
        }
        Ok(())
    }

    /// Switch the shift-register data line to the alternate BCM pin used by
    /// older board revisions. Must be called before `setup`.
    pub fn use_alt_data_pin(&mut self) {
        self.shift = ShiftRegister::new(PIN_SR_LATCH, PIN_SR_DATA_ALT, PIN_SR_CLOCK, PIN_SR_NOE);
    }

    /// Re-derive everything that hangs off the option table: scheduler
    /// scaling, the exposed station count, and the sensor debouncers.
    /// Called at boot and after any `/co` mutation.
    pub fn apply_options(&mut self) -> Result<(), ControlError> {
        self.sync_derived_state();
        for sensor in self.sensors.iter().flatten() {
            self.pins.input(sensor.pin)?;
        }
        Ok(())
    }

    fn sync_derived_state(&mut self) {
        self.scheduler.water_level = self.options.water_level();
        self.scheduler.station_delay_s = self.options.station_delay();
        self.scheduler.master_off_tails =
            [self.options.master(0).2.max(0), self.options.master(1).2.max(0)];

        let n = self.options.num_stations();
        if self.stations.len() < n {
            for id in self.stations.len()..n {
                self.stations.push(Station::numbered(id));
            }
        } else {
            self.stations.truncate(n);
        }

        for idx in 0..2 {
            let (kind, contact, on_delay, off_delay) = self.options.sensor(idx);
            let kind = SensorKind::from_wire(kind);
            self.sensors[idx] = if kind == SensorKind::None {
                None
            } else {
                let pin = if idx == 0 { PIN_SENSOR1 } else { PIN_SENSOR2 };
                let mut s = Sensor::new(pin, kind, Contact::from_wire(contact), on_delay, off_delay);
                // Keep the debounced level across reconfiguration so an
                // option tweak cannot momentarily unblock watering.
                if let Some(old) = &self.sensors[idx] {
                    s.active = old.active;
                    s.last_active_time = old.last_active_time;
                }
                Some(s)
            };
        }
    }

    // ── Tick ─────────────────────────────────────────────────────

    /// Advance the controller by one second. Calling twice within the same
    /// integer second is a no-op the second time.
    pub fn tick(&mut self, now: &Moment) -> Result<TickEvents> {
        let mut ev = TickEvents::default();
        if now.epoch == self.last_tick_second {
            return Ok(ev);
        }
        self.last_tick_second = now.epoch;

        // Rain-delay window.
        if !self.rain_delayed && self.rain_delay_stop > now.epoch {
            self.rain_delayed = true;
            info!(until = self.rain_delay_stop, "rain delay active");
        } else if self.rain_delayed && now.epoch >= self.rain_delay_stop {
            self.rain_delayed = false;
            self.rain_delay_stop = 0;
            info!("rain delay expired");
        }

        self.poll_sensors(now.epoch, &mut ev)?;

        // Minute boundary: evaluate programs exactly once per observed
        // minute. Minutes missed across a system sleep are not back-filled.
        let minute = now.minute_of_day as i32;
        if minute != self.last_checked_minute {
            self.last_checked_minute = minute;
            self.match_programs(now);
        }

        // Pause countdown; the queue itself was shifted by pause/resume.
        if self.paused {
            self.pause_timer -= 1;
            if self.pause_timer <= 0 {
                self.paused = false;
                self.pause_timer = 0;
                info!("pause expired");
            }
        }

        let active: HashSet<usize> = if self.paused {
            HashSet::new()
        } else {
            self.scheduler.process_queue(now.epoch).into_iter().collect()
        };

        // Station bits, master slots excluded.
        let m1 = self.options.master(0);
        let m2 = self.options.master(1);
        let master_ids = [m1.0.checked_sub(1), m2.0.checked_sub(1)];
        for sid in 0..self.stations.len() {
            if master_ids.iter().flatten().any(|&m| m == sid) {
                continue;
            }
            self.set_output(sid, active.contains(&sid), &mut ev);
        }
        for (mi, (msid, on_adj, off_adj)) in [m1, m2].into_iter().enumerate() {
            if msid == 0 {
                continue;
            }
            let on = !self.paused
                && self
                    .scheduler
                    .master_should_be_on(&self.stations, now.epoch, mi, msid, on_adj, off_adj);
            self.set_output(msid - 1, on, &mut ev);
        }

        // Completed-run records from the diff against the previous tick.
        for sid in self.prev_running.clone() {
            if active.contains(&sid) {
                continue;
            }
            if let Some((program, started)) = self.active_since.remove(&sid) {
                let rec = RunRecord {
                    program,
                    station: sid,
                    duration: now.epoch - started,
                    end: now.epoch,
                    kind: RecordKind::from_program(program),
                };
                info!(
                    station = sid,
                    program = rec.program,
                    duration = rec.duration,
                    "run completed"
                );
                self.last_run = Some(rec.clone());
                ev.completed.push(rec);
            }
        }
        for &sid in &active {
            if !self.prev_running.contains(&sid) {
                let program = self
                    .scheduler
                    .queue
                    .find_by_station(sid)
                    .map(|it| it.program)
                    .unwrap_or(0);
                self.active_since.insert(sid, (program, now.epoch));
            }
        }
        self.prev_running = active;

        // Serialize once, zeros when the device is disabled.
        self.shift
            .apply(self.pins.as_mut(), self.options.device_enabled())?;

        if !self.scheduler.queue.is_empty() {
            self.scheduler.raise_seq_stops(&self.stations, now.epoch);
        }
        Ok(ev)
    }

    fn set_output(&mut self, sid: usize, on: bool, ev: &mut TickEvents) {
        if let BitChange::Changed(edge) = self.shift.set_bit(sid, on) {
            let on = matches!(edge, Edge::TurnedOn);
            ev.valve_changes.push((sid, on));
            if let Some(st) = self.stations.get(sid) {
                if !st.kind.is_standard() {
                    ev.kind_effects.push((sid, st.kind.clone(), on));
                }
            }
        }
    }

    fn poll_sensors(&mut self, now: i64, ev: &mut TickEvents) -> Result<()> {
        for idx in 0..2 {
            if let Some(sensor) = self.sensors[idx].as_mut() {
                let raw = self.pins.read(sensor.pin)?;
                if let Some(active) = sensor.poll(raw, now) {
                    info!(sensor = idx + 1, active, "sensor state changed");
                    ev.sensor_changes.push(SensorChange {
                        sensor: (idx + 1) as u8,
                        active,
                        at: now,
                    });
                }
            }
        }
        Ok(())
    }

    fn match_programs(&mut self, now: &Moment) {
        let rain_block =
            self.rain_delayed || (self.rain_sensed() && !self.options.ignore_rain_globally());
        let soil_block = [self.soil_blocked(0), self.soil_blocked(1)];
        let sunrise = self.scheduler.sunrise_min;
        let sunset = self.scheduler.sunset_min;

        let mut fired_single: Vec<usize> = Vec::new();
        for idx in 0..self.programs.len() {
            let prog = self.programs[idx].clone();
            let Some(run_no) = prog.check_match(now, sunrise, sunset) else {
                continue;
            };
            info!(program = idx, name = %prog.name, run_no, "program matched");
            self.scheduler.schedule_program(
                &self.stations,
                &prog,
                (idx + 1) as u8,
                now.epoch,
                |_, st| {
                    (rain_block && !st.ignore_rain)
                        || (soil_block[0] && !st.ignore_sensor1)
                        || (soil_block[1] && !st.ignore_sensor2)
                },
            );
            if prog.ptype == ProgramType::SingleRun {
                fired_single.push(idx);
            }
        }
        // Single-run programs are deleted after their last match of the day.
        for idx in fired_single.into_iter().rev() {
            let removed = self.programs.remove(idx);
            info!(program = idx, name = %removed.name, "single-run program deleted");
        }
    }

    // ── Sensor summaries ─────────────────────────────────────────

    pub fn rain_sensed(&self) -> bool {
        self.sensors
            .iter()
            .flatten()
            .any(|s| s.kind == SensorKind::Rain && s.active)
    }

    fn soil_blocked(&self, idx: usize) -> bool {
        self.sensors[idx]
            .as_ref()
            .map(|s| s.kind == SensorKind::Soil && s.active)
            .unwrap_or(false)
    }

    pub fn sensor_active(&self, idx: usize) -> bool {
        self.sensors
            .get(idx)
            .and_then(|s| s.as_ref())
            .map(|s| s.active)
            .unwrap_or(false)
    }

    // ── Commands (API surface, called under the controller lock) ─

    pub fn manual_station(
        &mut self,
        sid: usize,
        on: bool,
        duration: i64,
        now: i64,
    ) -> Result<(), ControlError> {
        if sid >= self.stations.len() {
            return Err(ControlError::OutOfRange);
        }
        if on {
            let d = duration.clamp(1, MAX_DURATION_S);
            self.scheduler
                .schedule_station(&self.stations, sid, MANUAL_PROGRAM, d, now, Placement::Normal);
        } else {
            self.scheduler.queue.dequeue_station(sid);
        }
        Ok(())
    }

    /// Run-once: replaces the whole queue with the given per-station
    /// durations (reserved program id 254).
    pub fn run_once(&mut self, durations: &[i64], now: i64) -> Result<(), ControlError> {
        if durations.len() > self.stations.len() {
            return Err(ControlError::OutOfRange);
        }
        self.scheduler.stop_all();
        for (sid, &d) in durations.iter().enumerate() {
            if d > 0 {
                self.scheduler.schedule_station(
                    &self.stations,
                    sid,
                    RUN_ONCE_PROGRAM,
                    d.min(MAX_DURATION_S),
                    now,
                    Placement::Normal,
                );
            }
        }
        Ok(())
    }

    /// Start a program immediately, bypassing the watering gate. With
    /// `use_weather` false the program's scaling flag is overridden off.
    pub fn run_program_now(
        &mut self,
        idx: usize,
        use_weather: bool,
        now: i64,
    ) -> Result<(), ControlError> {
        let mut prog = self.programs.get(idx).cloned().ok_or(ControlError::OutOfRange)?;
        prog.use_weather = prog.use_weather && use_weather;
        info!(program = idx, name = %prog.name, "manual program start");
        self.scheduler
            .schedule_program(&self.stations, &prog, (idx + 1) as u8, now, |_, _| false);
        Ok(())
    }

    /// Hours of rain delay; zero cancels immediately.
    pub fn set_rain_delay(&mut self, hours: i64, now: i64) {
        if hours <= 0 {
            self.rain_delayed = false;
            self.rain_delay_stop = 0;
            info!("rain delay cancelled");
        } else {
            self.rain_delay_stop = now + hours * 3600;
            info!(hours, until = self.rain_delay_stop, "rain delay set");
        }
    }

    pub fn stop_all_stations(&mut self) {
        info!(queued = self.scheduler.queue.len(), "stopping all stations");
        self.scheduler.stop_all();
    }

    /// `/pq`: starts a pause of `duration` seconds, or resumes if paused.
    pub fn pause_toggle(&mut self, duration: i64, now: i64) -> Result<(), ControlError> {
        if self.paused {
            self.scheduler.queue.apply_resume(self.pause_timer);
            self.paused = false;
            self.pause_timer = 0;
            info!("queue resumed");
        } else {
            if duration <= 0 {
                return Err(ControlError::Malformed("pause needs a duration".into()));
            }
            self.scheduler.queue.apply_pause(now, duration);
            self.paused = true;
            self.pause_timer = duration;
            info!(duration, "queue paused");
        }
        Ok(())
    }

    // ── Program store ────────────────────────────────────────────

    pub fn add_program(&mut self, p: Program) -> Result<(), ControlError> {
        if self.programs.len() >= MAX_PROGRAMS {
            return Err(ControlError::Capacity);
        }
        self.programs.push(p);
        Ok(())
    }

    pub fn update_program(&mut self, idx: usize, p: Program) -> Result<(), ControlError> {
        let slot = self.programs.get_mut(idx).ok_or(ControlError::OutOfRange)?;
        *slot = p;
        Ok(())
    }

    /// Delete one program, or all of them.
    pub fn delete_program(&mut self, idx: Option<usize>) -> Result<(), ControlError> {
        match idx {
            None => self.programs.clear(),
            Some(i) => {
                if i >= self.programs.len() {
                    return Err(ControlError::OutOfRange);
                }
                self.programs.remove(i);
            }
        }
        Ok(())
    }

    pub fn move_program_up(&mut self, idx: usize) -> Result<(), ControlError> {
        if idx >= self.programs.len() {
            return Err(ControlError::OutOfRange);
        }
        if idx > 0 {
            self.programs.swap(idx - 1, idx);
        }
        Ok(())
    }

    // ── Read accessors for the API ───────────────────────────────

    pub fn rain_delayed(&self) -> bool {
        self.rain_delayed
    }

    pub fn rain_delay_stop(&self) -> i64 {
        self.rain_delay_stop
    }

    pub fn paused(&self) -> bool {
        self.paused
    }

    pub fn pause_timer(&self) -> i64 {
        self.pause_timer
    }

    pub fn last_run(&self) -> Option<&RunRecord> {
        self.last_run.as_ref()
    }

    pub fn station_on(&self, sid: usize) -> bool {
        self.shift.get_bit(sid)
    }

    /// Highest 1-based station id with its output on, or 0 when idle.
    pub fn highest_active(&self) -> usize {
        self.shift
            .active_stations()
            .max()
            .map(|sid| sid + 1)
            .unwrap_or(0)
    }

    pub fn board_bytes(&self) -> Vec<u8> {
        self.shift.board_bytes(self.options.num_boards())
    }

    pub fn num_stations(&self) -> usize {
        self.stations.len()
    }

    /// Stop everything and drive zeros out, for process exit.
    pub fn shutdown(&mut self) -> Result<()> {
        self.scheduler.stop_all();
        self.shift.clear_all();
        self.shift.apply(self.pins.as_mut(), false)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
