//! Daemon entry point: loads the YAML state, wires up the controller, web
//! API, and event sinks, then drives the tick loop.
//!
//! Safety features:
//! - Signal handler: SIGTERM/SIGINT → queue cleared, zeros shifted out
//! - Device-disable shifts zeros while keeping the queue warm
//! - Best-effort telemetry and station effectors run on detached tasks and
//!   can never stall the control loop
//! - Corrupt persistence files degrade to defaults instead of aborting

mod clock;
mod config;
mod controller;
mod effector;
mod error;
mod gpio;
mod logstore;
mod options;
mod program;
mod queue;
mod scheduler;
mod sensor;
mod shift;
mod solar;
mod station;
mod telemetry;
mod web;

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Local, Offset, TimeZone};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use clock::Moment;
use config::ConfigStore;
use controller::{Controller, RecordKind, TickEvents, SENSOR_LOG_STATION};
use effector::Effector;
use gpio::Pins;
use logstore::LogStore;
use telemetry::Influx;
use web::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // ── Structured logging ──────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ── Persisted state ─────────────────────────────────────────────
    let data_dir = PathBuf::from(env::var("SPRINKLD_DATA").unwrap_or_else(|_| "data".to_string()));
    let store = ConfigStore::new(&data_dir);
    let options = store.load_options();
    let stations = store.load_stations(options.num_stations());
    let programs = store.load_programs();
    info!(
        stations = stations.len(),
        programs = programs.len(),
        data_dir = %data_dir.display(),
        "configuration loaded"
    );

    // ── Controller ──────────────────────────────────────────────────
    let pins = build_pins()?;
    let mut controller = Controller::new(options, stations, programs, pins);
    if env::var("SPRINKLD_ALT_DATA").map(|v| v == "1").unwrap_or(false) {
        controller.use_alt_data_pin();
    }
    controller.setup().context("gpio setup failed")?;
    update_solar(&mut controller);

    let port = controller.options.http_port();
    let ctl = Arc::new(Mutex::new(controller));
    let logs = Arc::new(Mutex::new(LogStore::new(data_dir.join("logs"))));

    // ── Web server ──────────────────────────────────────────────────
    let state = AppState {
        ctl: Arc::clone(&ctl),
        store: Arc::new(store),
        logs: Arc::clone(&logs),
    };
    tokio::spawn(web::serve(state, port));

    let influx = Arc::new(Influx::new());
    let effector = Arc::new(Effector::new());

    // ── Signal handling ─────────────────────────────────────────────
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    // The loop polls at 10 Hz; the controller gates substantive work on
    // the second boundary itself, so a missed poll costs nothing.
    let mut ticker = tokio::time::interval(Duration::from_millis(100));
    let mut last_day = Local::now().date_naive();

    let exit_reason: &str;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Local::now();
                let moment = Moment::from_local(now);

                let (events, influx_cfg, highest_active) = {
                    let mut c = ctl.lock().await;
                    if now.date_naive() != last_day {
                        last_day = now.date_naive();
                        update_solar(&mut c);
                    }
                    let events = match c.tick(&moment) {
                        Ok(ev) => ev,
                        Err(e) => {
                            error!("tick failed: {e:#}");
                            continue;
                        }
                    };
                    let influx_cfg = (c.options.influx_enabled()
                        && !events.valve_changes.is_empty())
                    .then(|| (c.options.influx_url.clone(), c.options.influx_db.clone()));
                    let highest_active = c.highest_active();
                    (events, influx_cfg, highest_active)
                };

                route_events(events, &logs, influx_cfg, highest_active, &influx, &effector).await;
            }

            _ = &mut ctrl_c => {
                exit_reason = "SIGINT";
                break;
            }

            _ = sigterm.recv() => {
                exit_reason = "SIGTERM";
                break;
            }
        }
    }

    // ── Graceful shutdown ───────────────────────────────────────────
    warn!(signal = exit_reason, "shutting down — driving all outputs low");
    if let Err(e) = ctl.lock().await.shutdown() {
        error!("shutdown apply failed: {e:#}");
    }
    info!("shutdown complete");
    Ok(())
}

// ---------------------------------------------------------------------------
// Event routing (log store, telemetry, station effectors)
// ---------------------------------------------------------------------------

async fn route_events(
    events: TickEvents,
    logs: &Mutex<LogStore>,
    influx_cfg: Option<(String, String)>,
    highest_active: usize,
    influx: &Arc<Influx>,
    effector: &Arc<Effector>,
) {
    if !events.completed.is_empty() || !events.sensor_changes.is_empty() {
        let store = logs.lock().await;
        for rec in &events.completed {
            let row = [
                rec.program as i64,
                rec.station as i64,
                rec.duration,
                rec.end,
                rec.kind.wire() as i64,
            ];
            if let Err(e) = store.append(local_day(rec.end), row) {
                error!("failed to append run record: {e:#}");
            }
        }
        for ch in &events.sensor_changes {
            let row = [
                0,
                (SENSOR_LOG_STATION + ch.sensor as usize - 1) as i64,
                ch.active as i64,
                ch.at,
                RecordKind::Sensor.wire() as i64,
            ];
            if let Err(e) = store.append(local_day(ch.at), row) {
                error!("failed to append sensor record: {e:#}");
            }
        }
    }

    if let Some((url, db)) = influx_cfg {
        let ts_ns = Local::now().timestamp_nanos_opt().unwrap_or_default() as i128;
        let body = telemetry::lines(&events.valve_changes, highest_active, ts_ns);
        let influx = Arc::clone(influx);
        tokio::spawn(async move {
            influx.publish(&url, &db, body).await;
        });
    }

    for (sid, kind, on) in events.kind_effects {
        let effector = Arc::clone(effector);
        tokio::spawn(async move {
            effector.apply(sid, &kind, on).await;
        });
    }
}

fn local_day(epoch: i64) -> chrono::NaiveDate {
    Local
        .timestamp_opt(epoch, 0)
        .single()
        .map(|dt| dt.date_naive())
        .unwrap_or_else(|| Local::now().date_naive())
}

// ---------------------------------------------------------------------------
// Wiring helpers
// ---------------------------------------------------------------------------

#[cfg(feature = "gpio")]
fn build_pins() -> Result<Box<dyn Pins + Send>> {
    Ok(Box::new(gpio::RpiPins::new()?))
}

#[cfg(not(feature = "gpio"))]
fn build_pins() -> Result<Box<dyn Pins + Send>> {
    warn!("built without the gpio feature — using the mock pin backend");
    Ok(Box::new(gpio::MockPins::new()))
}

/// Refresh sunrise/sunset from the location option; keeps the 06:00/18:00
/// defaults when no location is configured.
fn update_solar(ctl: &mut Controller) {
    let Some((lat, lon)) = solar::parse_location(&ctl.options.location) else {
        ctl.scheduler.sunrise_min = solar::DEFAULT_SUNRISE_MIN;
        ctl.scheduler.sunset_min = solar::DEFAULT_SUNSET_MIN;
        return;
    };
    let now = Local::now();
    let tz_min = now.offset().fix().local_minus_utc() / 60;
    match solar::sun_times(lat, lon, now.date_naive(), tz_min) {
        Some((sunrise, sunset)) => {
            ctl.scheduler.sunrise_min = sunrise;
            ctl.scheduler.sunset_min = sunset;
            info!(sunrise, sunset, "solar times updated");
        }
        None => warn!(lat, lon, "sun does not rise or set today, keeping previous times"),
    }
}
