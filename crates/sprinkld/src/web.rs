//! Legacy HTTP/JSON API. Third-party UIs target these endpoints verbatim:
//! reads `/jc /jo /jp /js /jn /je /jl /ja`, writes `/cv /co /cp /dp /up /mp
//! /cs /cm /cr /pq /dl`. Every endpoint except `/` requires the `pw` query
//! parameter to equal the stored MD5 password digest unless the
//! `ignore_password` option is set. All handlers take the controller lock, so
//! API mutations are totally ordered with respect to ticks.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::{Html, IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use chrono::{Local, Offset};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::ConfigStore;
use crate::controller::Controller;
use crate::error::{result, ControlError};
use crate::logstore::LogStore;
use crate::options::{IntOpt, FIRMWARE_VERSION};
use crate::program::{Program, MAX_DURATION_S, MAX_PROGRAMS};
use crate::station::{apply_attr_bits, attr_bits, Station, StationKind};

const INDEX_HTML: &str = "<!doctype html><title>sprinkld</title>\
<p>sprinkld is running. The JSON API lives at /jc, /jo, /jp, /js.</p>";

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub ctl: Arc<Mutex<Controller>>,
    pub store: Arc<ConfigStore>,
    pub logs: Arc<Mutex<LogStore>>,
}

type Params = HashMap<String, String>;

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/jc", get(jc))
        .route("/jo", get(jo))
        .route("/jp", get(jp))
        .route("/js", get(js))
        .route("/jn", get(jn))
        .route("/je", get(je))
        .route("/jl", get(jl))
        .route("/ja", get(ja))
        .route("/cv", get(cv))
        .route("/co", get(co))
        .route("/cp", get(cp))
        .route("/dp", get(dp))
        .route("/up", get(up))
        .route("/mp", get(mp))
        .route("/cs", get(cs))
        .route("/cm", get(cm))
        .route("/cr", get(cr))
        .route("/pq", get(pq))
        .route("/dl", get(dl))
        .fallback(not_found)
        .with_state(state)
}

async fn index() -> impl IntoResponse {
    Html(INDEX_HTML)
}

async fn not_found() -> Json<Value> {
    result_json(result::PAGE_NOT_FOUND)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn result_json(code: u8) -> Json<Value> {
    Json(json!({ "result": code }))
}

fn err_json(e: ControlError) -> Json<Value> {
    result_json(e.result_code())
}

fn authorized(ctl: &Controller, q: &Params) -> bool {
    ctl.options.ignore_password()
        || q.get("pw").map(|p| *p == ctl.options.password).unwrap_or(false)
}

fn param_i64(q: &Params, name: &str) -> Option<Result<i64, ()>> {
    q.get(name).map(|v| v.parse().map_err(|_| ()))
}

fn now_epoch() -> i64 {
    Local::now().timestamp()
}

/// Device time as a local-shifted epoch, the way the legacy UIs expect it.
fn device_time() -> i64 {
    let now = Local::now();
    now.timestamp() + now.offset().fix().local_minus_utc() as i64
}

fn persist_options(state: &AppState, ctl: &Controller) {
    if let Err(e) = state.store.save_options(&ctl.options) {
        warn!("failed to save options: {e:#}");
    }
}

fn persist_stations(state: &AppState, ctl: &Controller) {
    if let Err(e) = state.store.save_stations(&ctl.stations) {
        warn!("failed to save stations: {e:#}");
    }
}

fn persist_programs(state: &AppState, ctl: &Controller) {
    if let Err(e) = state.store.save_programs(&ctl.programs) {
        warn!("failed to save programs: {e:#}");
    }
}

// ---------------------------------------------------------------------------
// Read endpoints
// ---------------------------------------------------------------------------

fn jc_body(ctl: &Controller, now: i64) -> Value {
    let lrun = match ctl.last_run() {
        Some(r) => json!([r.station, r.program, r.duration, r.end]),
        None => json!([0, 0, 0, 0]),
    };
    json!({
        "devt": device_time(),
        "nbrd": ctl.options.num_boards(),
        "en": ctl.options.device_enabled() as u8,
        "rd": ctl.rain_delayed() as u8,
        "rs": ctl.rain_sensed() as u8,
        "rdst": ctl.rain_delay_stop(),
        "sbits": ctl.board_bytes(),
        "ps": ctl.scheduler.program_status(ctl.num_stations(), now),
        "lrun": lrun,
        "sn1": ctl.sensor_active(0) as u8,
        "sn2": ctl.sensor_active(1) as u8,
        "pq": ctl.paused() as u8,
        "pt": ctl.pause_timer(),
    })
}

async fn jc(State(state): State<AppState>, Query(q): Query<Params>) -> Json<Value> {
    let ctl = state.ctl.lock().await;
    if !authorized(&ctl, &q) {
        return result_json(result::UNAUTHORIZED);
    }
    Json(jc_body(&ctl, now_epoch()))
}

fn jo_body(ctl: &Controller) -> Value {
    let mut map = ctl.options.to_wire_map();
    map.insert("fwv".into(), json!(FIRMWARE_VERSION));
    Value::Object(map)
}

async fn jo(State(state): State<AppState>, Query(q): Query<Params>) -> Json<Value> {
    let ctl = state.ctl.lock().await;
    if !authorized(&ctl, &q) {
        return result_json(result::UNAUTHORIZED);
    }
    Json(jo_body(&ctl))
}

fn jp_body(ctl: &Controller) -> Value {
    let n = ctl.num_stations();
    json!({
        "nprogs": ctl.programs.len(),
        "nboards": ctl.options.num_boards(),
        "mnp": MAX_PROGRAMS,
        "pd": ctl.programs.iter().map(|p| p.to_wire(n)).collect::<Vec<_>>(),
    })
}

async fn jp(State(state): State<AppState>, Query(q): Query<Params>) -> Json<Value> {
    let ctl = state.ctl.lock().await;
    if !authorized(&ctl, &q) {
        return result_json(result::UNAUTHORIZED);
    }
    Json(jp_body(&ctl))
}

fn js_body(ctl: &Controller) -> Value {
    let n = ctl.num_stations();
    json!({
        "sn": (0..n).map(|s| ctl.station_on(s) as u8).collect::<Vec<_>>(),
        "nstations": n,
    })
}

async fn js(State(state): State<AppState>, Query(q): Query<Params>) -> Json<Value> {
    let ctl = state.ctl.lock().await;
    if !authorized(&ctl, &q) {
        return result_json(result::UNAUTHORIZED);
    }
    Json(js_body(&ctl))
}

fn jn_body(ctl: &Controller) -> Value {
    let nb = ctl.options.num_boards();
    let sts = &ctl.stations;
    json!({
        "snames": sts.iter().map(|s| s.name.clone()).collect::<Vec<_>>(),
        "nstations": sts.len(),
        "maxlen": 32,
        "masop": attr_bits(sts, nb, |s| s.master1_bound),
        "masop2": attr_bits(sts, nb, |s| s.master2_bound),
        "ignore_rain": attr_bits(sts, nb, |s| s.ignore_rain),
        "ignore_sn1": attr_bits(sts, nb, |s| s.ignore_sensor1),
        "ignore_sn2": attr_bits(sts, nb, |s| s.ignore_sensor2),
        "stn_dis": attr_bits(sts, nb, |s| s.disabled),
        "act_relay": attr_bits(sts, nb, |s| s.activate_relay),
        "stn_grp": sts.iter().map(|s| s.group_id).collect::<Vec<_>>(),
    })
}

async fn jn(State(state): State<AppState>, Query(q): Query<Params>) -> Json<Value> {
    let ctl = state.ctl.lock().await;
    if !authorized(&ctl, &q) {
        return result_json(result::UNAUTHORIZED);
    }
    Json(jn_body(&ctl))
}

fn je_body(ctl: &Controller) -> Value {
    let special: Vec<Value> = ctl
        .stations
        .iter()
        .enumerate()
        .filter(|(_, s)| !s.kind.is_standard())
        .map(|(sid, s)| {
            json!({
                "sid": sid,
                "st": s.kind.tag(),
                "sd": serde_json::to_value(&s.kind).unwrap_or(Value::Null),
            })
        })
        .collect();
    json!(special)
}

async fn je(State(state): State<AppState>, Query(q): Query<Params>) -> Json<Value> {
    let ctl = state.ctl.lock().await;
    if !authorized(&ctl, &q) {
        return result_json(result::UNAUTHORIZED);
    }
    Json(je_body(&ctl))
}

async fn jl(State(state): State<AppState>, Query(q): Query<Params>) -> Json<Value> {
    {
        let ctl = state.ctl.lock().await;
        if !authorized(&ctl, &q) {
            return result_json(result::UNAUTHORIZED);
        }
    }
    let hist = match param_i64(&q, "hist") {
        Some(Ok(h)) if h >= 0 => h as u32,
        Some(_) => return result_json(result::FORMAT_ERROR),
        None => return result_json(result::DATA_MISSING),
    };
    let logs = state.logs.lock().await;
    Json(json!(logs.read_days(Local::now().date_naive(), hist)))
}

async fn ja(State(state): State<AppState>, Query(q): Query<Params>) -> Json<Value> {
    let ctl = state.ctl.lock().await;
    if !authorized(&ctl, &q) {
        return result_json(result::UNAUTHORIZED);
    }
    Json(json!({
        "settings": jc_body(&ctl, now_epoch()),
        "options": jo_body(&ctl),
        "stations": jn_body(&ctl),
        "status": js_body(&ctl),
        "programs": jp_body(&ctl),
    }))
}

// ---------------------------------------------------------------------------
// Write endpoints
// ---------------------------------------------------------------------------

/// `/cv` — change controller values: `en` (device enable), `rd` (rain delay
/// hours, 0 cancels), `rsn` (stop all stations).
async fn cv(State(state): State<AppState>, Query(q): Query<Params>) -> Json<Value> {
    let mut ctl = state.ctl.lock().await;
    if !authorized(&ctl, &q) {
        return result_json(result::UNAUTHORIZED);
    }

    if let Some(rsn) = param_i64(&q, "rsn") {
        match rsn {
            Ok(v) if v != 0 => ctl.stop_all_stations(),
            Ok(_) => {}
            Err(()) => return result_json(result::FORMAT_ERROR),
        }
    }
    if let Some(rd) = param_i64(&q, "rd") {
        match rd {
            Ok(hours) => ctl.set_rain_delay(hours, now_epoch()),
            Err(()) => return result_json(result::FORMAT_ERROR),
        }
    }
    if let Some(en) = param_i64(&q, "en") {
        match en {
            Ok(v) => {
                ctl.options.set(IntOpt::DeviceEnable, v);
                persist_options(&state, &ctl);
            }
            Err(()) => return result_json(result::FORMAT_ERROR),
        }
    }
    result_json(result::OK)
}

/// `/co` — change options by wire name. Password changes take `npw` guarded
/// by `opw` (both MD5 digests); a mismatched `opw` is result 3.
async fn co(State(state): State<AppState>, Query(q): Query<Params>) -> Json<Value> {
    let mut ctl = state.ctl.lock().await;
    if !authorized(&ctl, &q) {
        return result_json(result::UNAUTHORIZED);
    }

    if let Some(npw) = q.get("npw") {
        match q.get("opw") {
            Some(opw) if *opw == ctl.options.password => {
                ctl.options.password = npw.clone();
                info!("password changed");
            }
            _ => return result_json(result::MISMATCH),
        }
    }

    for (key, value) in &q {
        if matches!(key.as_str(), "pw" | "npw" | "opw") {
            continue;
        }
        if let Err(e) = ctl.options.set_by_wire(key, value) {
            return err_json(e);
        }
    }

    if let Err(e) = ctl.apply_options() {
        warn!("failed to apply options to hardware: {e:#}");
    }
    persist_options(&state, &ctl);
    result_json(result::OK)
}

/// `/cs` — change station names, attribute bits, groups, and kind payloads.
/// Wire params: `s<id>` name, `g<id>` group, `sp<id>` kind JSON, and
/// per-board bit bytes `m<b>` master1, `n<b>` master2, `i<b>` ignore-rain,
/// `j<b>` ignore-sensor1, `k<b>` ignore-sensor2, `d<b>` disabled, `q<b>`
/// activate-relay.
async fn cs(State(state): State<AppState>, Query(q): Query<Params>) -> Json<Value> {
    let mut ctl = state.ctl.lock().await;
    if !authorized(&ctl, &q) {
        return result_json(result::UNAUTHORIZED);
    }
    let nstations = ctl.num_stations();
    let nboards = ctl.options.num_boards();

    for (key, value) in &q {
        if key == "pw" {
            continue;
        }
        if let Some(rest) = key.strip_prefix("sp") {
            let Ok(sid) = rest.parse::<usize>() else { continue };
            if sid >= nstations {
                return result_json(result::OUT_OF_BOUNDS);
            }
            match serde_json::from_str::<StationKind>(value) {
                Ok(kind) => ctl.stations[sid].kind = kind,
                Err(_) => return result_json(result::FORMAT_ERROR),
            }
        } else if let Some(rest) = key.strip_prefix('s') {
            let Ok(sid) = rest.parse::<usize>() else { continue };
            if sid >= nstations {
                return result_json(result::OUT_OF_BOUNDS);
            }
            ctl.stations[sid].name = value.clone();
        } else if let Some(rest) = key.strip_prefix('g') {
            let Ok(sid) = rest.parse::<usize>() else { continue };
            if sid >= nstations {
                return result_json(result::OUT_OF_BOUNDS);
            }
            match value.parse::<u8>() {
                Ok(group) => ctl.stations[sid].group_id = group,
                Err(_) => return result_json(result::FORMAT_ERROR),
            }
        } else {
            let mut chars = key.chars();
            let setter: Option<fn(&mut Station, bool)> = match chars.next() {
                Some('m') => Some(|s, v| s.master1_bound = v),
                Some('n') => Some(|s, v| s.master2_bound = v),
                Some('i') => Some(|s, v| s.ignore_rain = v),
                Some('j') => Some(|s, v| s.ignore_sensor1 = v),
                Some('k') => Some(|s, v| s.ignore_sensor2 = v),
                Some('d') => Some(|s, v| s.disabled = v),
                Some('q') => Some(|s, v| s.activate_relay = v),
                _ => None,
            };
            let Some(setter) = setter else { continue };
            let Ok(board) = chars.as_str().parse::<usize>() else {
                continue;
            };
            if board >= nboards {
                return result_json(result::OUT_OF_BOUNDS);
            }
            match value.parse::<u8>() {
                Ok(byte) => apply_attr_bits(&mut ctl.stations, board, byte, setter),
                Err(_) => return result_json(result::FORMAT_ERROR),
            }
        }
    }

    persist_stations(&state, &ctl);
    result_json(result::OK)
}

/// `/cm` — manual station control: `sid`, `en`, and `t` seconds when
/// switching on.
async fn cm(State(state): State<AppState>, Query(q): Query<Params>) -> Json<Value> {
    let mut ctl = state.ctl.lock().await;
    if !authorized(&ctl, &q) {
        return result_json(result::UNAUTHORIZED);
    }
    let sid = match param_i64(&q, "sid") {
        Some(Ok(v)) if v >= 0 => v as usize,
        Some(_) => return result_json(result::FORMAT_ERROR),
        None => return result_json(result::DATA_MISSING),
    };
    let en = match param_i64(&q, "en") {
        Some(Ok(v)) => v != 0,
        Some(Err(())) => return result_json(result::FORMAT_ERROR),
        None => return result_json(result::DATA_MISSING),
    };

    let duration = if en {
        match param_i64(&q, "t") {
            Some(Ok(t)) if t > 0 && t <= MAX_DURATION_S => t,
            Some(Ok(_)) => return result_json(result::OUT_OF_BOUNDS),
            Some(Err(())) => return result_json(result::FORMAT_ERROR),
            None => return result_json(result::DATA_MISSING),
        }
    } else {
        0
    };

    match ctl.manual_station(sid, en, duration, now_epoch()) {
        Ok(()) => result_json(result::OK),
        Err(e) => err_json(e),
    }
}

/// `/cr` — run-once: `t` is a JSON array of per-station durations.
async fn cr(State(state): State<AppState>, Query(q): Query<Params>) -> Json<Value> {
    let mut ctl = state.ctl.lock().await;
    if !authorized(&ctl, &q) {
        return result_json(result::UNAUTHORIZED);
    }
    let Some(raw) = q.get("t") else {
        return result_json(result::DATA_MISSING);
    };
    let durations: Vec<i64> = match serde_json::from_str(raw) {
        Ok(d) => d,
        Err(_) => return result_json(result::FORMAT_ERROR),
    };
    match ctl.run_once(&durations, now_epoch()) {
        Ok(()) => result_json(result::OK),
        Err(e) => err_json(e),
    }
}

/// `/cp` — create (`pid=-1`) or update a program. `v` carries the legacy
/// array shape; `name` overrides the embedded name.
async fn cp(State(state): State<AppState>, Query(q): Query<Params>) -> Json<Value> {
    let mut ctl = state.ctl.lock().await;
    if !authorized(&ctl, &q) {
        return result_json(result::UNAUTHORIZED);
    }
    let pid = match param_i64(&q, "pid") {
        Some(Ok(v)) => v,
        Some(Err(())) => return result_json(result::FORMAT_ERROR),
        None => return result_json(result::DATA_MISSING),
    };
    let Some(raw) = q.get("v") else {
        return result_json(result::DATA_MISSING);
    };
    let parsed: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(_) => return result_json(result::FORMAT_ERROR),
    };
    let mut prog = match Program::from_wire(&parsed, ctl.num_stations()) {
        Ok(p) => p,
        Err(e) => return err_json(e),
    };
    if let Some(name) = q.get("name") {
        prog.name = name.clone();
    }

    let outcome = if pid < 0 {
        ctl.add_program(prog)
    } else {
        ctl.update_program(pid as usize, prog)
    };
    match outcome {
        Ok(()) => {
            persist_programs(&state, &ctl);
            result_json(result::OK)
        }
        Err(e) => err_json(e),
    }
}

/// `/dp` — delete program `pid`, or all with `pid=-1`.
async fn dp(State(state): State<AppState>, Query(q): Query<Params>) -> Json<Value> {
    let mut ctl = state.ctl.lock().await;
    if !authorized(&ctl, &q) {
        return result_json(result::UNAUTHORIZED);
    }
    let pid = match param_i64(&q, "pid") {
        Some(Ok(v)) => v,
        Some(Err(())) => return result_json(result::FORMAT_ERROR),
        None => return result_json(result::DATA_MISSING),
    };
    let target = if pid < 0 { None } else { Some(pid as usize) };
    match ctl.delete_program(target) {
        Ok(()) => {
            persist_programs(&state, &ctl);
            result_json(result::OK)
        }
        Err(e) => err_json(e),
    }
}

/// `/up` — move program `pid` one slot up.
async fn up(State(state): State<AppState>, Query(q): Query<Params>) -> Json<Value> {
    let mut ctl = state.ctl.lock().await;
    if !authorized(&ctl, &q) {
        return result_json(result::UNAUTHORIZED);
    }
    let pid = match param_i64(&q, "pid") {
        Some(Ok(v)) if v >= 0 => v as usize,
        Some(_) => return result_json(result::FORMAT_ERROR),
        None => return result_json(result::DATA_MISSING),
    };
    match ctl.move_program_up(pid) {
        Ok(()) => {
            persist_programs(&state, &ctl);
            result_json(result::OK)
        }
        Err(e) => err_json(e),
    }
}

/// `/mp` — start program `pid` now; `uwt=0` bypasses weather scaling.
async fn mp(State(state): State<AppState>, Query(q): Query<Params>) -> Json<Value> {
    let mut ctl = state.ctl.lock().await;
    if !authorized(&ctl, &q) {
        return result_json(result::UNAUTHORIZED);
    }
    let pid = match param_i64(&q, "pid") {
        Some(Ok(v)) if v >= 0 => v as usize,
        Some(_) => return result_json(result::FORMAT_ERROR),
        None => return result_json(result::DATA_MISSING),
    };
    let uwt = match param_i64(&q, "uwt") {
        Some(Ok(v)) => v != 0,
        Some(Err(())) => return result_json(result::FORMAT_ERROR),
        None => true,
    };
    match ctl.run_program_now(pid, uwt, now_epoch()) {
        Ok(()) => result_json(result::OK),
        Err(e) => err_json(e),
    }
}

/// `/pq` — toggle a queue pause of `dur` seconds.
async fn pq(State(state): State<AppState>, Query(q): Query<Params>) -> Json<Value> {
    let mut ctl = state.ctl.lock().await;
    if !authorized(&ctl, &q) {
        return result_json(result::UNAUTHORIZED);
    }
    let dur = match param_i64(&q, "dur") {
        Some(Ok(v)) => v,
        Some(Err(())) => return result_json(result::FORMAT_ERROR),
        None if ctl.paused() => 0,
        None => return result_json(result::DATA_MISSING),
    };
    match ctl.pause_toggle(dur, now_epoch()) {
        Ok(()) => result_json(result::OK),
        Err(_) => result_json(result::DATA_MISSING),
    }
}

/// `/dl` — delete log files: `day=YYYYMMDD` or `day=all`.
async fn dl(State(state): State<AppState>, Query(q): Query<Params>) -> Json<Value> {
    {
        let ctl = state.ctl.lock().await;
        if !authorized(&ctl, &q) {
            return result_json(result::UNAUTHORIZED);
        }
    }
    let Some(day) = q.get("day") else {
        return result_json(result::DATA_MISSING);
    };
    let logs = state.logs.lock().await;
    match logs.delete(day) {
        Ok(_) => result_json(result::OK),
        Err(_) => result_json(result::FORMAT_ERROR),
    }
}

// ---------------------------------------------------------------------------
// Server entry point
// ---------------------------------------------------------------------------

pub async fn serve(state: AppState, port: u16) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind web port");
    info!(%addr, "web api listening");
    axum::serve(listener, router(state))
        .await
        .expect("web server error");
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Moment;
    use crate::gpio::MockPins;
    use crate::options::{md5_hex, Options, DEFAULT_PASSWORD};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt; // for `oneshot`

    fn test_state() -> (tempfile::TempDir, AppState) {
        let dir = tempfile::tempdir().unwrap();
        let mut ctl = Controller::new(
            Options::default(),
            Vec::new(),
            Vec::new(),
            Box::new(MockPins::new()),
        );
        ctl.setup().unwrap();
        let state = AppState {
            ctl: Arc::new(Mutex::new(ctl)),
            store: Arc::new(ConfigStore::new(dir.path())),
            logs: Arc::new(Mutex::new(LogStore::new(dir.path().join("logs")))),
        };
        (dir, state)
    }

    fn pw() -> String {
        md5_hex(DEFAULT_PASSWORD)
    }

    async fn get_json(state: &AppState, uri: &str) -> Value {
        let app = router(state.clone());
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    // -- Authentication ----------------------------------------------------

    #[tokio::test]
    async fn endpoints_require_the_password_digest() {
        let (_d, state) = test_state();
        let json = get_json(&state, "/jc").await;
        assert_eq!(json["result"], 2);
        let json = get_json(&state, "/jc?pw=wrong").await;
        assert_eq!(json["result"], 2);
        let json = get_json(&state, &format!("/jc?pw={}", pw())).await;
        assert!(json["devt"].is_i64());
    }

    #[tokio::test]
    async fn index_is_open_without_password() {
        let (_d, state) = test_state();
        let app = router(state);
        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ignore_password_option_bypasses_auth() {
        let (_d, state) = test_state();
        state
            .ctl
            .lock()
            .await
            .options
            .set(IntOpt::IgnorePassword, 1);
        let json = get_json(&state, "/jc").await;
        assert!(json["devt"].is_i64());
    }

    #[tokio::test]
    async fn unknown_route_returns_page_not_found() {
        let (_d, state) = test_state();
        let json = get_json(&state, "/nonexistent").await;
        assert_eq!(json["result"], 32);
    }

    // -- Read shapes -------------------------------------------------------

    #[tokio::test]
    async fn jc_reports_controller_fields() {
        let (_d, state) = test_state();
        let json = get_json(&state, &format!("/jc?pw={}", pw())).await;
        assert_eq!(json["nbrd"], 1);
        assert_eq!(json["en"], 1);
        assert_eq!(json["rd"], 0);
        assert_eq!(json["sbits"].as_array().unwrap().len(), 1);
        assert_eq!(json["ps"].as_array().unwrap().len(), 8);
        assert_eq!(json["lrun"], json!([0, 0, 0, 0]));
        assert_eq!(json["pq"], 0);
    }

    #[tokio::test]
    async fn jo_reports_options_without_password_digest() {
        let (_d, state) = test_state();
        let json = get_json(&state, &format!("/jo?pw={}", pw())).await;
        assert_eq!(json["wl"], 100);
        assert_eq!(json["fwv"], FIRMWARE_VERSION);
        assert!(json.get("pwd").is_none());
    }

    #[tokio::test]
    async fn ja_bundles_all_read_bodies() {
        let (_d, state) = test_state();
        let json = get_json(&state, &format!("/ja?pw={}", pw())).await;
        assert!(json["settings"]["devt"].is_i64());
        assert!(json["options"]["wl"].is_i64());
        assert!(json["stations"]["snames"].is_array());
        assert!(json["status"]["sn"].is_array());
        assert!(json["programs"]["pd"].is_array());
    }

    // -- Manual control ----------------------------------------------------

    #[tokio::test]
    async fn cm_schedules_and_cancels_a_manual_run() {
        let (_d, state) = test_state();
        let json = get_json(&state, &format!("/cm?pw={}&sid=0&en=1&t=60", pw())).await;
        assert_eq!(json["result"], 1);
        {
            let ctl = state.ctl.lock().await;
            let it = ctl.scheduler.queue.find_by_station(0).unwrap();
            assert_eq!(it.program, crate::program::MANUAL_PROGRAM);
            assert_eq!(it.duration, 60);
        }
        let json = get_json(&state, &format!("/cm?pw={}&sid=0&en=0", pw())).await;
        assert_eq!(json["result"], 1);
        assert!(!state.ctl.lock().await.scheduler.queue.station_queued(0));
    }

    #[tokio::test]
    async fn cm_validates_parameters() {
        let (_d, state) = test_state();
        let json = get_json(&state, &format!("/cm?pw={}&sid=0&en=1", pw())).await;
        assert_eq!(json["result"], 16);
        let json = get_json(&state, &format!("/cm?pw={}&sid=99&en=1&t=60", pw())).await;
        assert_eq!(json["result"], 17);
        let json = get_json(&state, &format!("/cm?pw={}&sid=0&en=1&t=0", pw())).await;
        assert_eq!(json["result"], 17);
        let json = get_json(&state, &format!("/cm?pw={}&sid=abc&en=1&t=60", pw())).await;
        assert_eq!(json["result"], 18);
    }

    #[tokio::test]
    async fn cr_runs_once_with_replace_semantics() {
        let (_d, state) = test_state();
        let json = get_json(&state, &format!("/cr?pw={}&t=[30,0,45]", pw())).await;
        assert_eq!(json["result"], 1);
        let ctl = state.ctl.lock().await;
        assert!(ctl.scheduler.queue.station_queued(0));
        assert!(!ctl.scheduler.queue.station_queued(1));
        assert!(ctl.scheduler.queue.station_queued(2));
    }

    #[tokio::test]
    async fn cr_rejects_bad_shapes() {
        let (_d, state) = test_state();
        let json = get_json(&state, &format!("/cr?pw={}", pw())).await;
        assert_eq!(json["result"], 16);
        let json = get_json(&state, &format!("/cr?pw={}&t=nope", pw())).await;
        assert_eq!(json["result"], 18);
    }

    // -- Programs ----------------------------------------------------------

    fn program_v() -> String {
        // enabled weekly program, Mon-Fri, 06:30, station 0 for 300 s
        "[1,31,0,[390,0,0,0],[300,0,0,0,0,0,0,0]]".to_string()
    }

    #[tokio::test]
    async fn cp_creates_and_jp_lists_programs() {
        let (_d, state) = test_state();
        let uri = format!("/cp?pw={}&pid=-1&v={}&name=Lawn", pw(), program_v());
        let json = get_json(&state, &uri).await;
        assert_eq!(json["result"], 1);

        let json = get_json(&state, &format!("/jp?pw={}", pw())).await;
        assert_eq!(json["nprogs"], 1);
        let pd = &json["pd"][0];
        assert_eq!(pd[0], 1); // flag byte: enabled
        assert_eq!(pd[5], "Lawn");
        // Durations padded to the full station count.
        assert_eq!(pd[4].as_array().unwrap().len(), 8);
    }

    #[tokio::test]
    async fn cp_validates_pid_and_shape() {
        let (_d, state) = test_state();
        let json = get_json(&state, &format!("/cp?pw={}&pid=-1", pw())).await;
        assert_eq!(json["result"], 16);
        let json = get_json(&state, &format!("/cp?pw={}&pid=-1&v=[1,2]", pw())).await;
        assert_eq!(json["result"], 18);
        let json = get_json(&state, &format!("/cp?pw={}&pid=5&v={}", pw(), program_v())).await;
        assert_eq!(json["result"], 17);
    }

    #[tokio::test]
    async fn dp_deletes_one_or_all() {
        let (_d, state) = test_state();
        for _ in 0..3 {
            get_json(&state, &format!("/cp?pw={}&pid=-1&v={}", pw(), program_v())).await;
        }
        let json = get_json(&state, &format!("/dp?pw={}&pid=1", pw())).await;
        assert_eq!(json["result"], 1);
        assert_eq!(state.ctl.lock().await.programs.len(), 2);
        let json = get_json(&state, &format!("/dp?pw={}&pid=-1", pw())).await;
        assert_eq!(json["result"], 1);
        assert!(state.ctl.lock().await.programs.is_empty());
    }

    #[tokio::test]
    async fn mp_starts_a_program_now() {
        let (_d, state) = test_state();
        get_json(&state, &format!("/cp?pw={}&pid=-1&v={}", pw(), program_v())).await;
        let json = get_json(&state, &format!("/mp?pw={}&pid=0&uwt=0", pw())).await;
        assert_eq!(json["result"], 1);
        assert!(state.ctl.lock().await.scheduler.queue.station_queued(0));
        let json = get_json(&state, &format!("/mp?pw={}&pid=9", pw())).await;
        assert_eq!(json["result"], 17);
    }

    // -- Stations ----------------------------------------------------------

    #[tokio::test]
    async fn cs_renames_and_sets_attribute_bits() {
        let (_d, state) = test_state();
        let json = get_json(
            &state,
            &format!("/cs?pw={}&s2=Roses&g2=255&i0=4&m0=1", pw()),
        )
        .await;
        assert_eq!(json["result"], 1);

        let ctl = state.ctl.lock().await;
        assert_eq!(ctl.stations[2].name, "Roses");
        assert_eq!(ctl.stations[2].group_id, 255);
        assert!(ctl.stations[2].ignore_rain); // bit 2 of i0=4
        assert!(ctl.stations[0].master1_bound); // bit 0 of m0=1
    }

    #[tokio::test]
    async fn cs_rejects_out_of_range_targets() {
        let (_d, state) = test_state();
        let json = get_json(&state, &format!("/cs?pw={}&s99=Nope", pw())).await;
        assert_eq!(json["result"], 17);
        let json = get_json(&state, &format!("/cs?pw={}&m7=1", pw())).await;
        assert_eq!(json["result"], 17);
    }

    // -- Options and values ------------------------------------------------

    #[tokio::test]
    async fn co_sets_known_options_and_rejects_unknown() {
        let (_d, state) = test_state();
        let json = get_json(&state, &format!("/co?pw={}&wl=70&mas=3", pw())).await;
        assert_eq!(json["result"], 1);
        {
            let ctl = state.ctl.lock().await;
            assert_eq!(ctl.options.water_level(), 70);
            assert_eq!(ctl.scheduler.water_level, 70);
        }
        let json = get_json(&state, &format!("/co?pw={}&bogus=1", pw())).await;
        assert_eq!(json["result"], 18);
    }

    #[tokio::test]
    async fn co_password_change_needs_matching_old_digest() {
        let (_d, state) = test_state();
        let new = md5_hex("newpass");
        let json = get_json(&state, &format!("/co?pw={0}&npw={1}&opw=wrong", pw(), new)).await;
        assert_eq!(json["result"], 3);
        let json = get_json(&state, &format!("/co?pw={0}&npw={1}&opw={0}", pw(), new)).await;
        assert_eq!(json["result"], 1);
        assert_eq!(state.ctl.lock().await.options.password, new);
    }

    #[tokio::test]
    async fn cv_stops_stations_and_sets_rain_delay() {
        let (_d, state) = test_state();
        get_json(&state, &format!("/cm?pw={}&sid=0&en=1&t=600", pw())).await;
        let json = get_json(&state, &format!("/cv?pw={}&rsn=1&rd=2", pw())).await;
        assert_eq!(json["result"], 1);
        let ctl = state.ctl.lock().await;
        assert!(ctl.scheduler.queue.is_empty());
        assert!(ctl.rain_delay_stop() > 0);
    }

    // -- Pause -------------------------------------------------------------

    #[tokio::test]
    async fn pq_toggles_pause_state() {
        let (_d, state) = test_state();
        let json = get_json(&state, &format!("/pq?pw={}", pw())).await;
        assert_eq!(json["result"], 16); // no duration while not paused
        let json = get_json(&state, &format!("/pq?pw={}&dur=120", pw())).await;
        assert_eq!(json["result"], 1);
        assert!(state.ctl.lock().await.paused());
        let json = get_json(&state, &format!("/pq?pw={}", pw())).await;
        assert_eq!(json["result"], 1);
        assert!(!state.ctl.lock().await.paused());
    }

    // -- Logs --------------------------------------------------------------

    #[tokio::test]
    async fn jl_and_dl_round_trip_the_log_store() {
        let (_d, state) = test_state();
        {
            let logs = state.logs.lock().await;
            logs.append(Local::now().date_naive(), [1, 0, 300, 1000, 0])
                .unwrap();
        }
        let json = get_json(&state, &format!("/jl?pw={}&hist=0", pw())).await;
        assert_eq!(json.as_array().unwrap().len(), 1);

        let json = get_json(&state, &format!("/dl?pw={}&day=all", pw())).await;
        assert_eq!(json["result"], 1);
        let json = get_json(&state, &format!("/jl?pw={}&hist=0", pw())).await;
        assert!(json.as_array().unwrap().is_empty());

        let json = get_json(&state, &format!("/dl?pw={}", pw())).await;
        assert_eq!(json["result"], 16);
        let json = get_json(&state, &format!("/dl?pw={}&day=junk", pw())).await;
        assert_eq!(json["result"], 18);
    }

    // -- Status follows ticks ----------------------------------------------

    #[tokio::test]
    async fn js_reflects_applied_bits_after_a_tick() {
        let (_d, state) = test_state();
        let now = Moment::from_ymd_hm(2024, 6, 3, 9, 0);
        {
            let mut ctl = state.ctl.lock().await;
            ctl.manual_station(1, true, 60, now.epoch).unwrap();
            ctl.tick(&now).unwrap();
        }
        let json = get_json(&state, &format!("/js?pw={}", pw())).await;
        assert_eq!(json["sn"], json!([0, 1, 0, 0, 0, 0, 0, 0]));
    }
}
