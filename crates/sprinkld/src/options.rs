//! Controller options as a closed enumeration with a fixed metadata table
//! (wire name, default, clamp range, read-only). The HTTP layer translates
//! legacy wire parameter names to variants; unknown names are malformed input.

use md5::{Digest, Md5};
use serde_yaml::Value;

use crate::error::ControlError;
use crate::shift::MAX_BOARDS;

pub fn md5_hex(s: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(s.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Default web password, stored as its MD5 digest like every password.
pub const DEFAULT_PASSWORD: &str = "opendoor";

/// Reported as `fwv` in `/jo`.
pub const FIRMWARE_VERSION: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum IntOpt {
    DeviceEnable,
    NumBoards,
    HttpPort,
    WaterLevel,
    StationDelay,
    Master1,
    Master1OnAdj,
    Master1OffAdj,
    Master2,
    Master2OnAdj,
    Master2OffAdj,
    IgnorePassword,
    IgnoreRain,
    Sensor1Kind,
    Sensor1Contact,
    Sensor1OnDelay,
    Sensor1OffDelay,
    Sensor2Kind,
    Sensor2Contact,
    Sensor2OnDelay,
    Sensor2OffDelay,
    InfluxEnable,
    FirmwareVersion,
}

pub struct OptionMeta {
    pub key: IntOpt,
    pub wire: &'static str,
    pub default: i64,
    pub min: i64,
    pub max: i64,
    pub read_only: bool,
}

const fn meta(key: IntOpt, wire: &'static str, default: i64, min: i64, max: i64) -> OptionMeta {
    OptionMeta {
        key,
        wire,
        default,
        min,
        max,
        read_only: false,
    }
}

pub const INT_OPTIONS: &[OptionMeta] = &[
    meta(IntOpt::DeviceEnable, "en", 1, 0, 1),
    meta(IntOpt::NumBoards, "nbrd", 1, 1, MAX_BOARDS as i64),
    meta(IntOpt::HttpPort, "hp", 8080, 1, 65_535),
    meta(IntOpt::WaterLevel, "wl", 100, 0, 250),
    meta(IntOpt::StationDelay, "sdt", 0, 0, 600),
    meta(IntOpt::Master1, "mas", 0, 0, 200),
    meta(IntOpt::Master1OnAdj, "mton", 0, -600, 600),
    meta(IntOpt::Master1OffAdj, "mtof", 0, -600, 600),
    meta(IntOpt::Master2, "mas2", 0, 0, 200),
    meta(IntOpt::Master2OnAdj, "mton2", 0, -600, 600),
    meta(IntOpt::Master2OffAdj, "mtof2", 0, -600, 600),
    meta(IntOpt::IgnorePassword, "ipas", 0, 0, 1),
    meta(IntOpt::IgnoreRain, "igr", 0, 0, 1),
    meta(IntOpt::Sensor1Kind, "sn1t", 0, 0, 2),
    meta(IntOpt::Sensor1Contact, "sn1o", 0, 0, 1),
    meta(IntOpt::Sensor1OnDelay, "sn1on", 0, 0, 3600),
    meta(IntOpt::Sensor1OffDelay, "sn1of", 0, 0, 3600),
    meta(IntOpt::Sensor2Kind, "sn2t", 0, 0, 2),
    meta(IntOpt::Sensor2Contact, "sn2o", 0, 0, 1),
    meta(IntOpt::Sensor2OnDelay, "sn2on", 0, 0, 3600),
    meta(IntOpt::Sensor2OffDelay, "sn2of", 0, 0, 3600),
    meta(IntOpt::InfluxEnable, "ifen", 0, 0, 1),
    OptionMeta {
        key: IntOpt::FirmwareVersion,
        wire: "fwv",
        default: FIRMWARE_VERSION,
        min: FIRMWARE_VERSION,
        max: FIRMWARE_VERSION,
        read_only: true,
    },
];

// String options keep their own wire names; the password digest is never
// exposed through `/jo` and never settable through the generic path.
pub const WIRE_LOCATION: &str = "loc";
pub const WIRE_INFLUX_URL: &str = "ifurl";
pub const WIRE_INFLUX_DB: &str = "ifdb";

#[derive(Debug, Clone)]
pub struct Options {
    ints: [i64; INT_OPTIONS.len()],
    /// MD5 digest of the web password.
    pub password: String,
    /// "lat,lon" used by the solar-time updater; empty = defaults.
    pub location: String,
    pub influx_url: String,
    pub influx_db: String,
}

impl Default for Options {
    fn default() -> Self {
        let mut ints = [0i64; INT_OPTIONS.len()];
        for m in INT_OPTIONS {
            ints[m.key as usize] = m.default;
        }
        Self {
            ints,
            password: md5_hex(DEFAULT_PASSWORD),
            location: String::new(),
            influx_url: String::new(),
            influx_db: String::new(),
        }
    }
}

impl Options {
    pub fn get(&self, key: IntOpt) -> i64 {
        self.ints[key as usize]
    }

    /// Set with the metadata clamp applied.
    pub fn set(&mut self, key: IntOpt, value: i64) {
        let m = &INT_OPTIONS[key as usize];
        self.ints[key as usize] = value.clamp(m.min, m.max);
    }

    pub fn meta_by_wire(wire: &str) -> Option<&'static OptionMeta> {
        INT_OPTIONS.iter().find(|m| m.wire == wire)
    }

    /// Translate a wire parameter to a typed set. Unknown names are
    /// malformed; read-only options are not permitted.
    pub fn set_by_wire(&mut self, wire: &str, raw: &str) -> Result<(), ControlError> {
        match wire {
            WIRE_LOCATION => {
                self.location = raw.to_string();
                return Ok(());
            }
            WIRE_INFLUX_URL => {
                self.influx_url = raw.to_string();
                return Ok(());
            }
            WIRE_INFLUX_DB => {
                self.influx_db = raw.to_string();
                return Ok(());
            }
            _ => {}
        }
        let m = Self::meta_by_wire(wire)
            .ok_or_else(|| ControlError::Malformed(format!("unknown option '{wire}'")))?;
        if m.read_only {
            return Err(ControlError::NotPermitted);
        }
        let value: i64 = raw
            .parse()
            .map_err(|_| ControlError::Malformed(format!("bad value for '{wire}'")))?;
        self.set(m.key, value);
        Ok(())
    }

    // ── Convenience accessors ────────────────────────────────────

    pub fn device_enabled(&self) -> bool {
        self.get(IntOpt::DeviceEnable) != 0
    }

    pub fn num_boards(&self) -> usize {
        self.get(IntOpt::NumBoards) as usize
    }

    pub fn num_stations(&self) -> usize {
        self.num_boards() * 8
    }

    pub fn water_level(&self) -> i64 {
        self.get(IntOpt::WaterLevel)
    }

    pub fn station_delay(&self) -> i64 {
        self.get(IntOpt::StationDelay)
    }

    pub fn http_port(&self) -> u16 {
        self.get(IntOpt::HttpPort) as u16
    }

    pub fn ignore_password(&self) -> bool {
        self.get(IntOpt::IgnorePassword) != 0
    }

    pub fn ignore_rain_globally(&self) -> bool {
        self.get(IntOpt::IgnoreRain) != 0
    }

    pub fn influx_enabled(&self) -> bool {
        self.get(IntOpt::InfluxEnable) != 0
    }

    /// (1-based master station id, on adjust, off adjust) for master 0 or 1.
    /// Id 0 means "no master configured".
    pub fn master(&self, index: usize) -> (usize, i64, i64) {
        if index == 0 {
            (
                self.get(IntOpt::Master1) as usize,
                self.get(IntOpt::Master1OnAdj),
                self.get(IntOpt::Master1OffAdj),
            )
        } else {
            (
                self.get(IntOpt::Master2) as usize,
                self.get(IntOpt::Master2OnAdj),
                self.get(IntOpt::Master2OffAdj),
            )
        }
    }

    /// (kind, contact, on delay, off delay) raw wire values for sensor 0 or 1.
    pub fn sensor(&self, index: usize) -> (i64, i64, i64, i64) {
        if index == 0 {
            (
                self.get(IntOpt::Sensor1Kind),
                self.get(IntOpt::Sensor1Contact),
                self.get(IntOpt::Sensor1OnDelay),
                self.get(IntOpt::Sensor1OffDelay),
            )
        } else {
            (
                self.get(IntOpt::Sensor2Kind),
                self.get(IntOpt::Sensor2Contact),
                self.get(IntOpt::Sensor2OnDelay),
                self.get(IntOpt::Sensor2OffDelay),
            )
        }
    }

    // ── Wire + persistence maps ──────────────────────────────────

    /// `/jo` body: every int option by wire name plus the string options,
    /// never the password digest.
    pub fn to_wire_map(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut map = serde_json::Map::new();
        for m in INT_OPTIONS {
            map.insert(m.wire.to_string(), serde_json::json!(self.get(m.key)));
        }
        map.insert(WIRE_LOCATION.into(), serde_json::json!(self.location));
        map.insert(WIRE_INFLUX_URL.into(), serde_json::json!(self.influx_url));
        map.insert(WIRE_INFLUX_DB.into(), serde_json::json!(self.influx_db));
        map
    }

    /// YAML mapping for `options.yml`, password digest included.
    pub fn to_yaml(&self) -> Value {
        let mut map = serde_yaml::Mapping::new();
        for m in INT_OPTIONS {
            map.insert(Value::from(m.wire), Value::from(self.get(m.key)));
        }
        map.insert(Value::from("pwd"), Value::from(self.password.clone()));
        map.insert(Value::from(WIRE_LOCATION), Value::from(self.location.clone()));
        map.insert(
            Value::from(WIRE_INFLUX_URL),
            Value::from(self.influx_url.clone()),
        );
        map.insert(
            Value::from(WIRE_INFLUX_DB),
            Value::from(self.influx_db.clone()),
        );
        Value::Mapping(map)
    }

    /// Overlay persisted values on defaults. Unknown keys and bad value
    /// types are ignored so a partially corrupt file degrades gracefully.
    pub fn from_yaml(v: &Value) -> Self {
        let mut opts = Options::default();
        let Some(map) = v.as_mapping() else {
            return opts;
        };
        for (k, val) in map {
            let Some(name) = k.as_str() else { continue };
            match name {
                "pwd" => {
                    if let Some(s) = val.as_str() {
                        opts.password = s.to_string();
                    }
                }
                WIRE_LOCATION => {
                    if let Some(s) = val.as_str() {
                        opts.location = s.to_string();
                    }
                }
                WIRE_INFLUX_URL => {
                    if let Some(s) = val.as_str() {
                        opts.influx_url = s.to_string();
                    }
                }
                WIRE_INFLUX_DB => {
                    if let Some(s) = val.as_str() {
                        opts.influx_db = s.to_string();
                    }
                }
                _ => {
                    if let (Some(m), Some(n)) = (Self::meta_by_wire(name), val.as_i64()) {
                        opts.set(m.key, n);
                    }
                }
            }
        }
        opts
    }
}

// ===========================================================================
// Tests
// ===========================================================================
