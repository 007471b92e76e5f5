//! YAML persistence for options, stations, and programs. Unreadable or
//! corrupt files are treated as "use defaults" at load time; save errors are
//! logged by callers and the in-memory state is retained.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::options::Options;
use crate::program::{Program, MAX_PROGRAMS};
use crate::station::Station;

const OPTIONS_FILE: &str = "options.yml";
const STATIONS_FILE: &str = "stations.yml";
const PROGRAMS_FILE: &str = "programs.yml";

// ---------------------------------------------------------------------------
// File shapes
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
struct StationsFile {
    stations: Vec<StationRow>,
}

#[derive(Serialize, Deserialize)]
struct StationRow {
    id: usize,
    #[serde(flatten)]
    station: Station,
}

#[derive(Serialize, Deserialize)]
struct ProgramsFile {
    programs: Vec<Program>,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct ConfigStore {
    dir: PathBuf,
}

impl ConfigStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    fn read(&self, file: &str) -> Option<String> {
        let path = self.path(file);
        if !path.exists() {
            return None;
        }
        match fs::read_to_string(&path) {
            Ok(s) => Some(s),
            Err(e) => {
                warn!(file, "unreadable config file, using defaults: {e}");
                None
            }
        }
    }

    fn write(&self, file: &str, contents: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let path = self.path(file);
        fs::write(&path, contents).with_context(|| format!("failed to write {}", path.display()))
    }

    // ── Options ──────────────────────────────────────────────────

    pub fn load_options(&self) -> Options {
        let Some(raw) = self.read(OPTIONS_FILE) else {
            return Options::default();
        };
        match serde_yaml::from_str::<serde_yaml::Value>(&raw) {
            Ok(v) => Options::from_yaml(&v),
            Err(e) => {
                warn!("corrupt {OPTIONS_FILE}, using defaults: {e}");
                Options::default()
            }
        }
    }

    pub fn save_options(&self, options: &Options) -> Result<()> {
        let yaml = serde_yaml::to_string(&options.to_yaml()).context("serialize options")?;
        self.write(OPTIONS_FILE, &yaml)
    }

    // ── Stations ─────────────────────────────────────────────────

    /// Load the station table sized to `count`; slots the file does not
    /// cover get default numbered stations.
    pub fn load_stations(&self, count: usize) -> Vec<Station> {
        let mut stations: Vec<Station> = (0..count).map(Station::numbered).collect();
        let Some(raw) = self.read(STATIONS_FILE) else {
            return stations;
        };
        match serde_yaml::from_str::<StationsFile>(&raw) {
            Ok(file) => {
                for row in file.stations {
                    if let Some(slot) = stations.get_mut(row.id) {
                        *slot = row.station;
                    }
                }
            }
            Err(e) => warn!("corrupt {STATIONS_FILE}, using defaults: {e}"),
        }
        stations
    }

    pub fn save_stations(&self, stations: &[Station]) -> Result<()> {
        let file = StationsFile {
            stations: stations
                .iter()
                .enumerate()
                .map(|(id, station)| StationRow {
                    id,
                    station: station.clone(),
                })
                .collect(),
        };
        let yaml = serde_yaml::to_string(&file).context("serialize stations")?;
        self.write(STATIONS_FILE, &yaml)
    }

    // ── Programs ─────────────────────────────────────────────────

    pub fn load_programs(&self) -> Vec<Program> {
        let Some(raw) = self.read(PROGRAMS_FILE) else {
            return Vec::new();
        };
        match serde_yaml::from_str::<ProgramsFile>(&raw) {
            Ok(mut file) => {
                file.programs.truncate(MAX_PROGRAMS);
                file.programs
            }
            Err(e) => {
                warn!("corrupt {PROGRAMS_FILE}, using defaults: {e}");
                Vec::new()
            }
        }
    }

    pub fn save_programs(&self, programs: &[Program]) -> Result<()> {
        let file = ProgramsFile {
            programs: programs.to_vec(),
        };
        let yaml = serde_yaml::to_string(&file).context("serialize programs")?;
        self.write(PROGRAMS_FILE, &yaml)
    }

}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{md5_hex, IntOpt};
    use crate::station::StationKind;

    fn store() -> (tempfile::TempDir, ConfigStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn missing_files_yield_defaults() {
        let (_d, store) = store();
        let opts = store.load_options();
        assert_eq!(opts.get(IntOpt::DeviceEnable), 1);
        assert_eq!(store.load_stations(8).len(), 8);
        assert!(store.load_programs().is_empty());
    }

    #[test]
    fn options_round_trip() {
        let (_d, store) = store();
        let mut opts = Options::default();
        opts.set(IntOpt::WaterLevel, 70);
        opts.password = md5_hex("secret");
        store.save_options(&opts).unwrap();

        let back = store.load_options();
        assert_eq!(back.water_level(), 70);
        assert_eq!(back.password, opts.password);
    }

    #[test]
    fn stations_round_trip_with_kind_payload() {
        let (_d, store) = store();
        let mut stations: Vec<Station> = (0..8).map(Station::numbered).collect();
        stations[3].name = "Front lawn".into();
        stations[3].master1_bound = true;
        stations[5].kind = StationKind::RemoteIp {
            host: "10.0.0.12".into(),
            port: 8080,
            station_id: 2,
        };
        store.save_stations(&stations).unwrap();

        let back = store.load_stations(8);
        assert_eq!(back, stations);
    }

    #[test]
    fn station_load_pads_and_truncates_to_count() {
        let (_d, store) = store();
        let stations: Vec<Station> = (0..8).map(Station::numbered).collect();
        store.save_stations(&stations).unwrap();

        // A larger board count exposes defaults past the persisted range.
        let grown = store.load_stations(16);
        assert_eq!(grown.len(), 16);
        assert_eq!(grown[12], Station::numbered(12));

        let shrunk = store.load_stations(4);
        assert_eq!(shrunk.len(), 4);
    }

    #[test]
    fn programs_round_trip() {
        let (_d, store) = store();
        let mut p = Program::default();
        p.name = "Vegetables".into();
        p.durations = vec![120, 0, 300];
        store.save_programs(&[p.clone()]).unwrap();

        let back = store.load_programs();
        assert_eq!(back, vec![p]);
    }

    #[test]
    fn corrupt_yaml_degrades_to_defaults() {
        let (_d, store) = store();
        fs::create_dir_all(&store.dir).unwrap();
        fs::write(store.path(STATIONS_FILE), "stations: [not, a, row]").unwrap();
        fs::write(store.path(PROGRAMS_FILE), "{{{{").unwrap();

        assert_eq!(store.load_stations(8), (0..8).map(Station::numbered).collect::<Vec<_>>());
        assert!(store.load_programs().is_empty());
    }
}
