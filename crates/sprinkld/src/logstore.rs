//! File-based daily log store: `logs/YYYYMMDD.json`, each holding a JSON
//! array of `[program, station, duration, end_epoch, kind]` rows. Sensor
//! events use pseudo station ids 200/201 with duration 1/0.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tracing::warn;

/// One log row on disk.
pub type LogRow = [i64; 5];

pub struct LogStore {
    dir: PathBuf,
}

impl LogStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn file_for(&self, day: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.json", day.format("%Y%m%d")))
    }

    fn read_rows(&self, path: &Path) -> Vec<LogRow> {
        let Ok(raw) = fs::read_to_string(path) else {
            return Vec::new();
        };
        match serde_json::from_str(&raw) {
            Ok(rows) => rows,
            Err(e) => {
                warn!(file = %path.display(), "corrupt log file, starting fresh: {e}");
                Vec::new()
            }
        }
    }

    pub fn append(&self, day: NaiveDate, row: LogRow) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let path = self.file_for(day);
        let mut rows = self.read_rows(&path);
        rows.push(row);
        let json = serde_json::to_string(&rows).context("serialize log rows")?;
        fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))
    }

    /// Rows of today and the `hist` previous days, oldest file first.
    pub fn read_days(&self, today: NaiveDate, hist: u32) -> Vec<LogRow> {
        let mut out = Vec::new();
        for back in (0..=hist as i64).rev() {
            if let Some(day) = today.checked_sub_days(chrono::Days::new(back as u64)) {
                out.extend(self.read_rows(&self.file_for(day)));
            }
        }
        out
    }

    /// Delete one day (`"YYYYMMDD"`) or every log file (`"all"`). Returns
    /// the number of files removed.
    pub fn delete(&self, day: &str) -> Result<usize> {
        if day == "all" {
            let mut removed = 0;
            if let Ok(entries) = fs::read_dir(&self.dir) {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.extension().is_some_and(|e| e == "json") {
                        fs::remove_file(&path)
                            .with_context(|| format!("failed to remove {}", path.display()))?;
                        removed += 1;
                    }
                }
            }
            return Ok(removed);
        }

        let date = NaiveDate::parse_from_str(day, "%Y%m%d")
            .with_context(|| format!("bad log day '{day}'"))?;
        let path = self.file_for(date);
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
            return Ok(1);
        }
        Ok(0)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
