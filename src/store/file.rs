//! JSON file store backend.
//!
//! Layout under the data directory:
//!
//! - `state.json`: the RunState, pretty-printed, replaced via temp file + rename
//! - `samples.jsonl`: one JSON sample per line, append-only
//!
//! The sample log is mirrored in memory so queries never touch the disk.
//! A line that fails to parse on reload (usually a torn final write) is
//! skipped with a warning.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::TelemetryStore;
use crate::error::StoreError;
use crate::models::{RunState, Sample};

const STATE_FILE: &str = "state.json";
const SAMPLES_FILE: &str = "samples.jsonl";

struct SampleLog {
    file: File,
    samples: Vec<Sample>,
}

/// `TelemetryStore` persisted as JSON files in a directory.
pub struct JsonFileStore {
    dir: PathBuf,
    state: Mutex<Option<RunState>>,
    log: Mutex<SampleLog>,
}

impl JsonFileStore {
    /// Open (or create) a store in `dir`, reloading anything already there.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        if dir.exists() && !dir.is_dir() {
            return Err(StoreError::Unavailable(format!(
                "{} is not a directory",
                dir.display()
            )));
        }
        fs::create_dir_all(&dir)?;

        let state = Self::load_state(&dir.join(STATE_FILE));
        let samples_path = dir.join(SAMPLES_FILE);
        let samples = Self::load_samples(&samples_path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&samples_path)?;

        log::info!(
            "[Store] Opened {} ({} samples)",
            dir.display(),
            samples.len()
        );

        Ok(JsonFileStore {
            dir,
            state: Mutex::new(state),
            log: Mutex::new(SampleLog { file, samples }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn load_state(path: &Path) -> Option<RunState> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                log::warn!("[Store] Could not read {}: {}", path.display(), e);
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(state) => Some(state),
            Err(e) => {
                log::warn!(
                    "[Store] Ignoring malformed state file {}: {}",
                    path.display(),
                    e
                );
                None
            }
        }
    }

    fn load_samples(path: &Path) -> Result<Vec<Sample>, StoreError> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut samples = Vec::new();
        let mut skipped = 0usize;
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Sample>(&line) {
                Ok(sample) => samples.push(sample),
                Err(_) => skipped += 1,
            }
        }
        if skipped > 0 {
            log::warn!(
                "[Store] Skipped {} malformed line(s) in {}",
                skipped,
                path.display()
            );
        }
        Ok(samples)
    }

    fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, Option<RunState>>, StoreError> {
        self.state
            .lock()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }

    fn lock_log(&self) -> Result<std::sync::MutexGuard<'_, SampleLog>, StoreError> {
        self.log
            .lock()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }
}

impl TelemetryStore for JsonFileStore {
    fn append_sample(&self, sample: &Sample) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(sample)?;
        line.push('\n');

        let mut log = self.lock_log()?;
        log.file.write_all(line.as_bytes())?;
        log.file.flush()?;
        log.samples.push(*sample);
        Ok(())
    }

    fn get_run_state(&self) -> Result<RunState, StoreError> {
        Ok(self.lock_state()?.clone().unwrap_or_else(RunState::initial))
    }

    fn put_run_state(&self, state: &RunState) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(state)?;
        let path = self.dir.join(STATE_FILE);
        let tmp = self.dir.join(format!("{}.tmp", STATE_FILE));

        let mut guard = self.lock_state()?;
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        *guard = Some(state.clone());
        Ok(())
    }

    fn query_recent_samples(&self, limit: usize) -> Result<Vec<Sample>, StoreError> {
        let log = self.lock_log()?;
        Ok(log.samples.iter().rev().take(limit).copied().collect())
    }

    fn clear_samples(&self) -> Result<(), StoreError> {
        let mut log = self.lock_log()?;
        log.file.set_len(0)?;
        log.samples.clear();
        Ok(())
    }
}
