//! Configuration module for Telemetry Lab.
//!
//! # Module Structure
//!
//! - `loader`: settings file location, reading and writing
//!
//! # Settings Management
//!
//! `SettingsManager` loads `AppSettings` from a JSON file:
//! - a missing file yields defaults
//! - a malformed file is reported and replaced by defaults
//! - out-of-range values are clamped back into range
//!
//! Settings are read before the logger exists, so `load_with_notes` hands
//! its diagnostics back as `SettingsNote`s for the caller to log later.

pub mod loader;

use crate::error::ConfigError;
use crate::models::{clamp_intensity, DEFAULT_METRICS_WINDOW, MIN_INTENSITY};
use crate::system::power::DEFAULT_PROFILE_PATH;
use log::{Level, LevelFilter};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use loader::default_settings_path;

/// Lowest accepted power profile poll interval
pub const MIN_POWER_POLL_MS: u64 = 100;

/// Where the power-save signal comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerSourceKind {
    /// Poll the ACPI platform profile
    Sysfs,
    /// Never report power-save
    Disabled,
}

/// User-facing settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Intensity requested when a run starts (1-5)
    pub default_intensity: i32,
    /// Number of recent samples the metrics report folds over
    pub metrics_window: usize,
    /// Keep samples and run state on disk; off means in-memory only
    pub persist_samples: bool,
    /// Sample store directory; empty means the platform default
    pub data_dir: String,
    /// Log directory; empty means ./logs
    pub log_dir: String,
    pub debug_logging: bool,
    pub power_source: PowerSourceKind,
    pub power_profile_path: String,
    pub power_poll_ms: u64,
    /// Console report period of the headless monitor
    pub report_interval_ms: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        AppSettings {
            default_intensity: MIN_INTENSITY,
            metrics_window: DEFAULT_METRICS_WINDOW,
            persist_samples: true,
            data_dir: String::new(),
            log_dir: String::new(),
            debug_logging: false,
            power_source: PowerSourceKind::Sysfs,
            power_profile_path: DEFAULT_PROFILE_PATH.to_string(),
            power_poll_ms: 2000,
            report_interval_ms: 1000,
        }
    }
}

/// A diagnostic produced while loading settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SettingsNote {
    pub level: Level,
    pub message: String,
}

impl SettingsNote {
    fn info(message: String) -> Self {
        SettingsNote { level: Level::Info, message }
    }

    fn warn(message: String) -> Self {
        SettingsNote { level: Level::Warn, message }
    }

    /// Send the note to the global logger.
    pub fn log(&self) {
        log::log!(self.level, "[Config] {}", self.message);
    }
}

impl AppSettings {
    /// Clamp every numeric field into its accepted range.
    ///
    /// Returns a warning for each value that had to change.
    pub fn sanitize(&mut self) -> Vec<SettingsNote> {
        let mut notes = Vec::new();
        let intensity = clamp_intensity(self.default_intensity);
        if intensity != self.default_intensity {
            notes.push(SettingsNote::warn(format!(
                "default_intensity {} out of range, using {}",
                self.default_intensity, intensity
            )));
            self.default_intensity = intensity;
        }
        if self.metrics_window == 0 {
            notes.push(SettingsNote::warn(format!(
                "metrics_window must be at least 1, using {}",
                DEFAULT_METRICS_WINDOW
            )));
            self.metrics_window = DEFAULT_METRICS_WINDOW;
        }
        if self.power_poll_ms < MIN_POWER_POLL_MS {
            notes.push(SettingsNote::warn(format!(
                "power_poll_ms {} below minimum, using {}",
                self.power_poll_ms, MIN_POWER_POLL_MS
            )));
            self.power_poll_ms = MIN_POWER_POLL_MS;
        }
        if self.report_interval_ms == 0 {
            notes.push(SettingsNote::warn("report_interval_ms must be positive, using 1000".to_string()));
            self.report_interval_ms = 1000;
        }
        if self.power_profile_path.trim().is_empty() {
            self.power_profile_path = DEFAULT_PROFILE_PATH.to_string();
        }
        notes
    }

    /// Resolved sample store directory.
    pub fn data_dir_path(&self) -> Result<PathBuf, ConfigError> {
        if self.data_dir.is_empty() {
            loader::default_data_dir()
        } else {
            Ok(PathBuf::from(&self.data_dir))
        }
    }

    /// Resolved log directory.
    pub fn log_dir_path(&self) -> Result<PathBuf, ConfigError> {
        if self.log_dir.is_empty() {
            Ok(crate::log_collector::default_logs_path()?)
        } else {
            Ok(PathBuf::from(&self.log_dir))
        }
    }

    pub fn log_level(&self) -> LevelFilter {
        if self.debug_logging {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        }
    }

    pub fn power_poll_interval(&self) -> Duration {
        Duration::from_millis(self.power_poll_ms.max(MIN_POWER_POLL_MS))
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms.max(1))
    }
}

/// Loads and saves `AppSettings`.
pub struct SettingsManager;

impl SettingsManager {
    /// Load settings from `path` without logging.
    ///
    /// A missing file yields defaults and an info note. A file that fails to
    /// parse yields defaults and a warning. Other IO errors are returned.
    pub fn load_with_notes(path: &Path) -> Result<(AppSettings, Vec<SettingsNote>), ConfigError> {
        let mut notes = Vec::new();
        let mut settings = match loader::load_settings_file(path) {
            Ok(settings) => settings,
            Err(ConfigError::FileNotFound(_)) => {
                notes.push(SettingsNote::info(format!(
                    "No settings at {}, using defaults",
                    path.display()
                )));
                AppSettings::default()
            }
            Err(ConfigError::InvalidJson(e)) => {
                notes.push(SettingsNote::warn(format!(
                    "Failed to parse {}, falling back to defaults: {}",
                    path.display(),
                    e
                )));
                AppSettings::default()
            }
            Err(e) => return Err(e),
        };
        notes.extend(settings.sanitize());
        Ok((settings, notes))
    }

    /// `load_with_notes`, logging the notes straight away.
    pub fn load_from(path: &Path) -> Result<AppSettings, ConfigError> {
        let (settings, notes) = Self::load_with_notes(path)?;
        for note in &notes {
            note.log();
        }
        Ok(settings)
    }

    /// Load from the default settings path.
    pub fn load() -> Result<AppSettings, ConfigError> {
        Self::load_from(&default_settings_path()?)
    }

    pub fn save_to(settings: &AppSettings, path: &Path) -> Result<(), ConfigError> {
        loader::save_settings_file(settings, path)?;
        log::debug!("[Config] Settings saved to {}", path.display());
        Ok(())
    }

    pub fn save(settings: &AppSettings) -> Result<(), ConfigError> {
        Self::save_to(settings, &default_settings_path()?)
    }
}
