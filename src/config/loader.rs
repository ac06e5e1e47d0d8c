//! Settings file location and serialization.

use crate::config::AppSettings;
use crate::error::ConfigError;
use std::fs;
use std::path::{Path, PathBuf};

/// Application directory name under the platform config dir
pub const APP_DIR_NAME: &str = "telemetry-lab";

/// Platform config directory for this application: ~/.config/telemetry-lab
pub fn app_config_dir() -> Result<PathBuf, ConfigError> {
    let base = dirs::config_dir().ok_or_else(|| {
        ConfigError::ValidationFailed("Cannot determine config directory".to_string())
    })?;
    Ok(base.join(APP_DIR_NAME))
}

/// Default settings path: ~/.config/telemetry-lab/settings.json
pub fn default_settings_path() -> Result<PathBuf, ConfigError> {
    Ok(app_config_dir()?.join("settings.json"))
}

/// Default sample store location: ~/.config/telemetry-lab/data
pub fn default_data_dir() -> Result<PathBuf, ConfigError> {
    Ok(app_config_dir()?.join("data"))
}

/// Read and parse a settings file without any fallback.
pub fn load_settings_file(path: &Path) -> Result<AppSettings, ConfigError> {
    validate_settings_path(path)?;

    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::FileNotFound(format!("Settings file not found at: {}", path.display()))
        } else {
            ConfigError::IoError(e)
        }
    })?;

    let settings: AppSettings = serde_json::from_str(&content)?;
    Ok(settings)
}

/// Write settings as pretty JSON, creating parent directories.
pub fn save_settings_file(settings: &AppSettings, path: &Path) -> Result<(), ConfigError> {
    validate_settings_path(path)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let json_content = serde_json::to_string_pretty(settings)?;
    fs::write(path, json_content)?;
    Ok(())
}

/// Settings files must be non-empty `.json` paths.
pub fn validate_settings_path(path: &Path) -> Result<(), ConfigError> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::ValidationFailed(
            "Settings path cannot be empty".to_string(),
        ));
    }

    match path.extension() {
        Some(ext) if ext == "json" => Ok(()),
        Some(ext) => Err(ConfigError::ValidationFailed(format!(
            "Settings file must have .json extension, got .{}",
            ext.to_string_lossy()
        ))),
        None => Err(ConfigError::ValidationFailed(
            "Settings file must have .json extension".to_string(),
        )),
    }
}
