//! Unified error type hierarchy for Telemetry Lab
//!
//! Provides structured error handling with StoreError, WorkloadError,
//! ConfigError, and the umbrella TelemetryError returned by loop commands
//! and store setup.
//!
//! Out-of-range intensities are never an error: every entry point clamps them.
//! Workload failures never leave the tick task; they surface as events.

use std::io;
use thiserror::Error;

/// Persistent store read/write failures.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error during store operation: {0}")]
    Io(#[from] io::Error),

    #[error("Store serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store lock poisoned: {0}")]
    LockPoisoned(String),

    /// The data location exists but cannot hold a store
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Failures raised by the workload generator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkloadError {
    #[error("Workload failed: {0}")]
    Failed(String),

    #[error("Workload panicked: {0}")]
    Panicked(String),
}

/// Settings file parsing and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Invalid JSON in config: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("IO error during config operations: {0}")]
    IoError(#[from] io::Error),
}

/// Global error type for telemetry commands.
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl TelemetryError {
    /// Get a user-facing error message suitable for display
    pub fn user_message(&self) -> String {
        match self {
            TelemetryError::Persistence(e) => format!("Could not save telemetry: {}", e),
            TelemetryError::Config(e) => format!("Settings error: {}", e),
        }
    }
}

/// Top-level result type for telemetry operations.
pub type Result<T> = std::result::Result<T, TelemetryError>;
