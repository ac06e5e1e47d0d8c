//! Telemetry Lab core
//!
//! Samples the latency of a repeating synthetic workload, classifies each
//! sample against a 60 Hz frame budget, folds the log into rolling metrics,
//! and adapts cadence and intensity to the host's power-save signal.
//!
//! The system is organized into functional modules:
//! - **error**: Unified error type hierarchy
//! - **models**: Sample, RunState, Metrics and their constants
//! - **store**: Persistent store contract, backends, single-writer adapter
//! - **system**: Workload measurement, sampling loop, power-state sources
//! - **config**: Settings file management
//! - **log_collector**: `log` backend persisting to disk

// Core foundational modules
pub mod error;
pub mod models;

pub mod store;

pub mod system;

pub mod config;

// Decoupled logging pipeline
pub mod log_collector;

// Re-export the log crate for macro usage
pub use log;

pub use log_collector::{LogCollector, LogLine};

// ============================================================================
// PUBLIC RE-EXPORTS FOR CONVENIENCE
// ============================================================================

pub use error::{ConfigError, Result, StoreError, TelemetryError, WorkloadError};

pub use models::{
    clamp_intensity, is_jank, Metrics, RunState, Sample, JANK_THRESHOLD_MS, MAX_INTENSITY,
    MIN_INTENSITY,
};

pub use store::{JsonFileStore, MemoryStore, StateStore, TelemetryStore};

pub use system::performance::{
    ConvolutionWorkload, Intensity, MetricsAggregator, SampleGenerator, SamplingLoop,
    TelemetryEvent, Workload,
};
pub use system::power::{PowerController, PowerSignal, SysfsPowerSource};

pub use config::{AppSettings, PowerSourceKind, SettingsManager, SettingsNote};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
