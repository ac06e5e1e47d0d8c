//! Core data types for Telemetry Lab.
//!
//! - `Sample`: one measured invocation of the workload
//! - `RunState`: the singleton current-state record
//! - `Metrics`: rolling statistics derived from a window of samples

use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed 60 Hz frame budget. Independent of the configured cadence.
pub const JANK_THRESHOLD_MS: f32 = 16.67;

/// Lowest workload intensity.
pub const MIN_INTENSITY: i32 = 1;

/// Highest workload intensity.
pub const MAX_INTENSITY: i32 = 5;

/// Sampling cadence with power-save inactive.
pub const NORMAL_CADENCE_HZ: i32 = 20;

/// Sampling cadence with power-save active.
pub const POWER_SAVE_CADENCE_HZ: i32 = 10;

/// Default rolling window: 30 seconds at 20 Hz.
pub const DEFAULT_METRICS_WINDOW: usize = 600;

/// Clamp an intensity into [MIN_INTENSITY, MAX_INTENSITY].
pub fn clamp_intensity(intensity: i32) -> i32 {
    intensity.clamp(MIN_INTENSITY, MAX_INTENSITY)
}

/// Whether a latency exceeds the frame budget.
pub fn is_jank(latency_ms: f32) -> bool {
    latency_ms > JANK_THRESHOLD_MS
}

/// One measured unit of work. Immutable once created.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    /// Per-run sequence number, starting at 0
    pub frame_id: u64,
    /// Monotonic clock reading at sample start (nanoseconds)
    pub timestamp: i64,
    /// Measured workload duration
    pub latency_ms: f32,
    /// Intensity in effect for this sample
    pub intensity: i32,
    /// `latency_ms > JANK_THRESHOLD_MS`
    pub is_jank: bool,
}

impl Sample {
    /// Build a sample, classifying jank and clamping intensity.
    ///
    /// Negative or NaN latencies are recorded as zero.
    pub fn new(frame_id: u64, timestamp: i64, latency_ms: f32, intensity: i32) -> Self {
        let latency_ms = if latency_ms.is_nan() { 0.0 } else { latency_ms.max(0.0) };
        Sample {
            frame_id,
            timestamp,
            latency_ms,
            intensity: clamp_intensity(intensity),
            is_jank: is_jank(latency_ms),
        }
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frame #{} {:.2}ms (intensity {}){}",
            self.frame_id,
            self.latency_ms,
            self.intensity,
            if self.is_jank { " JANK" } else { "" }
        )
    }
}

/// The singleton current-state record.
///
/// Mutated only through `StateStore::update`, which applies a
/// `RunState -> RunState` function under the store's writer lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunState {
    pub is_running: bool,
    pub is_power_save_mode: bool,
    pub current_intensity: i32,
    pub current_frame_id: u64,
    pub current_latency_ms: f32,
    pub cadence_hz: i32,
    /// Three or more consecutive workload failures in the current run
    pub is_degraded: bool,
}

impl RunState {
    /// The state reported when nothing has been persisted yet.
    pub fn initial() -> Self {
        RunState {
            is_running: false,
            is_power_save_mode: false,
            current_intensity: MIN_INTENSITY,
            current_frame_id: 0,
            current_latency_ms: 0.0,
            cadence_hz: NORMAL_CADENCE_HZ,
            is_degraded: false,
        }
    }

    /// Target interval between tick starts.
    pub fn tick_interval(&self) -> std::time::Duration {
        let hz = self.cadence_hz.max(1) as u64;
        std::time::Duration::from_micros(1_000_000 / hz)
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::initial()
    }
}

/// Rolling statistics over a window of samples.
///
/// Recomputed on every read, never persisted incrementally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub average_latency_ms: f32,
    pub min_latency_ms: f32,
    pub max_latency_ms: f32,
    /// 95th percentile latency
    #[serde(default)]
    pub p95_latency_ms: f32,
    /// 99th percentile latency
    #[serde(default)]
    pub p99_latency_ms: f32,
    pub jank_count: usize,
    pub frame_count: usize,
    /// `100 * jank_count / frame_count`, 0 for an empty window
    pub jank_percentage: f32,
}

impl Metrics {
    /// All-zero metrics for an empty window.
    pub fn empty() -> Self {
        Metrics::default()
    }
}
