//! Latency Sampling and Jank Telemetry Module
//!
//! This module measures a synthetic workload on a fixed cadence, classifies
//! each measurement against the 60 Hz frame budget, and folds the log into
//! rolling metrics.
//!
//! ## Architecture
//! - **Workload**: CPU-bound unit of work whose duration grows with intensity
//! - **Sampler**: times one workload invocation and builds a `Sample`
//! - **Aggregator**: pure fold from a sample window to `Metrics` (HDR tail percentiles)
//! - **SamplingLoop**: lifecycle state machine driving ticks at the adapted cadence

pub mod aggregator;
pub mod sampler;
pub mod sampling_loop;
pub mod workload;

use std::fmt;

use crate::models::Sample;

pub use aggregator::{jank_percentage, MetricsAggregator};
pub use sampler::SampleGenerator;
pub use sampling_loop::{SamplingLoop, DEGRADED_AFTER_FAILURES};
pub use workload::{ConvolutionWorkload, Intensity, Workload};

/// Notifications emitted by the sampling loop.
///
/// Delivered with `try_send`: a full or closed channel drops the event and
/// never blocks a tick.
#[derive(Clone, Debug, PartialEq)]
pub enum TelemetryEvent {
    RunStarted { intensity: i32, cadence_hz: i32 },
    SampleRecorded(Sample),
    /// The workload failed; no sample was recorded for `frame_id`
    TickSkipped {
        frame_id: u64,
        consecutive_failures: u32,
        reason: String,
    },
    /// A sample was measured but could not be persisted
    PersistenceFailed { frame_id: u64, reason: String },
    /// Entered (`true`) or left (`false`) the degraded state
    Degraded(bool),
    PowerModeChanged {
        power_save: bool,
        intensity: i32,
        cadence_hz: i32,
    },
    RunStopped,
}

impl fmt::Display for TelemetryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEvent::RunStarted { intensity, cadence_hz } => {
                write!(f, "run started (intensity {}, {} Hz)", intensity, cadence_hz)
            }
            TelemetryEvent::SampleRecorded(sample) => write!(f, "{}", sample),
            TelemetryEvent::TickSkipped {
                frame_id,
                consecutive_failures,
                reason,
            } => write!(
                f,
                "tick skipped at frame #{} ({} in a row): {}",
                frame_id, consecutive_failures, reason
            ),
            TelemetryEvent::PersistenceFailed { frame_id, reason } => {
                write!(f, "frame #{} not saved: {}", frame_id, reason)
            }
            TelemetryEvent::Degraded(true) => write!(f, "run degraded"),
            TelemetryEvent::Degraded(false) => write!(f, "run recovered"),
            TelemetryEvent::PowerModeChanged {
                power_save,
                intensity,
                cadence_hz,
            } => write!(
                f,
                "power-save {} (intensity {}, {} Hz)",
                if *power_save { "on" } else { "off" },
                intensity,
                cadence_hz
            ),
            TelemetryEvent::RunStopped => write!(f, "run stopped"),
        }
    }
}
