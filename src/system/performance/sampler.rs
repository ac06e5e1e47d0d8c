//! Sample Generator
//!
//! Times one synchronous workload invocation against the monotonic clock and
//! packages the result as a `Sample`. Frame sequencing belongs to the caller.

use std::sync::Arc;
use std::time::Instant;

use super::workload::{Intensity, Workload};
use crate::error::WorkloadError;
use crate::models::Sample;

/// Measures a workload and produces samples.
#[derive(Clone)]
pub struct SampleGenerator {
    workload: Arc<dyn Workload>,
    /// Monotonic origin for sample timestamps
    origin: Instant,
}

impl SampleGenerator {
    pub fn new(workload: Arc<dyn Workload>) -> Self {
        SampleGenerator {
            workload,
            origin: Instant::now(),
        }
    }

    /// Run the workload once and return the timed sample.
    ///
    /// Blocks for the duration of the workload. Workload failures propagate
    /// unchanged; nothing is retried here.
    pub fn measure(&self, frame_id: u64, intensity: Intensity) -> Result<Sample, WorkloadError> {
        let start = Instant::now();
        let timestamp = start.duration_since(self.origin).as_nanos() as i64;

        self.workload.run(intensity)?;

        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
        Ok(Sample::new(
            frame_id,
            timestamp,
            latency_ms as f32,
            intensity.value(),
        ))
    }
}
