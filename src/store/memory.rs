//! In-memory store backend.
//!
//! Nothing survives the process. Used by tests and by the binary when the
//! `persist_samples` setting is off.

use std::sync::Mutex;

use super::TelemetryStore;
use crate::error::StoreError;
use crate::models::{RunState, Sample};

#[derive(Debug, Default)]
struct MemoryData {
    state: Option<RunState>,
    samples: Vec<Sample>,
}

/// `TelemetryStore` kept entirely in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<MemoryData>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of samples currently held.
    pub fn len(&self) -> usize {
        self.data.lock().map(|d| d.samples.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryData>, StoreError> {
        self.data
            .lock()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }
}

impl TelemetryStore for MemoryStore {
    fn append_sample(&self, sample: &Sample) -> Result<(), StoreError> {
        self.lock()?.samples.push(*sample);
        Ok(())
    }

    fn get_run_state(&self) -> Result<RunState, StoreError> {
        Ok(self.lock()?.state.clone().unwrap_or_else(RunState::initial))
    }

    fn put_run_state(&self, state: &RunState) -> Result<(), StoreError> {
        self.lock()?.state = Some(state.clone());
        Ok(())
    }

    fn query_recent_samples(&self, limit: usize) -> Result<Vec<Sample>, StoreError> {
        let data = self.lock()?;
        Ok(data.samples.iter().rev().take(limit).copied().collect())
    }

    fn clear_samples(&self) -> Result<(), StoreError> {
        self.lock()?.samples.clear();
        Ok(())
    }
}
