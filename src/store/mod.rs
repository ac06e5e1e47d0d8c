//! Telemetry Persistence and State Broadcasting
//!
//! This module wraps the persistent store behind a single-writer adapter.
//!
//! # Architecture
//!
//! ```text
//! SamplingLoop / commands / power watcher
//!     |
//! [StateStore] (one writer mutex, read-modify-write)
//!     |                         |
//! [TelemetryStore]          watch channels
//! (MemoryStore |            (RunState snapshots, log revision)
//!  JsonFileStore)               |
//!                           observers (copy-on-read)
//! ```
//!
//! A RunState is broadcast only after the backend accepted it, so a failed
//! write leaves every observer on the previous value.
//!
//! The sample log spans runs. The writer also counts how many samples the
//! current run has appended, and metrics only fold over that suffix.

pub mod file;
pub mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

use futures::stream::{self, Stream};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use crate::config::AppSettings;
use crate::error::{StoreError, TelemetryError};
use crate::models::{Metrics, RunState, Sample};
use crate::system::performance::MetricsAggregator;

/// The persistent store contract.
///
/// One current-state record plus a time-ordered, append-only sample log.
/// Implementations only need to be individually atomic per call; the
/// `StateStore` adapter serializes read-modify-write sequences.
pub trait TelemetryStore: Send + Sync {
    /// Append a sample to the end of the log.
    fn append_sample(&self, sample: &Sample) -> Result<(), StoreError>;

    /// The persisted state, or `RunState::initial()` if none was written.
    fn get_run_state(&self) -> Result<RunState, StoreError>;

    /// Replace the persisted state.
    fn put_run_state(&self, state: &RunState) -> Result<(), StoreError>;

    /// Up to `limit` samples, newest first.
    fn query_recent_samples(&self, limit: usize) -> Result<Vec<Sample>, StoreError>;

    /// Empty the sample log.
    fn clear_samples(&self) -> Result<(), StoreError>;
}

/// Guarded by the writer lock.
#[derive(Debug, Default)]
struct RunWindow {
    /// Samples appended since the current run began
    samples: usize,
}

struct Inner {
    backend: Arc<dyn TelemetryStore>,
    /// Serializes every read-modify-write against the backend
    writer: Mutex<RunWindow>,
    state_tx: watch::Sender<RunState>,
    /// Bumped on every append or clear of the sample log and on run start
    log_tx: watch::Sender<u64>,
}

/// Single-writer adapter over a `TelemetryStore`.
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<Inner>,
}

impl StateStore {
    /// Wrap a backend, loading its persisted state.
    ///
    /// A persisted `is_running = true` is left over from a previous process
    /// and is written back as stopped. The last run of a reloaded log is
    /// recovered from its frame ids, which restart at 0 on every run.
    pub fn new(backend: Arc<dyn TelemetryStore>) -> Result<Self, StoreError> {
        let mut state = backend.get_run_state()?;
        if state.is_running {
            log::info!("[Store] Persisted state was running; marking stopped");
            state.is_running = false;
            backend.put_run_state(&state)?;
        }

        let log = backend.query_recent_samples(usize::MAX)?;
        let window = RunWindow {
            samples: MetricsAggregator::current_run(&log).len(),
        };
        if !log.is_empty() {
            log::debug!(
                "[Store] Reloaded {} samples, {} in the last run",
                log.len(),
                window.samples
            );
        }

        Ok(Self::from_parts(backend, state, window))
    }

    /// Open the backend the settings ask for: a `JsonFileStore` in the data
    /// directory, or a `MemoryStore` when `persist_samples` is off.
    pub fn from_settings(settings: &AppSettings) -> Result<Self, TelemetryError> {
        let backend: Arc<dyn TelemetryStore> = if settings.persist_samples {
            Arc::new(JsonFileStore::open(settings.data_dir_path()?)?)
        } else {
            log::info!("[Store] persist_samples is off; samples stay in memory");
            Arc::new(MemoryStore::new())
        };
        Ok(Self::new(backend)?)
    }

    /// Convenience constructor over a fresh `MemoryStore`.
    pub fn in_memory() -> Self {
        Self::from_parts(
            Arc::new(MemoryStore::new()),
            RunState::initial(),
            RunWindow::default(),
        )
    }

    fn from_parts(backend: Arc<dyn TelemetryStore>, state: RunState, window: RunWindow) -> Self {
        let (state_tx, _) = watch::channel(state);
        let (log_tx, _) = watch::channel(0u64);
        StateStore {
            inner: Arc::new(Inner {
                backend,
                writer: Mutex::new(window),
                state_tx,
                log_tx,
            }),
        }
    }

    fn bump_log_revision(&self) {
        self.inner.log_tx.send_modify(|rev| *rev = rev.wrapping_add(1));
    }

    fn lock_writer(&self) -> Result<std::sync::MutexGuard<'_, RunWindow>, StoreError> {
        self.inner
            .writer
            .lock()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }

    /// Apply `f` to the current state atomically and persist the result.
    ///
    /// No two applications interleave. On failure nothing is broadcast and
    /// the previous state remains current.
    pub fn update<F>(&self, f: F) -> Result<RunState, StoreError>
    where
        F: FnOnce(RunState) -> RunState,
    {
        let _guard = self.lock_writer()?;
        let current = self.inner.backend.get_run_state()?;
        let next = f(current);
        self.inner.backend.put_run_state(&next)?;
        self.inner.state_tx.send_replace(next.clone());
        Ok(next)
    }

    /// Like `update`, but also opens a new run: the metrics window is emptied
    /// and metrics observers are woken, even before the run records anything.
    ///
    /// If the state cannot be persisted the previous run's window stays.
    pub fn begin_run<F>(&self, f: F) -> Result<RunState, StoreError>
    where
        F: FnOnce(RunState) -> RunState,
    {
        let mut window = self.lock_writer()?;
        let current = self.inner.backend.get_run_state()?;
        let next = f(current);
        self.inner.backend.put_run_state(&next)?;
        window.samples = 0;
        self.bump_log_revision();
        self.inner.state_tx.send_replace(next.clone());
        Ok(next)
    }

    /// Append a sample and advance the frame/latency fields in one mutation.
    ///
    /// `current_intensity` is left alone: it holds the intensity for the next
    /// tick, which a command may already have changed while this sample ran.
    /// A recorded sample also clears the degraded flag.
    pub fn record_sample(&self, sample: &Sample) -> Result<RunState, StoreError> {
        let mut window = self.lock_writer()?;
        let current = self.inner.backend.get_run_state()?;
        let next = RunState {
            current_frame_id: sample.frame_id,
            current_latency_ms: sample.latency_ms,
            is_degraded: false,
            ..current.clone()
        };
        self.inner.backend.put_run_state(&next)?;

        // The log must not hold a frame the state never acknowledged
        if let Err(e) = self.inner.backend.append_sample(sample) {
            if let Err(rollback) = self.inner.backend.put_run_state(&current) {
                log::error!("[Store] State rollback failed: {}", rollback);
            }
            return Err(e);
        }

        window.samples += 1;
        self.bump_log_revision();
        self.inner.state_tx.send_replace(next.clone());
        Ok(next)
    }

    /// Empty the sample log.
    ///
    /// When no run is active the frame id and latency are reset as well;
    /// during a run they keep advancing from where they are.
    pub fn clear_samples(&self) -> Result<RunState, StoreError> {
        let mut window = self.lock_writer()?;
        self.inner.backend.clear_samples()?;
        window.samples = 0;
        self.bump_log_revision();

        let current = self.inner.backend.get_run_state()?;
        if current.is_running {
            return Ok(current);
        }
        let next = RunState {
            current_frame_id: 0,
            current_latency_ms: 0.0,
            ..current
        };
        self.inner.backend.put_run_state(&next)?;
        self.inner.state_tx.send_replace(next.clone());
        log::info!("[Store] Sample log cleared");
        Ok(next)
    }

    /// Copy of the latest broadcast state.
    pub fn snapshot(&self) -> RunState {
        self.inner.state_tx.borrow().clone()
    }

    /// Receiver holding the latest state, then every update.
    pub fn observe_run_state(&self) -> watch::Receiver<RunState> {
        self.inner.state_tx.subscribe()
    }

    /// `observe_run_state` as a `Stream`: current value first, then updates.
    pub fn run_state_stream(&self) -> impl Stream<Item = RunState> + Send + 'static {
        let rx = self.inner.state_tx.subscribe();
        stream::unfold((rx, true), |(mut rx, first)| async move {
            if !first && rx.changed().await.is_err() {
                return None;
            }
            let state = rx.borrow_and_update().clone();
            Some((state, (rx, false)))
        })
    }

    /// Up to `limit` samples, newest first, across all runs.
    pub fn recent_samples(&self, limit: usize) -> Result<Vec<Sample>, StoreError> {
        self.inner.backend.query_recent_samples(limit)
    }

    /// Up to `limit` samples of the current run, newest first.
    ///
    /// Empty right after `begin_run` until the new run records a sample.
    pub fn current_run_samples(&self, limit: usize) -> Result<Vec<Sample>, StoreError> {
        let window = self.lock_writer()?;
        self.inner
            .backend
            .query_recent_samples(limit.min(window.samples))
    }

    /// Metrics over the current run's most recent `window_size` samples.
    pub fn current_metrics(&self, window_size: usize) -> Result<Metrics, StoreError> {
        let recent = self.current_run_samples(window_size)?;
        Ok(MetricsAggregator::aggregate(&recent))
    }

    /// Stream of metrics, recomputed whenever the sample log changes.
    ///
    /// Yields the current metrics immediately. A failed query is logged and
    /// reported as empty metrics rather than ending the stream.
    pub fn observe_metrics(&self, window_size: usize) -> impl Stream<Item = Metrics> + Send + 'static {
        let rx = self.inner.log_tx.subscribe();
        let store = self.clone();
        stream::unfold((rx, true), move |(mut rx, first)| {
            let store = store.clone();
            async move {
                if !first && rx.changed().await.is_err() {
                    return None;
                }
                rx.borrow_and_update();
                let metrics = store.current_metrics(window_size).unwrap_or_else(|e| {
                    log::warn!("[Store] Metrics query failed: {}", e);
                    Metrics::empty()
                });
                Some((metrics, (rx, false)))
            }
        })
    }
}
