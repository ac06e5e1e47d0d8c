//! Adaptive Sampling Loop
//!
//! Owns the `Stopped -> Running -> Stopped` lifecycle and the per-run tasks.
//!
//! ## Architecture
//! - **Commands** (`start`, `stop`, `set_intensity`, `clear_samples`) are
//!   serialized by an async control mutex
//! - **Tick task**: one sequential loop per run; the workload runs on the
//!   blocking pool and is never preempted
//! - **Power watcher**: one task per run; recomputes cadence and intensity
//!   when the power-save signal flips
//!
//! Every RunState mutation goes through `StateStore::update`. Intensity and
//! cadence are recomputed inside the update closure from the latest requested
//! intensity and power signal, so concurrent commands and power transitions
//! always settle on values derived from the newest inputs.
//!
//! A tick reads intensity and cadence from the state snapshot taken at tick
//! start; changes land on the following tick.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::sampler::SampleGenerator;
use super::workload::{Intensity, Workload};
use super::TelemetryEvent;
use crate::error::{TelemetryError, WorkloadError};
use crate::models::{clamp_intensity, RunState};
use crate::store::StateStore;
use crate::system::power::{adapted_cadence_hz, adapted_intensity, PowerController};

/// Consecutive workload failures before a run is reported degraded
pub const DEGRADED_AFTER_FAILURES: u32 = 3;

/// State shared by the loop handle and its per-run tasks
struct Shared {
    store: StateStore,
    power: PowerController,
    generator: SampleGenerator,
    events: Option<mpsc::Sender<TelemetryEvent>>,
    /// Last explicitly requested intensity, already clamped
    requested: AtomicI32,
    running: AtomicBool,
}

impl Shared {
    fn emit(&self, event: TelemetryEvent) {
        if let Some(tx) = &self.events {
            if let Err(e) = tx.try_send(event) {
                log::debug!("[Loop] Event dropped: {}", e);
            }
        }
    }

    /// Apply the current requested intensity and power signal to `state`.
    fn adapt(&self, state: RunState) -> RunState {
        let power_save = self.power.is_power_save();
        RunState {
            is_power_save_mode: power_save,
            current_intensity: adapted_intensity(self.requested.load(Ordering::SeqCst), power_save),
            cadence_hz: adapted_cadence_hz(power_save),
            ..state
        }
    }
}

struct ActiveRun {
    stop_tx: watch::Sender<bool>,
    ticker: JoinHandle<()>,
    watcher: JoinHandle<()>,
}

#[derive(Default)]
struct Control {
    active: Option<ActiveRun>,
    /// Tasks of stopped runs that may still be finishing a tick
    draining: Vec<JoinHandle<()>>,
}

/// The sampling state machine.
pub struct SamplingLoop {
    shared: Arc<Shared>,
    control: Mutex<Control>,
}

impl SamplingLoop {
    pub fn new(
        store: StateStore,
        power: PowerController,
        workload: Arc<dyn Workload>,
        events: Option<mpsc::Sender<TelemetryEvent>>,
    ) -> Self {
        let requested = clamp_intensity(store.snapshot().current_intensity);
        SamplingLoop {
            shared: Arc::new(Shared {
                store,
                power,
                generator: SampleGenerator::new(workload),
                events,
                requested: AtomicI32::new(requested),
                running: AtomicBool::new(false),
            }),
            control: Mutex::new(Control::default()),
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.shared.store
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// The last explicitly requested intensity (before power adaptation).
    pub fn requested_intensity(&self) -> i32 {
        self.shared.requested.load(Ordering::SeqCst)
    }

    /// Begin a run. No-op while a run is active.
    ///
    /// Waits for a previous run's last tick to finish, then resets the frame
    /// counter, empties the metrics window and writes the running state. If
    /// that write fails no run is started.
    pub async fn start(&self, requested_intensity: i32) -> Result<RunState, TelemetryError> {
        let mut control = self.control.lock().await;
        if control.active.is_some() {
            log::debug!("[Loop] start ignored: already running");
            return Ok(self.shared.store.snapshot());
        }
        drain(&mut control).await;

        let requested = clamp_intensity(requested_intensity);
        self.shared.requested.store(requested, Ordering::SeqCst);

        // Subscribe before adapting so no transition falls between the two
        let power_rx = self.shared.power.subscribe();
        let shared = &self.shared;
        let state = shared.store.begin_run(|s| {
            shared.adapt(RunState {
                is_running: true,
                current_frame_id: 0,
                current_latency_ms: 0.0,
                is_degraded: false,
                ..s
            })
        })?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let ticker = tokio::spawn(run_ticks(self.shared.clone(), stop_rx.clone()));
        let watcher = tokio::spawn(watch_power(self.shared.clone(), power_rx, stop_rx));
        control.active = Some(ActiveRun {
            stop_tx,
            ticker,
            watcher,
        });
        self.shared.running.store(true, Ordering::SeqCst);

        log::info!(
            "[Loop] Run started: intensity {} at {} Hz (requested {}, power-save {})",
            state.current_intensity,
            state.cadence_hz,
            requested,
            state.is_power_save_mode
        );
        self.shared.emit(TelemetryEvent::RunStarted {
            intensity: state.current_intensity,
            cadence_hz: state.cadence_hz,
        });
        Ok(state)
    }

    /// End the current run.
    ///
    /// The loop is always signalled; a tick already executing finishes and
    /// records its sample. An error means only that `is_running = false`
    /// could not be persisted. Calling this when already stopped does nothing.
    pub async fn stop(&self) -> Result<(), TelemetryError> {
        let mut control = self.control.lock().await;
        let was_active = match control.active.take() {
            Some(run) => {
                let _ = run.stop_tx.send(true);
                control.draining.push(run.ticker);
                control.draining.push(run.watcher);
                true
            }
            None => false,
        };
        control.draining.retain(|handle| !handle.is_finished());
        self.shared.running.store(false, Ordering::SeqCst);

        if !was_active && !self.shared.store.snapshot().is_running {
            return Ok(());
        }

        self.shared
            .store
            .update(|s| RunState { is_running: false, ..s })?;

        if was_active {
            log::info!("[Loop] Run stopped");
            self.shared.emit(TelemetryEvent::RunStopped);
        }
        Ok(())
    }

    /// `stop`, then wait for the run's tasks to exit.
    pub async fn shutdown(&self) -> Result<(), TelemetryError> {
        let result = self.stop().await;
        let mut control = self.control.lock().await;
        drain(&mut control).await;
        result
    }

    /// Request a new intensity.
    ///
    /// The request is clamped and remembered. While running, the adapted
    /// value becomes `current_intensity` for the next tick; a tick already
    /// executing is unaffected.
    pub async fn set_intensity(&self, requested_intensity: i32) -> Result<RunState, TelemetryError> {
        let requested = clamp_intensity(requested_intensity);
        let control = self.control.lock().await;
        self.shared.requested.store(requested, Ordering::SeqCst);

        if control.active.is_none() {
            return Ok(self.shared.store.snapshot());
        }

        let shared = &self.shared;
        let state = shared.store.update(|s| shared.adapt(s))?;
        log::info!(
            "[Loop] Intensity requested {} -> effective {}",
            requested,
            state.current_intensity
        );
        Ok(state)
    }

    /// Empty the sample log. Frame id and latency reset only when stopped.
    pub async fn clear_samples(&self) -> Result<RunState, TelemetryError> {
        let _control = self.control.lock().await;
        Ok(self.shared.store.clear_samples()?)
    }
}

async fn drain(control: &mut Control) {
    for handle in control.draining.drain(..) {
        if let Err(e) = handle.await {
            log::error!("[Loop] Run task ended abnormally: {}", e);
        }
    }
}

fn stop_requested(stop_rx: &watch::Receiver<bool>) -> bool {
    // A dropped sender means the loop handle is gone
    *stop_rx.borrow() || stop_rx.has_changed().is_err()
}

/// The tick loop of one run.
async fn run_ticks(shared: Arc<Shared>, mut stop_rx: watch::Receiver<bool>) {
    let mut frame_id: u64 = 0;
    let mut consecutive_failures: u32 = 0;

    while !stop_requested(&stop_rx) {
        let tick_start = Instant::now();
        let state = shared.store.snapshot();
        let intensity = Intensity::new(state.current_intensity);
        let interval = state.tick_interval();

        let generator = shared.generator.clone();
        let measured = tokio::task::spawn_blocking(move || generator.measure(frame_id, intensity))
            .await
            .unwrap_or_else(|join_err| Err(WorkloadError::Panicked(join_err.to_string())));

        match measured {
            Ok(sample) => match shared.store.record_sample(&sample) {
                Ok(_) => {
                    frame_id += 1;
                    if consecutive_failures >= DEGRADED_AFTER_FAILURES {
                        log::info!("[Loop] Workload recovered after {} failures", consecutive_failures);
                        shared.emit(TelemetryEvent::Degraded(false));
                    }
                    consecutive_failures = 0;
                    if sample.is_jank {
                        log::debug!("[Loop] {}", sample);
                    }
                    shared.emit(TelemetryEvent::SampleRecorded(sample));
                }
                Err(e) => {
                    log::warn!("[Loop] Failed to record frame {}: {}", frame_id, e);
                    shared.emit(TelemetryEvent::PersistenceFailed {
                        frame_id,
                        reason: e.to_string(),
                    });
                }
            },
            Err(e) => {
                consecutive_failures = consecutive_failures.saturating_add(1);
                log::warn!(
                    "[Loop] Tick skipped at frame {} ({} consecutive): {}",
                    frame_id,
                    consecutive_failures,
                    e
                );
                shared.emit(TelemetryEvent::TickSkipped {
                    frame_id,
                    consecutive_failures,
                    reason: e.to_string(),
                });
                if consecutive_failures == DEGRADED_AFTER_FAILURES {
                    match shared.store.update(|s| RunState { is_degraded: true, ..s }) {
                        Ok(_) => log::warn!("[Loop] Run degraded"),
                        Err(e) => log::error!("[Loop] Could not persist degraded flag: {}", e),
                    }
                    shared.emit(TelemetryEvent::Degraded(true));
                }
            }
        }

        // Self-throttle to the cadence; never catch up on missed ticks
        let elapsed = tick_start.elapsed();
        if elapsed < interval {
            tokio::select! {
                _ = tokio::time::sleep(interval - elapsed) => {}
                _ = stop_rx.changed() => {}
            }
        }
    }

    log::debug!("[Loop] Tick task exited after {} frames", frame_id);
}

/// Re-adapts RunState whenever the power-save signal changes during a run.
async fn watch_power(
    shared: Arc<Shared>,
    mut power_rx: watch::Receiver<bool>,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = power_rx.changed() => {
                if changed.is_err() {
                    log::debug!("[Power] Signal source closed");
                    break;
                }
                power_rx.borrow_and_update();
                match shared.store.update(|s| shared.adapt(s)) {
                    Ok(state) => {
                        log::info!(
                            "[Power] Power-save {}: intensity {} at {} Hz",
                            if state.is_power_save_mode { "on" } else { "off" },
                            state.current_intensity,
                            state.cadence_hz
                        );
                        shared.emit(TelemetryEvent::PowerModeChanged {
                            power_save: state.is_power_save_mode,
                            intensity: state.current_intensity,
                            cadence_hz: state.cadence_hz,
                        });
                    }
                    Err(e) => log::error!("[Power] Failed to apply power mode: {}", e),
                }
            }
            _ = stop_rx.changed() => break,
        }
    }
}
