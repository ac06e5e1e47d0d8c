//! Integration tests for the sampling loop lifecycle and state machine
//!
//! Tests:
//! 1. Frame sequencing (0, 1, 2, ... with no gaps)
//! 2. Start while running is a no-op
//! 3. Stop idempotence
//! 4. Intensity clamping with and without power-save
//! 5. Power-save transition during an in-flight tick
//! 6. Degraded flag after consecutive workload failures
//! 7. Restart resets frame ids and the metrics window
//! 8. A failing restarted run reports an empty window, not the previous run
//! 9. Persistence failures never leave frame id gaps

use futures::StreamExt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use telemetry_lab::error::{StoreError, WorkloadError};
use telemetry_lab::models::{Metrics, RunState, Sample};
use telemetry_lab::store::{MemoryStore, StateStore, TelemetryStore};
use telemetry_lab::system::performance::{
    Intensity, SamplingLoop, TelemetryEvent, Workload,
};
use telemetry_lab::system::power::{PowerController, PowerSignal};
use tokio::sync::mpsc;

fn instant_workload() -> Arc<dyn Workload> {
    Arc::new(|_: Intensity| -> Result<(), WorkloadError> { Ok(()) })
}

/// Samples of the current run, oldest first
fn current_run(store: &StateStore) -> Vec<Sample> {
    let mut run = store.current_run_samples(10_000).unwrap();
    run.reverse();
    run
}

async fn wait_for_samples(store: &StateStore, count: usize) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while current_run(store).len() < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("timed out waiting for samples");
}

async fn wait_for_state<F>(store: &StateStore, mut predicate: F) -> RunState
where
    F: FnMut(&RunState) -> bool,
{
    let mut rx = store.observe_run_state();
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            {
                let state = rx.borrow_and_update();
                if predicate(&state) {
                    return state.clone();
                }
            }
            rx.changed().await.expect("store dropped");
        }
    })
    .await
    .expect("timed out waiting for state")
}

fn assert_contiguous(samples: &[Sample]) {
    for (expected, sample) in samples.iter().enumerate() {
        assert_eq!(sample.frame_id, expected as u64, "frame id gap or repeat");
    }
}

#[tokio::test]
async fn test_frame_ids_are_contiguous() {
    println!("[TEST] Starting frame sequencing test");
    let store = StateStore::in_memory();
    let sampling = SamplingLoop::new(store.clone(), PowerController::disabled(), instant_workload(), None);

    let state = sampling.start(2).await.unwrap();
    assert!(state.is_running);
    assert_eq!(state.current_frame_id, 0);
    assert_eq!(state.cadence_hz, 20);

    wait_for_samples(&store, 8).await;
    sampling.shutdown().await.unwrap();

    let run = current_run(&store);
    assert!(run.len() >= 8);
    assert_contiguous(&run);
    assert!(run.iter().all(|s| s.intensity == 2));
    assert_eq!(store.snapshot().current_frame_id, run.last().unwrap().frame_id);
    println!("[TEST] ✓ {} frames recorded without gaps", run.len());
}

#[tokio::test]
async fn test_start_while_running_is_noop() {
    let store = StateStore::in_memory();
    let sampling = SamplingLoop::new(store.clone(), PowerController::disabled(), instant_workload(), None);

    sampling.start(3).await.unwrap();
    let again = sampling.start(5).await.unwrap();
    assert_eq!(again.current_intensity, 3);
    assert_eq!(sampling.requested_intensity(), 3);
    assert!(sampling.is_running());

    sampling.shutdown().await.unwrap();
    println!("[TEST] ✓ Second start ignored while running");
}

#[tokio::test]
async fn test_double_stop_is_idempotent() {
    let (tx, mut rx) = mpsc::channel(1024);
    let store = StateStore::in_memory();
    let sampling = SamplingLoop::new(store.clone(), PowerController::disabled(), instant_workload(), Some(tx));

    sampling.start(1).await.unwrap();
    wait_for_samples(&store, 2).await;

    sampling.stop().await.unwrap();
    let after_first = store.snapshot();
    assert!(!after_first.is_running);
    assert!(!sampling.is_running());

    sampling.stop().await.unwrap();
    sampling.shutdown().await.unwrap();

    let mut stopped_events = 0;
    while let Ok(event) = rx.try_recv() {
        if event == TelemetryEvent::RunStopped {
            stopped_events += 1;
        }
    }
    assert_eq!(stopped_events, 1);
    assert!(!store.snapshot().is_running);
    println!("[TEST] ✓ Second stop had no observable effect");
}

#[tokio::test]
async fn test_set_intensity_clamps() {
    let store = StateStore::in_memory();
    let sampling = SamplingLoop::new(store.clone(), PowerController::disabled(), instant_workload(), None);
    sampling.start(1).await.unwrap();

    let state = sampling.set_intensity(7).await.unwrap();
    assert_eq!(state.current_intensity, 5);
    assert_eq!(sampling.requested_intensity(), 5);

    let state = sampling.set_intensity(-2).await.unwrap();
    assert_eq!(state.current_intensity, 1);

    sampling.shutdown().await.unwrap();
    println!("[TEST] ✓ Out-of-range intensities clamped");
}

#[tokio::test]
async fn test_set_intensity_clamps_under_power_save() {
    let signal = PowerSignal::new(true);
    let store = StateStore::in_memory();
    let sampling = SamplingLoop::new(store.clone(), signal.controller(), instant_workload(), None);
    sampling.start(1).await.unwrap();

    let state = sampling.set_intensity(7).await.unwrap();
    assert_eq!(state.current_intensity, 4);
    assert_eq!(state.cadence_hz, 10);
    assert!(state.is_power_save_mode);

    sampling.shutdown().await.unwrap();
    println!("[TEST] ✓ setIntensity(7) under power-save gives 4");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_power_save_mid_run_applies_to_next_tick() {
    println!("[TEST] Starting power-save transition test");
    let (entered_tx, entered_rx) = crossbeam_channel::unbounded::<i32>();
    let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(0);
    let calls = AtomicUsize::new(0);
    let workload: Arc<dyn Workload> = Arc::new(move |intensity: Intensity| -> Result<(), WorkloadError> {
        let _ = entered_tx.send(intensity.value());
        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
            let _ = release_rx.recv_timeout(Duration::from_secs(10));
        }
        Ok(())
    });

    let signal = PowerSignal::new(false);
    let store = StateStore::in_memory();
    let sampling = SamplingLoop::new(store.clone(), signal.controller(), workload, None);
    sampling.start(3).await.unwrap();

    // First tick is now held inside the workload
    let first = tokio::task::spawn_blocking(move || entered_rx.recv_timeout(Duration::from_secs(5)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first, 3);

    signal.set(true);
    let state = wait_for_state(&store, |s| s.is_power_save_mode).await;
    assert_eq!(state.cadence_hz, 10);
    assert_eq!(state.current_intensity, 2);
    assert!(current_run(&store).is_empty(), "in-flight tick was preempted");
    println!("[TEST] ✓ RunState adapted while tick in flight");

    release_tx.send(()).unwrap();
    wait_for_samples(&store, 2).await;
    sampling.shutdown().await.unwrap();

    let run = current_run(&store);
    assert_contiguous(&run);
    assert_eq!(run[0].intensity, 3);
    assert!(run[1..].iter().all(|s| s.intensity == 2));
    assert_eq!(sampling.requested_intensity(), 3);
    println!("[TEST] ✓ In-flight tick kept intensity 3, following ticks ran at 2");
}

#[tokio::test]
async fn test_power_save_off_restores_requested_intensity() {
    let signal = PowerSignal::new(true);
    let store = StateStore::in_memory();
    let sampling = SamplingLoop::new(store.clone(), signal.controller(), instant_workload(), None);

    let state = sampling.start(4).await.unwrap();
    assert_eq!(state.current_intensity, 3);

    signal.set(false);
    let state = wait_for_state(&store, |s| !s.is_power_save_mode).await;
    assert_eq!(state.current_intensity, 4);
    assert_eq!(state.cadence_hz, 20);

    sampling.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_consecutive_failures_mark_run_degraded() {
    println!("[TEST] Starting degraded run test");
    let calls = AtomicUsize::new(0);
    let workload: Arc<dyn Workload> = Arc::new(move |_: Intensity| -> Result<(), WorkloadError> {
        if calls.fetch_add(1, Ordering::SeqCst) < 4 {
            Err(WorkloadError::Failed("sensor offline".to_string()))
        } else {
            Ok(())
        }
    });

    let (tx, mut rx) = mpsc::channel(1024);
    let store = StateStore::in_memory();
    let sampling = SamplingLoop::new(store.clone(), PowerController::disabled(), workload, Some(tx));
    sampling.start(1).await.unwrap();

    let mut seen = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(event) = rx.recv().await {
            let done = matches!(event, TelemetryEvent::Degraded(false));
            seen.push(event);
            if done {
                break;
            }
        }
    })
    .await
    .expect("run never recovered");
    sampling.shutdown().await.unwrap();

    let skipped: Vec<(u64, u32)> = seen
        .iter()
        .filter_map(|e| match e {
            TelemetryEvent::TickSkipped {
                frame_id,
                consecutive_failures,
                ..
            } => Some((*frame_id, *consecutive_failures)),
            _ => None,
        })
        .collect();
    assert_eq!(skipped, vec![(0, 1), (0, 2), (0, 3), (0, 4)]);

    let degraded_at = seen
        .iter()
        .position(|e| *e == TelemetryEvent::Degraded(true))
        .expect("no degraded event");
    let third_skip = seen
        .iter()
        .position(|e| matches!(e, TelemetryEvent::TickSkipped { consecutive_failures: 3, .. }))
        .unwrap();
    assert!(degraded_at > third_skip);

    let run = current_run(&store);
    assert_eq!(run[0].frame_id, 0);
    assert_contiguous(&run);
    assert!(!store.snapshot().is_degraded);
    println!("[TEST] ✓ Degraded after 3 failures, recovered on first sample at frame 0");
}

#[tokio::test]
async fn test_restart_resets_frames_and_window() {
    let store = StateStore::in_memory();
    let sampling = SamplingLoop::new(store.clone(), PowerController::disabled(), instant_workload(), None);

    sampling.start(1).await.unwrap();
    wait_for_samples(&store, 6).await;
    sampling.stop().await.unwrap();

    let state = sampling.start(2).await.unwrap();
    assert_eq!(state.current_frame_id, 0);
    assert_eq!(state.current_latency_ms, 0.0);
    let metrics = store.current_metrics(600).unwrap();
    assert!(metrics.frame_count <= 1, "previous run leaked into the new window");
    assert!(current_run(&store).iter().all(|s| s.intensity == 2));
    wait_for_samples(&store, 3).await;
    sampling.shutdown().await.unwrap();

    let run = current_run(&store);
    assert_contiguous(&run);
    assert!(run.iter().all(|s| s.intensity == 2));

    let metrics = store.current_metrics(600).unwrap();
    assert_eq!(metrics.frame_count, run.len());
    assert!(store.recent_samples(10_000).unwrap().len() > run.len());
    println!("[TEST] ✓ Metrics window restarted with the new run");
}

#[tokio::test]
async fn test_failing_restart_reports_empty_window() {
    println!("[TEST] Starting failing restart test");
    let failing = Arc::new(AtomicBool::new(false));
    let gate = failing.clone();
    let workload: Arc<dyn Workload> = Arc::new(move |_: Intensity| -> Result<(), WorkloadError> {
        if gate.load(Ordering::SeqCst) {
            return Err(WorkloadError::Failed("sensor offline".to_string()));
        }
        std::thread::sleep(Duration::from_millis(20));
        Ok(())
    });

    let store = StateStore::in_memory();
    let sampling = SamplingLoop::new(store.clone(), PowerController::disabled(), workload, None);
    sampling.start(1).await.unwrap();
    wait_for_samples(&store, 8).await;
    sampling.stop().await.unwrap();

    let mut metrics = Box::pin(store.observe_metrics(600));
    let first_run = metrics.next().await.unwrap();
    assert!(first_run.frame_count >= 8);
    assert_eq!(first_run.jank_percentage, 100.0);

    failing.store(true, Ordering::SeqCst);
    sampling.start(1).await.unwrap();
    let reset = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let next = metrics.next().await.expect("metrics stream ended");
            if next.frame_count == 0 {
                return next;
            }
        }
    })
    .await
    .expect("window never reset after start");
    assert_eq!(reset, Metrics::empty());

    wait_for_state(&store, |s| s.is_degraded).await;
    assert_eq!(store.current_metrics(600).unwrap().frame_count, 0);
    assert_eq!(store.snapshot().current_frame_id, 0);
    sampling.shutdown().await.unwrap();
    println!("[TEST] ✓ Degraded second run reports no frames");
}

/// Memory store whose every third append fails
struct FlakyStore {
    inner: MemoryStore,
    appends: AtomicUsize,
}

impl TelemetryStore for FlakyStore {
    fn append_sample(&self, sample: &Sample) -> Result<(), StoreError> {
        if self.appends.fetch_add(1, Ordering::SeqCst) % 3 == 2 {
            return Err(StoreError::Io(io::Error::new(io::ErrorKind::Other, "disk full")));
        }
        self.inner.append_sample(sample)
    }

    fn get_run_state(&self) -> Result<RunState, StoreError> {
        self.inner.get_run_state()
    }

    fn put_run_state(&self, state: &RunState) -> Result<(), StoreError> {
        self.inner.put_run_state(state)
    }

    fn query_recent_samples(&self, limit: usize) -> Result<Vec<Sample>, StoreError> {
        self.inner.query_recent_samples(limit)
    }

    fn clear_samples(&self) -> Result<(), StoreError> {
        self.inner.clear_samples()
    }
}

#[tokio::test]
async fn test_persistence_failures_leave_no_gaps() {
    let backend = Arc::new(FlakyStore {
        inner: MemoryStore::new(),
        appends: AtomicUsize::new(0),
    });
    let store = StateStore::new(backend).unwrap();
    let (tx, mut rx) = mpsc::channel(1024);
    let sampling = SamplingLoop::new(store.clone(), PowerController::disabled(), instant_workload(), Some(tx));

    sampling.start(1).await.unwrap();
    wait_for_samples(&store, 8).await;
    sampling.shutdown().await.unwrap();

    let run = current_run(&store);
    assert_contiguous(&run);

    let mut failures = 0;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, TelemetryEvent::PersistenceFailed { .. }) {
            failures += 1;
        }
    }
    assert!(failures >= 2);
    assert!(sampling.store().snapshot().current_frame_id <= run.last().unwrap().frame_id);
    println!("[TEST] ✓ {} persistence failures, frame ids still contiguous", failures);
}

#[tokio::test]
async fn test_clear_samples_while_stopped_resets_frame() {
    let store = StateStore::in_memory();
    let sampling = SamplingLoop::new(store.clone(), PowerController::disabled(), instant_workload(), None);
    sampling.start(1).await.unwrap();
    wait_for_samples(&store, 3).await;
    sampling.shutdown().await.unwrap();
    assert!(store.snapshot().current_frame_id > 0);

    let state = sampling.clear_samples().await.unwrap();
    assert_eq!(state.current_frame_id, 0);
    assert!(store.recent_samples(10).unwrap().is_empty());
}
