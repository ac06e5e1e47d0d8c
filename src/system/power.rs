//! Power-State Signal and Adaptation
//!
//! The sampling loop consumes a boolean power-save signal and derives its
//! cadence and effective intensity from it.
//!
//! ## Architecture
//! - **PowerSignal**: manual in-process source, set by the embedding application
//! - **SysfsPowerSource**: polls the ACPI platform profile; `low-power` means power-save
//! - **PowerController**: reads the latest signal value and applies the adaptation rules
//!
//! All sources publish through a `tokio::sync::watch` channel, so consumers
//! always see the latest value and never a backlog of stale transitions.

use futures::stream::{self, Stream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::models::{clamp_intensity, MIN_INTENSITY, NORMAL_CADENCE_HZ, POWER_SAVE_CADENCE_HZ};

/// Default sysfs node exposing the platform power profile
pub const DEFAULT_PROFILE_PATH: &str = "/sys/firmware/acpi/platform_profile";

/// Profile name treated as power-save
const LOW_POWER_PROFILE: &str = "low-power";

/// Effective intensity for a requested level under the given power mode.
///
/// Power-save lowers the request by one (never below 1); the result is then
/// clamped to [1,5].
pub fn adapted_intensity(requested: i32, power_save: bool) -> i32 {
    let adjusted = if power_save {
        requested.saturating_sub(1).max(MIN_INTENSITY)
    } else {
        requested
    };
    clamp_intensity(adjusted)
}

/// Sampling cadence under the given power mode.
pub fn adapted_cadence_hz(power_save: bool) -> i32 {
    if power_save {
        POWER_SAVE_CADENCE_HZ
    } else {
        NORMAL_CADENCE_HZ
    }
}

/// Manually driven power-save signal.
#[derive(Clone)]
pub struct PowerSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl PowerSignal {
    pub fn new(initial: bool) -> Self {
        let (tx, _) = watch::channel(initial);
        PowerSignal { tx: Arc::new(tx) }
    }

    /// Publish a new value. Repeating the current value notifies nobody.
    pub fn set(&self, power_save: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == power_save {
                false
            } else {
                *current = power_save;
                true
            }
        });
        if changed {
            log::info!("[Power] Power-save signal set to {}", power_save);
        }
    }

    pub fn get(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Controller bound to this signal.
    pub fn controller(&self) -> PowerController {
        PowerController::new(self.subscribe())
    }
}

impl Default for PowerSignal {
    fn default() -> Self {
        PowerSignal::new(false)
    }
}

/// Polls a sysfs platform-profile node for power-save transitions.
#[derive(Debug, Clone)]
pub struct SysfsPowerSource {
    path: PathBuf,
    poll_interval: Duration,
}

impl SysfsPowerSource {
    pub fn new(path: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        SysfsPowerSource {
            path: path.into(),
            poll_interval,
        }
    }

    /// Read the profile once. A missing or unreadable node is not power-save.
    pub fn read_power_save(path: &Path) -> bool {
        std::fs::read_to_string(path)
            .map(|content| content.trim() == LOW_POWER_PROFILE)
            .unwrap_or(false)
    }

    /// Start polling on the current runtime.
    ///
    /// The task publishes only transitions and exits once every receiver
    /// (including every controller built from it) has been dropped.
    pub fn spawn(self) -> (PowerController, JoinHandle<()>) {
        let initial = Self::read_power_save(&self.path);
        let (tx, rx) = watch::channel(initial);
        log::info!(
            "[Power] Watching {} every {:?} (power-save: {})",
            self.path.display(),
            self.poll_interval,
            initial
        );

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let power_save = Self::read_power_save(&self.path);
                        let changed = tx.send_if_modified(|current| {
                            if *current == power_save {
                                false
                            } else {
                                *current = power_save;
                                true
                            }
                        });
                        if changed {
                            log::info!("[Power] Platform profile transition: power-save = {}", power_save);
                        }
                    }
                    _ = tx.closed() => {
                        log::debug!("[Power] No listeners left, stopping sysfs poll");
                        break;
                    }
                }
            }
        });

        (PowerController::new(rx), handle)
    }
}

/// Latest power-save observation plus the adaptation rules.
///
/// Holds only the signal receiver; cadence and intensity are derived on
/// every call.
#[derive(Clone, Debug)]
pub struct PowerController {
    rx: watch::Receiver<bool>,
}

impl PowerController {
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        PowerController { rx }
    }

    /// A controller that never reports power-save.
    pub fn disabled() -> Self {
        let (_, rx) = watch::channel(false);
        PowerController { rx }
    }

    pub fn is_power_save(&self) -> bool {
        *self.rx.borrow()
    }

    pub fn adapt_intensity(&self, requested: i32) -> i32 {
        adapted_intensity(requested, self.is_power_save())
    }

    pub fn adapt_cadence_hz(&self) -> i32 {
        adapted_cadence_hz(self.is_power_save())
    }

    /// A fresh receiver positioned at the current value.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        let mut rx = self.rx.clone();
        rx.borrow_and_update();
        rx
    }

    /// Power-save values as a stream: current value first, then transitions.
    pub fn observe_power_save_mode(&self) -> impl Stream<Item = bool> + Send + 'static {
        stream::unfold((self.rx.clone(), true), |(mut rx, first)| async move {
            if !first && rx.changed().await.is_err() {
                return None;
            }
            let value = *rx.borrow_and_update();
            Some((value, (rx, false)))
        })
    }
}
