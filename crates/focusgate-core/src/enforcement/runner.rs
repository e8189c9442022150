//! The polling task, its lease handle and the supervisor that restarts it.

use serde::Serialize;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{classify, EnforcementConfig, Exemptions, ForegroundSource, OverlayController, Verdict};
use crate::model::{AppId, AppState};
use crate::now_ms;
use crate::storage::EnforcementSettings;

/// Lease on a running enforcement loop.
///
/// The loop stamps `heartbeat` every cycle; liveness is judged from the task
/// state plus the age of that stamp, never from a shared flag.
pub struct EnforcementHandle {
    task: JoinHandle<()>,
    heartbeat: Arc<AtomicI64>,
    config: watch::Sender<EnforcementConfig>,
}

impl EnforcementHandle {
    /// Epoch milliseconds of the last completed poll.
    pub fn heartbeat_ms(&self) -> i64 {
        self.heartbeat.load(Ordering::Acquire)
    }

    pub fn is_alive(&self, now_ms: i64, timeout: Duration) -> bool {
        let timeout_ms = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
        !self.task.is_finished() && now_ms.saturating_sub(self.heartbeat_ms()) <= timeout_ms
    }

    pub fn config(&self) -> EnforcementConfig {
        self.config.borrow().clone()
    }

    /// Swap the enforced configuration. Returns whether it changed.
    pub fn reconfigure(&self, config: EnforcementConfig) -> bool {
        self.config.send_if_modified(|current| {
            if *current == config {
                return false;
            }
            *current = config;
            true
        })
    }

    /// Kill the task without touching the overlay.
    pub fn abort(&self) {
        self.task.abort();
    }
}

/// Spawns polling loops.
pub struct EnforcementLoop {
    foreground: Arc<dyn ForegroundSource>,
    overlay: Arc<OverlayController>,
    exemptions: Exemptions,
    poll_interval: Duration,
    lookback: Duration,
}

impl EnforcementLoop {
    pub fn new(
        foreground: Arc<dyn ForegroundSource>,
        overlay: Arc<OverlayController>,
        settings: &EnforcementSettings,
    ) -> Self {
        Self {
            foreground,
            overlay,
            exemptions: Exemptions::from_settings(settings),
            poll_interval: settings.poll_interval(),
            lookback: settings.foreground_lookback(),
        }
    }

    /// Start polling on `runtime` with `config`.
    pub fn spawn(&self, runtime: &Handle, config: EnforcementConfig) -> EnforcementHandle {
        let heartbeat = Arc::new(AtomicI64::new(now_ms()));
        let (config_tx, mut config_rx) = watch::channel(config);

        let foreground = self.foreground.clone();
        let overlay = self.overlay.clone();
        let exemptions = self.exemptions.clone();
        let lookback = self.lookback;
        let poll_interval = self.poll_interval;
        let beat = heartbeat.clone();

        let task = runtime.spawn(async move {
            let mut ticker = interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last_app: Option<AppId> = None;

            loop {
                ticker.tick().await;
                beat.store(now_ms(), Ordering::Release);

                match config_rx.has_changed() {
                    Ok(true) => last_app = None,
                    Ok(false) => {}
                    Err(_) => break,
                }
                let config = config_rx.borrow_and_update().clone();

                let Some(app) = foreground.foreground_app(lookback) else {
                    continue;
                };
                if last_app.as_ref() == Some(&app) {
                    continue;
                }

                let home = foreground.home_app();
                let verdict = classify(&app, &config, &exemptions, home.as_ref());
                debug!(app = %app, ?verdict, "foreground app changed");
                match verdict {
                    Verdict::Block => overlay.show().await,
                    Verdict::Allow => overlay.hide().await,
                };
                last_app = Some(app);
            }
            debug!("enforcement loop stopped");
        });

        EnforcementHandle {
            task,
            heartbeat,
            config: config_tx,
        }
    }
}

/// Outcome of a supervision pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchdogReport {
    /// The loop is running and was handed the current configuration.
    Alive,
    /// Nothing is active; no loop is running.
    Idle,
    /// The loop was missing or dead and has been (re)started.
    Restarted,
}

/// Owns at most one enforcement loop and keeps it matched to the state.
pub struct EnforcementSupervisor {
    runtime: Handle,
    spawner: EnforcementLoop,
    overlay: Arc<OverlayController>,
    heartbeat_timeout: Duration,
    current: Mutex<Option<EnforcementHandle>>,
}

impl EnforcementSupervisor {
    pub fn new(
        runtime: Handle,
        foreground: Arc<dyn ForegroundSource>,
        overlay: Arc<OverlayController>,
        settings: &EnforcementSettings,
    ) -> Self {
        Self {
            runtime,
            spawner: EnforcementLoop::new(foreground, overlay.clone(), settings),
            overlay,
            heartbeat_timeout: settings.heartbeat_timeout(),
            current: Mutex::new(None),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<EnforcementHandle>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn overlay(&self) -> &Arc<OverlayController> {
        &self.overlay
    }

    /// Whether a loop is running with a fresh heartbeat.
    pub fn is_alive(&self, now_ms: i64) -> bool {
        self.slot()
            .as_ref()
            .is_some_and(|handle| handle.is_alive(now_ms, self.heartbeat_timeout))
    }

    /// Start, stop or reconfigure the loop so that it enforces `config`.
    pub async fn apply(&self, config: EnforcementConfig) -> WatchdogReport {
        let now = now_ms();
        if config.is_idle() {
            let stopped = self.slot().take();
            if let Some(handle) = stopped {
                handle.abort();
                info!("nothing active, enforcement stopped");
            }
            self.overlay.hide().await;
            return WatchdogReport::Idle;
        }

        let mut slot = self.slot();
        if let Some(handle) = slot.as_ref() {
            if handle.is_alive(now, self.heartbeat_timeout) {
                if handle.reconfigure(config) {
                    debug!("enforcement reconfigured");
                }
                return WatchdogReport::Alive;
            }
            warn!(
                heartbeat_age_ms = now.saturating_sub(handle.heartbeat_ms()),
                "enforcement loop is dead, restarting"
            );
            handle.abort();
        } else {
            info!(policy = ?config.policy, apps = config.apps.len(), "starting enforcement");
        }
        *slot = Some(self.spawner.spawn(&self.runtime, config));
        WatchdogReport::Restarted
    }

    /// Watchdog body: make sure a loop runs whenever `state` has active modes.
    pub async fn check(&self, state: &AppState) -> WatchdogReport {
        self.apply(EnforcementConfig::from_state(state)).await
    }

    /// Stop the loop and remove the overlay.
    pub async fn shutdown(&self) {
        let stopped = self.slot().take();
        if let Some(handle) = stopped {
            handle.abort();
        }
        self.overlay.hide().await;
    }

    #[cfg(test)]
    fn kill_loop(&self) {
        if let Some(handle) = self.slot().as_ref() {
            handle.abort();
        }
    }
}
