//! Long-running process wiring the store, scheduler and enforcement.
//!
//! One-shot CLI commands only write the state slot. The daemon notices the
//! new revision on its next poll, re-arms every trigger and hands the new
//! configuration to the enforcement loop.

use chrono::{Local, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::enforcement::{
    DisplayContext, EnforcementConfig, EnforcementSupervisor, ForegroundSource, OverlayController, OverlaySurface,
    WatchdogReport,
};
use crate::error::{CoreError, Result};
use crate::events::Event;
use crate::scheduler::{Fired, Scheduler, TokioAlarmHost, Trigger};
use crate::storage::{Config, StateStore};

pub struct Daemon {
    store: Arc<StateStore>,
    scheduler: Scheduler,
    supervisor: EnforcementSupervisor,
    triggers: mpsc::UnboundedReceiver<Trigger>,
    state_poll: Duration,
}

impl Daemon {
    /// Build a daemon on the current tokio runtime.
    ///
    /// # Errors
    /// Returns an error outside a tokio runtime or if the display thread
    /// cannot be spawned.
    pub fn new<S: OverlaySurface>(
        store: Arc<StateStore>,
        config: &Config,
        foreground: Arc<dyn ForegroundSource>,
        surface: S,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| CoreError::Custom(format!("no tokio runtime: {e}")))?;
        let (host, triggers) = TokioAlarmHost::new(runtime.clone());
        let scheduler = Scheduler::new(Arc::new(host), config.scheduler.watchdog_interval());
        let overlay = Arc::new(OverlayController::new(DisplayContext::spawn(surface)?));
        let supervisor = EnforcementSupervisor::new(runtime, foreground, overlay, &config.enforcement);

        Ok(Self {
            store,
            scheduler,
            supervisor,
            triggers,
            state_poll: config.scheduler.state_poll(),
        })
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn supervisor(&self) -> &EnforcementSupervisor {
        &self.supervisor
    }

    /// Load the state, catch up with the clock, arm everything and start
    /// enforcing.
    ///
    /// # Errors
    /// Returns an error if the state slot cannot be read or written.
    pub async fn start(&self) -> Result<()> {
        let loaded = self.store.load()?;
        if let Some(error) = loaded.recovery_error() {
            warn!(%error, "persisted state was unreadable, starting from an empty state");
            log_events(&[Event::StateRecovered {
                error: error.to_string(),
                at: Utc::now(),
            }]);
        }

        let report = self.scheduler.rearm_all(&self.store, &Local::now())?;
        log_events(&report.events);
        info!(triggers = report.armed, "scheduler armed");

        self.enforce().await?;
        Ok(())
    }

    /// Run until `shutdown` resolves, then stop enforcing.
    ///
    /// # Errors
    /// Returns an error if startup fails; errors while handling individual
    /// triggers are logged and the loop keeps going.
    pub async fn run<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        let mut last_revision = self.store.revision()?;
        let mut poll = interval(self.state_poll);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                Some(trigger) = self.triggers.recv() => {
                    if let Err(error) = self.handle_trigger(&trigger).await {
                        error!(%error, trigger = %trigger.id(), "trigger handling failed");
                    }
                }
                _ = poll.tick() => {
                    if let Err(error) = self.check_revision(&mut last_revision).await {
                        error!(%error, "state refresh failed");
                    }
                }
            }
        }

        info!("shutting down");
        self.supervisor.shutdown().await;
        Ok(())
    }

    async fn handle_trigger(&self, trigger: &Trigger) -> Result<()> {
        let report = self.scheduler.on_fire(&self.store, trigger, &Local::now())?;
        log_events(&report.events);

        match report.fired {
            Fired::Watchdog => {
                let state = self.store.load()?.into_state();
                if self.supervisor.check(&state).await == WatchdogReport::Restarted {
                    log_events(&[Event::EnforcementRestarted { at: Utc::now() }]);
                }
            }
            Fired::Stale => {}
            _ => {
                self.enforce().await?;
            }
        }
        Ok(())
    }

    async fn check_revision(&self, last_revision: &mut u64) -> Result<()> {
        let revision = self.store.revision()?;
        if revision == *last_revision {
            return Ok(());
        }
        info!(from = *last_revision, to = revision, "state changed, re-arming");
        let report = self.scheduler.rearm_all(&self.store, &Local::now())?;
        log_events(&report.events);
        self.enforce().await?;
        *last_revision = self.store.revision()?;
        Ok(())
    }

    async fn enforce(&self) -> Result<WatchdogReport> {
        let config = EnforcementConfig::from_state(self.store.load()?.state());
        Ok(self.supervisor.apply(config).await)
    }
}

fn log_events(events: &[Event]) {
    for event in events {
        match serde_json::to_string(event) {
            Ok(json) => info!(target: "focusgate::events", event = %json),
            Err(error) => warn!(%error, "event not serializable"),
        }
    }
}
