//! Enforcement loop: foreground polling, classification and the overlay.
//!
//! The loop runs on a tokio task and only decides; the overlay surface is
//! owned by a [`DisplayContext`] thread and reached through the guarded
//! [`OverlayController`].

mod overlay;
mod runner;

pub use overlay::{DisplayContext, OverlayController, OverlayError, OverlaySurface, OverlayVisibility};
pub use runner::{EnforcementHandle, EnforcementLoop, EnforcementSupervisor, WatchdogReport};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

use crate::model::{AppId, AppState, Policy};
use crate::storage::EnforcementSettings;

/// Host collaborator that reports which app the user is looking at.
pub trait ForegroundSource: Send + Sync {
    /// Most recently used app within the trailing `lookback` window.
    fn foreground_app(&self, lookback: Duration) -> Option<AppId>;

    /// The launcher/home app, if the host knows one.
    fn home_app(&self) -> Option<AppId>;
}

/// What the running loop enforces.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnforcementConfig {
    /// `None` when nothing is active.
    pub policy: Option<Policy>,
    /// Union of `blocked_apps` over all active modes.
    pub apps: BTreeSet<AppId>,
}

impl EnforcementConfig {
    pub fn from_state(state: &AppState) -> Self {
        let apps = state
            .active_modes
            .iter()
            .filter_map(|id| state.modes.get(id))
            .flat_map(|mode| mode.blocked_apps.iter().cloned())
            .collect();
        Self {
            policy: state.effective_policy(),
            apps,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.policy.is_none()
    }
}

/// Classification of one foreground app.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Block,
}

/// Apps that are never blocked regardless of the active policy.
#[derive(Debug, Clone)]
pub struct Exemptions {
    pub own_app: AppId,
    pub critical: BTreeSet<AppId>,
    pub home: Option<AppId>,
}

impl Exemptions {
    pub fn from_settings(settings: &EnforcementSettings) -> Self {
        Self {
            own_app: settings.own_app.clone(),
            critical: settings.critical_apps.iter().cloned().collect(),
            home: settings.home_app.clone(),
        }
    }

    fn exempt(&self, app: &AppId, host_home: Option<&AppId>) -> bool {
        *app == self.own_app
            || self.critical.contains(app)
            || self.home.as_ref() == Some(app)
            || host_home == Some(app)
    }
}

/// Decide whether `app` may stay in the foreground.
pub fn classify(
    app: &AppId,
    config: &EnforcementConfig,
    exemptions: &Exemptions,
    host_home: Option<&AppId>,
) -> Verdict {
    if exemptions.exempt(app, host_home) {
        return Verdict::Allow;
    }
    match config.policy {
        None => Verdict::Allow,
        Some(Policy::BlockSelected) if config.apps.contains(app) => Verdict::Block,
        Some(Policy::BlockSelected) => Verdict::Allow,
        Some(Policy::AllowSelected) if config.apps.contains(app) => Verdict::Allow,
        Some(Policy::AllowSelected) => Verdict::Block,
    }
}
