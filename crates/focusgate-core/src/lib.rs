//! # FocusGate Core Library
//!
//! Mode, schedule and token activation engine for digital-wellbeing
//! enforcement. Users define modes (sets of apps under a BLOCK or ALLOW
//! policy), attach them to weekly schedules, and optionally require a
//! physical token tap to end them early. The library decides which modes are
//! active at every instant and drives a blocking overlay from that decision.
//!
//! ## Architecture
//!
//! - **Engine**: pure transitions over [`AppState`], run inside one atomic
//!   read-modify-write of the persisted slot
//! - **Scheduler**: weekly start/end triggers, timed deactivations and the
//!   enforcement watchdog, armed on a host [`AlarmHost`]
//! - **Enforcement**: a polling loop that classifies the foreground app and
//!   shows or hides the overlay through a guarded state machine
//! - **Storage**: SQLite key-value slot for the state and TOML configuration
//!
//! ## Key Components
//!
//! - [`StateStore`]: the persisted state slot
//! - [`Scheduler`]: trigger arming and firing
//! - [`EnforcementSupervisor`]: owns and restarts the enforcement loop
//! - [`Daemon`]: wires the three together

pub mod daemon;
pub mod enforcement;
pub mod engine;
pub mod error;
pub mod events;
pub mod model;
pub mod scheduler;
pub mod storage;

pub use daemon::Daemon;
pub use enforcement::{
    EnforcementConfig, EnforcementSupervisor, ForegroundSource, OverlayController, OverlaySurface, WatchdogReport,
};
pub use engine::{Outcome, UnlockFeedback, UnlockReport, UnlockResolver, UnlockResult};
pub use error::{ConfigError, CoreError, StoreError, ValidationError};
pub use events::Event;
pub use model::{AppId, AppState, DayTime, Mode, ModeId, Policy, Schedule, ScheduleId, TimeSlot, Token, TokenId, Weekday};
pub use scheduler::{AlarmHost, Scheduler, Trigger, TriggerId};
pub use storage::{Config, Database, StateStore};

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
