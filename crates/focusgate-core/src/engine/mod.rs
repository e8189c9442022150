//! Activation engine.
//!
//! Pure state-transition logic over [`AppState`](crate::model::AppState): activate and deactivate
//! modes and schedules, resolve BLOCK/ALLOW conflicts, apply token unlocks
//! and expire timed deactivations. Nothing in here performs I/O; callers run
//! these transitions inside [`crate::storage::StateStore::update`] so that
//! each one is a single atomic replace of the persisted record.
//!
//! ## Tie-break policy
//!
//! A system (schedule) activation never overrides a conflicting active mode:
//! the conflicting mode is skipped and the rest of the schedule still starts.
//! User-initiated activations are all-or-nothing and report
//! [`Outcome::PolicyConflict`] so the user gets explicit feedback. The two
//! paths are deliberately different.

mod activation;
mod lifecycle;
mod unlock;

pub use activation::SystemActivation;
pub use unlock::{UnlockFeedback, UnlockReport, UnlockResolver, UnlockResult};

use serde::{Deserialize, Serialize};

use crate::model::Policy;

/// Typed result of an engine operation.
///
/// Callers branch on the variant; no error text needs inspecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Success,
    ModeNotFound,
    ScheduleNotFound,
    /// The request would mix BLOCK_SELECTED and ALLOW_SELECTED modes.
    PolicyConflict { requested: Policy, active: Policy },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}
