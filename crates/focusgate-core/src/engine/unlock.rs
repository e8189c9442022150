//! Token unlock resolution.
//!
//! [`AppState::resolve_unlock`] holds the semantics; [`UnlockResolver`] is the
//! thin adapter the token-read path calls. It owns no state of its own and
//! mutates only through the store.

use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::info;

use crate::error::Result;
use crate::model::{AppState, ModeId, ScheduleId, TokenId};
use crate::scheduler::timing::start_edge_today;
use crate::storage::StateStore;

/// Modes and schedules an unlock turned off.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockResult {
    pub modes_deactivated: Vec<ModeId>,
    pub schedules_deactivated: Vec<ScheduleId>,
}

impl UnlockResult {
    pub fn is_empty(&self) -> bool {
        self.modes_deactivated.is_empty()
    }
}

/// User-facing classification of a token tap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlockFeedback {
    Unlocked,
    /// Registered token, but no active mode accepts it.
    WrongToken,
    /// The token was never registered.
    UnknownToken,
    NothingActive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockReport {
    pub token_id: TokenId,
    pub feedback: UnlockFeedback,
    #[serde(flatten)]
    pub result: UnlockResult,
}

impl AppState {
    /// Deactivate every active mode that `token_id` unlocks.
    ///
    /// Only registered tokens unlock anything. A schedule is moved to
    /// `deactivated_schedules` only if today's start edge has already passed
    /// (or it has no slot today and is carrying over from an earlier day), so
    /// a tap before a schedule starts cannot cancel that day's session.
    pub fn resolve_unlock<Tz: TimeZone>(&mut self, token_id: &TokenId, now: &DateTime<Tz>) -> UnlockResult {
        if !self.tokens.contains_key(token_id) {
            return UnlockResult::default();
        }

        let unlocked: BTreeSet<ModeId> = self
            .active_modes
            .iter()
            .filter(|id| {
                self.modes
                    .get(*id)
                    .map_or(true, |mode| mode.is_unlocked_by(token_id))
            })
            .cloned()
            .collect();
        if unlocked.is_empty() {
            return UnlockResult::default();
        }

        let schedules_deactivated = self.deactivate_modes(&unlocked, |schedule| {
            start_edge_today(schedule, now).map_or(true, |start| *now >= start)
        });
        UnlockResult {
            modes_deactivated: unlocked.into_iter().collect(),
            schedules_deactivated,
        }
    }
}

/// Adapter from a token-read event to the engine.
pub struct UnlockResolver<'a> {
    store: &'a StateStore,
}

impl<'a> UnlockResolver<'a> {
    pub fn new(store: &'a StateStore) -> Self {
        Self { store }
    }

    /// Resolve one tap and report what happened for user feedback.
    ///
    /// # Errors
    /// Returns an error if the state slot cannot be read or written.
    pub fn resolve<Tz: TimeZone>(&self, token_id: &TokenId, now: &DateTime<Tz>) -> Result<UnlockReport> {
        let commit = self.store.update(|state| {
            let known = state.tokens.contains_key(token_id);
            let anything_active = !state.active_modes.is_empty();
            let result = state.resolve_unlock(token_id, now);
            let feedback = match (known, anything_active, result.is_empty()) {
                (false, _, _) => UnlockFeedback::UnknownToken,
                (true, false, _) => UnlockFeedback::NothingActive,
                (true, true, true) => UnlockFeedback::WrongToken,
                (true, true, false) => UnlockFeedback::Unlocked,
            };
            UnlockReport {
                token_id: token_id.clone(),
                feedback,
                result,
            }
        })?;
        info!(
            token_id = %token_id,
            feedback = ?commit.value.feedback,
            modes = commit.value.result.modes_deactivated.len(),
            "token tap resolved"
        );
        Ok(commit.value)
    }
}
