//! Create, edit and delete transitions for entities.

use super::Outcome;
use crate::model::{AppState, Mode, ModeId, Schedule, ScheduleId, Token, TokenId};

impl AppState {
    /// Insert or replace a mode.
    ///
    /// Editing an active mode may not change its policy into one that
    /// conflicts with the other active modes.
    pub fn upsert_mode(&mut self, mode: Mode) -> Outcome {
        if self.active_modes.contains(&mode.id) {
            if let Some(active) = self.conflicting_policy(mode.policy, Some(&mode.id)) {
                return Outcome::PolicyConflict {
                    requested: mode.policy,
                    active,
                };
            }
        }
        self.modes.insert(mode.id.clone(), mode);
        Outcome::Success
    }

    /// Apply `edit` to the stored mode and write it back through
    /// [`AppState::upsert_mode`]. Run this inside the write transaction so
    /// the edit lands on the latest copy.
    pub fn edit_mode<F>(&mut self, mode_id: &ModeId, edit: F) -> Outcome
    where
        F: FnOnce(&mut Mode),
    {
        let Some(mut mode) = self.modes.get(mode_id).cloned() else {
            return Outcome::ModeNotFound;
        };
        edit(&mut mode);
        mode.id = mode_id.clone();
        self.upsert_mode(mode)
    }

    /// Delete a mode and every reference to it.
    pub fn delete_mode(&mut self, mode_id: &ModeId) -> Outcome {
        if self.modes.remove(mode_id).is_none() {
            return Outcome::ModeNotFound;
        }
        for schedule in self.schedules.values_mut() {
            schedule.linked_mode_ids.retain(|id| id != mode_id);
        }
        for token in self.tokens.values_mut() {
            token.linked_mode_ids.retain(|id| id != mode_id);
        }
        self.active_modes.remove(mode_id);
        self.manually_activated_modes.remove(mode_id);
        self.timed_deactivations.remove(mode_id);
        Outcome::Success
    }

    /// Insert or replace a schedule. Every linked mode must exist.
    pub fn upsert_schedule(&mut self, schedule: Schedule) -> Outcome {
        if schedule
            .linked_mode_ids
            .iter()
            .any(|id| !self.modes.contains_key(id))
        {
            return Outcome::ModeNotFound;
        }
        self.schedules.insert(schedule.id.clone(), schedule);
        Outcome::Success
    }

    /// Delete a schedule. Its modes stay as they are; armed triggers are
    /// cancelled by the next re-arm pass.
    pub fn delete_schedule(&mut self, schedule_id: &ScheduleId) -> Outcome {
        if self.schedules.remove(schedule_id).is_none() {
            return Outcome::ScheduleNotFound;
        }
        self.active_schedules.remove(schedule_id);
        self.deactivated_schedules.remove(schedule_id);
        self.schedule_started_at.remove(schedule_id);
        Outcome::Success
    }

    /// Register or rename a token.
    pub fn register_token(&mut self, token: Token) -> Outcome {
        if token.linked_mode_ids.iter().any(|id| !self.modes.contains_key(id)) {
            return Outcome::ModeNotFound;
        }
        self.tokens.insert(token.id.clone(), token);
        Outcome::Success
    }

    /// Delete a token. Modes that required it fall back to "any token".
    pub fn delete_token(&mut self, token_id: &TokenId) -> bool {
        if self.tokens.remove(token_id).is_none() {
            return false;
        }
        for mode in self.modes.values_mut() {
            if mode.required_token_id.as_ref() == Some(token_id) {
                mode.required_token_id = None;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Policy, TimeSlot};

    fn seeded() -> AppState {
        let mut state = AppState::default();
        let mode = Mode::new("Work", Policy::BlockSelected).with_id("m1").with_required_token("t1");
        state.upsert_mode(mode);
        state.register_token(Token::new("t1", "Keys"));
        let mut token = Token::new("t2", "Card");
        token.linked_mode_ids.push("m1".into());
        state.register_token(token);
        state.upsert_schedule(Schedule::new("Office", TimeSlot::default()).with_id("s1").with_modes(["m1"]));
        state
    }

    #[test]
    fn delete_mode_cascades_everywhere() {
        let mut state = seeded();
        state.activate_mode(&"m1".into(), Some(99));
        assert!(state.delete_mode(&"m1".into()).is_success());

        assert!(state.schedules[&ScheduleId::from("s1")].linked_mode_ids.is_empty());
        assert!(state.tokens[&TokenId::from("t2")].linked_mode_ids.is_empty());
        assert!(state.active_modes.is_empty());
        assert!(state.manually_activated_modes.is_empty());
        assert!(state.timed_deactivations.is_empty());
        assert_eq!(state.delete_mode(&"m1".into()), Outcome::ModeNotFound);
    }

    #[test]
    fn schedule_with_unknown_mode_is_rejected() {
        let mut state = AppState::default();
        let schedule = Schedule::new("x", TimeSlot::default()).with_modes(["nope"]);
        assert_eq!(state.upsert_schedule(schedule), Outcome::ModeNotFound);
        assert!(state.schedules.is_empty());
    }

    #[test]
    fn editing_active_mode_cannot_flip_into_conflict() {
        let mut state = seeded();
        state.upsert_mode(Mode::new("Other", Policy::BlockSelected).with_id("m2"));
        state.activate_mode(&"m1".into(), None);
        state.activate_mode(&"m2".into(), None);

        let flipped = Mode::new("Other", Policy::AllowSelected).with_id("m2");
        assert!(matches!(state.upsert_mode(flipped), Outcome::PolicyConflict { .. }));
        assert_eq!(state.modes[&ModeId::from("m2")].policy, Policy::BlockSelected);
    }

    #[test]
    fn edit_mode_applies_to_current_copy() {
        let mut state = seeded();
        assert!(state.delete_token(&"t1".into()));

        let outcome = state.edit_mode(&"m1".into(), |mode| mode.name = "Deep work".into());
        assert!(outcome.is_success());
        let mode = &state.modes[&ModeId::from("m1")];
        assert_eq!(mode.name, "Deep work");
        assert_eq!(mode.required_token_id, None);
        assert_eq!(mode.policy, Policy::BlockSelected);
    }

    #[test]
    fn edit_mode_rejects_unknown_and_conflicting_edits() {
        let mut state = seeded();
        assert_eq!(state.edit_mode(&"nope".into(), |_| {}), Outcome::ModeNotFound);
        assert!(!state.modes.contains_key(&ModeId::from("nope")));

        state.upsert_mode(Mode::new("Other", Policy::BlockSelected).with_id("m2"));
        state.activate_mode(&"m1".into(), None);
        state.activate_mode(&"m2".into(), None);
        let outcome = state.edit_mode(&"m2".into(), |mode| mode.policy = Policy::AllowSelected);
        assert!(matches!(outcome, Outcome::PolicyConflict { .. }));
    }

    #[test]
    fn delete_token_releases_required_binding() {
        let mut state = seeded();
        assert!(state.delete_token(&"t1".into()));
        assert_eq!(state.modes[&ModeId::from("m1")].required_token_id, None);
        assert!(!state.delete_token(&"t1".into()));
    }

    #[test]
    fn delete_schedule_clears_activation_sets() {
        let mut state = seeded();
        state.activate_schedule_by_system(&"s1".into(), 0);
        assert!(state.delete_schedule(&"s1".into()).is_success());
        assert!(state.active_schedules.is_empty());
        assert!(state.deactivated_schedules.is_empty());
    }
}
