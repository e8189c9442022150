//! Mode and schedule activation transitions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, warn};

use super::Outcome;
use crate::model::{AppState, ModeId, Policy, Schedule, ScheduleId};

/// What a system (schedule start) activation actually did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemActivation {
    /// `false` when the schedule no longer exists (trigger raced a delete).
    pub found: bool,
    pub activated: Vec<ModeId>,
    /// Modes left out because they would mix policies or no longer exist.
    pub skipped: Vec<ModeId>,
}

impl AppState {
    /// Policy of an active mode (other than `ignore`) that differs from `policy`.
    pub(crate) fn conflicting_policy(&self, policy: Policy, ignore: Option<&ModeId>) -> Option<Policy> {
        self.active_modes
            .iter()
            .filter(|id| Some(*id) != ignore)
            .filter_map(|id| self.modes.get(id))
            .map(|mode| mode.policy)
            .find(|active| *active != policy)
    }

    /// User activation of a single mode, optionally until `timed_until`
    /// (epoch milliseconds).
    ///
    /// Activating without a deadline drops any timer the mode already had.
    pub fn activate_mode(&mut self, mode_id: &ModeId, timed_until: Option<i64>) -> Outcome {
        let Some(mode) = self.modes.get(mode_id) else {
            return Outcome::ModeNotFound;
        };
        let requested = mode.policy;
        if let Some(active) = self.conflicting_policy(requested, Some(mode_id)) {
            return Outcome::PolicyConflict { requested, active };
        }

        self.active_modes.insert(mode_id.clone());
        self.manually_activated_modes.insert(mode_id.clone());
        match timed_until {
            Some(deadline) => {
                self.timed_deactivations.insert(mode_id.clone(), deadline);
            }
            None => {
                self.timed_deactivations.remove(mode_id);
            }
        }
        Outcome::Success
    }

    /// Deactivate a mode and cascade to the schedules it kept alive.
    pub fn deactivate_mode(&mut self, mode_id: &ModeId) -> Outcome {
        if !self.modes.contains_key(mode_id) && !self.active_modes.contains(mode_id) {
            return Outcome::ModeNotFound;
        }
        let ids = BTreeSet::from([mode_id.clone()]);
        self.deactivate_modes(&ids, |_| true);
        Outcome::Success
    }

    /// Remove `ids` from every activation set, then move each active schedule
    /// linking one of them to `deactivated_schedules` once none of its linked
    /// modes remain active. `cascade` can veto that move per schedule.
    ///
    /// Returns the schedules that were moved.
    pub(crate) fn deactivate_modes<F>(&mut self, ids: &BTreeSet<ModeId>, cascade: F) -> Vec<ScheduleId>
    where
        F: Fn(&Schedule) -> bool,
    {
        for id in ids {
            self.active_modes.remove(id);
            self.manually_activated_modes.remove(id);
            self.timed_deactivations.remove(id);
        }

        let affected: Vec<ScheduleId> = self
            .active_schedules
            .iter()
            .filter_map(|sid| self.schedules.get(sid))
            .filter(|schedule| schedule.linked_mode_ids.iter().any(|m| ids.contains(m)))
            .filter(|schedule| {
                !schedule
                    .linked_mode_ids
                    .iter()
                    .any(|m| self.active_modes.contains(m))
            })
            .filter(|schedule| cascade(schedule))
            .map(|schedule| schedule.id.clone())
            .collect();

        for sid in &affected {
            self.active_schedules.remove(sid);
            self.schedule_started_at.remove(sid);
            self.deactivated_schedules.insert(sid.clone());
        }
        affected
    }

    /// Start edge of a schedule at `now_ms`. Conflicting modes are skipped
    /// individually; the schedule itself is always marked active.
    pub fn activate_schedule_by_system(&mut self, schedule_id: &ScheduleId, now_ms: i64) -> SystemActivation {
        let Some(schedule) = self.schedules.get(schedule_id) else {
            debug!(schedule_id = %schedule_id, "start edge for unknown schedule ignored");
            return SystemActivation::default();
        };
        let linked = schedule.linked_mode_ids.clone();
        let mut report = SystemActivation {
            found: true,
            ..SystemActivation::default()
        };

        for mode_id in linked {
            let Some(policy) = self.modes.get(&mode_id).map(|m| m.policy) else {
                report.skipped.push(mode_id);
                continue;
            };
            if let Some(active) = self.conflicting_policy(policy, Some(&mode_id)) {
                warn!(
                    schedule_id = %schedule_id,
                    mode_id = %mode_id,
                    requested = %policy,
                    active = %active,
                    "skipping mode with conflicting policy"
                );
                report.skipped.push(mode_id);
                continue;
            }
            if self.active_modes.insert(mode_id.clone()) {
                report.activated.push(mode_id);
            }
        }

        self.mark_schedule_active(schedule_id, now_ms);
        report
    }

    /// End edge of a schedule. Modes with a live timer outlive the schedule.
    pub fn deactivate_schedule_by_system(&mut self, schedule_id: &ScheduleId, now_ms: i64) -> Outcome {
        let linked = self
            .schedules
            .get(schedule_id)
            .map(|s| s.linked_mode_ids.clone());

        self.active_schedules.remove(schedule_id);
        self.deactivated_schedules.remove(schedule_id);
        self.schedule_started_at.remove(schedule_id);

        let Some(linked) = linked else {
            debug!(schedule_id = %schedule_id, "end edge for unknown schedule ignored");
            return Outcome::ScheduleNotFound;
        };

        for mode_id in linked {
            let timer_live = self
                .timed_deactivations
                .get(&mode_id)
                .is_some_and(|deadline| *deadline > now_ms);
            if timer_live {
                debug!(mode_id = %mode_id, "mode outlives schedule end via timer");
                continue;
            }
            self.active_modes.remove(&mode_id);
            self.manually_activated_modes.remove(&mode_id);
            self.timed_deactivations.remove(&mode_id);
        }
        Outcome::Success
    }

    /// User activation of a whole schedule at `now_ms`: every linked mode or
    /// none.
    pub fn activate_schedule_manually(&mut self, schedule_id: &ScheduleId, now_ms: i64) -> Outcome {
        let Some(schedule) = self.schedules.get(schedule_id) else {
            return Outcome::ScheduleNotFound;
        };

        let mut policies = Vec::with_capacity(schedule.linked_mode_ids.len());
        for mode_id in &schedule.linked_mode_ids {
            match self.modes.get(mode_id) {
                Some(mode) => policies.push(mode.policy),
                None => return Outcome::ModeNotFound,
            }
        }

        let baseline = self.effective_policy().or_else(|| policies.first().copied());
        if let Some(active) = baseline {
            if let Some(requested) = policies.iter().copied().find(|p| *p != active) {
                return Outcome::PolicyConflict { requested, active };
            }
        }

        let linked = schedule.linked_mode_ids.clone();
        for mode_id in linked {
            self.active_modes.insert(mode_id.clone());
            self.manually_activated_modes.insert(mode_id);
        }
        self.mark_schedule_active(schedule_id, now_ms);
        Outcome::Success
    }

    /// User stop of a whole schedule: deactivates its modes and, if it was
    /// running, records it as deactivated.
    pub fn deactivate_schedule_manually(&mut self, schedule_id: &ScheduleId) -> Outcome {
        let Some(schedule) = self.schedules.get(schedule_id) else {
            return Outcome::ScheduleNotFound;
        };
        let ids: BTreeSet<ModeId> = schedule.linked_mode_ids.iter().cloned().collect();
        self.deactivate_modes(&ids, |_| true);
        if self.active_schedules.remove(schedule_id) {
            self.deactivated_schedules.insert(schedule_id.clone());
        }
        self.schedule_started_at.remove(schedule_id);
        Outcome::Success
    }

    fn mark_schedule_active(&mut self, schedule_id: &ScheduleId, now_ms: i64) {
        self.active_schedules.insert(schedule_id.clone());
        self.deactivated_schedules.remove(schedule_id);
        self.schedule_started_at.insert(schedule_id.clone(), now_ms);
    }

    /// Deactivate every mode whose timer deadline is at or before `now_ms`.
    pub fn expire_timed_deactivations(&mut self, now_ms: i64) -> Vec<ModeId> {
        let expired: Vec<ModeId> = self
            .timed_deactivations
            .iter()
            .filter(|(_, deadline)| **deadline <= now_ms)
            .map(|(id, _)| id.clone())
            .collect();
        for mode_id in &expired {
            self.deactivate_mode(mode_id);
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DayTime, Mode, TimeSlot, Weekday};

    fn state_with(modes: &[(&str, Policy)]) -> AppState {
        let mut state = AppState::default();
        for (id, policy) in modes {
            let mode = Mode::new(*id, *policy).with_id(*id);
            state.modes.insert(mode.id.clone(), mode);
        }
        state
    }

    fn add_schedule(state: &mut AppState, id: &str, modes: &[&str]) {
        let slot = TimeSlot::new(vec![DayTime::new(Weekday::Monday, (9, 0), (17, 0)).unwrap()]).unwrap();
        let schedule = Schedule::new(id, slot).with_id(id).with_modes(modes.iter().copied());
        state.schedules.insert(schedule.id.clone(), schedule);
    }

    #[test]
    fn activate_mode_records_manual_and_timer() {
        let mut state = state_with(&[("m1", Policy::BlockSelected)]);
        let outcome = state.activate_mode(&"m1".into(), Some(1_000));
        assert_eq!(outcome, Outcome::Success);
        assert!(state.active_modes.contains(&ModeId::from("m1")));
        assert!(state.manually_activated_modes.contains(&ModeId::from("m1")));
        assert_eq!(state.timed_deactivations.get(&ModeId::from("m1")), Some(&1_000));
    }

    #[test]
    fn activate_unknown_mode_is_not_found() {
        let mut state = AppState::default();
        assert_eq!(state.activate_mode(&"ghost".into(), None), Outcome::ModeNotFound);
    }

    #[test]
    fn reactivating_same_mode_is_not_a_conflict() {
        let mut state = state_with(&[("m1", Policy::AllowSelected)]);
        state.activate_mode(&"m1".into(), Some(5));
        assert!(state.activate_mode(&"m1".into(), None).is_success());
        assert!(state.timed_deactivations.is_empty());
    }

    #[test]
    fn partial_schedule_stays_active_when_one_mode_drops() {
        let mut state = state_with(&[("a", Policy::BlockSelected), ("b", Policy::BlockSelected)]);
        add_schedule(&mut state, "s", &["a", "b"]);
        state.activate_schedule_by_system(&"s".into(), 0);

        state.deactivate_mode(&"a".into());
        assert!(state.active_schedules.contains(&ScheduleId::from("s")));
        assert!(state.deactivated_schedules.is_empty());

        state.deactivate_mode(&"b".into());
        assert!(!state.active_schedules.contains(&ScheduleId::from("s")));
        assert!(state.deactivated_schedules.contains(&ScheduleId::from("s")));
    }

    #[test]
    fn system_activation_skips_only_conflicting_modes() {
        let mut state = state_with(&[
            ("block", Policy::BlockSelected),
            ("allow", Policy::AllowSelected),
            ("block2", Policy::BlockSelected),
        ]);
        state.activate_mode(&"block".into(), None);
        add_schedule(&mut state, "s", &["allow", "block2", "missing"]);

        let report = state.activate_schedule_by_system(&"s".into(), 0);
        assert!(report.found);
        assert_eq!(report.activated, vec![ModeId::from("block2")]);
        assert_eq!(report.skipped, vec![ModeId::from("allow"), ModeId::from("missing")]);
        assert!(state.active_schedules.contains(&ScheduleId::from("s")));
        assert!(state.policies_consistent());
    }

    #[test]
    fn manual_schedule_activation_is_all_or_nothing() {
        let mut state = state_with(&[
            ("block", Policy::BlockSelected),
            ("allow", Policy::AllowSelected),
            ("block2", Policy::BlockSelected),
        ]);
        state.activate_mode(&"block".into(), None);
        add_schedule(&mut state, "s", &["allow", "block2"]);
        let before = state.clone();

        let outcome = state.activate_schedule_manually(&"s".into(), 0);
        assert_eq!(
            outcome,
            Outcome::PolicyConflict {
                requested: Policy::AllowSelected,
                active: Policy::BlockSelected
            }
        );
        assert_eq!(state, before);
    }

    #[test]
    fn manual_schedule_with_mixed_links_conflicts_even_when_idle() {
        let mut state = state_with(&[("block", Policy::BlockSelected), ("allow", Policy::AllowSelected)]);
        add_schedule(&mut state, "s", &["block", "allow"]);
        assert!(matches!(
            state.activate_schedule_manually(&"s".into(), 0),
            Outcome::PolicyConflict { .. }
        ));
        assert!(state.active_modes.is_empty());
    }

    #[test]
    fn schedule_end_keeps_timed_modes() {
        let mut state = state_with(&[("a", Policy::BlockSelected), ("b", Policy::BlockSelected)]);
        add_schedule(&mut state, "s", &["a", "b"]);
        state.activate_schedule_by_system(&"s".into(), 0);
        state.activate_mode(&"a".into(), Some(10_000));

        state.deactivate_schedule_by_system(&"s".into(), 5_000);
        assert!(state.active_modes.contains(&ModeId::from("a")));
        assert!(!state.active_modes.contains(&ModeId::from("b")));
        assert!(state.active_schedules.is_empty());
        assert!(state.deactivated_schedules.is_empty());
    }

    #[test]
    fn schedule_end_drops_modes_with_lapsed_timer() {
        let mut state = state_with(&[("a", Policy::BlockSelected)]);
        add_schedule(&mut state, "s", &["a"]);
        state.activate_schedule_by_system(&"s".into(), 0);
        state.activate_mode(&"a".into(), Some(1_000));

        state.deactivate_schedule_by_system(&"s".into(), 2_000);
        assert!(state.active_modes.is_empty());
        assert!(state.timed_deactivations.is_empty());
    }

    #[test]
    fn end_edge_for_deleted_schedule_is_noop() {
        let mut state = AppState::default();
        assert_eq!(
            state.deactivate_schedule_by_system(&"gone".into(), 0),
            Outcome::ScheduleNotFound
        );
        assert!(!state.activate_schedule_by_system(&"gone".into(), 0).found);
    }

    #[test]
    fn manual_schedule_stop_marks_deactivated() {
        let mut state = state_with(&[("a", Policy::BlockSelected)]);
        add_schedule(&mut state, "s", &["a"]);
        state.activate_schedule_by_system(&"s".into(), 0);
        assert!(state.deactivate_schedule_manually(&"s".into()).is_success());
        assert!(state.active_modes.is_empty());
        assert!(state.deactivated_schedules.contains(&ScheduleId::from("s")));
        assert!(state.active_schedules.is_empty());
    }

    #[test]
    fn expire_only_touches_lapsed_deadlines() {
        let mut state = state_with(&[("a", Policy::BlockSelected), ("b", Policy::BlockSelected)]);
        state.activate_mode(&"a".into(), Some(100));
        state.activate_mode(&"b".into(), Some(300));

        let expired = state.expire_timed_deactivations(200);
        assert_eq!(expired, vec![ModeId::from("a")]);
        assert!(!state.active_modes.contains(&ModeId::from("a")));
        assert!(state.active_modes.contains(&ModeId::from("b")));
        assert_eq!(state.timed_deactivations.len(), 1);
    }
}
