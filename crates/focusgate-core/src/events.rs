use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{AppState, ModeId, ScheduleId};

/// Every state change in the system produces an Event.
/// The daemon logs them; the CLI prints them after each command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    ModeActivated {
        mode_id: ModeId,
        manual: bool,
        at: DateTime<Utc>,
    },
    ModeDeactivated {
        mode_id: ModeId,
        at: DateTime<Utc>,
    },
    ScheduleActivated {
        schedule_id: ScheduleId,
        at: DateTime<Utc>,
    },
    /// Schedule was cut short (unlock, timer, manual stop).
    ScheduleDeactivated {
        schedule_id: ScheduleId,
        at: DateTime<Utc>,
    },
    /// Schedule reached its end edge or was deleted.
    ScheduleEnded {
        schedule_id: ScheduleId,
        at: DateTime<Utc>,
    },
    TimerSet {
        mode_id: ModeId,
        until: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    TimerCleared {
        mode_id: ModeId,
        at: DateTime<Utc>,
    },
    TriggerFired {
        trigger_id: String,
        at: DateTime<Utc>,
    },
    EnforcementRestarted {
        at: DateTime<Utc>,
    },
    /// The persisted state was unreadable and replaced by an empty one.
    StateRecovered {
        error: String,
        at: DateTime<Utc>,
    },
}

/// Derive the events that turn `before` into `after`.
pub fn diff(before: &AppState, after: &AppState, at: DateTime<Utc>) -> Vec<Event> {
    let mut events = Vec::new();

    for mode_id in after.active_modes.difference(&before.active_modes) {
        events.push(Event::ModeActivated {
            mode_id: mode_id.clone(),
            manual: after.manually_activated_modes.contains(mode_id),
            at,
        });
    }
    for mode_id in before.active_modes.difference(&after.active_modes) {
        events.push(Event::ModeDeactivated {
            mode_id: mode_id.clone(),
            at,
        });
    }

    for schedule_id in after.active_schedules.difference(&before.active_schedules) {
        events.push(Event::ScheduleActivated {
            schedule_id: schedule_id.clone(),
            at,
        });
    }
    for schedule_id in before.active_schedules.difference(&after.active_schedules) {
        let event = if after.deactivated_schedules.contains(schedule_id) {
            Event::ScheduleDeactivated {
                schedule_id: schedule_id.clone(),
                at,
            }
        } else {
            Event::ScheduleEnded {
                schedule_id: schedule_id.clone(),
                at,
            }
        };
        events.push(event);
    }

    for (mode_id, deadline) in &after.timed_deactivations {
        if before.timed_deactivations.get(mode_id) != Some(deadline) {
            events.push(Event::TimerSet {
                mode_id: mode_id.clone(),
                until: Utc.timestamp_millis_opt(*deadline).single().unwrap_or(at),
                at,
            });
        }
    }
    for mode_id in before.timed_deactivations.keys() {
        if !after.timed_deactivations.contains_key(mode_id) {
            events.push(Event::TimerCleared {
                mode_id: mode_id.clone(),
                at,
            });
        }
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Mode, Policy, Schedule, TimeSlot};

    #[test]
    fn diff_reports_activation_and_timer() {
        let mut before = AppState::default();
        before.upsert_mode(Mode::new("m", Policy::BlockSelected).with_id("m"));
        let mut after = before.clone();
        after.activate_mode(&"m".into(), Some(1_700_000_000_000));

        let events = diff(&before, &after, Utc::now());
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], Event::ModeActivated { manual: true, .. }));
        assert!(matches!(&events[1], Event::TimerSet { .. }));
    }

    #[test]
    fn diff_distinguishes_cut_short_from_ended() {
        let mut base = AppState::default();
        base.upsert_mode(Mode::new("m", Policy::BlockSelected).with_id("m"));
        base.upsert_schedule(Schedule::new("s", TimeSlot::default()).with_id("s").with_modes(["m"]));
        base.activate_schedule_by_system(&"s".into(), 0);

        let mut cut = base.clone();
        cut.deactivate_mode(&"m".into());
        let events = diff(&base, &cut, Utc::now());
        assert!(events.iter().any(|e| matches!(e, Event::ScheduleDeactivated { .. })));

        let mut ended = base.clone();
        ended.deactivate_schedule_by_system(&"s".into(), 0);
        let events = diff(&base, &ended, Utc::now());
        assert!(events.iter().any(|e| matches!(e, Event::ScheduleEnded { .. })));
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let event = Event::EnforcementRestarted { at: Utc::now() };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"EnforcementRestarted""#));
    }
}
