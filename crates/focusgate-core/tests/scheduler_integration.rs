//! Integration tests for trigger arming and firing.
//!
//! Uses the recording alarm host so a whole week can be replayed without
//! sleeping.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use focusgate_core::model::{DayTime, Mode, ModeId, Policy, Schedule, ScheduleId, TimeSlot, Weekday};
use focusgate_core::scheduler::{Edge, Fired, RecordingAlarmHost, Scheduler, Trigger};
use focusgate_core::storage::{Database, StateStore};
use std::sync::Arc;
use std::time::Duration;

fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(2026, 10, day)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
        .and_utc()
}

fn setup() -> (Arc<RecordingAlarmHost>, Scheduler, StateStore) {
    let host = Arc::new(RecordingAlarmHost::new());
    let scheduler = Scheduler::new(host.clone(), Duration::from_secs(15 * 60));
    let store = StateStore::new(Database::open_memory().unwrap());
    store
        .update(|state| {
            state.upsert_mode(Mode::new("Work", Policy::BlockSelected).with_id("work"));
            let slot = TimeSlot::new(vec![
                DayTime::new(Weekday::Monday, (9, 0), (17, 0)).unwrap(),
                DayTime::new(Weekday::Friday, (22, 0), (2, 0)).unwrap(),
            ])
            .unwrap();
            state.upsert_schedule(Schedule::new("Focus", slot).with_id("focus").with_modes(["work"]))
        })
        .unwrap();
    (host, scheduler, store)
}

fn schedule_edges(due: Vec<(i64, Trigger)>) -> Vec<Trigger> {
    due.into_iter()
        .map(|(_, trigger)| trigger)
        .filter(|trigger| matches!(trigger, Trigger::ScheduleEdge { .. }))
        .collect()
}

#[test]
fn test_rearm_is_idempotent() {
    let (host, scheduler, store) = setup();
    let now = at(18, 12, 0);

    let first = scheduler.rearm_all(&store, &now).unwrap();
    let armed = host.armed();
    let second = scheduler.rearm_all(&store, &now).unwrap();

    assert_eq!(first.armed, second.armed);
    assert_eq!(host.armed(), armed);
    assert_eq!(scheduler.armed(), armed);
    assert!(second.catch_up.is_empty());
    assert!(second.events.is_empty());
    // two edges per day slot plus the watchdog
    assert_eq!(armed.len(), 5);
}

#[test]
fn test_rearm_catches_up_open_window() {
    let (_host, scheduler, store) = setup();

    let report = scheduler.rearm_all(&store, &at(19, 12, 0)).unwrap();

    assert_eq!(report.catch_up.started, vec![ScheduleId::from("focus")]);
    let state = store.load().unwrap().into_state();
    assert!(state.active_modes.contains(&ModeId::from("work")));
    assert!(state.active_schedules.contains(&ScheduleId::from("focus")));
}

#[test]
fn test_rearm_ends_schedule_missed_overnight() {
    let (_host, scheduler, store) = setup();
    scheduler.rearm_all(&store, &at(23, 23, 0)).unwrap();

    let report = scheduler.rearm_all(&store, &at(24, 8, 0)).unwrap();

    assert_eq!(report.catch_up.ended, vec![ScheduleId::from("focus")]);
    let state = store.load().unwrap().into_state();
    assert!(state.active_modes.is_empty());
}

#[test]
fn test_week_replay_fires_every_edge_once() {
    let (host, scheduler, store) = setup();
    let end = at(25, 12, 0).timestamp_millis();
    scheduler.rearm_all(&store, &at(18, 12, 0)).unwrap();

    let mut edges = Vec::new();
    let mut watchdogs = 0;
    while let Some(next) = host.armed().values().copied().min() {
        if next > end {
            break;
        }
        let now = Utc.timestamp_millis_opt(next).unwrap();
        for (_, trigger) in host.take_due(next) {
            let report = scheduler.on_fire(&store, &trigger, &now).unwrap();
            match report.fired {
                Fired::ScheduleStarted(activation) => {
                    assert_eq!(activation.activated, vec![ModeId::from("work")]);
                    edges.push(("start", now));
                }
                Fired::ScheduleEnded(_) => edges.push(("end", now)),
                Fired::Watchdog => watchdogs += 1,
                other => panic!("unexpected {other:?} for {trigger:?}"),
            }
        }
    }

    assert_eq!(
        edges,
        vec![
            ("start", at(19, 9, 0)),
            ("end", at(19, 17, 0)),
            ("start", at(23, 22, 0)),
            ("end", at(24, 2, 0)),
        ]
    );
    assert_eq!(watchdogs, 7 * 24 * 4);
    let state = store.load().unwrap().into_state();
    assert!(state.active_modes.is_empty());
    assert!(state.active_schedules.is_empty());
}

#[test]
fn test_timed_mode_expires_through_trigger() {
    let (host, scheduler, store) = setup();
    let now = at(20, 10, 0);
    let deadline = now.timestamp_millis() + 30 * 60 * 1000;
    store.update(|state| state.activate_mode(&"work".into(), Some(deadline))).unwrap();

    scheduler.rearm_all(&store, &now).unwrap();
    let timer = Trigger::TimerExpiry {
        mode_id: "work".into(),
        deadline_ms: deadline,
    };
    assert_eq!(host.fire_time(&timer.id()), Some(deadline));

    let due = host.take_due(deadline);
    let fired_at = Utc.timestamp_millis_opt(deadline).unwrap();
    for (_, trigger) in due {
        scheduler.on_fire(&store, &trigger, &fired_at).unwrap();
    }

    let state = store.load().unwrap().into_state();
    assert!(state.active_modes.is_empty());
    assert_eq!(host.fire_time(&timer.id()), None);
}

#[test]
fn test_deleted_schedule_drops_its_triggers() {
    let (host, scheduler, store) = setup();
    let now = at(18, 12, 0);
    scheduler.rearm_all(&store, &now).unwrap();

    store.update(|state| state.delete_schedule(&"focus".into())).unwrap();
    scheduler.rearm_all(&store, &now).unwrap();

    let armed = host.armed();
    assert_eq!(armed.len(), 1);
    assert!(armed.contains_key(&Trigger::Watchdog.id()));
}

#[test]
fn test_catch_up_after_missed_end_matches_live_end() {
    let work_through_monday = |store: &StateStore| {
        store
            .update(|state| {
                state.activate_schedule_by_system(&"focus".into(), at(19, 9, 0).timestamp_millis());
                state.activate_mode(&"work".into(), None)
            })
            .unwrap();
    };

    let (_host, scheduler, live) = setup();
    work_through_monday(&live);
    let end = at(19, 17, 0);
    let end_edge = Trigger::ScheduleEdge {
        schedule_id: "focus".into(),
        weekday: Weekday::Monday,
        edge: Edge::End,
        at_ms: end.timestamp_millis(),
    };
    let fired = scheduler.on_fire(&live, &end_edge, &end).unwrap().fired;
    assert!(matches!(fired, Fired::ScheduleEnded(_)));
    let live = live.load().unwrap().into_state();
    assert!(live.active_modes.is_empty());
    assert!(live.active_schedules.is_empty());

    let (_host, scheduler, resumed) = setup();
    work_through_monday(&resumed);
    let report = scheduler.rearm_all(&resumed, &at(19, 18, 0)).unwrap();
    let resumed = resumed.load().unwrap().into_state();

    assert_eq!(report.catch_up.ended, vec![ScheduleId::from("focus")]);
    assert_eq!(resumed.active_modes, live.active_modes);
    assert_eq!(resumed.manually_activated_modes, live.manually_activated_modes);
    assert_eq!(resumed.active_schedules, live.active_schedules);
    assert_eq!(resumed.schedule_started_at, live.schedule_started_at);
}

#[test]
fn test_edge_queued_before_slot_edit_is_ignored() {
    let (host, scheduler, store) = setup();
    scheduler.rearm_all(&store, &at(19, 8, 0)).unwrap();
    let queued = schedule_edges(host.take_due(at(19, 9, 0).timestamp_millis()));
    assert_eq!(queued.len(), 1);

    store
        .update(|state| {
            let slot = TimeSlot::new(vec![DayTime::new(Weekday::Monday, (11, 0), (17, 0)).unwrap()]).unwrap();
            state.upsert_schedule(Schedule::new("Focus", slot).with_id("focus").with_modes(["work"]))
        })
        .unwrap();
    scheduler.rearm_all(&store, &at(19, 8, 59)).unwrap();

    let now = at(19, 9, 0);
    for trigger in &queued {
        assert_eq!(scheduler.on_fire(&store, trigger, &now).unwrap().fired, Fired::Stale);
    }
    assert!(store.load().unwrap().state().active_modes.is_empty());

    let start = at(19, 11, 0);
    let due = schedule_edges(host.take_due(start.timestamp_millis()));
    assert_eq!(due.len(), 1);
    let report = scheduler.on_fire(&store, &due[0], &start).unwrap();
    assert!(matches!(report.fired, Fired::ScheduleStarted(_)));
}
