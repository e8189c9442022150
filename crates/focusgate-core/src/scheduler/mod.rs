//! Schedule scheduler.
//!
//! Arms wall-clock triggers for schedule edges, timed deactivations and the
//! enforcement watchdog on an [`AlarmHost`], and turns fired triggers into
//! engine transitions. Every fired schedule edge or watchdog re-arms itself,
//! so one [`Scheduler::rearm_all`] pass keeps the whole set alive.

mod host;
pub mod timing;

pub use host::{AlarmHost, RecordingAlarmHost, TokioAlarmHost};
pub use timing::{is_fire_time, last_fire_time, next_fire_time, schedule_window_open, Edge};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

use crate::engine::{Outcome, SystemActivation};
use crate::error::Result;
use crate::events::Event;
use crate::model::{AppState, ModeId, ScheduleId, Weekday};
use crate::storage::StateStore;

/// Stable identifier of an armed trigger.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TriggerId(String);

impl TriggerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TriggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Payload carried by an armed trigger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    /// `at_ms` is the instant the edge was armed for. A firing whose instant
    /// no longer falls on the slot's edge predates an edit and is stale.
    ScheduleEdge {
        schedule_id: ScheduleId,
        weekday: Weekday,
        edge: Edge,
        at_ms: i64,
    },
    /// One-shot expiry of a timed activation. `deadline_ms` pins the timer
    /// it was armed for, so a later re-activation is not confused with it.
    TimerExpiry { mode_id: ModeId, deadline_ms: i64 },
    Watchdog,
}

impl Trigger {
    pub fn id(&self) -> TriggerId {
        TriggerId(match self {
            Trigger::ScheduleEdge {
                schedule_id,
                weekday,
                edge,
                ..
            } => format!("schedule:{schedule_id}:{}:{edge}", weekday.number()),
            Trigger::TimerExpiry { mode_id, .. } => format!("timer:{mode_id}"),
            Trigger::Watchdog => "watchdog".to_string(),
        })
    }
}

/// A trigger as tracked by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Armed {
    pub trigger: Trigger,
    pub at_ms: i64,
}

/// Schedules whose activation was reconciled against the clock.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CatchUp {
    pub expired: Vec<ModeId>,
    pub started: Vec<ScheduleId>,
    pub ended: Vec<ScheduleId>,
}

impl CatchUp {
    pub fn is_empty(&self) -> bool {
        self.expired.is_empty() && self.started.is_empty() && self.ended.is_empty()
    }
}

/// Result of a full re-arm pass.
#[derive(Debug, Clone, Default)]
pub struct RearmReport {
    pub catch_up: CatchUp,
    pub armed: usize,
    pub events: Vec<Event>,
}

/// What a fired trigger did to the state.
#[derive(Debug, Clone, PartialEq)]
pub enum Fired {
    ScheduleStarted(SystemActivation),
    ScheduleEnded(Outcome),
    TimersExpired(Vec<ModeId>),
    /// The caller runs the enforcement liveness check.
    Watchdog,
    /// The trigger no longer matches anything (deleted schedule or slot, or
    /// a slot edited after the trigger was armed).
    Stale,
}

#[derive(Debug, Clone)]
pub struct FireReport {
    pub fired: Fired,
    pub events: Vec<Event>,
}

/// Reconcile activation flags with the wall clock after downtime.
///
/// Lapsed timers expire. A running schedule is ended exactly when its end
/// trigger would have fired: some end edge passed after the instant it
/// became active. A schedule with an end time whose window is open but that
/// is neither running nor cut short is then started. A cut-short mark is
/// dropped once its window has closed.
pub fn catch_up<Tz: TimeZone>(state: &mut AppState, now: &DateTime<Tz>) -> CatchUp {
    let now_ms = now.timestamp_millis();
    let mut report = CatchUp {
        expired: state.expire_timed_deactivations(now_ms),
        ..CatchUp::default()
    };

    let ids: Vec<ScheduleId> = state.schedules.keys().cloned().collect();
    for id in ids {
        let Some(schedule) = state.schedules.get(&id) else {
            continue;
        };
        if !schedule.has_end_time {
            continue;
        }
        let open = schedule_window_open(schedule, now);
        let last_edge = |edge: Edge| {
            schedule
                .time_slot
                .iter()
                .map(|day_time| last_fire_time(day_time, edge, now).timestamp_millis())
                .max()
                .unwrap_or(i64::MIN)
        };
        let last_start = last_edge(Edge::Start);
        let last_end = last_edge(Edge::End);
        let started_at = state.schedule_started_at.get(&id).copied().unwrap_or(i64::MIN);

        let ended = state.active_schedules.contains(&id) && last_end > started_at;
        if ended {
            state.deactivate_schedule_by_system(&id, now_ms);
            report.ended.push(id.clone());
        }

        if open {
            let idle = !state.active_schedules.contains(&id) && !state.deactivated_schedules.contains(&id);
            if idle && (!ended || last_start > last_end) {
                state.activate_schedule_by_system(&id, now_ms);
                report.started.push(id);
            }
        } else if !state.active_schedules.contains(&id) {
            state.deactivated_schedules.remove(&id);
        }
    }
    report
}

/// Thin driver between [`timing`] and an [`AlarmHost`].
pub struct Scheduler {
    host: Arc<dyn AlarmHost>,
    watchdog_interval: Duration,
    armed: Mutex<BTreeMap<TriggerId, Armed>>,
}

impl Scheduler {
    pub fn new(host: Arc<dyn AlarmHost>, watchdog_interval: Duration) -> Self {
        Self {
            host,
            watchdog_interval,
            armed: Mutex::new(BTreeMap::new()),
        }
    }

    fn table(&self) -> MutexGuard<'_, BTreeMap<TriggerId, Armed>> {
        self.armed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of tracked triggers and their firing instants.
    pub fn armed(&self) -> BTreeMap<TriggerId, i64> {
        self.table()
            .iter()
            .map(|(id, armed)| (id.clone(), armed.at_ms))
            .collect()
    }

    fn arm(&self, trigger: Trigger, at_ms: i64) {
        let id = trigger.id();
        debug!(trigger = %id, at_ms, "arming trigger");
        self.host.arm(id.clone(), at_ms, trigger.clone());
        self.table().insert(id, Armed { trigger, at_ms });
    }

    fn cancel(&self, id: &TriggerId) {
        if self.table().remove(id).is_some() {
            debug!(trigger = %id, "cancelling trigger");
            self.host.cancel(id);
        }
    }

    /// Re-arm every trigger from the persisted state, catching up on edges
    /// missed while nothing was running.
    ///
    /// # Errors
    /// Returns an error if the state cannot be read or written.
    pub fn rearm_all<Tz: TimeZone>(&self, store: &StateStore, now: &DateTime<Tz>) -> Result<RearmReport> {
        let commit = store.update(|state| catch_up(state, now))?;
        let events = commit.events(now.with_timezone(&Utc));
        let armed = self.arm_from(&commit.after, now);
        if !commit.value.is_empty() {
            info!(
                started = commit.value.started.len(),
                ended = commit.value.ended.len(),
                expired = commit.value.expired.len(),
                "caught up with the clock"
            );
        }
        Ok(RearmReport {
            catch_up: commit.value,
            armed,
            events,
        })
    }

    /// Arm schedule edges, timers and the watchdog for `state` without
    /// touching the state itself. Returns the number of tracked triggers.
    pub fn arm_from<Tz: TimeZone>(&self, state: &AppState, now: &DateTime<Tz>) -> usize {
        let stale: Vec<TriggerId> = self
            .table()
            .iter()
            .filter(|(_, armed)| matches!(armed.trigger, Trigger::ScheduleEdge { .. }))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            self.cancel(id);
        }

        for schedule in state.schedules.values() {
            for day_time in schedule.time_slot.iter() {
                let edges: &[Edge] = if schedule.has_end_time {
                    &[Edge::Start, Edge::End]
                } else {
                    &[Edge::Start]
                };
                for &edge in edges {
                    let at_ms = next_fire_time(day_time, edge, now).timestamp_millis();
                    let trigger = Trigger::ScheduleEdge {
                        schedule_id: schedule.id.clone(),
                        weekday: day_time.weekday,
                        edge,
                        at_ms,
                    };
                    self.arm(trigger, at_ms);
                }
            }
        }

        self.sync_timers(state, now.timestamp_millis());
        self.ensure_watchdog(now.timestamp_millis());
        self.table().len()
    }

    /// Make the armed timer triggers match `timed_deactivations`.
    pub fn sync_timers(&self, state: &AppState, now_ms: i64) {
        let stale: Vec<TriggerId> = self
            .table()
            .iter()
            .filter(|(_, armed)| match &armed.trigger {
                Trigger::TimerExpiry { mode_id, deadline_ms } => {
                    state.timed_deactivations.get(mode_id) != Some(deadline_ms)
                }
                _ => false,
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            self.cancel(id);
        }

        for (mode_id, deadline) in &state.timed_deactivations {
            let trigger = Trigger::TimerExpiry {
                mode_id: mode_id.clone(),
                deadline_ms: *deadline,
            };
            let already = self
                .table()
                .get(&trigger.id())
                .is_some_and(|armed| armed.trigger == trigger);
            if !already {
                self.arm(trigger, (*deadline).max(now_ms));
            }
        }
    }

    fn ensure_watchdog(&self, now_ms: i64) {
        if !self.table().contains_key(&Trigger::Watchdog.id()) {
            self.arm_watchdog(now_ms);
        }
    }

    fn arm_watchdog(&self, now_ms: i64) {
        let interval = i64::try_from(self.watchdog_interval.as_millis()).unwrap_or(i64::MAX);
        self.arm(Trigger::Watchdog, now_ms.saturating_add(interval));
    }

    /// Apply a fired trigger and re-arm whatever chains off it.
    ///
    /// Triggers for schedules or slots that no longer exist are dropped
    /// without touching the state.
    ///
    /// # Errors
    /// Returns an error if the state cannot be read or written.
    pub fn on_fire<Tz: TimeZone>(
        &self,
        store: &StateStore,
        trigger: &Trigger,
        now: &DateTime<Tz>,
    ) -> Result<FireReport> {
        let id = trigger.id();
        let now_ms = now.timestamp_millis();
        let at = now.with_timezone(&Utc);
        let mut events = vec![Event::TriggerFired {
            trigger_id: id.to_string(),
            at,
        }];

        {
            let mut table = self.table();
            if table.get(&id).is_some_and(|armed| armed.trigger == *trigger) {
                table.remove(&id);
            }
        }

        let fired = match trigger {
            Trigger::Watchdog => {
                self.arm_watchdog(now_ms);
                Fired::Watchdog
            }
            Trigger::ScheduleEdge {
                schedule_id,
                weekday,
                edge,
                at_ms,
            } => {
                let armed_at = now.timezone().timestamp_millis_opt(*at_ms).single();
                let commit = store.update(|state| {
                    let day_time = state
                        .schedule(schedule_id)
                        .filter(|s| *edge == Edge::Start || s.has_end_time)
                        .and_then(|s| s.time_slot.get(*weekday))
                        .copied();
                    let current = day_time.filter(|day_time| {
                        armed_at
                            .as_ref()
                            .is_some_and(|armed_at| is_fire_time(day_time, *edge, armed_at))
                    });
                    let fired = match (current, edge) {
                        (None, _) => Fired::Stale,
                        (Some(_), Edge::Start) => {
                            Fired::ScheduleStarted(state.activate_schedule_by_system(schedule_id, now_ms))
                        }
                        (Some(_), Edge::End) => {
                            Fired::ScheduleEnded(state.deactivate_schedule_by_system(schedule_id, now_ms))
                        }
                    };
                    (fired, day_time, current.is_some())
                })?;
                events.extend(commit.events(at));

                let (fired, day_time, current) = commit.value;
                match day_time {
                    Some(day_time) => {
                        if !current {
                            debug!(trigger = %id, at_ms, "trigger armed before its slot was edited, ignoring");
                        }
                        if current || !self.table().contains_key(&id) {
                            let next_ms = next_fire_time(&day_time, *edge, now).timestamp_millis();
                            let next = Trigger::ScheduleEdge {
                                schedule_id: schedule_id.clone(),
                                weekday: *weekday,
                                edge: *edge,
                                at_ms: next_ms,
                            };
                            self.arm(next, next_ms);
                        }
                    }
                    None => {
                        debug!(trigger = %id, "trigger outlived its schedule, dropping");
                        self.table().remove(&id);
                        self.host.cancel(&id);
                    }
                }
                self.sync_timers(&commit.after, now_ms);
                fired
            }
            Trigger::TimerExpiry { .. } => {
                let commit = store.update(|state| state.expire_timed_deactivations(now_ms))?;
                events.extend(commit.events(at));
                self.sync_timers(&commit.after, now_ms);
                Fired::TimersExpired(commit.value)
            }
        };

        Ok(FireReport { fired, events })
    }
}
