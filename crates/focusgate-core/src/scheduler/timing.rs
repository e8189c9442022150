//! Pure wall-clock arithmetic for weekly schedule edges.
//!
//! Nothing here touches an alarm host; the scheduler is a thin driver that
//! feeds these results into `arm`/`cancel`.

use chrono::{DateTime, Datelike, Days, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::{DayTime, Schedule, Weekday};

/// Which side of a day window a trigger fires on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Edge {
    Start,
    End,
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Edge::Start => f.write_str("start"),
            Edge::End => f.write_str("end"),
        }
    }
}

/// Weekday and clock time on which `edge` of `day_time` happens.
///
/// An end edge of a window that crosses midnight lands on the next weekday.
pub fn edge_slot(day_time: &DayTime, edge: Edge) -> (Weekday, NaiveTime) {
    match edge {
        Edge::Start => (day_time.weekday, day_time.start_time()),
        Edge::End if day_time.crosses_midnight() => (day_time.weekday.succ(), day_time.end_time()),
        Edge::End => (day_time.weekday, day_time.end_time()),
    }
}

/// First instant strictly after `now` at which `edge` of `day_time` fires.
///
/// Firing at exactly the computed instant and asking again yields the same
/// edge one week later, which is what makes the triggers self-chaining.
pub fn next_fire_time<Tz: TimeZone>(day_time: &DayTime, edge: Edge, now: &DateTime<Tz>) -> DateTime<Tz> {
    let (weekday, time) = edge_slot(day_time, edge);
    let today = now.date_naive();
    let ahead = days_between(today.weekday(), weekday.to_chrono());

    for week in 0..3u64 {
        let Some(date) = today.checked_add_days(Days::new(ahead + 7 * week)) else {
            break;
        };
        let candidate = resolve_local(&now.timezone(), date.and_time(time));
        if candidate > *now {
            return candidate;
        }
    }
    now.clone() + Duration::weeks(1)
}

/// Latest instant at or before `now` at which `edge` of `day_time` fired.
pub fn last_fire_time<Tz: TimeZone>(day_time: &DayTime, edge: Edge, now: &DateTime<Tz>) -> DateTime<Tz> {
    let (weekday, time) = edge_slot(day_time, edge);
    let today = now.date_naive();
    let back = days_between(weekday.to_chrono(), today.weekday());

    for week in 0..3u64 {
        let Some(date) = today.checked_sub_days(Days::new(back + 7 * week)) else {
            break;
        };
        let candidate = resolve_local(&now.timezone(), date.and_time(time));
        if candidate <= *now {
            return candidate;
        }
    }
    now.clone() - Duration::weeks(1)
}

/// Whether `at` is an occurrence of `edge` of `day_time`.
pub fn is_fire_time<Tz: TimeZone>(day_time: &DayTime, edge: Edge, at: &DateTime<Tz>) -> bool {
    last_fire_time(day_time, edge, at) == *at
}

/// Today's start instant for `schedule`, if it has a slot on today's weekday.
pub fn start_edge_today<Tz: TimeZone>(schedule: &Schedule, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
    let weekday = Weekday::from_chrono(now.weekday());
    let day_time = schedule.time_slot.get(weekday)?;
    Some(resolve_local(
        &now.timezone(),
        now.date_naive().and_time(day_time.start_time()),
    ))
}

/// Whether `now` falls inside the most recent occurrence of `day_time`.
pub fn window_open<Tz: TimeZone>(day_time: &DayTime, now: &DateTime<Tz>) -> bool {
    let tz = now.timezone();
    let today = now.date_naive();
    let back = days_between(day_time.weekday.to_chrono(), today.weekday());

    let Some(mut date) = today.checked_sub_days(Days::new(back)) else {
        return false;
    };
    let mut start = resolve_local(&tz, date.and_time(day_time.start_time()));
    if start > *now {
        match date.checked_sub_days(Days::new(7)) {
            Some(prev) => date = prev,
            None => return false,
        }
        start = resolve_local(&tz, date.and_time(day_time.start_time()));
    }

    let end_date = if day_time.crosses_midnight() {
        date.succ_opt().unwrap_or(NaiveDate::MAX)
    } else {
        date
    };
    let end = resolve_local(&tz, end_date.and_time(day_time.end_time()));
    start <= *now && *now < end
}

/// Whether any window of a schedule with an end time is open at `now`.
pub fn schedule_window_open<Tz: TimeZone>(schedule: &Schedule, now: &DateTime<Tz>) -> bool {
    schedule.has_end_time && schedule.time_slot.iter().any(|dt| window_open(dt, now))
}

fn days_between(from: chrono::Weekday, to: chrono::Weekday) -> u64 {
    u64::from((to.num_days_from_monday() + 7 - from.num_days_from_monday()) % 7)
}

/// Map a local wall-clock time onto the zone, skipping forward over a DST gap.
fn resolve_local<Tz: TimeZone>(tz: &Tz, local: NaiveDateTime) -> DateTime<Tz> {
    tz.from_local_datetime(&local)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(local + Duration::hours(1))).earliest())
        .unwrap_or_else(|| tz.from_utc_datetime(&local))
}
