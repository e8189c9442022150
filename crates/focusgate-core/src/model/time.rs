//! Weekly time primitives: weekdays, day windows and time slots.
//!
//! The weekday encoding lives in exactly one table (`WEEKDAY_TABLE`). The
//! data model, the scheduler and every piece of formatting go through it, so
//! there is no second enumeration order anywhere in the crate.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// Day of the week, numbered ISO-style (Monday = 1 .. Sunday = 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

struct WeekdayInfo {
    day: Weekday,
    number: u8,
    short: &'static str,
    name: &'static str,
    chrono: chrono::Weekday,
}

static WEEKDAY_TABLE: [WeekdayInfo; 7] = [
    WeekdayInfo { day: Weekday::Monday, number: 1, short: "mon", name: "Monday", chrono: chrono::Weekday::Mon },
    WeekdayInfo { day: Weekday::Tuesday, number: 2, short: "tue", name: "Tuesday", chrono: chrono::Weekday::Tue },
    WeekdayInfo { day: Weekday::Wednesday, number: 3, short: "wed", name: "Wednesday", chrono: chrono::Weekday::Wed },
    WeekdayInfo { day: Weekday::Thursday, number: 4, short: "thu", name: "Thursday", chrono: chrono::Weekday::Thu },
    WeekdayInfo { day: Weekday::Friday, number: 5, short: "fri", name: "Friday", chrono: chrono::Weekday::Fri },
    WeekdayInfo { day: Weekday::Saturday, number: 6, short: "sat", name: "Saturday", chrono: chrono::Weekday::Sat },
    WeekdayInfo { day: Weekday::Sunday, number: 7, short: "sun", name: "Sunday", chrono: chrono::Weekday::Sun },
];

impl Weekday {
    pub const ALL: [Weekday; 7] = [
        Weekday::Monday,
        Weekday::Tuesday,
        Weekday::Wednesday,
        Weekday::Thursday,
        Weekday::Friday,
        Weekday::Saturday,
        Weekday::Sunday,
    ];

    fn info(self) -> &'static WeekdayInfo {
        // Table order matches declaration order.
        &WEEKDAY_TABLE[self as usize]
    }

    pub fn number(self) -> u8 {
        self.info().number
    }

    pub fn short_name(self) -> &'static str {
        self.info().short
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    pub fn to_chrono(self) -> chrono::Weekday {
        self.info().chrono
    }

    pub fn from_chrono(day: chrono::Weekday) -> Self {
        WEEKDAY_TABLE
            .iter()
            .find(|info| info.chrono == day)
            .map(|info| info.day)
            .unwrap_or(Weekday::Monday)
    }

    /// Parse the canonical 1..=7 number.
    pub fn from_number(number: u8) -> Result<Self, ValidationError> {
        WEEKDAY_TABLE
            .iter()
            .find(|info| info.number == number)
            .map(|info| info.day)
            .ok_or(ValidationError::InvalidWeekday(number))
    }

    /// The following day, wrapping Sunday to Monday.
    pub fn succ(self) -> Self {
        Self::ALL[(self as usize + 1) % 7]
    }
}

impl From<Weekday> for u8 {
    fn from(day: Weekday) -> Self {
        day.number()
    }
}

impl TryFrom<u8> for Weekday {
    type Error = ValidationError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Weekday::from_number(value)
    }
}

impl FromStr for Weekday {
    type Err = ValidationError;

    /// Accepts the number, the short name or the full name (any case).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        if let Ok(number) = needle.parse::<u8>() {
            return Weekday::from_number(number);
        }
        WEEKDAY_TABLE
            .iter()
            .find(|info| info.short == needle || info.name.eq_ignore_ascii_case(&needle))
            .map(|info| info.day)
            .ok_or_else(|| ValidationError::UnknownWeekday(s.to_string()))
    }
}

impl fmt::Display for Weekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One weekly occurrence: a start and an end time on a given weekday.
///
/// An end at or before the start means the window runs past midnight into
/// the following day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayTime {
    pub weekday: Weekday,
    pub start_hour: u8,
    pub start_minute: u8,
    pub end_hour: u8,
    pub end_minute: u8,
}

impl DayTime {
    pub fn new(
        weekday: Weekday,
        (start_hour, start_minute): (u8, u8),
        (end_hour, end_minute): (u8, u8),
    ) -> Result<Self, ValidationError> {
        let day_time = Self {
            weekday,
            start_hour,
            start_minute,
            end_hour,
            end_minute,
        };
        day_time.validate()?;
        Ok(day_time)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        check_clock(self.start_hour, self.start_minute)?;
        check_clock(self.end_hour, self.end_minute)
    }

    pub fn start_time(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.start_hour.into(), self.start_minute.into(), 0)
            .unwrap_or(NaiveTime::MIN)
    }

    pub fn end_time(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.end_hour.into(), self.end_minute.into(), 0)
            .unwrap_or(NaiveTime::MIN)
    }

    pub fn crosses_midnight(&self) -> bool {
        self.end_time() <= self.start_time()
    }
}

/// Parses `<weekday>=HH:MM-HH:MM`, e.g. `mon=09:00-17:30`.
impl FromStr for DayTime {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidValue {
            field: "day".into(),
            message: format!("expected '<weekday>=HH:MM-HH:MM', got '{s}'"),
        };
        let (day, window) = s.split_once('=').ok_or_else(invalid)?;
        let (start, end) = window.split_once('-').ok_or_else(invalid)?;
        let clock = |text: &str| -> Result<(u8, u8), ValidationError> {
            let (h, m) = text.trim().split_once(':').ok_or_else(invalid)?;
            Ok((h.parse().map_err(|_| invalid())?, m.parse().map_err(|_| invalid())?))
        };
        DayTime::new(day.parse()?, clock(start)?, clock(end)?)
    }
}

impl fmt::Display for DayTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}={:02}:{:02}-{:02}:{:02}",
            self.weekday.short_name(),
            self.start_hour,
            self.start_minute,
            self.end_hour,
            self.end_minute
        )
    }
}

fn check_clock(hour: u8, minute: u8) -> Result<(), ValidationError> {
    if hour > 23 || minute > 59 {
        return Err(ValidationError::InvalidTime { hour, minute });
    }
    Ok(())
}

/// Ordered set of [`DayTime`]s with at most one entry per weekday.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<DayTime>", into = "Vec<DayTime>")]
pub struct TimeSlot {
    days: Vec<DayTime>,
}

impl TimeSlot {
    pub fn new(days: Vec<DayTime>) -> Result<Self, ValidationError> {
        let mut slot = Self::default();
        for day in days {
            day.validate()?;
            if slot.get(day.weekday).is_some() {
                return Err(ValidationError::DuplicateWeekday(day.weekday.to_string()));
            }
            slot.insert(day);
        }
        Ok(slot)
    }

    /// Insert or replace the entry for `day.weekday`.
    pub fn insert(&mut self, day: DayTime) {
        match self.days.binary_search_by_key(&day.weekday, |d| d.weekday) {
            Ok(idx) => self.days[idx] = day,
            Err(idx) => self.days.insert(idx, day),
        }
    }

    pub fn remove(&mut self, weekday: Weekday) -> Option<DayTime> {
        let idx = self.days.iter().position(|d| d.weekday == weekday)?;
        Some(self.days.remove(idx))
    }

    pub fn get(&self, weekday: Weekday) -> Option<&DayTime> {
        self.days.iter().find(|d| d.weekday == weekday)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DayTime> {
        self.days.iter()
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }
}

impl TryFrom<Vec<DayTime>> for TimeSlot {
    type Error = ValidationError;

    fn try_from(days: Vec<DayTime>) -> Result<Self, Self::Error> {
        TimeSlot::new(days)
    }
}

impl From<TimeSlot> for Vec<DayTime> {
    fn from(slot: TimeSlot) -> Self {
        slot.days
    }
}
