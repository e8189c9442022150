pub mod config;
pub mod daemon;
pub mod foreground;
pub mod mode;
pub mod schedule;
pub mod state;
pub mod token;

use chrono::Utc;
use focusgate_core::storage::Commit;
use focusgate_core::{Event, Outcome, StateStore};
use serde::Serialize;
use std::fmt;

pub type CliResult = Result<(), Box<dyn std::error::Error>>;

/// A non-success engine outcome, surfaced as a failing exit code.
#[derive(Debug)]
pub struct Rejected(pub Outcome);

impl fmt::Display for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Outcome::Success => f.write_str("ok"),
            Outcome::ModeNotFound => f.write_str("mode not found"),
            Outcome::ScheduleNotFound => f.write_str("schedule not found"),
            Outcome::PolicyConflict { requested, active } => {
                write!(f, "policy conflict: requested {requested} while {active} is active")
            }
        }
    }
}

impl std::error::Error for Rejected {}

#[derive(Serialize)]
struct Report<'a, T: Serialize> {
    #[serde(flatten)]
    result: &'a T,
    events: Vec<Event>,
}

pub fn open_store() -> Result<StateStore, Box<dyn std::error::Error>> {
    Ok(StateStore::open()?)
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a committed transition with the events it produced.
pub fn print_commit<T: Serialize>(commit: &Commit<T>) -> CliResult {
    print_json(&Report {
        result: &commit.value,
        events: commit.events(Utc::now()),
    })
}

/// Print an engine outcome and fail unless it succeeded.
pub fn finish(commit: Commit<Outcome>) -> CliResult {
    print_commit(&commit)?;
    if commit.value.is_success() {
        Ok(())
    } else {
        Err(Box::new(Rejected(commit.value)))
    }
}
