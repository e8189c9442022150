use chrono::Utc;
use clap::Subcommand;
use focusgate_core::{DayTime, Schedule, ScheduleId, TimeSlot};
use serde::Serialize;

use super::{finish, open_store, print_json, CliResult};

#[derive(Subcommand)]
pub enum ScheduleAction {
    /// List schedules with their activation status
    List,
    /// Create a schedule
    Add {
        /// Display name
        name: String,
        /// Weekly window as <weekday>=HH:MM-HH:MM; repeat for several days
        #[arg(long = "day", required = true)]
        days: Vec<DayTime>,
        /// Linked mode id; repeat for several
        #[arg(long = "mode")]
        modes: Vec<String>,
        /// Only activate at the start time, never deactivate at the end
        #[arg(long)]
        no_end: bool,
        /// Explicit id (defaults to a random one)
        #[arg(long)]
        id: Option<String>,
    },
    /// Delete a schedule
    Delete { id: String },
    /// Start every linked mode now
    Start { id: String },
    /// Stop every linked mode now
    Stop { id: String },
}

#[derive(Serialize)]
struct ScheduleView<'a> {
    #[serde(flatten)]
    schedule: &'a Schedule,
    days: Vec<String>,
    active: bool,
    deactivated: bool,
}

pub fn run(action: ScheduleAction) -> CliResult {
    let store = open_store()?;
    match action {
        ScheduleAction::List => {
            let state = store.load()?.into_state();
            let views: Vec<ScheduleView<'_>> = state
                .schedules
                .values()
                .map(|schedule| ScheduleView {
                    schedule,
                    days: schedule.time_slot.iter().map(ToString::to_string).collect(),
                    active: state.active_schedules.contains(&schedule.id),
                    deactivated: state.deactivated_schedules.contains(&schedule.id),
                })
                .collect();
            print_json(&views)?;
        }
        ScheduleAction::Add {
            name,
            days,
            modes,
            no_end,
            id,
        } => {
            let mut schedule = Schedule::new(name, TimeSlot::new(days)?).with_modes(modes);
            if no_end {
                schedule = schedule.without_end_time();
            }
            if let Some(id) = id {
                schedule = schedule.with_id(id);
            }
            let id = schedule.id.clone();
            let commit = store.update(|state| state.upsert_schedule(schedule))?;
            eprintln!("Schedule created: {id}");
            finish(commit)?;
        }
        ScheduleAction::Delete { id } => {
            finish(store.update(|state| state.delete_schedule(&ScheduleId::from(id)))?)?;
        }
        ScheduleAction::Start { id } => {
            let now_ms = Utc::now().timestamp_millis();
            finish(store.update(|state| state.activate_schedule_manually(&ScheduleId::from(id), now_ms))?)?;
        }
        ScheduleAction::Stop { id } => {
            finish(store.update(|state| state.deactivate_schedule_manually(&ScheduleId::from(id)))?)?;
        }
    }
    Ok(())
}
