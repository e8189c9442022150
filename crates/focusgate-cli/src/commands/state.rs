use chrono::Utc;
use clap::Subcommand;
use focusgate_core::{AppState, Event};
use serde::Serialize;

use super::{open_store, print_json, CliResult};

#[derive(Subcommand)]
pub enum StateAction {
    /// Print the persisted activation state
    Show,
    /// Wipe every entity and activation flag
    Reset,
}

#[derive(Serialize)]
struct Snapshot<'a> {
    #[serde(flatten)]
    state: &'a AppState,
    /// Set when the stored state was unreadable and an empty one is shown.
    #[serde(skip_serializing_if = "Option::is_none")]
    recovered_from: Option<&'a str>,
}

#[derive(Serialize)]
struct Reset {
    reset: bool,
    events: Vec<Event>,
}

pub fn run(action: StateAction) -> CliResult {
    let store = open_store()?;
    match action {
        StateAction::Show => {
            let loaded = store.load()?;
            print_json(&Snapshot {
                state: loaded.state(),
                recovered_from: loaded.recovery_error(),
            })?;
        }
        StateAction::Reset => {
            let commit = store.reset()?;
            print_json(&Reset {
                reset: true,
                events: commit.events(Utc::now()),
            })?;
        }
    }
    Ok(())
}
