use chrono::{DateTime, Duration, TimeZone, Utc};
use clap::Subcommand;
use focusgate_core::{AppId, Mode, ModeId, Policy, TokenId};
use serde::Serialize;

use super::{finish, open_store, print_json, CliResult};

#[derive(Subcommand)]
pub enum ModeAction {
    /// List modes with their activation status
    List,
    /// Create a mode
    Add {
        /// Display name
        name: String,
        /// "block" (listed apps denied) or "allow" (only listed apps allowed)
        #[arg(long, default_value = "block")]
        policy: Policy,
        /// App id; repeat for several
        #[arg(long = "app")]
        apps: Vec<String>,
        /// Token id required to end this mode early
        #[arg(long)]
        token: Option<String>,
        /// Explicit id (defaults to a random one)
        #[arg(long)]
        id: Option<String>,
    },
    /// Change an existing mode
    Edit {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        policy: Option<Policy>,
        /// Replace the app list; repeat for several
        #[arg(long = "app")]
        apps: Option<Vec<String>>,
        #[arg(long, conflicts_with = "no_token")]
        token: Option<String>,
        /// Remove the token requirement
        #[arg(long)]
        no_token: bool,
    },
    /// Delete a mode
    Delete { id: String },
    /// Activate a mode by hand
    Activate {
        id: String,
        /// Deactivate automatically after this many minutes
        #[arg(long = "for")]
        minutes: Option<u32>,
    },
    /// Deactivate a mode by hand
    Deactivate { id: String },
}

#[derive(Serialize)]
struct ModeView<'a> {
    #[serde(flatten)]
    mode: &'a Mode,
    active: bool,
    manual: bool,
    timed_until: Option<DateTime<Utc>>,
}

pub fn run(action: ModeAction) -> CliResult {
    let store = open_store()?;
    match action {
        ModeAction::List => {
            let state = store.load()?.into_state();
            let views: Vec<ModeView<'_>> = state
                .modes
                .values()
                .map(|mode| ModeView {
                    mode,
                    active: state.active_modes.contains(&mode.id),
                    manual: state.manually_activated_modes.contains(&mode.id),
                    timed_until: state
                        .timed_deactivations
                        .get(&mode.id)
                        .and_then(|ms| Utc.timestamp_millis_opt(*ms).single()),
                })
                .collect();
            print_json(&views)?;
        }
        ModeAction::Add {
            name,
            policy,
            apps,
            token,
            id,
        } => {
            let mut mode = Mode::new(name, policy).with_apps(apps);
            if let Some(id) = id {
                mode = mode.with_id(id);
            }
            if let Some(token) = token {
                mode = mode.with_required_token(token);
            }
            let id = mode.id.clone();
            let commit = store.update(|state| state.upsert_mode(mode))?;
            eprintln!("Mode created: {id}");
            finish(commit)?;
        }
        ModeAction::Edit {
            id,
            name,
            policy,
            apps,
            token,
            no_token,
        } => {
            let id = ModeId::from(id);
            let commit = store.update(|state| {
                state.edit_mode(&id, |mode| {
                    if let Some(name) = name {
                        mode.name = name;
                    }
                    if let Some(policy) = policy {
                        mode.policy = policy;
                    }
                    if let Some(apps) = apps {
                        mode.blocked_apps = apps.into_iter().map(AppId::from).collect();
                    }
                    if let Some(token) = token {
                        mode.required_token_id = Some(TokenId::from(token));
                    }
                    if no_token {
                        mode.required_token_id = None;
                    }
                })
            })?;
            finish(commit)?;
        }
        ModeAction::Delete { id } => {
            finish(store.update(|state| state.delete_mode(&ModeId::from(id)))?)?;
        }
        ModeAction::Activate { id, minutes } => {
            let deadline = minutes.map(|m| (Utc::now() + Duration::minutes(i64::from(m))).timestamp_millis());
            finish(store.update(|state| state.activate_mode(&ModeId::from(id), deadline))?)?;
        }
        ModeAction::Deactivate { id } => {
            finish(store.update(|state| state.deactivate_mode(&ModeId::from(id)))?)?;
        }
    }
    Ok(())
}
