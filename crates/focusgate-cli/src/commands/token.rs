use chrono::Local;
use clap::Subcommand;
use focusgate_core::engine::UnlockResolver;
use focusgate_core::{ModeId, Token, TokenId, UnlockFeedback};
use serde::Serialize;
use sha2::{Digest, Sha256};

use super::{finish, open_store, print_commit, print_json, CliResult};

#[derive(Subcommand)]
pub enum TokenAction {
    /// List registered tokens
    List,
    /// Register a physical token from its raw tag UID
    Register {
        /// Raw UID as read from the tag (e.g. "04:A2:19:7B")
        uid: String,
        #[arg(long)]
        name: String,
        /// Mode this token is meant for; repeat for several
        #[arg(long = "mode")]
        modes: Vec<String>,
        /// Also make the linked modes require this token
        #[arg(long)]
        require: bool,
    },
    /// Delete a token by id
    Delete { id: String },
    /// Simulate a tap of the tag with this raw UID
    Tap { uid: String },
}

/// Map a raw tag UID to a stable token id.
///
/// Separators and case are ignored so different readers agree on the id.
pub fn token_id_from_uid(uid: &str) -> TokenId {
    let normalized: String = uid
        .chars()
        .filter(char::is_ascii_hexdigit)
        .map(|c| c.to_ascii_lowercase())
        .collect();
    let digest = Sha256::digest(normalized.as_bytes());
    TokenId::new(hex::encode(&digest[..8]))
}

#[derive(Serialize)]
struct Deleted {
    token_id: TokenId,
    deleted: bool,
}

pub fn run(action: TokenAction) -> CliResult {
    let store = open_store()?;
    match action {
        TokenAction::List => {
            let state = store.load()?.into_state();
            let tokens: Vec<&Token> = state.tokens.values().collect();
            print_json(&tokens)?;
        }
        TokenAction::Register {
            uid,
            name,
            modes,
            require,
        } => {
            let id = token_id_from_uid(&uid);
            let mut token = Token::new(id.clone(), name);
            token.linked_mode_ids = modes.into_iter().map(ModeId::from).collect();
            let commit = store.update(|state| {
                let linked = token.linked_mode_ids.clone();
                let outcome = state.register_token(token);
                if outcome.is_success() && require {
                    for mode_id in &linked {
                        if let Some(mode) = state.modes.get_mut(mode_id) {
                            mode.required_token_id = Some(id.clone());
                        }
                    }
                }
                outcome
            })?;
            eprintln!("Token registered: {id}");
            finish(commit)?;
        }
        TokenAction::Delete { id } => {
            let token_id = TokenId::from(id);
            let commit = store.update(|state| Deleted {
                deleted: state.delete_token(&token_id),
                token_id: token_id.clone(),
            })?;
            print_commit(&commit)?;
            if !commit.value.deleted {
                return Err(format!("token not found: {token_id}").into());
            }
        }
        TokenAction::Tap { uid } => {
            let id = token_id_from_uid(&uid);
            let report = UnlockResolver::new(&store).resolve(&id, &Local::now())?;
            print_json(&report)?;
            if report.result.is_empty() {
                eprintln!("{}", tap_message(report.feedback));
            }
        }
    }
    Ok(())
}

fn tap_message(feedback: UnlockFeedback) -> &'static str {
    match feedback {
        UnlockFeedback::Unlocked => "unlocked",
        UnlockFeedback::WrongToken => "wrong tag: no active mode accepts this token",
        UnlockFeedback::UnknownToken => "unknown tag: register it first",
        UnlockFeedback::NothingActive => "nothing to unlock",
    }
}
