mod config;
pub mod database;
mod state_store;

pub use config::{Config, EnforcementSettings, LoggingConfig, SchedulerSettings};
pub use database::Database;
pub use state_store::{Commit, Loaded, StateStore, STATE_KEY};

use std::path::PathBuf;

use crate::error::StoreError;

/// Returns the data directory, creating it if needed.
///
/// `FOCUSGATE_HOME` overrides the location; otherwise
/// `~/.config/focusgate[-dev]/` based on `FOCUSGATE_ENV`.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, StoreError> {
    let dir = match std::env::var_os("FOCUSGATE_HOME") {
        Some(home) => PathBuf::from(home),
        None => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");
            let env = std::env::var("FOCUSGATE_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("focusgate-dev")
            } else {
                base_dir.join("focusgate")
            }
        }
    };

    std::fs::create_dir_all(&dir).map_err(|e| StoreError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
