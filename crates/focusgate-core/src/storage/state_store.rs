//! The persisted `AppState` slot.
//!
//! Every mutation is a read-modify-write of the whole record inside one
//! IMMEDIATE transaction. Writers in other processes block on the SQLite
//! lock, so the loser of a race re-reads the winner's state before applying
//! its own transition.

use chrono::{DateTime, Utc};
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

use super::database::{kv_get, kv_set, Database};
use crate::error::{CoreError, Result};
use crate::events::{self, Event};
use crate::model::{AppState, STATE_VERSION};

/// Key of the single slot holding the serialized `AppState`.
pub const STATE_KEY: &str = "app_state";

/// Result of reading the slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Loaded {
    /// Nothing stored yet.
    Empty(AppState),
    Restored(AppState),
    /// The stored blob was unreadable; `state` is the empty fallback.
    /// Everything previously stored is lost.
    Recovered { state: AppState, error: String },
}

impl Loaded {
    pub fn state(&self) -> &AppState {
        match self {
            Loaded::Empty(state) | Loaded::Restored(state) | Loaded::Recovered { state, .. } => state,
        }
    }

    pub fn into_state(self) -> AppState {
        match self {
            Loaded::Empty(state) | Loaded::Restored(state) | Loaded::Recovered { state, .. } => state,
        }
    }

    pub fn recovery_error(&self) -> Option<&str> {
        match self {
            Loaded::Recovered { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// A committed transition: what the closure returned plus both states.
#[derive(Debug, Clone)]
pub struct Commit<R> {
    pub value: R,
    pub before: AppState,
    pub after: AppState,
}

impl<R> Commit<R> {
    pub fn changed(&self) -> bool {
        self.before.revision != self.after.revision
    }

    pub fn events(&self, at: DateTime<Utc>) -> Vec<Event> {
        events::diff(&self.before, &self.after, at)
    }
}

/// Shared handle to the persisted state slot.
pub struct StateStore {
    db: Mutex<Database>,
}

impl StateStore {
    pub fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    /// Open the store in the default data directory.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened.
    pub fn open() -> Result<Self> {
        Ok(Self::new(Database::open()?))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Database>> {
        self.db
            .lock()
            .map_err(|_| CoreError::Custom("state store lock poisoned".into()))
    }

    /// Read the current state.
    ///
    /// # Errors
    /// Returns an error only if the slot cannot be queried; an unreadable
    /// blob comes back as [`Loaded::Recovered`].
    pub fn load(&self) -> Result<Loaded> {
        let db = self.lock()?;
        let raw = db.kv_get(STATE_KEY)?;
        Ok(match raw {
            None => Loaded::Empty(AppState::default()),
            Some(raw) => match decode(&raw) {
                Ok(state) => Loaded::Restored(state),
                Err(error) => Loaded::Recovered {
                    state: AppState::default(),
                    error,
                },
            },
        })
    }

    /// Current revision, used by change listeners to spot external writes.
    ///
    /// # Errors
    /// Returns an error if the slot cannot be queried.
    pub fn revision(&self) -> Result<u64> {
        Ok(self.load()?.state().revision)
    }

    /// Apply `f` to the current state and persist the result atomically.
    ///
    /// An unchanged state is not rewritten and keeps its revision. A corrupt
    /// slot is replaced, starting from an empty state.
    ///
    /// # Errors
    /// Returns an error if the transaction or serialization fails.
    pub fn update<R, F>(&self, f: F) -> Result<Commit<R>>
    where
        F: FnOnce(&mut AppState) -> R,
    {
        let mut db = self.lock()?;
        let tx = db.begin_write()?;

        let (before, corrupt) = match kv_get(&tx, STATE_KEY)? {
            None => (AppState::default(), false),
            Some(raw) => match decode(&raw) {
                Ok(state) => (state, false),
                Err(error) => {
                    warn!(%error, "persisted state unreadable, continuing from empty state");
                    (AppState::default(), true)
                }
            },
        };

        let mut after = before.clone();
        let value = f(&mut after);
        after.version = STATE_VERSION;
        after.revision = before.revision;

        if corrupt || !after.same_content(&before) {
            after.revision = before.revision + 1;
            let json = serde_json::to_string(&after)?;
            kv_set(&tx, STATE_KEY, &json)?;
        }
        tx.commit()?;

        Ok(Commit { value, before, after })
    }

    /// Replace the slot with an empty state.
    ///
    /// # Errors
    /// Returns an error if the write fails.
    pub fn reset(&self) -> Result<Commit<()>> {
        self.update(|state| {
            let revision = state.revision;
            *state = AppState {
                revision,
                ..AppState::default()
            };
        })
    }

    /// Overwrite the raw slot contents. Only meant for repair tooling and tests.
    ///
    /// # Errors
    /// Returns an error if the write fails.
    pub fn write_raw(&self, raw: &str) -> Result<()> {
        let db = self.lock()?;
        db.kv_set(STATE_KEY, raw)?;
        Ok(())
    }
}

fn decode(raw: &str) -> std::result::Result<AppState, String> {
    let state: AppState = serde_json::from_str(raw).map_err(|e| e.to_string())?;
    if state.version > STATE_VERSION {
        return Err(format!(
            "state schema version {} is newer than supported version {STATE_VERSION}",
            state.version
        ));
    }
    Ok(state)
}
