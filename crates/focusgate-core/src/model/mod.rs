//! Entity model: modes, schedules, tokens and the single `AppState` root.
//!
//! `AppState` is the only persisted record. It holds every entity plus all
//! runtime activation flags and is always read and written as one blob.

mod time;

pub use time::{DayTime, TimeSlot, Weekday};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ValidationError;

/// Current `AppState` schema version.
pub const STATE_VERSION: u32 = 1;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Identifier of a [`Mode`].
    ModeId
);
string_id!(
    /// Identifier of a [`Schedule`].
    ScheduleId
);
string_id!(
    /// Stable, comparable identifier of a physical token.
    TokenId
);
string_id!(
    /// Application (package) identifier as reported by the host.
    AppId
);

impl ModeId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl ScheduleId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// How a mode's app list is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Policy {
    /// Listed apps are denied, everything else allowed.
    BlockSelected,
    /// Only listed apps are allowed.
    AllowSelected,
}

impl FromStr for Policy {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "block" | "block_selected" => Ok(Policy::BlockSelected),
            "allow" | "allow_selected" => Ok(Policy::AllowSelected),
            other => Err(ValidationError::InvalidValue {
                field: "policy".into(),
                message: format!("expected 'block' or 'allow', got '{other}'"),
            }),
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Policy::BlockSelected => f.write_str("BLOCK_SELECTED"),
            Policy::AllowSelected => f.write_str("ALLOW_SELECTED"),
        }
    }
}

/// A named set of apps with a block/allow policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mode {
    pub id: ModeId,
    pub name: String,
    #[serde(default)]
    pub blocked_apps: BTreeSet<AppId>,
    pub policy: Policy,
    /// `None` means any registered token unlocks this mode.
    #[serde(default)]
    pub required_token_id: Option<TokenId>,
}

impl Mode {
    pub fn new(name: impl Into<String>, policy: Policy) -> Self {
        Self {
            id: ModeId::generate(),
            name: name.into(),
            blocked_apps: BTreeSet::new(),
            policy,
            required_token_id: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<ModeId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_apps<I, A>(mut self, apps: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<AppId>,
    {
        self.blocked_apps = apps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_required_token(mut self, token: impl Into<TokenId>) -> Self {
        self.required_token_id = Some(token.into());
        self
    }

    /// Whether presenting `token` unlocks this mode.
    pub fn is_unlocked_by(&self, token: &TokenId) -> bool {
        self.required_token_id
            .as_ref()
            .map_or(true, |required| required == token)
    }
}

/// A weekly recurring window that activates a set of modes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: ScheduleId,
    pub name: String,
    #[serde(default)]
    pub time_slot: TimeSlot,
    #[serde(default)]
    pub linked_mode_ids: Vec<ModeId>,
    /// Without an end time only an unlock, a timer or the next start ends it.
    #[serde(default = "default_true")]
    pub has_end_time: bool,
}

fn default_true() -> bool {
    true
}

impl Schedule {
    pub fn new(name: impl Into<String>, time_slot: TimeSlot) -> Self {
        Self {
            id: ScheduleId::generate(),
            name: name.into(),
            time_slot,
            linked_mode_ids: Vec::new(),
            has_end_time: true,
        }
    }

    pub fn with_id(mut self, id: impl Into<ScheduleId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_modes<I, M>(mut self, modes: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: Into<ModeId>,
    {
        self.linked_mode_ids = modes.into_iter().map(Into::into).collect();
        self
    }

    pub fn without_end_time(mut self) -> Self {
        self.has_end_time = false;
        self
    }

    pub fn links(&self, mode_id: &ModeId) -> bool {
        self.linked_mode_ids.contains(mode_id)
    }
}

/// A registered physical unlock credential.
///
/// `linked_mode_ids` is informational; the binding that matters is
/// [`Mode::required_token_id`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub id: TokenId,
    pub name: String,
    #[serde(default)]
    pub linked_mode_ids: Vec<ModeId>,
}

impl Token {
    pub fn new(id: impl Into<TokenId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            linked_mode_ids: Vec::new(),
        }
    }
}

/// The single persisted root record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppState {
    /// Schema version of this blob.
    pub version: u32,
    /// Bumped on every committed change.
    pub revision: u64,
    pub modes: BTreeMap<ModeId, Mode>,
    pub schedules: BTreeMap<ScheduleId, Schedule>,
    pub tokens: BTreeMap<TokenId, Token>,
    pub active_modes: BTreeSet<ModeId>,
    pub active_schedules: BTreeSet<ScheduleId>,
    pub deactivated_schedules: BTreeSet<ScheduleId>,
    pub manually_activated_modes: BTreeSet<ModeId>,
    /// Mode id -> deadline in epoch milliseconds.
    pub timed_deactivations: BTreeMap<ModeId, i64>,
    /// Active schedule id -> epoch milliseconds at which it became active.
    pub schedule_started_at: BTreeMap<ScheduleId, i64>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            revision: 0,
            modes: BTreeMap::new(),
            schedules: BTreeMap::new(),
            tokens: BTreeMap::new(),
            active_modes: BTreeSet::new(),
            active_schedules: BTreeSet::new(),
            deactivated_schedules: BTreeSet::new(),
            manually_activated_modes: BTreeSet::new(),
            timed_deactivations: BTreeMap::new(),
            schedule_started_at: BTreeMap::new(),
        }
    }
}

impl AppState {
    pub fn mode(&self, id: &ModeId) -> Option<&Mode> {
        self.modes.get(id)
    }

    pub fn schedule(&self, id: &ScheduleId) -> Option<&Schedule> {
        self.schedules.get(id)
    }

    pub fn token(&self, id: &TokenId) -> Option<&Token> {
        self.tokens.get(id)
    }

    /// Shared policy of the active modes, or `None` when nothing is active.
    pub fn effective_policy(&self) -> Option<Policy> {
        self.active_modes
            .iter()
            .filter_map(|id| self.modes.get(id))
            .map(|mode| mode.policy)
            .next()
    }

    /// True when every active mode resolves and they all share one policy.
    pub fn policies_consistent(&self) -> bool {
        let mut policies = self
            .active_modes
            .iter()
            .filter_map(|id| self.modes.get(id))
            .map(|mode| mode.policy);
        match policies.next() {
            Some(first) => policies.all(|p| p == first),
            None => true,
        }
    }

    /// Compare entity and activation content, ignoring `revision`.
    pub fn same_content(&self, other: &AppState) -> bool {
        self.version == other.version
            && self.modes == other.modes
            && self.schedules == other.schedules
            && self.tokens == other.tokens
            && self.active_modes == other.active_modes
            && self.active_schedules == other.active_schedules
            && self.deactivated_schedules == other.deactivated_schedules
            && self.manually_activated_modes == other.manually_activated_modes
            && self.timed_deactivations == other.timed_deactivations
            && self.schedule_started_at == other.schedule_started_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_token_none_accepts_any_token() {
        let open = Mode::new("open", Policy::BlockSelected);
        assert!(open.is_unlocked_by(&TokenId::from("anything")));

        let locked = Mode::new("locked", Policy::BlockSelected).with_required_token("tag-a");
        assert!(locked.is_unlocked_by(&TokenId::from("tag-a")));
        assert!(!locked.is_unlocked_by(&TokenId::from("tag-b")));
    }

    #[test]
    fn policy_serializes_screaming_snake() {
        let json = serde_json::to_string(&Policy::AllowSelected).unwrap();
        assert_eq!(json, "\"ALLOW_SELECTED\"");
        assert_eq!("block".parse::<Policy>().unwrap(), Policy::BlockSelected);
        assert!("maybe".parse::<Policy>().is_err());
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let state: AppState = serde_json::from_str("{}").unwrap();
        assert_eq!(state.version, STATE_VERSION);
        assert!(state.modes.is_empty());
    }

    #[test]
    fn app_state_round_trip_is_lossless() {
        let mut state = AppState::default();
        let mode = Mode::new("Work", Policy::BlockSelected)
            .with_id("m1")
            .with_apps(["com.social", "com.video"])
            .with_required_token("tag");
        let slot = TimeSlot::new(vec![DayTime::new(Weekday::Tuesday, (9, 0), (17, 30)).unwrap()])
            .unwrap();
        let schedule = Schedule::new("Office", slot)
            .with_id("s1")
            .with_modes(["m1"])
            .without_end_time();
        let mut token = Token::new("tag", "Keyring");
        token.linked_mode_ids.push(mode.id.clone());
        state.modes.insert(mode.id.clone(), mode);
        state.schedules.insert(schedule.id.clone(), schedule);
        state.tokens.insert(token.id.clone(), token);
        state.active_modes.insert("m1".into());
        state.manually_activated_modes.insert("m1".into());
        state.timed_deactivations.insert("m1".into(), 1_700_000_000_000);
        state.active_schedules.insert("s1".into());
        state.schedule_started_at.insert("s1".into(), 1_699_990_000_000);
        state.revision = 42;

        let json = serde_json::to_string(&state).unwrap();
        let parsed: AppState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, state);
    }

    #[test]
    fn effective_policy_follows_active_modes() {
        let mut state = AppState::default();
        assert_eq!(state.effective_policy(), None);
        let mode = Mode::new("Study", Policy::AllowSelected).with_id("m");
        state.modes.insert(mode.id.clone(), mode);
        state.active_modes.insert("m".into());
        assert_eq!(state.effective_policy(), Some(Policy::AllowSelected));
        assert!(state.policies_consistent());
    }
}
