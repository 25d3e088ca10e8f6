//! Storage layer for the Field Vetting Resolver
//!
//! Interfaces to the collaborators the vetting core consumes:
//! - User directory: reviewer identities, levels and locks
//! - Baseline source: read-only locale data, parent chain and locale modes
//! - Vote store: durable vote rows, reloaded on startup
//!
//! In-memory implementations back tests and development; `JsonlVoteStore`
//! persists votes to an append-only JSON-lines file.

pub mod jsonl;
pub mod memory;

pub use jsonl::JsonlVoteStore;
pub use memory::{InMemoryBaseline, InMemoryUserDirectory, InMemoryVoteStore, LocaleData};

use chrono::{DateTime, Utc};
use fvr_core::{CoreError, FieldPath, Level, LocaleId, User, UserId};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// Baseline value and status a locale's data already carries for a field
pub type BaselineEntry = fvr_resolver::Baseline;

/// Storage errors
#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("User not found: {0}")]
    UserNotFound(UserId),

    #[error("User already exists: {0}")]
    UserExists(UserId),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] CoreError),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// How a locale accepts votes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocaleMode {
    #[default]
    Normal,

    /// Root and algorithmically derived locales
    ReadOnly,

    /// Every path resolves into another locale
    Alias,

    /// Content comes entirely from a sublocale
    DefaultContent,
}

impl LocaleMode {
    pub fn accepts_votes(self) -> bool {
        self == LocaleMode::Normal
    }
}

/// One persisted vote; `value: None` is an abstention
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRow {
    pub user: UserId,
    pub locale: LocaleId,
    pub path: FieldPath,
    pub value: Option<String>,
    pub cast_at: DateTime<Utc>,

    /// Explicit vote count override, when one was chosen
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vote_count: Option<u32>,
}

impl VoteRow {
    fn key(&self) -> (LocaleId, FieldPath, UserId) {
        (self.locale.clone(), self.path.clone(), self.user)
    }
}

/// Registry of reviewers
pub trait UserDirectory: Send + Sync {
    fn lookup_user(&self, id: UserId) -> Result<User>;

    fn create_user(&self, user: User) -> Result<()>;

    fn set_level(&self, id: UserId, level: Level) -> Result<()>;

    /// Users are never deleted, only locked
    fn lock(&self, id: UserId) -> Result<()>;
}

/// Read-only baseline data; shared freely across threads
pub trait BaselineSource: Send + Sync {
    fn baseline(&self, locale: &LocaleId, path: &FieldPath) -> Option<BaselineEntry>;

    fn parent_locale(&self, locale: &LocaleId) -> Option<LocaleId> {
        locale.truncated_parent()
    }

    fn is_path_valid(&self, locale: &LocaleId, path: &FieldPath) -> bool;

    fn locale_mode(&self, locale: &LocaleId) -> LocaleMode;

    /// Locale the path actually lives in; differs from `locale` for aliased paths
    fn owning_locale(&self, locale: &LocaleId, _path: &FieldPath) -> LocaleId {
        locale.clone()
    }

    /// Paths with a baseline value in this locale
    fn paths(&self, locale: &LocaleId) -> Vec<FieldPath>;
}

/// Durable vote persistence
pub trait VoteStore: Send + Sync {
    fn save(&self, row: &VoteRow) -> Result<()>;

    /// Latest row per user and path of one locale, abstentions included
    fn load_locale(&self, locale: &LocaleId) -> Result<Vec<VoteRow>>;

    /// Locales with at least one stored row
    fn locales(&self) -> Result<Vec<LocaleId>>;
}

/// Reduce a vote history to the latest row per user, locale and path.
///
/// A later row with an equal timestamp replaces an earlier one. Abstentions
/// are kept: their timestamps still count when a field's last-modified time
/// is rebuilt.
pub fn latest_rows(rows: impl IntoIterator<Item = VoteRow>) -> Vec<VoteRow> {
    let mut latest: HashMap<(LocaleId, FieldPath, UserId), VoteRow> = HashMap::new();
    for row in rows {
        match latest.entry(row.key()) {
            Entry::Occupied(mut slot) => {
                if row.cast_at >= slot.get().cast_at {
                    slot.insert(row);
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(row);
            }
        }
    }

    let mut current: Vec<VoteRow> = latest.into_values().collect();
    current.sort_by(|a, b| {
        a.cast_at
            .cmp(&b.cast_at)
            .then_with(|| a.locale.cmp(&b.locale))
            .then_with(|| a.path.cmp(&b.path))
            .then_with(|| a.user.cmp(&b.user))
    });
    current
}
