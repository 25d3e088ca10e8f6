//! In-memory storage implementations for testing and development

use crate::{
    latest_rows, BaselineEntry, BaselineSource, LocaleMode, Result, StorageError, UserDirectory,
    VoteRow, VoteStore,
};
use fvr_core::{FieldPath, Level, LocaleId, User, UserId};
use fvr_resolver::Status;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// In-memory user directory
#[derive(Clone, Default)]
pub struct InMemoryUserDirectory {
    users: Arc<RwLock<HashMap<UserId, User>>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a list; a later duplicate id replaces the earlier entry
    pub fn from_users(users: impl IntoIterator<Item = User>) -> Self {
        let map = users.into_iter().map(|u| (u.id, u)).collect();
        Self {
            users: Arc::new(RwLock::new(map)),
        }
    }

    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }

    pub fn users(&self) -> Vec<User> {
        let mut users: Vec<User> = self.users.read().values().cloned().collect();
        users.sort_by_key(|u| u.id);
        users
    }
}

impl UserDirectory for InMemoryUserDirectory {
    fn lookup_user(&self, id: UserId) -> Result<User> {
        self.users
            .read()
            .get(&id)
            .cloned()
            .ok_or(StorageError::UserNotFound(id))
    }

    fn create_user(&self, user: User) -> Result<()> {
        let mut users = self.users.write();
        if users.contains_key(&user.id) {
            return Err(StorageError::UserExists(user.id));
        }
        users.insert(user.id, user);
        Ok(())
    }

    fn set_level(&self, id: UserId, level: Level) -> Result<()> {
        let mut users = self.users.write();
        let user = users.get_mut(&id).ok_or(StorageError::UserNotFound(id))?;
        user.level = level;
        Ok(())
    }

    fn lock(&self, id: UserId) -> Result<()> {
        let mut users = self.users.write();
        let user = users.get_mut(&id).ok_or(StorageError::UserNotFound(id))?;
        user.locked = true;
        Ok(())
    }
}

/// Baseline data for one locale
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocaleData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<LocaleMode>,

    /// Explicit parent, overriding truncation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<LocaleId>,

    #[serde(default)]
    pub values: BTreeMap<FieldPath, BaselineEntry>,

    /// Paths that live in another locale
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub aliases: BTreeMap<FieldPath, LocaleId>,
}

/// Immutable baseline data set, built once and shared
///
/// Root is read-only unless a mode is set for it explicitly. A path is valid
/// when any locale carries a baseline for it, when it was registered with
/// `with_path`, or when the schema is open.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InMemoryBaseline {
    #[serde(default)]
    locales: BTreeMap<LocaleId, LocaleData>,

    #[serde(default)]
    extra_paths: BTreeSet<FieldPath>,

    #[serde(default)]
    open_schema: bool,
}

impl InMemoryBaseline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(
        mut self,
        locale: LocaleId,
        path: FieldPath,
        value: impl Into<String>,
        status: Status,
    ) -> Self {
        self.locales
            .entry(locale)
            .or_default()
            .values
            .insert(path, BaselineEntry::new(value, status));
        self
    }

    pub fn with_mode(mut self, locale: LocaleId, mode: LocaleMode) -> Self {
        self.locales.entry(locale).or_default().mode = Some(mode);
        self
    }

    pub fn with_parent(mut self, locale: LocaleId, parent: LocaleId) -> Self {
        self.locales.entry(locale).or_default().parent = Some(parent);
        self
    }

    pub fn with_alias(mut self, locale: LocaleId, path: FieldPath, owner: LocaleId) -> Self {
        self.locales.entry(locale).or_default().aliases.insert(path, owner);
        self
    }

    /// Register a valid path that has no baseline value anywhere
    pub fn with_path(mut self, path: FieldPath) -> Self {
        self.extra_paths.insert(path);
        self
    }

    pub fn with_open_schema(mut self, open: bool) -> Self {
        self.open_schema = open;
        self
    }

    pub fn locales(&self) -> impl Iterator<Item = &LocaleId> {
        self.locales.keys()
    }
}

impl BaselineSource for InMemoryBaseline {
    fn baseline(&self, locale: &LocaleId, path: &FieldPath) -> Option<BaselineEntry> {
        self.locales.get(locale)?.values.get(path).cloned()
    }

    fn parent_locale(&self, locale: &LocaleId) -> Option<LocaleId> {
        match self.locales.get(locale).and_then(|data| data.parent.clone()) {
            Some(parent) => Some(parent),
            None => locale.truncated_parent(),
        }
    }

    fn is_path_valid(&self, _locale: &LocaleId, path: &FieldPath) -> bool {
        self.open_schema
            || self.extra_paths.contains(path)
            || self.locales.values().any(|data| data.values.contains_key(path))
    }

    fn locale_mode(&self, locale: &LocaleId) -> LocaleMode {
        match self.locales.get(locale).and_then(|data| data.mode) {
            Some(mode) => mode,
            None if locale.is_root() => LocaleMode::ReadOnly,
            None => LocaleMode::Normal,
        }
    }

    fn owning_locale(&self, locale: &LocaleId, path: &FieldPath) -> LocaleId {
        self.locales
            .get(locale)
            .and_then(|data| data.aliases.get(path))
            .cloned()
            .unwrap_or_else(|| locale.clone())
    }

    fn paths(&self, locale: &LocaleId) -> Vec<FieldPath> {
        self.locales
            .get(locale)
            .map(|data| data.values.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// In-memory vote store
///
/// Clones share the same rows, so a clone handed to a fresh factory
/// simulates a process restart.
#[derive(Clone, Default)]
pub struct InMemoryVoteStore {
    rows: Arc<RwLock<Vec<VoteRow>>>,
}

impl InMemoryVoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows written, abstentions included
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

impl VoteStore for InMemoryVoteStore {
    fn save(&self, row: &VoteRow) -> Result<()> {
        self.rows.write().push(row.clone());
        Ok(())
    }

    fn load_locale(&self, locale: &LocaleId) -> Result<Vec<VoteRow>> {
        let rows = self.rows.read();
        Ok(latest_rows(rows.iter().filter(|r| &r.locale == locale).cloned()))
    }

    fn locales(&self) -> Result<Vec<LocaleId>> {
        let rows = self.rows.read();
        let locales: BTreeSet<LocaleId> = rows.iter().map(|r| r.locale.clone()).collect();
        Ok(locales.into_iter().collect())
    }
}
