//! Vetting Factory - ballot boxes and resolved views per locale
//!
//! Ties the level table, the resolver and the storage collaborators into one
//! in-process service. Each locale gets a `BallotBox` (the vote ledger) and
//! reads go through a `ResolvedView` that memoizes one resolution per path.

pub mod ballot;
pub mod config;
pub mod view;

use dashmap::DashMap;
use fvr_core::{FieldPath, LocaleId, INHERITANCE_MARKER};
use fvr_resolver::VoteResolver;
use fvr_storage::{BaselineSource, StorageError, UserDirectory, VoteStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

pub use ballot::BallotBox;
pub use config::{FactoryConfig, Phase};
pub use view::{ResolvedField, ResolvedView};

/// Why a vote was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    LocaleReadOnly,
    LocaleAliased,
    DefaultContent,
    CrossLocalePath,
    UserLocked,
    NoVotingRights,
    LocaleNotPermitted,
    PhaseClosed,
    VoteCountNotAllowed,
    ValueTooLong,
}

/// A policy rejection: the rule that fired plus a readable explanation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRejection {
    pub reason: RejectionReason,
    pub message: String,
}

impl VoteRejection {
    pub fn new(reason: RejectionReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for VoteRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.reason, self.message)
    }
}

/// Vetting errors
#[derive(thiserror::Error, Debug)]
pub enum VoteError {
    #[error("Invalid path for {locale}: {path}")]
    InvalidPath { locale: LocaleId, path: FieldPath },

    #[error("Vote not accepted: {0}")]
    NotAccepted(VoteRejection),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl VoteError {
    pub fn rejection_reason(&self) -> Option<RejectionReason> {
        match self {
            VoteError::NotAccepted(rejection) => Some(rejection.reason),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, VoteError>;

/// Statistics about factory operations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactoryStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub resolutions: u64,
    pub votes_accepted: u64,
    pub votes_rejected: u64,
    pub locales_loaded: u64,
}

/// Collaborators and settings shared by every ballot box
pub(crate) struct Context {
    pub(crate) config: FactoryConfig,
    pub(crate) resolver: VoteResolver,
    pub(crate) users: Arc<dyn UserDirectory>,
    pub(crate) baseline: Arc<dyn BaselineSource>,
    pub(crate) store: Arc<dyn VoteStore>,
    stats: DashMap<String, u64>,
}

impl Context {
    pub(crate) fn increment_stat(&self, key: &str) {
        self.stats
            .entry(key.to_string())
            .and_modify(|v| *v += 1)
            .or_insert(1);
    }

    fn get_stat(&self, key: &str) -> u64 {
        self.stats.get(key).map(|v| *v).unwrap_or(0)
    }

    /// First concrete baseline value up the parent chain
    pub(crate) fn inherited_baseline(&self, locale: &LocaleId, path: &FieldPath) -> Option<String> {
        let mut current = self.baseline.parent_locale(locale);
        for _ in 0..self.config.max_inheritance_depth {
            let parent = current?;
            if let Some(entry) = self.baseline.baseline(&parent, path) {
                if entry.value != INHERITANCE_MARKER {
                    return Some(entry.value);
                }
            }
            current = self.baseline.parent_locale(&parent);
        }
        None
    }
}

/// Produces and caches one ballot box and resolved view per locale
#[derive(Clone)]
pub struct VettingFactory {
    inner: Arc<FactoryInner>,
}

pub(crate) struct FactoryInner {
    pub(crate) ctx: Arc<Context>,
    boxes: DashMap<LocaleId, Arc<BallotBox>>,
}

impl FactoryInner {
    pub(crate) fn ballot_box(&self, locale: &LocaleId) -> Result<Arc<BallotBox>> {
        if let Some(existing) = self.boxes.get(locale) {
            return Ok(existing.clone());
        }
        let entry = self
            .boxes
            .entry(locale.clone())
            .or_try_insert_with(|| {
                let ballot_box = BallotBox::load(locale.clone(), self.ctx.clone())?;
                self.ctx.increment_stat("locales_loaded");
                Ok::<_, VoteError>(Arc::new(ballot_box))
            })?;
        Ok(entry.value().clone())
    }
}

impl VettingFactory {
    /// Create a factory over the given collaborators
    pub fn new(
        config: FactoryConfig,
        users: Arc<dyn UserDirectory>,
        baseline: Arc<dyn BaselineSource>,
        store: Arc<dyn VoteStore>,
    ) -> Result<Self> {
        config.validate()?;
        let resolver = VoteResolver::new(config.resolver.clone());

        info!(
            phase = ?config.phase,
            read_only_locales = config.read_only_locales.len(),
            "Created vetting factory"
        );

        Ok(Self {
            inner: Arc::new(FactoryInner {
                ctx: Arc::new(Context {
                    config,
                    resolver,
                    users,
                    baseline,
                    store,
                    stats: DashMap::new(),
                }),
                boxes: DashMap::new(),
            }),
        })
    }

    pub fn config(&self) -> &FactoryConfig {
        &self.inner.ctx.config
    }

    /// Ballot box for a locale, loading its votes on first use.
    ///
    /// Read-only locales get a box too; every vote on it is rejected.
    pub fn ballot_box(&self, locale: &LocaleId) -> Result<Arc<BallotBox>> {
        self.inner.ballot_box(locale)
    }

    pub fn resolved_view(&self, locale: &LocaleId) -> Result<ResolvedView> {
        let ballot_box = self.inner.ballot_box(locale)?;
        Ok(ResolvedView::new(self.inner.clone(), ballot_box))
    }

    /// Resolve a single field
    pub fn resolve(&self, locale: &LocaleId, path: &FieldPath) -> Result<ResolvedField> {
        Ok(self.resolved_view(locale)?.field(path))
    }

    /// Reload every ballot box from the vote store and load all stored locales.
    ///
    /// This is the restart procedure: the result is the same as building a
    /// fresh factory over the same collaborators. Boxes are reloaded in
    /// place, so views and boxes handed out earlier stay the live ledger.
    /// Returns the number of stored locales.
    pub fn rebuild(&self) -> Result<usize> {
        let loaded: Vec<Arc<BallotBox>> = self.inner.boxes.iter().map(|e| e.value().clone()).collect();
        for ballot_box in &loaded {
            ballot_box.reload()?;
        }
        let locales = self.inner.ctx.store.locales()?;
        for locale in &locales {
            self.inner.ballot_box(locale)?;
        }
        info!(locales = locales.len(), "Rebuilt vetting factory");
        Ok(locales.len())
    }

    /// Forget cached resolutions for a locale, keeping its votes.
    ///
    /// Call after user levels or locks change in the directory.
    pub fn invalidate_locale(&self, locale: &LocaleId) {
        if let Some(ballot_box) = self.inner.boxes.get(locale) {
            ballot_box.invalidate_all();
        }
    }

    /// Locales with a loaded ballot box
    pub fn loaded_locales(&self) -> Vec<LocaleId> {
        let mut locales: Vec<LocaleId> = self.inner.boxes.iter().map(|e| e.key().clone()).collect();
        locales.sort();
        locales
    }

    pub fn stats(&self) -> FactoryStats {
        let ctx = &self.inner.ctx;
        FactoryStats {
            cache_hits: ctx.get_stat("cache_hits"),
            cache_misses: ctx.get_stat("cache_misses"),
            resolutions: ctx.get_stat("resolutions"),
            votes_accepted: ctx.get_stat("votes_accepted"),
            votes_rejected: ctx.get_stat("votes_rejected"),
            locales_loaded: ctx.get_stat("locales_loaded"),
        }
    }
}
