//! Ballot box: the vote ledger of one locale
//!
//! Each voted path has its own slot behind a short-lived mutex. A vote
//! validates first, then persists and mutates the slot inside the lock and
//! drops the slot's cached resolution. Resolution itself runs outside the
//! lock and is only cached if no vote landed meanwhile. Paths nobody voted
//! on get no slot; their baseline-only resolutions live in a bounded cache.

use crate::{Context, RejectionReason, Result, VoteError, VoteRejection};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use fvr_core::{Capability, FieldPath, LocaleId, User, UserId};
use fvr_resolver::{Ballot, Resolution};
use fvr_storage::{LocaleMode, VoteRow};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Optimistic resolution attempts before resolving under the slot lock
const OPTIMISTIC_ATTEMPTS: usize = 3;

/// Baseline-only resolutions kept before that cache is emptied
const MAX_UNVOTED_CACHE: usize = 65_536;

#[derive(Debug, Clone, PartialEq, Eq)]
struct VoteRecord {
    value: String,
    cast_at: DateTime<Utc>,
    vote_count: Option<u32>,
}

#[derive(Default)]
struct PathSlot {
    votes: HashMap<UserId, VoteRecord>,

    /// Bumped by every mutation; guards cache writes
    generation: u64,
    cached: Option<Arc<Resolution>>,

    /// Winner at the last committed resolution, `None` while the slot had no votes
    last_winner: Option<String>,
    last_modified: Option<DateTime<Utc>>,

    /// Time of the latest mutation not yet seen by a resolution
    pending_change: Option<DateTime<Utc>>,
}

impl PathSlot {
    fn mutated(&mut self, at: DateTime<Utc>) {
        self.generation += 1;
        self.cached = None;
        self.pending_change = Some(at);
    }

    /// Take over freshly loaded state; the bumped generation voids in-flight resolutions
    fn replace(&mut self, fresh: PathSlot) {
        let generation = self.generation + 1;
        *self = PathSlot { generation, ..fresh };
    }

    fn commit(&mut self, resolution: Arc<Resolution>) -> Resolved {
        if self.votes.is_empty() {
            self.last_modified = None;
            self.last_winner = None;
        } else {
            let winner = resolution.winning_value().map(str::to_string);
            if winner != self.last_winner {
                if let Some(at) = self.pending_change {
                    self.last_modified = Some(at);
                }
                self.last_winner = winner;
            }
        }
        self.pending_change = None;
        self.cached = Some(resolution.clone());

        Resolved {
            resolution,
            last_modified: self.last_modified,
        }
    }
}

/// A resolution and the last-modified time read together under one lock
#[derive(Debug, Clone)]
pub(crate) struct Resolved {
    pub(crate) resolution: Arc<Resolution>,
    pub(crate) last_modified: Option<DateTime<Utc>>,
}

/// The authoritative vote ledger for one locale
pub struct BallotBox {
    locale: LocaleId,
    mode: LocaleMode,
    ctx: Arc<Context>,
    slots: DashMap<FieldPath, Arc<Mutex<PathSlot>>>,
    unvoted: DashMap<FieldPath, Arc<Resolution>>,

    /// Shared by writers, exclusive while the ledger is reloaded
    gate: RwLock<()>,

    /// Last timestamp handed out; keeps vote times strictly increasing
    clock: Mutex<DateTime<Utc>>,
}

impl BallotBox {
    /// Load the current votes of a locale from the vote store
    pub(crate) fn load(locale: LocaleId, ctx: Arc<Context>) -> Result<Self> {
        let mode = ctx.baseline.locale_mode(&locale);
        let rows = ctx.store.load_locale(&locale)?;
        let (seeded, latest) = seed_slots(&rows);
        let slots: DashMap<FieldPath, Arc<Mutex<PathSlot>>> = seeded
            .into_iter()
            .map(|(path, slot)| (path, Arc::new(Mutex::new(slot))))
            .collect();

        info!(
            locale = %locale,
            mode = ?mode,
            rows = rows.len(),
            paths = slots.len(),
            "Loaded ballot box"
        );

        Ok(Self {
            locale,
            mode,
            ctx,
            slots,
            unvoted: DashMap::new(),
            gate: RwLock::new(()),
            clock: Mutex::new(latest),
        })
    }

    /// Replace the ledger with the vote store's current contents.
    ///
    /// Votes are held off until the reload finishes. Handles to this box
    /// given out earlier keep working against the reloaded ledger.
    pub(crate) fn reload(&self) -> Result<()> {
        let _exclusive = self.gate.write();
        let rows = self.ctx.store.load_locale(&self.locale)?;
        let (mut seeded, latest) = seed_slots(&rows);

        for entry in self.slots.iter() {
            let fresh = seeded.remove(entry.key()).unwrap_or_default();
            entry.value().lock().replace(fresh);
        }
        for (path, fresh) in seeded {
            let slot = Arc::clone(self.slots.entry(path).or_default().value());
            slot.lock().replace(fresh);
        }
        self.unvoted.clear();

        let mut clock = self.clock.lock();
        *clock = (*clock).max(latest);

        info!(locale = %self.locale, rows = rows.len(), "Reloaded ballot box");
        Ok(())
    }

    pub fn locale(&self) -> &LocaleId {
        &self.locale
    }

    pub fn mode(&self) -> LocaleMode {
        self.mode
    }

    /// Cast, change or (with `None`) withdraw a vote
    pub fn vote_for_value(&self, user: UserId, path: &FieldPath, value: Option<&str>) -> Result<()> {
        self.cast(user, path, value, None)
    }

    /// Vote with an explicit count instead of the level's weight
    pub fn vote_with_count(&self, user: UserId, path: &FieldPath, value: &str, count: u32) -> Result<()> {
        self.cast(user, path, Some(value), Some(count))
    }

    pub fn unvote(&self, user: UserId, path: &FieldPath) -> Result<()> {
        self.cast(user, path, None, None)
    }

    /// Re-cast the user's current vote, refreshing its timestamp
    pub fn revote(&self, user: UserId, path: &FieldPath) -> Result<()> {
        self.check_locale(path)?;
        let account = self.ctx.users.lookup_user(user)?;
        self.check_user(&account, false)?;

        let _shared = self.gate.read();
        let slot = match self.existing_slot(path) {
            Some(slot) => slot,
            None => return Ok(()),
        };
        let mut slot = slot.lock();
        let record = match slot.votes.get(&user) {
            Some(record) => record.clone(),
            None => return Ok(()),
        };
        let at = self.next_timestamp();
        self.persist(user, path, Some(&record.value), record.vote_count, at)?;

        slot.votes.insert(user, VoteRecord { cast_at: at, ..record });
        slot.mutated(at);
        self.ctx.increment_stat("votes_accepted");
        debug!(locale = %self.locale, path = %path, user = %user, "Refreshed vote");
        Ok(())
    }

    pub fn user_did_vote(&self, user: UserId, path: &FieldPath) -> bool {
        self.read_slot(path, |slot| slot.votes.contains_key(&user))
            .unwrap_or(false)
    }

    pub fn vote_value(&self, user: UserId, path: &FieldPath) -> Option<String> {
        self.read_slot(path, |slot| slot.votes.get(&user).map(|r| r.value.clone()))
            .flatten()
    }

    /// Distinct submitted values, unweighted
    pub fn values(&self, path: &FieldPath) -> BTreeSet<String> {
        self.read_slot(path, |slot| slot.votes.values().map(|r| r.value.clone()).collect())
            .unwrap_or_default()
    }

    /// Users currently voting for `value`
    pub fn votes_for_value(&self, path: &FieldPath, value: &str) -> Vec<UserId> {
        let mut users = self
            .read_slot(path, |slot| {
                slot.votes
                    .iter()
                    .filter(|(_, r)| r.value == value)
                    .map(|(user, _)| *user)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        users.sort();
        users
    }

    /// Paths with at least one current vote
    pub fn voted_paths(&self) -> Vec<FieldPath> {
        let mut paths: Vec<FieldPath> = self
            .slots
            .iter()
            .filter(|entry| !entry.value().lock().votes.is_empty())
            .map(|entry| entry.key().clone())
            .collect();
        paths.sort();
        paths
    }

    /// Resolution of a path, computed on demand and memoized
    pub fn resolution(&self, path: &FieldPath) -> Arc<Resolution> {
        self.resolved(path).resolution
    }

    pub fn last_modified(&self, path: &FieldPath) -> Option<DateTime<Utc>> {
        self.resolved(path).last_modified
    }

    /// Drop every cached resolution, keeping the votes
    pub fn invalidate_all(&self) {
        for entry in self.slots.iter() {
            let mut slot = entry.value().lock();
            slot.generation += 1;
            slot.cached = None;
        }
        self.unvoted.clear();
        debug!(locale = %self.locale, "Invalidated cached resolutions");
    }

    pub(crate) fn resolved(&self, path: &FieldPath) -> Resolved {
        let slot = match self.existing_slot(path) {
            Some(slot) => slot,
            None => return self.resolved_unvoted(path),
        };

        for _ in 0..OPTIMISTIC_ATTEMPTS {
            let (generation, votes) = {
                let guard = slot.lock();
                if let Some(cached) = &guard.cached {
                    self.ctx.increment_stat("cache_hits");
                    return Resolved {
                        resolution: cached.clone(),
                        last_modified: guard.last_modified,
                    };
                }
                (guard.generation, guard.votes.clone())
            };

            self.ctx.increment_stat("cache_misses");
            let resolution = Arc::new(self.compute(path, &votes));

            let mut guard = slot.lock();
            if guard.generation == generation {
                return match &guard.cached {
                    Some(cached) => Resolved {
                        resolution: cached.clone(),
                        last_modified: guard.last_modified,
                    },
                    None => guard.commit(resolution),
                };
            }
        }

        // Writers kept winning the race; resolve while holding the lock.
        let mut guard = slot.lock();
        if let Some(cached) = &guard.cached {
            return Resolved {
                resolution: cached.clone(),
                last_modified: guard.last_modified,
            };
        }
        let votes = guard.votes.clone();
        let resolution = Arc::new(self.compute(path, &votes));
        guard.commit(resolution)
    }

    fn resolved_unvoted(&self, path: &FieldPath) -> Resolved {
        if let Some(cached) = self.unvoted.get(path) {
            self.ctx.increment_stat("cache_hits");
            return Resolved {
                resolution: Arc::clone(cached.value()),
                last_modified: None,
            };
        }

        self.ctx.increment_stat("cache_misses");
        let resolution = Arc::new(self.compute(path, &HashMap::new()));
        if self.ctx.baseline.is_path_valid(&self.locale, path) {
            if self.unvoted.len() >= MAX_UNVOTED_CACHE {
                self.unvoted.clear();
            }
            self.unvoted.insert(path.clone(), resolution.clone());
        }
        Resolved {
            resolution,
            last_modified: None,
        }
    }

    fn cast(&self, user: UserId, path: &FieldPath, value: Option<&str>, count: Option<u32>) -> Result<()> {
        match self.try_cast(user, path, value, count) {
            Err(VoteError::NotAccepted(rejection)) => {
                self.ctx.increment_stat("votes_rejected");
                warn!(
                    locale = %self.locale,
                    path = %path,
                    user = %user,
                    reason = ?rejection.reason,
                    "Vote rejected"
                );
                Err(VoteError::NotAccepted(rejection))
            }
            other => other,
        }
    }

    fn try_cast(&self, user: UserId, path: &FieldPath, value: Option<&str>, count: Option<u32>) -> Result<()> {
        self.check_locale(path)?;
        let account = self.ctx.users.lookup_user(user)?;

        if let Some(value) = value {
            let length = value.chars().count();
            if length > self.ctx.config.max_value_length {
                return Err(reject(
                    RejectionReason::ValueTooLong,
                    format!(
                        "value has {} characters, the limit is {}",
                        length, self.ctx.config.max_value_length
                    ),
                ));
            }
        }
        if let Some(count) = count {
            let levels = &self.ctx.config.levels;
            if !levels.can_vote_with_count(account.level, &account.organization, count) {
                return Err(reject(
                    RejectionReason::VoteCountNotAllowed,
                    format!("level {} may not vote with count {}", account.level, count),
                ));
            }
        }

        let _shared = self.gate.read();
        let slot = match self.existing_slot(path) {
            Some(slot) => slot,
            None if value.is_none() => {
                // Nothing to withdraw.
                self.check_user(&account, false)?;
                return Ok(());
            }
            None => self.slot(path),
        };
        let mut slot = slot.lock();
        let previous = slot.votes.get(&user).cloned();

        // Withdrawing an existing vote only needs the checks that vote already passed.
        let withdrawing_own = value.is_none() && previous.is_some();
        self.check_user(&account, withdrawing_own)?;

        match (value, &previous) {
            (None, None) => return Ok(()),
            (Some(value), Some(prev)) if prev.value == value && prev.vote_count == count => return Ok(()),
            _ => {}
        }

        let at = self.next_timestamp();
        self.persist(user, path, value, count, at)?;

        match value {
            Some(value) => {
                slot.votes.insert(
                    user,
                    VoteRecord {
                        value: value.to_string(),
                        cast_at: at,
                        vote_count: count,
                    },
                );
            }
            None => {
                slot.votes.remove(&user);
            }
        }
        slot.mutated(at);
        drop(slot);

        self.ctx.increment_stat("votes_accepted");
        debug!(
            locale = %self.locale,
            path = %path,
            user = %user,
            value = ?value,
            "Vote accepted"
        );
        Ok(())
    }

    /// Locale and path admissibility, independent of the voter
    fn check_locale(&self, path: &FieldPath) -> Result<()> {
        let config = &self.ctx.config;
        if config.read_only_locales.contains(&self.locale) {
            return Err(reject(
                RejectionReason::LocaleReadOnly,
                format!("{} is configured read-only", self.locale),
            ));
        }
        match self.mode {
            LocaleMode::Normal => {}
            LocaleMode::ReadOnly => {
                return Err(reject(
                    RejectionReason::LocaleReadOnly,
                    format!("{} is read-only", self.locale),
                ))
            }
            LocaleMode::Alias => {
                return Err(reject(
                    RejectionReason::LocaleAliased,
                    format!("{} is an alias of another locale", self.locale),
                ))
            }
            LocaleMode::DefaultContent => {
                return Err(reject(
                    RejectionReason::DefaultContent,
                    format!("{} is default content; vote in its sublocale", self.locale),
                ))
            }
        }
        if !config.phase.accepts_votes() {
            return Err(reject(
                RejectionReason::PhaseClosed,
                format!("voting is not open in phase {:?}", config.phase),
            ));
        }

        if !self.ctx.baseline.is_path_valid(&self.locale, path) {
            return Err(VoteError::InvalidPath {
                locale: self.locale.clone(),
                path: path.clone(),
            });
        }
        let owner = self.ctx.baseline.owning_locale(&self.locale, path);
        if owner != self.locale {
            return Err(reject(
                RejectionReason::CrossLocalePath,
                format!("{} lives in {}; vote there", path, owner),
            ));
        }
        Ok(())
    }

    fn check_user(&self, user: &User, withdrawing_own: bool) -> Result<()> {
        if user.is_locked() {
            return Err(reject(RejectionReason::UserLocked, format!("{} is locked", user)));
        }
        if withdrawing_own {
            return Ok(());
        }

        let levels = &self.ctx.config.levels;
        if !levels.can_perform(user.level, Capability::SubmitVotes) {
            return Err(reject(
                RejectionReason::NoVotingRights,
                format!("level {} cannot vote", user.level),
            ));
        }
        if !levels.can_perform(user.level, Capability::VoteAnyLocale) && !user.locales.permits(&self.locale) {
            return Err(reject(
                RejectionReason::LocaleNotPermitted,
                format!("{} may not vote in {}", user, self.locale),
            ));
        }
        Ok(())
    }

    fn persist(
        &self,
        user: UserId,
        path: &FieldPath,
        value: Option<&str>,
        vote_count: Option<u32>,
        cast_at: DateTime<Utc>,
    ) -> Result<()> {
        let row = VoteRow {
            user,
            locale: self.locale.clone(),
            path: path.clone(),
            value: value.map(str::to_string),
            cast_at,
            vote_count,
        };
        self.ctx.store.save(&row)?;
        Ok(())
    }

    fn compute(&self, path: &FieldPath, votes: &HashMap<UserId, VoteRecord>) -> Resolution {
        let mut ballots: Vec<Ballot> = votes
            .iter()
            .filter_map(|(user, record)| self.ballot(*user, record))
            .collect();
        ballots.sort_by_key(|b| b.voter);

        let baseline = self.ctx.baseline.baseline(&self.locale, path);
        let bailey = self.ctx.inherited_baseline(&self.locale, path);
        self.ctx.increment_stat("resolutions");
        self.ctx.resolver.resolve(ballots, baseline, bailey)
    }

    /// Weigh a recorded vote with the voter's current level
    fn ballot(&self, user: UserId, record: &VoteRecord) -> Option<Ballot> {
        let account = match self.ctx.users.lookup_user(user) {
            Ok(account) => account,
            Err(e) => {
                warn!(locale = %self.locale, user = %user, error = %e, "Ignoring vote from unknown user");
                return None;
            }
        };
        let weight = if account.is_locked() {
            0
        } else {
            record.vote_count.unwrap_or_else(|| {
                self.ctx
                    .config
                    .levels
                    .weight_for(account.level, &account.organization)
            })
        };

        Some(Ballot {
            voter: user,
            organization: account.organization,
            level: account.level,
            weight,
            value: record.value.clone(),
            cast_at: record.cast_at,
        })
    }

    fn slot(&self, path: &FieldPath) -> Arc<Mutex<PathSlot>> {
        if let Some(slot) = self.slots.get(path) {
            return slot.clone();
        }
        self.slots.entry(path.clone()).or_default().clone()
    }

    fn existing_slot(&self, path: &FieldPath) -> Option<Arc<Mutex<PathSlot>>> {
        self.slots.get(path).map(|slot| Arc::clone(slot.value()))
    }

    #[cfg(test)]
    fn tracked_paths(&self) -> usize {
        self.slots.len()
    }

    fn read_slot<T>(&self, path: &FieldPath, read: impl FnOnce(&PathSlot) -> T) -> Option<T> {
        let slot = self.slots.get(path)?.clone();
        let guard = slot.lock();
        Some(read(&guard))
    }

    fn next_timestamp(&self) -> DateTime<Utc> {
        let mut last = self.clock.lock();
        let now = Utc::now();
        let next = if now > *last {
            now
        } else {
            *last + Duration::microseconds(1)
        };
        *last = next;
        next
    }
}

fn reject(reason: RejectionReason, message: impl Into<String>) -> VoteError {
    VoteError::NotAccepted(VoteRejection::new(reason, message))
}

/// Rebuild per-path state from stored rows, plus the newest row time
fn seed_slots(rows: &[VoteRow]) -> (HashMap<FieldPath, PathSlot>, DateTime<Utc>) {
    let mut slots: HashMap<FieldPath, PathSlot> = HashMap::new();
    let mut latest = DateTime::<Utc>::MIN_UTC;

    for row in rows {
        latest = latest.max(row.cast_at);

        // Abstentions leave no vote but still date the field.
        let slot = slots.entry(row.path.clone()).or_default();
        slot.pending_change = slot.pending_change.max(Some(row.cast_at));
        if let Some(value) = &row.value {
            slot.votes.insert(
                row.user,
                VoteRecord {
                    value: value.clone(),
                    cast_at: row.cast_at,
                    vote_count: row.vote_count,
                },
            );
        }
    }

    (slots, latest)
}

#[cfg(test)]
mod tests {
    use crate::{FactoryConfig, VettingFactory};
    use fvr_core::{FieldPath, Level, LocaleId, User, UserId};
    use fvr_resolver::Status;
    use fvr_storage::{InMemoryBaseline, InMemoryUserDirectory, InMemoryVoteStore};
    use std::sync::Arc;

    fn setup() -> (VettingFactory, LocaleId, FieldPath) {
        let de = LocaleId::parse("de").unwrap();
        let decimal = FieldPath::parse("//ldml/numbers/symbols/decimal").unwrap();
        let factory = VettingFactory::new(
            FactoryConfig::default(),
            Arc::new(InMemoryUserDirectory::from_users([User::new(1, "vera", "acme", Level::Vetter)])),
            Arc::new(InMemoryBaseline::new().with_value(de.clone(), decimal.clone(), ",", Status::Approved)),
            Arc::new(InMemoryVoteStore::new()),
        )
        .unwrap();
        (factory, de, decimal)
    }

    #[test]
    fn test_reads_do_not_create_slots() {
        let (factory, de, decimal) = setup();
        let ballot_box = factory.ballot_box(&de).unwrap();

        for i in 0..100 {
            let path = FieldPath::parse(&format!("//ldml/unknown/field[@id=\"{}\"]", i)).unwrap();
            assert_eq!(ballot_box.resolution(&path).winning_value(), None);
        }
        assert_eq!(ballot_box.resolution(&decimal).winning_value(), Some(","));
        ballot_box.unvote(UserId(1), &decimal).unwrap();
        assert_eq!(ballot_box.tracked_paths(), 0);

        ballot_box.vote_for_value(UserId(1), &decimal, Some(".")).unwrap();
        assert_eq!(ballot_box.tracked_paths(), 1);
        assert_eq!(ballot_box.resolution(&decimal).winning_value(), Some("."));
    }

    #[test]
    fn test_unvoted_reads_are_memoized() {
        let (factory, de, decimal) = setup();
        let ballot_box = factory.ballot_box(&de).unwrap();

        ballot_box.resolution(&decimal);
        ballot_box.resolution(&decimal);
        let stats = factory.stats();
        assert_eq!(stats.resolutions, 1);
        assert_eq!(stats.cache_hits, 1);
    }

    #[test]
    fn test_reload_keeps_existing_handles() {
        let (factory, de, decimal) = setup();
        let ballot_box = factory.ballot_box(&de).unwrap();
        ballot_box.vote_for_value(UserId(1), &decimal, Some("·")).unwrap();

        ballot_box.reload().unwrap();
        assert_eq!(ballot_box.vote_value(UserId(1), &decimal).as_deref(), Some("·"));
        assert!(ballot_box.last_modified(&decimal).is_some());

        ballot_box.vote_for_value(UserId(1), &decimal, Some(".")).unwrap();
        assert_eq!(ballot_box.resolution(&decimal).winning_value(), Some("."));
    }
}
