//! Deterministic weighted vote resolution
//!
//! Resolution is a pure function of the current ballots, the baseline and the
//! inherited (bailey) value. It never fails: an empty input resolves to no
//! value with status `missing`.

use crate::config::ResolverConfig;
use crate::types::*;
use fvr_core::{Level, Organization, INHERITANCE_MARKER};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::trace;

/// Stateless resolver; cheap to clone and safe to share between threads
#[derive(Debug, Clone, Default)]
pub struct VoteResolver {
    config: ResolverConfig,
}

impl VoteResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve one field
    pub fn resolve(
        &self,
        ballots: impl Into<Arc<[Ballot]>>,
        baseline: Option<Baseline>,
        bailey: Option<String>,
    ) -> Resolution {
        let ballots = ballots.into();
        let outcome = compute(&self.config, &ballots, baseline.as_ref(), bailey.as_deref());

        trace!(
            ballots = ballots.len(),
            winner = ?outcome.winner,
            status = %outcome.status,
            "Resolved field"
        );

        Resolution {
            ballots,
            baseline,
            bailey,
            config: self.config.clone(),
            winning_value: outcome.winner,
            status: outcome.status,
            ranked: outcome.ranked,
        }
    }
}

/// Immutable snapshot of a resolved field
#[derive(Debug, Clone)]
pub struct Resolution {
    ballots: Arc<[Ballot]>,
    baseline: Option<Baseline>,
    bailey: Option<String>,
    config: ResolverConfig,
    winning_value: Option<String>,
    status: Status,
    ranked: Vec<RankedValue>,
}

impl Resolution {
    /// Winning value; may be the inheritance marker
    pub fn winning_value(&self) -> Option<&str> {
        self.winning_value.as_deref()
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// True when the winner defers to the parent locale
    pub fn is_inherited(&self) -> bool {
        self.winning_value.as_deref() == Some(INHERITANCE_MARKER)
    }

    pub fn ballots(&self) -> &[Ballot] {
        &self.ballots
    }

    pub fn baseline(&self) -> Option<&Baseline> {
        self.baseline.as_ref()
    }

    pub fn bailey_value(&self) -> Option<&str> {
        self.bailey.as_deref()
    }

    /// Candidates in resolution order, after merging inheritance votes
    pub fn ranked_values(&self) -> &[RankedValue] {
        &self.ranked
    }

    /// Every candidate whose weight equals the winner's
    pub fn values_with_same_votes(&self) -> Vec<&str> {
        let winner = match self.winning_value.as_deref() {
            Some(value) => value,
            None => return Vec::new(),
        };
        let top = match self.ranked.iter().find(|r| r.value == winner) {
            Some(ranked) => ranked.weight,
            None => return vec![winner],
        };
        self.ranked
            .iter()
            .filter(|r| r.weight == top)
            .map(|r| r.value.as_str())
            .collect()
    }

    /// Raw weight for a value, before any inheritance merging
    pub fn total_weight(&self, value: &str) -> u64 {
        self.ballots
            .iter()
            .filter(|b| b.value == value)
            .map(|b| u64::from(b.weight))
            .sum()
    }

    /// Organizations with at least one ballot
    pub fn organizations(&self) -> BTreeSet<&Organization> {
        self.ballots.iter().map(|b| &b.organization).collect()
    }

    /// Status as it would be if only this organization's votes were counted
    pub fn status_for_organization(&self, org: &Organization) -> Status {
        let own: Vec<Ballot> = self
            .ballots
            .iter()
            .filter(|b| &b.organization == org)
            .cloned()
            .collect();
        compute(&self.config, &own, self.baseline.as_ref(), self.bailey.as_deref()).status
    }

    /// The value this organization backs: its strongest single vote, latest on ties
    pub fn org_vote(&self, org: &Organization) -> Option<&str> {
        let mut best: HashMap<&str, (u32, chrono::DateTime<chrono::Utc>)> = HashMap::new();
        for ballot in self.ballots.iter().filter(|b| &b.organization == org) {
            let entry = best
                .entry(ballot.value.as_str())
                .or_insert((ballot.weight, ballot.cast_at));
            entry.0 = entry.0.max(ballot.weight);
            entry.1 = entry.1.max(ballot.cast_at);
        }
        best.into_iter()
            .max_by(|(va, (wa, ta)), (vb, (wb, tb))| {
                wa.cmp(wb).then(ta.cmp(tb)).then(vb.cmp(va))
            })
            .map(|(value, _)| value)
    }

    /// How this organization's votes relate to the outcome
    pub fn vote_status_for_organization(&self, org: &Organization) -> VoteStatus {
        if self.status <= Status::Provisional {
            return VoteStatus::ProvisionalOrWorse;
        }
        let winner = self.winning_value.as_deref().unwrap_or_default();

        if let Some(org_vote) = self.org_vote(org) {
            if !self.equivalent(winner, org_vote) {
                return VoteStatus::Losing;
            }
        }

        match self.ranked.as_slice() {
            [] => VoteStatus::OkNoVotes,
            [single] if self.equivalent(winner, &single.value) => VoteStatus::Ok,
            _ => VoteStatus::Disputed,
        }
    }

    /// Below `contributed`, although the combined vote of every organization would reach it
    pub fn is_disputed(&self) -> bool {
        if self.status >= Status::Contributed {
            return false;
        }
        let mut best_per_org: HashMap<&Organization, u64> = HashMap::new();
        for ballot in self.ballots.iter() {
            let best = best_per_org.entry(&ballot.organization).or_insert(0);
            *best = (*best).max(u64::from(ballot.weight));
        }
        let best_possible = best_per_org.values().sum();
        let vetter_orgs = self
            .ballots
            .iter()
            .filter(|b| b.level.is_at_least(Level::Vetter))
            .map(|b| &b.organization)
            .collect::<BTreeSet<_>>()
            .len();

        status_for_weights(&self.config, best_possible, 0, vetter_orgs) >= Status::Contributed
    }

    fn equivalent(&self, a: &str, b: &str) -> bool {
        let bailey = self.bailey.as_deref();
        a == b
            || (a == INHERITANCE_MARKER && bailey == Some(b))
            || (b == INHERITANCE_MARKER && bailey == Some(a))
    }
}

struct Outcome {
    winner: Option<String>,
    status: Status,
    ranked: Vec<RankedValue>,
}

/// Per-value aggregates over the ballot set
#[derive(Default)]
struct Tally<'a> {
    weights: BTreeMap<&'a str, u64>,
    top_level: HashMap<&'a str, Level>,
    vetter_orgs: HashMap<&'a str, BTreeSet<&'a Organization>>,
}

impl<'a> Tally<'a> {
    fn new(ballots: &'a [Ballot]) -> Self {
        let mut tally = Tally::default();
        for ballot in ballots {
            let value = ballot.value.as_str();
            *tally.weights.entry(value).or_insert(0) += u64::from(ballot.weight);

            let top = tally.top_level.entry(value).or_insert(ballot.level);
            *top = (*top).max(ballot.level);

            let orgs = tally.vetter_orgs.entry(value).or_default();
            if ballot.level.is_at_least(Level::Vetter) {
                orgs.insert(&ballot.organization);
            }
        }
        tally
    }

    fn weight(&self, value: &str) -> u64 {
        self.weights.get(value).copied().unwrap_or(0)
    }

    fn top_level(&self, value: &str) -> Level {
        self.top_level.get(value).copied().unwrap_or(Level::Locked)
    }

    fn vetter_org_count(&self, value: &str) -> usize {
        self.vetter_orgs.get(value).map(BTreeSet::len).unwrap_or(0)
    }

    /// Fold explicit votes for the inherited value and votes for the marker together.
    /// The side with more weight keeps the combined weight; the marker wins a tie.
    fn combine_inheritance(&mut self, bailey: &'a str) {
        let hard = self.weight(bailey);
        let soft = self.weight(INHERITANCE_MARKER);
        if bailey == INHERITANCE_MARKER || hard == 0 || soft == 0 {
            return;
        }
        let (keep, drop): (&'a str, &'a str) = if hard > soft {
            (bailey, INHERITANCE_MARKER)
        } else {
            (INHERITANCE_MARKER, bailey)
        };

        self.weights.remove(drop);
        self.weights.insert(keep, hard + soft);

        let level = self.top_level(keep).max(self.top_level(drop));
        self.top_level.remove(drop);
        self.top_level.insert(keep, level);

        let dropped_orgs = self.vetter_orgs.remove(drop).unwrap_or_default();
        self.vetter_orgs.entry(keep).or_default().extend(dropped_orgs);
    }
}

fn compute(
    config: &ResolverConfig,
    ballots: &[Ballot],
    baseline: Option<&Baseline>,
    bailey: Option<&str>,
) -> Outcome {
    if ballots.is_empty() {
        let (winner, status) = match (baseline, bailey) {
            (Some(base), _) => (Some(base.value.clone()), base.status),
            (None, Some(_)) => (Some(INHERITANCE_MARKER.to_string()), Status::Missing),
            (None, None) => (None, Status::Missing),
        };
        return Outcome {
            winner,
            status,
            ranked: Vec::new(),
        };
    }

    let mut tally = Tally::new(ballots);
    if let Some(bailey) = bailey {
        tally.combine_inheritance(bailey);
    }

    let is_baseline = |value: &str| baseline.map(|b| b.value == value).unwrap_or(false);
    let mut candidates: Vec<&str> = tally.weights.keys().copied().collect();
    candidates.sort_by(|a, b| {
        tally
            .weight(b)
            .cmp(&tally.weight(a))
            .then_with(|| is_baseline(b).cmp(&is_baseline(a)))
            .then_with(|| tally.top_level(b).cmp(&tally.top_level(a)))
            .then_with(|| a.cmp(b))
    });

    let ranked: Vec<RankedValue> = candidates
        .iter()
        .map(|value| RankedValue {
            value: value.to_string(),
            weight: tally.weight(value),
        })
        .collect();

    // Non-empty ballots always leave at least one candidate.
    let winner = candidates[0];
    let optimal = tally.weight(winner);
    let next = candidates.get(1).map(|v| tally.weight(v)).unwrap_or(0);
    let status = status_for_weights(config, optimal, next, tally.vetter_org_count(winner));

    if config.protect_baseline {
        if let Some(base) = baseline {
            if status < base.status {
                return Outcome {
                    winner: Some(base.value.clone()),
                    status: base.status,
                    ranked,
                };
            }
        }
    }

    Outcome {
        winner: Some(winner.to_string()),
        status,
        ranked,
    }
}

/// `optimal`/`next`: weights of the winner and the runner-up
fn status_for_weights(config: &ResolverConfig, optimal: u64, next: u64, vetter_orgs: usize) -> Status {
    if optimal > next {
        if optimal >= config.approval_weight && vetter_orgs >= config.approval_min_organizations {
            return Status::Approved;
        }
        if optimal >= config.contributed_weight && vetter_orgs >= 1 {
            return Status::Contributed;
        }
    }
    if optimal > 0 {
        Status::Provisional
    } else {
        Status::Unconfirmed
    }
}
