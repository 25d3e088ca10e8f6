//! Types for vote resolution

use chrono::{DateTime, Utc};
use fvr_core::{Level, Organization, UserId};
use serde::{Deserialize, Serialize};

/// Confidence tier attached to a resolved value, weakest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// No value at all
    Missing,

    /// A value exists but nothing backs it
    Unconfirmed,

    /// Some non-zero weight backs the value
    Provisional,

    /// Backed by at least one vetter and clearly ahead
    Contributed,

    /// Backed by enough weight from enough organizations
    Approved,
}

impl Status {
    pub fn name(self) -> &'static str {
        match self {
            Status::Missing => "missing",
            Status::Unconfirmed => "unconfirmed",
            Status::Provisional => "provisional",
            Status::Contributed => "contributed",
            Status::Approved => "approved",
        }
    }
}

impl std::str::FromStr for Status {
    type Err = crate::ResolverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "missing" => Ok(Status::Missing),
            "unconfirmed" => Ok(Status::Unconfirmed),
            "provisional" => Ok(Status::Provisional),
            "contributed" => Ok(Status::Contributed),
            "approved" => Ok(Status::Approved),
            other => Err(crate::ResolverError::UnknownStatus(other.to_string())),
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// How one organization's votes relate to the overall outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteStatus {
    /// Contributed or approved, and the organization did not vote
    OkNoVotes,

    /// Contributed or approved, and the organization chose the winner
    Ok,

    /// The winner is neither contributed nor approved
    ProvisionalOrWorse,

    /// The organization's choice is not winning
    Losing,

    /// More than one value has votes, or the voted value did not win
    Disputed,
}

/// One voter's current choice for a field, already weighted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    pub voter: UserId,
    pub organization: Organization,
    pub level: Level,
    pub weight: u32,
    pub value: String,
    pub cast_at: DateTime<Utc>,
}

/// The value a locale's data file already carries for a field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Baseline {
    pub value: String,
    pub status: Status,
}

impl Baseline {
    pub fn new(value: impl Into<String>, status: Status) -> Self {
        Self {
            value: value.into(),
            status,
        }
    }
}

/// A candidate value with its effective weight, in resolution order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedValue {
    pub value: String,
    pub weight: u64,
}
