//! Weighted vote resolution for the Field Vetting Resolver
//!
//! Given the weighted ballots for one field, its baseline and its inherited
//! value, pick a winning value and a confidence status.

pub mod config;
pub mod deterministic;
pub mod types;

pub use config::ResolverConfig;
pub use deterministic::{Resolution, VoteResolver};
pub use types::{Ballot, Baseline, RankedValue, Status, VoteStatus};

/// Resolver error types
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolverError {
    #[error("Unknown status: {0}")]
    UnknownStatus(String),
}

pub type Result<T> = std::result::Result<T, ResolverError>;
