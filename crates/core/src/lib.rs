//! Core data structures for the Field Vetting Resolver
//!
//! Identifiers for locales, field paths, users and organizations, plus the
//! reviewer level lattice that every other crate weighs votes with.

pub mod level;
pub mod types;
pub mod user;

pub use level::{Capability, Level, LevelPolicy, LevelSpec};
pub use types::{FieldPath, LocaleId, Organization, UserId, INHERITANCE_MARKER};
pub use user::{LocaleSet, User};

/// Core error types
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Unknown level: {0}")]
    UnknownLevel(String),

    #[error("Unknown capability: {0}")]
    UnknownCapability(String),

    #[error("Malformed path '{path}': {reason}")]
    MalformedPath { path: String, reason: String },

    #[error("Invalid locale id: {0}")]
    InvalidLocale(String),

    #[error("Invalid level policy: {0}")]
    InvalidPolicy(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
