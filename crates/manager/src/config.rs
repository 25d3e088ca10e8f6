//! Configuration for the vetting factory

use fvr_core::{LevelPolicy, LocaleId};
use fvr_resolver::ResolverConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Stage of the vetting cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Submission,
    #[default]
    Vetting,
    Closed,
    ReadOnly,
}

impl Phase {
    pub fn accepts_votes(self) -> bool {
        matches!(self, Phase::Submission | Phase::Vetting)
    }
}

/// Vetting factory configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactoryConfig {
    /// Level table used to weigh votes and check eligibility
    pub levels: LevelPolicy,

    /// Status thresholds
    pub resolver: ResolverConfig,

    /// Current vetting phase
    pub phase: Phase,

    /// Locales that reject votes regardless of their baseline mode
    pub read_only_locales: BTreeSet<LocaleId>,

    /// Longest accepted value, in characters
    pub max_value_length: usize,

    /// How many parent locales inheritance may walk
    pub max_inheritance_depth: usize,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            levels: LevelPolicy::default(),
            resolver: ResolverConfig::default(),
            phase: Phase::default(),
            read_only_locales: BTreeSet::new(),
            max_value_length: 4096,
            max_inheritance_depth: 8,
        }
    }
}

impl FactoryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_levels(mut self, levels: LevelPolicy) -> Self {
        self.levels = levels;
        self
    }

    pub fn with_resolver(mut self, resolver: ResolverConfig) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_phase(mut self, phase: Phase) -> Self {
        self.phase = phase;
        self
    }

    pub fn with_read_only_locale(mut self, locale: LocaleId) -> Self {
        self.read_only_locales.insert(locale);
        self
    }

    pub fn with_max_value_length(mut self, max: usize) -> Self {
        self.max_value_length = max.max(1);
        self
    }

    pub fn with_max_inheritance_depth(mut self, depth: usize) -> Self {
        self.max_inheritance_depth = depth;
        self
    }

    /// Reject tables that break the level lattice
    pub fn validate(&self) -> crate::Result<()> {
        self.levels
            .validate()
            .map_err(|e| crate::VoteError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FactoryConfig::default();
        assert_eq!(config.phase, Phase::Vetting);
        assert_eq!(config.max_value_length, 4096);
        assert!(config.read_only_locales.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = FactoryConfig::new()
            .with_phase(Phase::Closed)
            .with_max_value_length(0)
            .with_read_only_locale(LocaleId::parse("und").unwrap());

        assert!(!config.phase.accepts_votes());
        assert_eq!(config.max_value_length, 1);
        assert_eq!(config.read_only_locales.len(), 1);
    }

    #[test]
    fn test_phase_accepts_votes() {
        assert!(Phase::Submission.accepts_votes());
        assert!(Phase::Vetting.accepts_votes());
        assert!(!Phase::Closed.accepts_votes());
        assert!(!Phase::ReadOnly.accepts_votes());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: FactoryConfig =
            serde_json::from_str(r#"{ "phase": "submission", "resolver": { "approval_weight": 50 } }"#).unwrap();
        assert_eq!(config.phase, Phase::Submission);
        assert_eq!(config.resolver.approval_weight, 50);
        assert_eq!(config.resolver.contributed_weight, 4);
        assert_eq!(config.max_inheritance_depth, 8);
    }
}
