//! Thresholds that turn vote weight into a confidence status

use serde::{Deserialize, Serialize};

/// Resolver thresholds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Minimum winning weight for `approved`
    pub approval_weight: u64,

    /// Distinct vetter-or-above organizations required for `approved`
    pub approval_min_organizations: usize,

    /// Minimum winning weight for `contributed`
    pub contributed_weight: u64,

    /// Keep the baseline value when votes would only produce a weaker status
    pub protect_baseline: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            approval_weight: 8,
            approval_min_organizations: 2,
            contributed_weight: 4,
            protect_baseline: false,
        }
    }
}

impl ResolverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_approval_weight(mut self, weight: u64) -> Self {
        self.approval_weight = weight;
        self
    }

    pub fn with_approval_min_organizations(mut self, count: usize) -> Self {
        self.approval_min_organizations = count.max(1);
        self
    }

    pub fn with_contributed_weight(mut self, weight: u64) -> Self {
        self.contributed_weight = weight;
        self
    }

    pub fn with_protect_baseline(mut self, enabled: bool) -> Self {
        self.protect_baseline = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ResolverConfig::default();
        assert_eq!(config.approval_weight, 8);
        assert_eq!(config.approval_min_organizations, 2);
        assert_eq!(config.contributed_weight, 4);
        assert!(!config.protect_baseline);
    }

    #[test]
    fn test_config_builder() {
        let config = ResolverConfig::new()
            .with_approval_weight(50)
            .with_approval_min_organizations(0)
            .with_protect_baseline(true);

        assert_eq!(config.approval_weight, 50);
        assert_eq!(config.approval_min_organizations, 1);
        assert!(config.protect_baseline);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ResolverConfig = serde_json::from_str(r#"{"approval_weight": 12}"#).unwrap();
        assert_eq!(config.approval_weight, 12);
        assert_eq!(config.contributed_weight, 4);
    }
}
