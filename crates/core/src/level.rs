//! Reviewer levels and the policy table that gives them weight and capabilities
//!
//! Levels form a total order from `Locked` (weakest) to `Admin` (strongest).
//! Everything a level is allowed to do, and how much its vote counts, lives in
//! a [`LevelPolicy`] table rather than being hard-coded per level, so the
//! numbers can be tuned per deployment.

use crate::types::Organization;
use crate::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Reviewer tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Locked,
    Anonymous,
    Street,
    Vetter,
    Manager,
    Tc,
    Admin,
}

impl Level {
    /// All levels, weakest first
    pub const ALL: [Level; 7] = [
        Level::Locked,
        Level::Anonymous,
        Level::Street,
        Level::Vetter,
        Level::Manager,
        Level::Tc,
        Level::Admin,
    ];

    /// Position in the lattice; larger is stronger
    pub const fn rank(self) -> u8 {
        match self {
            Level::Locked => 0,
            Level::Anonymous => 1,
            Level::Street => 2,
            Level::Vetter => 3,
            Level::Manager => 4,
            Level::Tc => 5,
            Level::Admin => 6,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Level::Locked => "locked",
            Level::Anonymous => "anonymous",
            Level::Street => "street",
            Level::Vetter => "vetter",
            Level::Manager => "manager",
            Level::Tc => "tc",
            Level::Admin => "admin",
        }
    }

    pub fn is_at_least(self, other: Level) -> bool {
        self.rank() >= other.rank()
    }
}

impl PartialOrd for Level {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Level {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl std::str::FromStr for Level {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "locked" => Ok(Level::Locked),
            "anonymous" => Ok(Level::Anonymous),
            "street" | "guest" => Ok(Level::Street),
            "vetter" => Ok(Level::Vetter),
            "manager" => Ok(Level::Manager),
            "tc" => Ok(Level::Tc),
            "admin" => Ok(Level::Admin),
            _ => Err(CoreError::UnknownLevel(s.to_string())),
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Something a level may be allowed to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    SubmitVotes,
    ListUsers,
    VoteAnyLocale,
    CreateUsers,
    ModifyUsers,
    EmailUsers,
    MonitorForum,
    SetInterestLocales,
    UseVettingSummary,
    GetEmailList,
    CreateSummarySnapshot,
    CreateOtherOrgs,
    ManageAnyOrganization,
    DeleteUsers,
}

impl std::str::FromStr for Capability {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        serde_json::from_value(serde_json::Value::String(s.trim().to_string()))
            .map_err(|_| CoreError::UnknownCapability(s.to_string()))
    }
}

/// One row of the level table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelSpec {
    /// Weight a vote from this level contributes
    pub weight: u32,

    /// Capabilities granted at this level
    #[serde(default)]
    pub capabilities: BTreeSet<Capability>,

    /// Alternative vote counts a user of this level may choose from
    #[serde(default)]
    pub vote_count_menu: BTreeSet<u32>,
}

impl LevelSpec {
    pub fn new(weight: u32) -> Self {
        Self {
            weight,
            capabilities: BTreeSet::new(),
            vote_count_menu: BTreeSet::new(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        self.capabilities.extend(capabilities);
        self
    }

    pub fn with_vote_count_menu(mut self, counts: impl IntoIterator<Item = u32>) -> Self {
        self.vote_count_menu.extend(counts);
        self
    }
}

/// The lattice table: weight, capabilities and vote-count menu per level
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawLevelPolicy", into = "RawLevelPolicy")]
pub struct LevelPolicy {
    levels: BTreeMap<Level, LevelSpec>,
    tc_organizations: BTreeSet<Organization>,
    tc_org_vetter_weight: u32,
}

#[derive(Serialize, Deserialize)]
struct RawLevelPolicy {
    levels: BTreeMap<Level, LevelSpec>,
    #[serde(default)]
    tc_organizations: BTreeSet<Organization>,
    #[serde(default = "default_tc_org_vetter_weight")]
    tc_org_vetter_weight: u32,
}

fn default_tc_org_vetter_weight() -> u32 {
    6
}

impl TryFrom<RawLevelPolicy> for LevelPolicy {
    type Error = CoreError;

    fn try_from(raw: RawLevelPolicy) -> Result<Self> {
        let policy = Self {
            levels: raw.levels,
            tc_organizations: raw.tc_organizations,
            tc_org_vetter_weight: raw.tc_org_vetter_weight,
        };
        policy.validate()?;
        Ok(policy)
    }
}

impl From<LevelPolicy> for RawLevelPolicy {
    fn from(policy: LevelPolicy) -> Self {
        Self {
            levels: policy.levels,
            tc_organizations: policy.tc_organizations,
            tc_org_vetter_weight: policy.tc_org_vetter_weight,
        }
    }
}

impl Default for LevelPolicy {
    fn default() -> Self {
        use Capability::*;

        let street = [SubmitVotes];
        let vetter = [ListUsers];
        let manager = [
            CreateUsers,
            ModifyUsers,
            EmailUsers,
            MonitorForum,
            SetInterestLocales,
            UseVettingSummary,
            GetEmailList,
        ];
        let tc = [VoteAnyLocale];
        let admin = [CreateSummarySnapshot, CreateOtherOrgs, ManageAnyOrganization, DeleteUsers];

        let mut levels = BTreeMap::new();
        levels.insert(Level::Locked, LevelSpec::new(0));
        levels.insert(Level::Anonymous, LevelSpec::new(0));
        levels.insert(Level::Street, LevelSpec::new(1).with_capabilities(street));
        levels.insert(
            Level::Vetter,
            LevelSpec::new(4).with_capabilities(street.into_iter().chain(vetter)),
        );
        levels.insert(
            Level::Manager,
            LevelSpec::new(4).with_capabilities(street.into_iter().chain(vetter).chain(manager)),
        );
        levels.insert(
            Level::Tc,
            LevelSpec::new(8)
                .with_capabilities(street.into_iter().chain(vetter).chain(manager).chain(tc))
                .with_vote_count_menu([1, 4, 6, 8]),
        );
        levels.insert(
            Level::Admin,
            LevelSpec::new(100)
                .with_capabilities(
                    street
                        .into_iter()
                        .chain(vetter)
                        .chain(manager)
                        .chain(tc)
                        .chain(admin),
                )
                .with_vote_count_menu([1, 4, 6, 8, 100]),
        );

        Self {
            levels,
            tc_organizations: BTreeSet::new(),
            tc_org_vetter_weight: default_tc_org_vetter_weight(),
        }
    }
}

impl LevelPolicy {
    /// Build a policy from an explicit table, validating it
    pub fn new(levels: BTreeMap<Level, LevelSpec>) -> Result<Self> {
        RawLevelPolicy {
            levels,
            tc_organizations: BTreeSet::new(),
            tc_org_vetter_weight: default_tc_org_vetter_weight(),
        }
        .try_into()
    }

    /// Mark organizations whose vetters vote with the elevated weight
    pub fn with_tc_organizations(mut self, orgs: impl IntoIterator<Item = Organization>) -> Self {
        self.tc_organizations.extend(orgs);
        self
    }

    pub fn with_tc_org_vetter_weight(mut self, weight: u32) -> Self {
        self.tc_org_vetter_weight = weight;
        self
    }

    /// Check the lattice invariant: stronger levels dominate weaker ones
    pub fn validate(&self) -> Result<()> {
        let mut previous: Option<(Level, &LevelSpec)> = None;
        for level in Level::ALL {
            let spec = self
                .levels
                .get(&level)
                .ok_or_else(|| CoreError::InvalidPolicy(format!("level '{}' missing", level)))?;

            if let Some((weaker, weaker_spec)) = previous {
                if spec.weight < weaker_spec.weight {
                    return Err(CoreError::InvalidPolicy(format!(
                        "'{}' weighs {} but weaker '{}' weighs {}",
                        level, spec.weight, weaker, weaker_spec.weight
                    )));
                }
                if let Some(missing) = weaker_spec.capabilities.difference(&spec.capabilities).next() {
                    return Err(CoreError::InvalidPolicy(format!(
                        "'{}' lacks capability {:?} held by weaker '{}'",
                        level, missing, weaker
                    )));
                }
            }
            previous = Some((level, spec));
        }

        let tc = self.weight(Level::Tc);
        if self.tc_org_vetter_weight > tc {
            return Err(CoreError::InvalidPolicy(format!(
                "tc-organization vetter weight {} exceeds tc weight {}",
                self.tc_org_vetter_weight, tc
            )));
        }
        Ok(())
    }

    pub fn spec(&self, level: Level) -> Option<&LevelSpec> {
        self.levels.get(&level)
    }

    /// Vote weight contributed by a user at this level
    pub fn weight(&self, level: Level) -> u32 {
        self.levels.get(&level).map(|s| s.weight).unwrap_or(0)
    }

    /// Vote weight taking the voter's organization into account
    pub fn weight_for(&self, level: Level, org: &Organization) -> u32 {
        if level == Level::Vetter && self.tc_organizations.contains(org) {
            self.tc_org_vetter_weight
        } else {
            self.weight(level)
        }
    }

    pub fn is_tc_organization(&self, org: &Organization) -> bool {
        self.tc_organizations.contains(org)
    }

    pub fn can_perform(&self, level: Level, capability: Capability) -> bool {
        self.levels
            .get(&level)
            .map(|s| s.capabilities.contains(&capability))
            .unwrap_or(false)
    }

    /// May a user at `level` in `self_org` manage a user at `other_level` in `other_org`?
    pub fn is_manager_for(
        &self,
        level: Level,
        self_org: &Organization,
        other_level: Level,
        other_org: &Organization,
    ) -> bool {
        if self.can_perform(level, Capability::ManageAnyOrganization) {
            return true;
        }
        level.is_at_least(Level::Manager) && level.is_at_least(other_level) && self_org == other_org
    }

    /// Users may only grant levels strictly below their own; admins may grant any level
    pub fn can_create_or_set_level_to(&self, level: Level, target: Level) -> bool {
        if !level.is_at_least(Level::Manager) {
            return false;
        }
        level == Level::Admin || target < level
    }

    /// Is `count` an allowed vote count for this level and organization?
    pub fn can_vote_with_count(&self, level: Level, org: &Organization, count: u32) -> bool {
        if count == self.weight_for(level, org) {
            return true;
        }
        self.levels
            .get(&level)
            .map(|s| s.vote_count_menu.contains(&count))
            .unwrap_or(false)
    }

    pub fn vote_count_menu(&self, level: Level) -> Vec<u32> {
        self.levels
            .get(&level)
            .map(|s| s.vote_count_menu.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Replace one row of the table, re-validating the whole lattice
    pub fn with_level(mut self, level: Level, spec: LevelSpec) -> Result<Self> {
        self.levels.insert(level, spec);
        self.validate()?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn org(name: &str) -> Organization {
        Organization::new(name)
    }

    #[test]
    fn test_default_policy_is_valid() {
        let policy = LevelPolicy::default();
        assert!(policy.validate().is_ok());
        assert_eq!(policy.weight(Level::Street), 1);
        assert_eq!(policy.weight(Level::Vetter), 4);
        assert_eq!(policy.weight(Level::Tc), 8);
    }

    #[test]
    fn test_higher_levels_dominate_capabilities() {
        let policy = LevelPolicy::default();
        for pair in Level::ALL.windows(2) {
            let (weaker, stronger) = (pair[0], pair[1]);
            assert!(policy.weight(stronger) >= policy.weight(weaker));
            let weaker_caps = &policy.spec(weaker).unwrap().capabilities;
            let stronger_caps = &policy.spec(stronger).unwrap().capabilities;
            assert!(weaker_caps.is_subset(stronger_caps), "{} vs {}", weaker, stronger);
        }
    }

    #[test]
    fn test_capabilities() {
        let policy = LevelPolicy::default();
        assert!(!policy.can_perform(Level::Anonymous, Capability::SubmitVotes));
        assert!(policy.can_perform(Level::Street, Capability::SubmitVotes));
        assert!(!policy.can_perform(Level::Vetter, Capability::CreateUsers));
        assert!(policy.can_perform(Level::Manager, Capability::CreateUsers));
        assert!(policy.can_perform(Level::Manager, Capability::UseVettingSummary));
        assert!(!policy.can_perform(Level::Tc, Capability::CreateSummarySnapshot));
        assert!(policy.can_perform(Level::Admin, Capability::CreateSummarySnapshot));
    }

    #[test]
    fn test_is_manager_for() {
        let policy = LevelPolicy::default();
        let (a, b) = (org("acme"), org("globex"));

        assert!(policy.is_manager_for(Level::Manager, &a, Level::Vetter, &a));
        assert!(!policy.is_manager_for(Level::Manager, &a, Level::Vetter, &b));
        assert!(!policy.is_manager_for(Level::Vetter, &a, Level::Street, &a));
        assert!(!policy.is_manager_for(Level::Manager, &a, Level::Tc, &a));
        assert!(!policy.is_manager_for(Level::Tc, &a, Level::Vetter, &b));
        assert!(policy.is_manager_for(Level::Admin, &a, Level::Tc, &b));
        assert!(policy.is_manager_for(Level::Admin, &a, Level::Admin, &b));
    }

    #[test]
    fn test_can_create_or_set_level_to() {
        let policy = LevelPolicy::default();
        assert!(policy.can_create_or_set_level_to(Level::Manager, Level::Vetter));
        assert!(!policy.can_create_or_set_level_to(Level::Manager, Level::Manager));
        assert!(!policy.can_create_or_set_level_to(Level::Vetter, Level::Street));
        assert!(policy.can_create_or_set_level_to(Level::Tc, Level::Manager));
        assert!(policy.can_create_or_set_level_to(Level::Admin, Level::Admin));
    }

    #[test]
    fn test_can_vote_with_count() {
        let policy = LevelPolicy::default().with_tc_organizations([org("unicode")]);
        let plain = org("acme");

        assert!(policy.can_vote_with_count(Level::Vetter, &plain, 4));
        assert!(!policy.can_vote_with_count(Level::Vetter, &plain, 1));
        assert!(policy.can_vote_with_count(Level::Vetter, &org("unicode"), 6));
        assert!(policy.can_vote_with_count(Level::Tc, &plain, 1));
        assert!(!policy.can_vote_with_count(Level::Tc, &plain, 100));
        assert!(policy.can_vote_with_count(Level::Admin, &plain, 100));
    }

    #[test]
    fn test_weight_for_tc_organization() {
        let policy = LevelPolicy::default().with_tc_organizations([org("unicode")]);
        assert_eq!(policy.weight_for(Level::Vetter, &org("unicode")), 6);
        assert_eq!(policy.weight_for(Level::Vetter, &org("acme")), 4);
        assert_eq!(policy.weight_for(Level::Manager, &org("unicode")), 4);
    }

    #[test]
    fn test_invalid_policy_rejected() {
        let weaker_outweighs = LevelPolicy::default().with_level(Level::Tc, LevelSpec::new(2));
        assert!(matches!(weaker_outweighs, Err(CoreError::InvalidPolicy(_))));

        let mut levels = BTreeMap::new();
        levels.insert(Level::Admin, LevelSpec::new(10));
        assert!(LevelPolicy::new(levels).is_err());
    }

    #[test]
    fn test_policy_json_roundtrip_validates() {
        let json = serde_json::to_string(&LevelPolicy::default()).unwrap();
        let parsed: LevelPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, LevelPolicy::default());

        let broken = json.replace("\"weight\":8", "\"weight\":0");
        assert!(serde_json::from_str::<LevelPolicy>(&broken).is_err());
    }

    #[test]
    fn test_level_names() {
        for level in Level::ALL {
            assert_eq!(level.name().parse::<Level>().unwrap(), level);
        }
        assert_eq!("guest".parse::<Level>().unwrap(), Level::Street);
        assert!(matches!("wizard".parse::<Level>(), Err(CoreError::UnknownLevel(_))));
        assert_eq!("monitor-forum".parse::<Capability>().unwrap(), Capability::MonitorForum);
    }
}
