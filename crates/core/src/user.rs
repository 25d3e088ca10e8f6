//! Registered reviewers

use crate::level::Level;
use crate::types::{LocaleId, Organization, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Locales a user may vote in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub enum LocaleSet {
    /// The `*` wildcard
    All,
    Only(BTreeSet<LocaleId>),
}

impl LocaleSet {
    pub fn only(locales: impl IntoIterator<Item = LocaleId>) -> Self {
        Self::Only(locales.into_iter().collect())
    }

    /// A sublocale is permitted when its language is: `de` covers `de_CH`
    pub fn permits(&self, locale: &LocaleId) -> bool {
        match self {
            LocaleSet::All => true,
            LocaleSet::Only(set) => set
                .iter()
                .any(|allowed| allowed == locale || allowed.as_str() == locale.language()),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, LocaleSet::Only(set) if set.is_empty())
    }
}

impl Default for LocaleSet {
    fn default() -> Self {
        LocaleSet::Only(BTreeSet::new())
    }
}

impl From<Vec<String>> for LocaleSet {
    fn from(codes: Vec<String>) -> Self {
        if codes.iter().any(|c| c.trim() == "*") {
            return LocaleSet::All;
        }
        // Unparseable codes can never match a real locale, so they are dropped.
        LocaleSet::Only(codes.iter().filter_map(|c| LocaleId::parse(c).ok()).collect())
    }
}

impl From<LocaleSet> for Vec<String> {
    fn from(set: LocaleSet) -> Self {
        match set {
            LocaleSet::All => vec!["*".to_string()],
            LocaleSet::Only(locales) => locales.into_iter().map(String::from).collect(),
        }
    }
}

/// A reviewer as supplied by the user directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub organization: Organization,
    pub level: Level,
    #[serde(default)]
    pub locales: LocaleSet,
    #[serde(default)]
    pub locked: bool,
}

impl User {
    pub fn new(id: u32, name: impl Into<String>, organization: impl Into<Organization>, level: Level) -> Self {
        Self {
            id: UserId(id),
            name: name.into(),
            organization: organization.into(),
            level,
            locales: LocaleSet::All,
            locked: false,
        }
    }

    pub fn with_locales(mut self, locales: LocaleSet) -> Self {
        self.locales = locales;
        self
    }

    pub fn with_locked(mut self, locked: bool) -> Self {
        self.locked = locked;
        self
    }

    /// Locked either by flag or by level
    pub fn is_locked(&self) -> bool {
        self.locked || self.level == Level::Locked
    }
}

impl std::fmt::Display for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} ({}, {})", self.id, self.name, self.organization, self.level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locale(code: &str) -> LocaleId {
        LocaleId::parse(code).unwrap()
    }

    #[test]
    fn test_locale_set_permits_sublocales() {
        let set = LocaleSet::only([locale("de")]);
        assert!(set.permits(&locale("de")));
        assert!(set.permits(&locale("de_CH")));
        assert!(!set.permits(&locale("fr")));
        assert!(LocaleSet::All.permits(&locale("fr")));
    }

    #[test]
    fn test_locale_set_from_strings() {
        assert_eq!(LocaleSet::from(vec!["*".to_string()]), LocaleSet::All);
        let set = LocaleSet::from(vec!["de".to_string(), "not a locale".to_string()]);
        assert_eq!(set, LocaleSet::only([locale("de")]));
        assert!(LocaleSet::default().is_empty());
    }

    #[test]
    fn test_locked_by_level_or_flag() {
        let user = User::new(1, "a", "acme", Level::Vetter);
        assert!(!user.is_locked());
        assert!(user.clone().with_locked(true).is_locked());
        assert!(User::new(2, "b", "acme", Level::Locked).is_locked());
    }

    #[test]
    fn test_user_json() {
        let json = r#"{"id":7,"name":"v","organization":"Acme","level":"vetter","locales":["de","fr"]}"#;
        let user: User = serde_json::from_str(json).unwrap();
        assert_eq!(user.organization, Organization::new("acme"));
        assert!(user.locales.permits(&locale("fr_CA")));
        assert!(!user.locked);
    }
}
