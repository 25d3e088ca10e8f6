//! Core type definitions

use crate::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Value meaning "inherit whatever the parent locale resolves to"
pub const INHERITANCE_MARKER: &str = "↑↑↑";

/// Attributes that annotate a value without being part of the field's identity
const NON_DISTINGUISHING_ATTRIBUTES: &[&str] = &["draft", "references", "standard", "validSubLocales"];

/// Identifier of a registered user, issued by the user directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u32);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Affiliation used for permission scoping and the distinct-organization rule
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Organization(String);

impl Organization {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Organization {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

impl From<&str> for Organization {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<Organization> for String {
    fn from(org: Organization) -> Self {
        org.0
    }
}

impl std::fmt::Display for Organization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Locale code such as `de`, `de_CH` or `root`
///
/// Hyphens are normalized to underscores so `pt-PT` and `pt_PT` name the same locale.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LocaleId(String);

impl LocaleId {
    pub const ROOT: &'static str = "root";

    pub fn parse(code: &str) -> Result<Self> {
        let normalized = code.trim().replace('-', "_");
        let well_formed = !normalized.is_empty()
            && normalized
                .split('_')
                .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric()));
        if !well_formed {
            return Err(CoreError::InvalidLocale(code.to_string()));
        }
        Ok(Self(normalized))
    }

    pub fn root() -> Self {
        Self(Self::ROOT.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == Self::ROOT
    }

    /// Language subtag, e.g. `de` for `de_CH`
    pub fn language(&self) -> &str {
        self.0.split('_').next().unwrap_or(&self.0)
    }

    /// Parent by truncation: `de_CH` -> `de` -> `root` -> none
    pub fn truncated_parent(&self) -> Option<LocaleId> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('_') {
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => Some(Self::root()),
        }
    }
}

impl TryFrom<String> for LocaleId {
    type Error = CoreError;

    fn try_from(code: String) -> Result<Self> {
        Self::parse(&code)
    }
}

impl From<LocaleId> for String {
    fn from(locale: LocaleId) -> Self {
        locale.0
    }
}

impl std::str::FromStr for LocaleId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for LocaleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalized identifier of one leaf value in a locale's data tree
///
/// Attribute order does not matter and non-distinguishing attributes
/// (`draft`, `references`, ...) are dropped, so two spellings of the same
/// field compare equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldPath(String);

impl FieldPath {
    pub fn parse(raw: &str) -> Result<Self> {
        let malformed = |reason: String| CoreError::MalformedPath {
            path: raw.to_string(),
            reason,
        };

        let body = raw
            .trim()
            .strip_prefix("//")
            .ok_or_else(|| malformed("must start with '//'".to_string()))?;

        let mut normalized = String::from("/");
        for segment in split_segments(body).map_err(malformed)? {
            let (element, attributes) = parse_segment(segment).map_err(malformed)?;
            normalized.push('/');
            normalized.push_str(element);

            let mut kept: Vec<(&str, &str)> = attributes
                .into_iter()
                .filter(|(key, _)| !NON_DISTINGUISHING_ATTRIBUTES.contains(key))
                .collect();
            kept.sort_unstable();
            for (key, value) in kept {
                let _ = write!(normalized, "[@{}=\"{}\"]", key, value);
            }
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Element names from the root down, without attributes
    pub fn elements(&self) -> impl Iterator<Item = &str> {
        self.0
            .trim_start_matches('/')
            .split('/')
            .map(|segment| segment.split('[').next().unwrap_or(segment))
    }
}

impl TryFrom<String> for FieldPath {
    type Error = CoreError;

    fn try_from(raw: String) -> Result<Self> {
        Self::parse(&raw)
    }
}

impl From<FieldPath> for String {
    fn from(path: FieldPath) -> Self {
        path.0
    }
}

impl std::str::FromStr for FieldPath {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Split on '/' outside of quoted attribute values
fn split_segments(body: &str) -> std::result::Result<Vec<&str>, String> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;

    for (idx, c) in body.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '/' if !in_quotes => {
                segments.push(&body[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }

    if in_quotes {
        return Err("unterminated attribute value".to_string());
    }
    segments.push(&body[start..]);

    if segments.iter().any(|s| s.is_empty()) {
        return Err("empty element".to_string());
    }
    Ok(segments)
}

fn parse_segment(segment: &str) -> std::result::Result<(&str, Vec<(&str, &str)>), String> {
    let name_end = segment.find('[').unwrap_or(segment.len());
    let element = &segment[..name_end];
    let valid_name = !element.is_empty()
        && element
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':'));
    if !valid_name {
        return Err(format!("invalid element name '{}'", element));
    }

    let mut attributes: Vec<(&str, &str)> = Vec::new();
    let mut rest = &segment[name_end..];
    while !rest.is_empty() {
        let inner = rest
            .strip_prefix("[@")
            .ok_or_else(|| format!("expected '[@' in '{}'", segment))?;
        let eq = inner
            .find("=\"")
            .ok_or_else(|| format!("expected '=\"' in '{}'", segment))?;
        let key = &inner[..eq];
        let after = &inner[eq + 2..];
        let close = after
            .find("\"]")
            .ok_or_else(|| format!("unterminated attribute in '{}'", segment))?;
        let value = &after[..close];

        if key.is_empty() {
            return Err(format!("empty attribute name in '{}'", segment));
        }
        if attributes.iter().any(|(k, _)| *k == key) {
            return Err(format!("duplicate attribute '{}'", key));
        }
        attributes.push((key, value));
        rest = &after[close + 2..];
    }

    Ok((element, attributes))
}
