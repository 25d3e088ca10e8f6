//! Read-only merged view of one locale: baseline data with the ballot overlay

use crate::{BallotBox, FactoryInner};
use chrono::{DateTime, Utc};
use fvr_core::{FieldPath, LocaleId, INHERITANCE_MARKER};
use fvr_resolver::{Resolution, Status};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::warn;

/// Value, status and last-modified time of one field, read atomically
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedField {
    pub value: Option<String>,
    pub status: Status,
    pub last_modified: Option<DateTime<Utc>>,

    /// Set when the value was substituted from a parent locale
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inherited_from: Option<LocaleId>,
}

/// Resolved view of a locale
///
/// Cheap to create; resolutions are memoized per path inside the ballot box,
/// so repeated reads do not re-resolve.
#[derive(Clone)]
pub struct ResolvedView {
    inner: Arc<FactoryInner>,
    ballot_box: Arc<BallotBox>,
}

impl ResolvedView {
    pub(crate) fn new(inner: Arc<FactoryInner>, ballot_box: Arc<BallotBox>) -> Self {
        Self { inner, ballot_box }
    }

    pub fn locale(&self) -> &LocaleId {
        self.ballot_box.locale()
    }

    pub fn ballot_box(&self) -> &Arc<BallotBox> {
        &self.ballot_box
    }

    /// Full resolution, for per-organization queries
    pub fn resolution(&self, path: &FieldPath) -> Arc<Resolution> {
        self.ballot_box.resolution(path)
    }

    /// Winning value with inheritance already substituted.
    ///
    /// When the field inherits, the value comes from the nearest parent whose
    /// own resolution is concrete, while the status stays this locale's.
    pub fn field(&self, path: &FieldPath) -> ResolvedField {
        let resolved = self.ballot_box.resolved(path);
        let status = resolved.resolution.status();

        let (value, inherited_from) = match resolved.resolution.winning_value() {
            Some(INHERITANCE_MARKER) => self.inherited_value(path),
            other => (other.map(str::to_string), None),
        };

        ResolvedField {
            value,
            status,
            last_modified: resolved.last_modified,
            inherited_from,
        }
    }

    pub fn value(&self, path: &FieldPath) -> Option<String> {
        self.field(path).value
    }

    pub fn status(&self, path: &FieldPath) -> Status {
        self.ballot_box.resolution(path).status()
    }

    pub fn last_modified(&self, path: &FieldPath) -> Option<DateTime<Utc>> {
        self.ballot_box.last_modified(path)
    }

    /// Every path with a baseline value or a current vote
    pub fn paths(&self) -> Vec<FieldPath> {
        let mut paths: BTreeSet<FieldPath> = self.inner.ctx.baseline.paths(self.locale()).into_iter().collect();
        paths.extend(self.ballot_box.voted_paths());
        paths.into_iter().collect()
    }

    pub fn snapshot(&self) -> BTreeMap<FieldPath, ResolvedField> {
        self.paths()
            .into_iter()
            .map(|path| {
                let field = self.field(&path);
                (path, field)
            })
            .collect()
    }

    fn inherited_value(&self, path: &FieldPath) -> (Option<String>, Option<LocaleId>) {
        let ctx = &self.inner.ctx;
        let mut current = ctx.baseline.parent_locale(self.locale());

        for _ in 0..ctx.config.max_inheritance_depth {
            let parent = match current {
                Some(parent) => parent,
                None => break,
            };
            let parent_box = match self.inner.ballot_box(&parent) {
                Ok(parent_box) => parent_box,
                Err(e) => {
                    warn!(locale = %parent, error = %e, "Parent locale unavailable; using baseline");
                    break;
                }
            };
            let resolution = parent_box.resolution(path);
            if let Some(value) = resolution.winning_value() {
                if value != INHERITANCE_MARKER {
                    return (Some(value.to_string()), Some(parent));
                }
            }
            current = ctx.baseline.parent_locale(&parent);
        }

        (ctx.inherited_baseline(self.locale(), path), None)
    }
}

#[cfg(test)]
mod tests {
    use crate::{FactoryConfig, VettingFactory};
    use fvr_core::{FieldPath, Level, LocaleId, User, UserId, INHERITANCE_MARKER};
    use fvr_resolver::Status;
    use fvr_storage::{InMemoryBaseline, InMemoryUserDirectory, InMemoryVoteStore};
    use std::sync::Arc;

    fn locale(code: &str) -> LocaleId {
        LocaleId::parse(code).unwrap()
    }

    fn setup(baseline: InMemoryBaseline) -> VettingFactory {
        let users = InMemoryUserDirectory::from_users([
            User::new(1, "vera", "acme", Level::Vetter),
            User::new(2, "tom", "globex", Level::Tc),
        ]);
        VettingFactory::new(
            FactoryConfig::default(),
            Arc::new(users),
            Arc::new(baseline),
            Arc::new(InMemoryVoteStore::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_inheritance_substitutes_parent_vote() {
        let p = FieldPath::parse("//ldml/localeDisplayNames/languages/language[@type=\"fr\"]").unwrap();
        let factory = setup(
            InMemoryBaseline::new()
                .with_value(locale("de"), p.clone(), "Französisch", Status::Approved)
                .with_value(locale("de_CH"), p.clone(), INHERITANCE_MARKER, Status::Approved),
        );

        let child = factory.resolved_view(&locale("de_CH")).unwrap();
        let field = child.field(&p);
        assert_eq!(field.value.as_deref(), Some("Französisch"));
        assert_eq!(field.status, Status::Approved);
        assert_eq!(field.inherited_from, Some(locale("de")));

        let parent = factory.ballot_box(&locale("de")).unwrap();
        parent.vote_for_value(UserId(1), &p, Some("Franzoesisch")).unwrap();
        parent.vote_for_value(UserId(2), &p, Some("Franzoesisch")).unwrap();

        let field = child.field(&p);
        assert_eq!(field.value.as_deref(), Some("Franzoesisch"));
        assert_eq!(field.status, Status::Approved);
    }

    #[test]
    fn test_inheritance_without_parent_value() {
        let p = FieldPath::parse("//ldml/a").unwrap();
        let factory = setup(InMemoryBaseline::new().with_value(
            locale("de"),
            p.clone(),
            INHERITANCE_MARKER,
            Status::Approved,
        ));
        let field = factory.resolve(&locale("de"), &p).unwrap();
        assert_eq!(field.value, None);
        assert_eq!(field.inherited_from, None);
    }

    #[test]
    fn test_paths_and_snapshot() {
        let a = FieldPath::parse("//ldml/a").unwrap();
        let b = FieldPath::parse("//ldml/b").unwrap();
        let factory = setup(
            InMemoryBaseline::new()
                .with_value(locale("de"), a.clone(), "A", Status::Approved)
                .with_path(b.clone()),
        );
        let view = factory.resolved_view(&locale("de")).unwrap();
        assert_eq!(view.paths(), vec![a.clone()]);

        view.ballot_box().vote_for_value(UserId(1), &b, Some("B")).unwrap();
        assert_eq!(view.paths(), vec![a.clone(), b.clone()]);

        let snapshot = view.snapshot();
        assert_eq!(snapshot[&a].value.as_deref(), Some("A"));
        assert_eq!(snapshot[&a].last_modified, None);
        assert_eq!(snapshot[&b].value.as_deref(), Some("B"));
        assert_eq!(snapshot[&b].status, Status::Contributed);
        assert!(snapshot[&b].last_modified.is_some());
    }
}
