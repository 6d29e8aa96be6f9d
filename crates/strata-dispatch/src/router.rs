//! Provides/requires router
//!
//! An explicit bipartite index `tag → report ids`, rebuilt once per phase.
//! Routing is a pure function of the requested tags and the index.

use std::collections::{BTreeMap, BTreeSet};
use strata_artifact::{Report, ReportId, Tag, TagSet};

/// Tag index over a phase's available reports
#[derive(Debug, Clone, Default)]
pub struct TagIndex {
    by_tag: BTreeMap<Tag, BTreeSet<ReportId>>,
    reports: BTreeMap<ReportId, Report>,
}

impl TagIndex {
    /// Build the index; later reports with a duplicate id replace earlier ones
    #[must_use]
    pub fn build(reports: impl IntoIterator<Item = Report>) -> Self {
        let mut index = Self::default();
        for report in reports {
            index.insert(report);
        }
        index
    }

    /// Add one report
    pub fn insert(&mut self, report: Report) {
        if let Some(old) = self.reports.remove(&report.id) {
            for tag in &old.provides {
                if let Some(ids) = self.by_tag.get_mut(tag) {
                    ids.remove(&old.id);
                }
            }
        }
        for tag in &report.provides {
            self.by_tag.entry(tag.clone()).or_default().insert(report.id.clone());
        }
        self.reports.insert(report.id.clone(), report);
    }

    /// Reports whose `provides` intersects `requires`, deduplicated by id
    #[must_use]
    pub fn route(&self, requires: &TagSet) -> Vec<&Report> {
        let ids: BTreeSet<&ReportId> = requires
            .iter()
            .filter_map(|tag| self.by_tag.get(tag))
            .flatten()
            .collect();
        ids.into_iter().filter_map(|id| self.reports.get(id)).collect()
    }

    /// Owned copies of the routed reports
    #[must_use]
    pub fn route_owned(&self, requires: &TagSet) -> Vec<Report> {
        self.route(requires).into_iter().cloned().collect()
    }

    /// Report by id
    #[inline]
    #[must_use]
    pub fn get(&self, id: &ReportId) -> Option<&Report> {
        self.reports.get(id)
    }

    /// Number of indexed reports
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.reports.len()
    }

    /// True if nothing is indexed
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    /// Every tag with at least one provider
    pub fn tags(&self) -> impl Iterator<Item = &Tag> {
        self.by_tag.iter().filter(|(_, ids)| !ids.is_empty()).map(|(t, _)| t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use strata_artifact::{tag_set, Analysis, Payload, UnitId};

    fn report(id: &str, tags: &[&str]) -> Report {
        Report::new(
            UnitId(id.into()),
            tag_set(tags.iter().copied()),
            Payload::Analysis(Analysis::default()),
        )
    }

    #[test]
    fn routes_union_of_tags_without_duplicates() {
        let index = TagIndex::build([
            report("a", &["focus:auth", "crypto"]),
            report("b", &["focus:db"]),
            report("c", &["crypto"]),
        ]);
        let routed: Vec<&str> = index
            .route(&tag_set(["crypto", "focus:auth"]))
            .iter()
            .map(|r| r.id.as_str())
            .collect();
        assert_eq!(routed, vec!["a", "c"]);
    }

    #[test]
    fn unknown_tags_route_nothing() {
        let index = TagIndex::build([report("a", &["focus:auth"])]);
        assert!(index.route(&tag_set(["focus:ui"])).is_empty());
        assert!(index.route(&TagSet::new()).is_empty());
    }

    #[test]
    fn reinsert_replaces_tags() {
        let mut index = TagIndex::build([report("a", &["old"])]);
        index.insert(report("a", &["new"]));
        assert_eq!(index.len(), 1);
        assert!(index.route(&tag_set(["old"])).is_empty());
        assert_eq!(index.route(&tag_set(["new"])).len(), 1);
        assert_eq!(index.tags().count(), 1);
    }

    proptest! {
        #[test]
        fn never_delivers_unrequested_reports(
            provided in prop::collection::vec(prop::collection::btree_set("[a-f]", 0..4), 0..12),
            requested in prop::collection::btree_set("[a-f]", 0..4),
        ) {
            let reports: Vec<Report> = provided
                .iter()
                .enumerate()
                .map(|(i, tags)| Report::new(
                    UnitId(format!("r{i}")),
                    tag_set(tags.iter()),
                    Payload::Analysis(Analysis::default()),
                ))
                .collect();
            let requires = tag_set(requested.iter());
            let index = TagIndex::build(reports.clone());
            let routed = index.route(&requires);

            for r in &routed {
                prop_assert!(!r.provides.is_disjoint(&requires));
            }
            let expected = reports.iter().filter(|r| !r.provides.is_disjoint(&requires)).count();
            prop_assert_eq!(routed.len(), expected);
        }
    }
}
