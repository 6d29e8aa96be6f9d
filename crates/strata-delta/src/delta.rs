//! Delta Engine
//!
//! Classifies every tracked file as NEW, MODIFIED (minor or major),
//! UNCHANGED or DELETED between a prior and a current reference.
//!
//! # Failure mode
//!
//! When the prior reference cannot be resolved (history rewritten, shallow
//! clone) or the diff fails, every current file is classified NEW. This forces
//! full re-analysis instead of silently skipping work.

use crate::vcs::{ChangeKind, TrackedFile, VersionControl};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;
use tracing::{info, warn};

/// Per-file status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileStatus {
    /// Only in the current reference
    New,
    /// Content differs
    Modified,
    /// Identical in both references
    Unchanged,
    /// Only in the prior reference
    Deleted,
}

impl FileStatus {
    /// NEW or MODIFIED
    #[inline]
    #[must_use]
    pub fn is_changed(self) -> bool {
        matches!(self, Self::New | Self::Modified)
    }
}

impl Display for FileStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "NEW",
            Self::Modified => "MODIFIED",
            Self::Unchanged => "UNCHANGED",
            Self::Deleted => "DELETED",
        };
        f.write_str(s)
    }
}

/// Size of a modification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Magnitude {
    /// Fewer changed lines than the threshold
    Minor,
    /// At or above the threshold, or binary
    Major,
}

/// Classification of one path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDelta {
    /// Status
    pub status: FileStatus,
    /// Magnitude (MODIFIED only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub magnitude: Option<Magnitude>,
    /// Lines added plus removed
    #[serde(default)]
    pub changed_lines: u64,
}

impl FileDelta {
    /// Entry with no magnitude
    #[inline]
    #[must_use]
    pub fn of(status: FileStatus) -> Self {
        Self {
            status,
            magnitude: None,
            changed_lines: 0,
        }
    }
}

/// Delta Engine thresholds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeltaConfig {
    /// MODIFIED files with fewer changed lines are minor
    pub minor_line_threshold: u64,
    /// (NEW + MODIFIED) / total above this marks a massive rewrite
    pub massive_rewrite_ratio: f64,
}

impl Default for DeltaConfig {
    fn default() -> Self {
        Self {
            minor_line_threshold: 10,
            massive_rewrite_ratio: 0.70,
        }
    }
}

impl DeltaConfig {
    /// Validate thresholds
    ///
    /// # Errors
    /// Returns `DeltaError::InvalidRatio` if the ratio is outside (0, 1]
    pub fn validate(&self) -> Result<(), DeltaError> {
        let ratio = self.massive_rewrite_ratio;
        if ratio.is_nan() || ratio <= 0.0 || ratio > 1.0 {
            return Err(DeltaError::InvalidRatio(ratio));
        }
        Ok(())
    }

    /// Classify a modification by changed-line count
    #[inline]
    #[must_use]
    pub fn magnitude(&self, changed_lines: u64, binary: bool) -> Magnitude {
        if binary || changed_lines >= self.minor_line_threshold {
            Magnitude::Major
        } else {
            Magnitude::Minor
        }
    }
}

/// Counts per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaSummary {
    /// NEW files
    pub new: usize,
    /// MODIFIED/minor files
    pub modified_minor: usize,
    /// MODIFIED/major files
    pub modified_major: usize,
    /// UNCHANGED files
    pub unchanged: usize,
    /// DELETED files
    pub deleted: usize,
}

impl DeltaSummary {
    /// All MODIFIED files
    #[inline]
    #[must_use]
    pub fn modified(&self) -> usize {
        self.modified_minor + self.modified_major
    }

    /// Every classified path
    #[inline]
    #[must_use]
    pub fn total(&self) -> usize {
        self.new + self.modified() + self.unchanged + self.deleted
    }
}

/// File-level delta between two references
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    /// Prior reference, if any
    pub prior_ref: Option<String>,
    /// Current reference
    pub current_ref: String,
    /// Classification per path
    pub files: BTreeMap<String, FileDelta>,
    /// Change volume crossed the rewrite threshold
    pub massive_rewrite: bool,
    /// Why every file was classified NEW, when the engine fell back
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

impl Delta {
    /// Status of `path`, if it is part of the delta
    #[inline]
    #[must_use]
    pub fn status(&self, path: &str) -> Option<FileStatus> {
        self.files.get(path).map(|d| d.status)
    }

    /// True if `path` is classified UNCHANGED
    #[inline]
    #[must_use]
    pub fn is_unchanged(&self, path: &str) -> bool {
        self.status(path) == Some(FileStatus::Unchanged)
    }

    /// Paths with the given status, in sorted order
    pub fn paths_with(&self, status: FileStatus) -> impl Iterator<Item = &str> + '_ {
        self.files
            .iter()
            .filter(move |(_, d)| d.status == status)
            .map(|(p, _)| p.as_str())
    }

    /// Counts per status
    #[must_use]
    pub fn summary(&self) -> DeltaSummary {
        let mut summary = DeltaSummary::default();
        for delta in self.files.values() {
            match (delta.status, delta.magnitude) {
                (FileStatus::New, _) => summary.new += 1,
                (FileStatus::Modified, Some(Magnitude::Minor)) => summary.modified_minor += 1,
                (FileStatus::Modified, _) => summary.modified_major += 1,
                (FileStatus::Unchanged, _) => summary.unchanged += 1,
                (FileStatus::Deleted, _) => summary.deleted += 1,
            }
        }
        summary
    }

    /// (NEW + MODIFIED) / total; 0 for an empty delta
    #[must_use]
    pub fn change_ratio(&self) -> f64 {
        let summary = self.summary();
        if summary.total() == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let ratio = (summary.new + summary.modified()) as f64 / summary.total() as f64;
        ratio
    }
}

/// Computes [`Delta`]s through a [`VersionControl`] collaborator
#[derive(Clone)]
pub struct DeltaEngine {
    vcs: Arc<dyn VersionControl>,
    config: DeltaConfig,
    scope: Vec<String>,
}

impl fmt::Debug for DeltaEngine {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeltaEngine")
            .field("config", &self.config)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl DeltaEngine {
    /// Create new engine
    #[must_use]
    pub fn new(vcs: Arc<dyn VersionControl>, config: DeltaConfig) -> Self {
        Self {
            vcs,
            config,
            scope: Vec::new(),
        }
    }

    /// Restrict classification to paths under these prefixes
    #[must_use]
    pub fn with_scope(mut self, prefixes: Vec<String>) -> Self {
        self.scope = prefixes;
        self
    }

    /// Engine thresholds
    #[inline]
    #[must_use]
    pub fn config(&self) -> &DeltaConfig {
        &self.config
    }

    /// True if `path` is inside the configured scope
    #[must_use]
    pub fn in_scope(&self, path: &str) -> bool {
        self.scope.is_empty() || self.scope.iter().any(|p| path.starts_with(p.as_str()))
    }

    /// Classify every tracked path between `prior_ref` and `current_ref`
    ///
    /// `tracked` is the set of files tracked at `current_ref`. Paths deleted
    /// since `prior_ref` are added from the diff, so the result covers the
    /// union of both references.
    #[must_use]
    pub fn compute(&self, prior_ref: Option<&str>, current_ref: &str, tracked: &[TrackedFile]) -> Delta {
        let Some(prior) = prior_ref else {
            return self.all_new(None, current_ref, tracked, "no prior reference".to_string());
        };

        let changes = match self.vcs.resolve(prior).and_then(|resolved| self.vcs.diff(&resolved, current_ref)) {
            Ok(changes) => changes,
            Err(e) => {
                warn!(prior = %prior, error = %e, "prior reference unusable; classifying all files as NEW");
                return self.all_new(Some(prior), current_ref, tracked, e.to_string());
            }
        };

        let mut files: BTreeMap<String, FileDelta> = tracked
            .iter()
            .filter(|f| self.in_scope(&f.path))
            .map(|f| (f.path.clone(), FileDelta::of(FileStatus::Unchanged)))
            .collect();

        for change in changes.into_iter().filter(|c| self.in_scope(&c.path)) {
            let entry = match change.kind {
                ChangeKind::Added => FileDelta {
                    status: FileStatus::New,
                    magnitude: None,
                    changed_lines: change.changed_lines(),
                },
                ChangeKind::Modified => FileDelta {
                    status: FileStatus::Modified,
                    magnitude: Some(self.config.magnitude(change.changed_lines(), change.binary)),
                    changed_lines: change.changed_lines(),
                },
                ChangeKind::Deleted => FileDelta {
                    status: FileStatus::Deleted,
                    magnitude: None,
                    changed_lines: change.changed_lines(),
                },
            };
            files.insert(change.path, entry);
        }

        let mut delta = Delta {
            prior_ref: Some(prior.to_string()),
            current_ref: current_ref.to_string(),
            files,
            massive_rewrite: false,
            fallback: None,
        };
        delta.massive_rewrite = delta.change_ratio() > self.config.massive_rewrite_ratio;

        let summary = delta.summary();
        info!(
            prior = %prior,
            current = %current_ref,
            new = summary.new,
            modified = summary.modified(),
            unchanged = summary.unchanged,
            deleted = summary.deleted,
            massive_rewrite = delta.massive_rewrite,
            "delta computed"
        );
        delta
    }

    fn all_new(&self, prior: Option<&str>, current_ref: &str, tracked: &[TrackedFile], reason: String) -> Delta {
        let files: BTreeMap<String, FileDelta> = tracked
            .iter()
            .filter(|f| self.in_scope(&f.path))
            .map(|f| (f.path.clone(), FileDelta::of(FileStatus::New)))
            .collect();
        let massive_rewrite = !files.is_empty();
        Delta {
            prior_ref: prior.map(str::to_string),
            current_ref: current_ref.to_string(),
            files,
            massive_rewrite,
            fallback: Some(reason),
        }
    }
}

/// Delta errors
#[derive(Debug, thiserror::Error)]
pub enum DeltaError {
    /// Rewrite ratio outside (0, 1]
    #[error("massive_rewrite_ratio must be in (0, 1], got {0}")]
    InvalidRatio(f64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vcs::{FileChange, VcsError};
    use proptest::prelude::*;
    use std::collections::{BTreeSet, HashMap};

    /// Snapshot-map VCS: each ref maps path -> content
    #[derive(Default)]
    struct SnapshotVcs {
        refs: HashMap<String, BTreeMap<String, String>>,
    }

    impl SnapshotVcs {
        fn with(mut self, reference: &str, files: &[(&str, &str)]) -> Self {
            self.refs.insert(
                reference.to_string(),
                files.iter().map(|(p, c)| ((*p).to_string(), (*c).to_string())).collect(),
            );
            self
        }

        fn snapshot(&self, reference: &str) -> Result<&BTreeMap<String, String>, VcsError> {
            self.refs.get(reference).ok_or_else(|| VcsError::UnknownRef(reference.to_string()))
        }
    }

    impl VersionControl for SnapshotVcs {
        fn resolve(&self, reference: &str) -> Result<String, VcsError> {
            self.snapshot(reference).map(|_| reference.to_string())
        }

        fn tracked_files(&self, reference: &str) -> Result<Vec<TrackedFile>, VcsError> {
            Ok(self
                .snapshot(reference)?
                .iter()
                .map(|(p, c)| TrackedFile::new(p, c.lines().count() as u64))
                .collect())
        }

        fn diff(&self, from: &str, to: &str) -> Result<Vec<FileChange>, VcsError> {
            let a = self.snapshot(from)?;
            let b = self.snapshot(to)?;
            let mut out = Vec::new();
            for (path, content) in b {
                match a.get(path) {
                    None => out.push(FileChange::text(path, ChangeKind::Added, content.lines().count() as u64, 0)),
                    Some(old) if old != content => out.push(FileChange::text(
                        path,
                        ChangeKind::Modified,
                        content.lines().count() as u64,
                        old.lines().count() as u64,
                    )),
                    Some(_) => {}
                }
            }
            for (path, content) in a {
                if !b.contains_key(path) {
                    out.push(FileChange::text(path, ChangeKind::Deleted, 0, content.lines().count() as u64));
                }
            }
            Ok(out)
        }
    }

    fn engine(vcs: SnapshotVcs) -> (DeltaEngine, Arc<SnapshotVcs>) {
        let vcs = Arc::new(vcs);
        (DeltaEngine::new(vcs.clone(), DeltaConfig::default()), vcs)
    }

    #[test]
    fn classifies_each_status() {
        let (engine, vcs) = engine(
            SnapshotVcs::default()
                .with("A", &[("keep.src", "k"), ("x.src", "a"), ("y.src", "y")])
                .with("B", &[("keep.src", "k"), ("x.src", &"b\n".repeat(15)), ("z.src", "z")]),
        );
        let tracked = vcs.tracked_files("B").unwrap();
        let delta = engine.compute(Some("A"), "B", &tracked);

        assert_eq!(delta.status("keep.src"), Some(FileStatus::Unchanged));
        assert_eq!(delta.status("x.src"), Some(FileStatus::Modified));
        assert_eq!(delta.files["x.src"].magnitude, Some(Magnitude::Major));
        assert_eq!(delta.status("y.src"), Some(FileStatus::Deleted));
        assert_eq!(delta.status("z.src"), Some(FileStatus::New));
        assert!(delta.fallback.is_none());
    }

    #[test]
    fn small_modifications_are_minor() {
        let config = DeltaConfig::default();
        assert_eq!(config.magnitude(9, false), Magnitude::Minor);
        assert_eq!(config.magnitude(10, false), Magnitude::Major);
        assert_eq!(config.magnitude(0, true), Magnitude::Major);
    }

    #[test]
    fn unresolvable_prior_falls_back_to_all_new() {
        let (engine, vcs) = engine(SnapshotVcs::default().with("B", &[("a.src", "a"), ("b.src", "b")]));
        let tracked = vcs.tracked_files("B").unwrap();
        let delta = engine.compute(Some("gone"), "B", &tracked);

        assert!(delta.fallback.is_some());
        assert_eq!(delta.summary().new, 2);
        assert!(delta.massive_rewrite);
    }

    #[test]
    fn massive_rewrite_threshold_is_strict() {
        // 7 of 10 changed: exactly 0.70 is not a massive rewrite
        let before: Vec<(String, String)> = (0..10).map(|i| (format!("f{i}.src"), "old".to_string())).collect();
        let after: Vec<(String, String)> = (0..10)
            .map(|i| (format!("f{i}.src"), if i < 7 { "new".to_string() } else { "old".to_string() }))
            .collect();
        let as_refs = |v: &[(String, String)]| v.iter().map(|(a, b)| (a.clone(), b.clone())).collect::<BTreeMap<_, _>>();
        let mut vcs = SnapshotVcs::default();
        vcs.refs.insert("A".into(), as_refs(&before));
        vcs.refs.insert("B".into(), as_refs(&after));
        let (engine, vcs) = engine(vcs);
        let delta = engine.compute(Some("A"), "B", &vcs.tracked_files("B").unwrap());
        assert!((delta.change_ratio() - 0.7).abs() < f64::EPSILON);
        assert!(!delta.massive_rewrite);
    }

    #[test]
    fn scope_filters_paths() {
        let (engine, vcs) = engine(
            SnapshotVcs::default()
                .with("A", &[("src/a.rs", "a"), ("docs/x.md", "x")])
                .with("B", &[("src/a.rs", "a2"), ("docs/y.md", "y")]),
        );
        let engine = engine.with_scope(vec!["src/".to_string()]);
        let delta = engine.compute(Some("A"), "B", &vcs.tracked_files("B").unwrap());
        assert_eq!(delta.files.len(), 1);
        assert_eq!(delta.status("src/a.rs"), Some(FileStatus::Modified));
    }

    #[test]
    fn config_rejects_bad_ratio() {
        let config = DeltaConfig {
            massive_rewrite_ratio: 1.5,
            ..DeltaConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(DeltaConfig::default().validate().is_ok());
    }

    fn snapshot_strategy() -> impl Strategy<Value = BTreeMap<String, String>> {
        prop::collection::btree_map("[a-e]{1,2}\\.src", "[xy]{0,3}", 0..12)
    }

    proptest! {
        #[test]
        fn every_path_in_either_ref_gets_exactly_one_status(a in snapshot_strategy(), b in snapshot_strategy()) {
            let mut vcs = SnapshotVcs::default();
            vcs.refs.insert("A".into(), a.clone());
            vcs.refs.insert("B".into(), b.clone());
            let (engine, vcs) = engine(vcs);
            let delta = engine.compute(Some("A"), "B", &vcs.tracked_files("B").unwrap());

            let union: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
            prop_assert_eq!(delta.files.len(), union.len());
            prop_assert_eq!(delta.summary().total(), union.len());
            for path in union {
                let status = delta.status(path).unwrap();
                let expected = match (a.get(path), b.get(path)) {
                    (None, Some(_)) => FileStatus::New,
                    (Some(_), None) => FileStatus::Deleted,
                    (Some(x), Some(y)) if x == y => FileStatus::Unchanged,
                    _ => FileStatus::Modified,
                };
                prop_assert_eq!(status, expected);
            }
        }
    }
}
