//! Index: group tracked files into focus areas

use super::scan::ScanResult;
use super::PhaseWork;
use crate::config::FocusArea;
use crate::error::OrchestratorError;
use crate::orchestrator::Orchestrator;
use crate::run::RunRecord;
use crate::state_machine::Phase;
use crate::workspace::{INDEX_FILE, SCAN_FILE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strata_delta::TrackedFile;
use tracing::debug;

/// Focus area name for files at the repository root
pub const ROOT_FOCUS: &str = "root";

/// Files of one focus area
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusFiles {
    /// Focus area name
    pub name: String,
    /// Files, sorted by path
    pub files: Vec<TrackedFile>,
}

impl FocusFiles {
    /// Paths of the files
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|f| f.path.as_str())
    }
}

/// `index.json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexResult {
    /// Focus areas, sorted by name
    pub focuses: Vec<FocusFiles>,
}

impl IndexResult {
    /// Group `tracked` into focus areas
    ///
    /// A file belongs to the first configured area that contains it, else to
    /// the area named by its top-level directory.
    #[must_use]
    pub fn group(tracked: &[TrackedFile], areas: &[FocusArea]) -> Self {
        let mut groups: BTreeMap<String, Vec<TrackedFile>> = BTreeMap::new();
        for file in tracked {
            groups.entry(focus_name(&file.path, areas)).or_default().push(file.clone());
        }
        let focuses = groups
            .into_iter()
            .map(|(name, mut files)| {
                files.sort_by(|a, b| a.path.cmp(&b.path));
                FocusFiles { name, files }
            })
            .collect();
        Self { focuses }
    }

    /// Focus area owning `path`
    #[must_use]
    pub fn focus_of(&self, path: &str) -> Option<&str> {
        self.focuses
            .iter()
            .find(|f| f.files.iter().any(|t| t.path == path))
            .map(|f| f.name.as_str())
    }

    /// Focus area by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FocusFiles> {
        self.focuses.iter().find(|f| f.name == name)
    }
}

fn focus_name(path: &str, areas: &[FocusArea]) -> String {
    if let Some(area) = areas.iter().find(|a| a.contains(path)) {
        return area.name.clone();
    }
    match path.split_once('/') {
        Some((top, _)) if !top.is_empty() => top.to_string(),
        _ => ROOT_FOCUS.to_string(),
    }
}

impl Orchestrator {
    pub(crate) fn index_phase(&self, _run: &RunRecord) -> Result<PhaseWork, OrchestratorError> {
        let current = self.current();
        let scan: ScanResult = current.read(SCAN_FILE)?.ok_or(OrchestratorError::MissingInput {
            phase: Phase::Index,
            input: SCAN_FILE,
        })?;
        let index = IndexResult::group(&scan.tracked, &self.config.focus);
        for focus in &index.focuses {
            debug!(focus = %focus.name, files = focus.files.len(), "focus area indexed");
        }
        current.write(INDEX_FILE, &index)?;
        Ok(PhaseWork {
            completed: index.focuses.len(),
            ..PhaseWork::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn files(paths: &[&str]) -> Vec<TrackedFile> {
        paths.iter().map(|p| TrackedFile::new(*p, 10)).collect()
    }

    #[test]
    fn groups_by_top_level_directory() {
        let index = IndexResult::group(&files(&["db/b.src", "auth/a.src", "db/a.src", "README"]), &[]);
        let names: Vec<&str> = index.focuses.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["auth", "db", ROOT_FOCUS]);
        let db: Vec<&str> = index.get("db").map(|f| f.paths().collect()).unwrap_or_default();
        assert_eq!(db, vec!["db/a.src", "db/b.src"]);
        assert_eq!(index.focus_of("README"), Some(ROOT_FOCUS));
    }

    #[test]
    fn configured_areas_take_precedence() {
        let areas = vec![FocusArea {
            name: "core".into(),
            paths: vec!["auth/".into(), "db/".into()],
        }];
        let index = IndexResult::group(&files(&["auth/a.src", "db/a.src", "web/x.src"]), &areas);
        assert_eq!(index.focus_of("auth/a.src"), Some("core"));
        assert_eq!(index.focus_of("db/a.src"), Some("core"));
        assert_eq!(index.focus_of("web/x.src"), Some("web"));
        assert_eq!(index.focus_of("missing"), None);
    }
}
