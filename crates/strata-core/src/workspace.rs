//! Workspace layout
//!
//! ```text
//! <repo>/.strata/
//!   current/            active run (see RunDir)
//!   history/<key>/      archived runs, same layout plus archive.json
//! ```
//!
//! Archived runs keep the layout of the run directory they were moved from,
//! so the same [`RunDir`] reads both.

use crate::run::RunRecord;
use crate::state_machine::Phase;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use strata_artifact::{Report, UnitId};
use strata_dispatch::{ReportSink, SinkError};
use strata_ledger::{
    read_json, read_json_opt, write_json_atomic, ArchiveEntry, ArchiveError, ArchiveInfo, ArchiveManager,
    DismissedChain, Handover, LedgerError, LineageChain, RUN_RECORD_FILE,
};
use tracing::debug;

/// State directory under the repository root
pub const STATE_DIR: &str = ".strata";
/// Active run directory
pub const CURRENT_DIR: &str = "current";
/// Archive store
pub const HISTORY_DIR: &str = "history";

/// Tracked inventory and delta summary
pub const SCAN_FILE: &str = "scan.json";
/// Focus areas
pub const INDEX_FILE: &str = "index.json";
/// Logical analysis and verification reports
pub const ANALYSIS_FILE: &str = "analysis.json";
/// Synthesis output after deduplication
pub const HYPOTHESES_FILE: &str = "hypotheses.json";
/// Investigation output
pub const FINDINGS_FILE: &str = "findings.json";
/// Final report
pub const REPORT_FILE: &str = "report.json";
/// Lineage chain
pub const LINEAGE_CHAIN_FILE: &str = "ledger/lineage.json";
/// Dismissed-hypothesis chain
pub const DISMISSED_CHAIN_FILE: &str = "ledger/dismissed.json";

const HANDOVER_DIR: &str = "handover";
const UNITS_DIR: &str = "units";

/// Handover sections, one file each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandoverSection {
    Prior,
    Delta,
    Findings,
    Dismissed,
    Conclusions,
    Lineage,
}

impl HandoverSection {
    /// File name inside the handover directory
    #[must_use]
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Prior => "prior.json",
            Self::Delta => "delta.json",
            Self::Findings => "findings.json",
            Self::Dismissed => "dismissed.json",
            Self::Conclusions => "conclusions.json",
            Self::Lineage => "lineage.json",
        }
    }
}

/// One run's directory, active or archived
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDir {
    dir: PathBuf,
}

impl RunDir {
    /// Wrap a directory
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// True if the directory exists
    #[must_use]
    pub fn exists(&self) -> bool {
        self.dir.is_dir()
    }

    /// Path of a file inside the run directory
    #[must_use]
    pub fn file(&self, relative: &str) -> PathBuf {
        self.dir.join(relative)
    }

    /// Read a document, `None` if absent
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read or parsed
    pub fn read<T: DeserializeOwned>(&self, relative: &str) -> Result<Option<T>, LedgerError> {
        read_json_opt(&self.file(relative))
    }

    /// Read a document that must exist
    ///
    /// # Errors
    /// Returns error if the file is missing or malformed
    pub fn read_required<T: DeserializeOwned>(&self, relative: &str) -> Result<T, LedgerError> {
        read_json(&self.file(relative))
    }

    /// Write a document atomically
    ///
    /// # Errors
    /// Returns error if serialization or the write fails
    pub fn write<T: Serialize + ?Sized>(&self, relative: &str, value: &T) -> Result<(), LedgerError> {
        write_json_atomic(&self.file(relative), value)
    }

    /// Run Record, `None` if absent
    ///
    /// # Errors
    /// Returns error if the record exists but cannot be read
    pub fn load_run(&self) -> Result<Option<RunRecord>, LedgerError> {
        self.read(RUN_RECORD_FILE)
    }

    /// Persist the Run Record
    ///
    /// # Errors
    /// Returns error if the write fails
    pub fn save_run(&self, run: &RunRecord) -> Result<(), LedgerError> {
        self.write(RUN_RECORD_FILE, run)
    }

    /// Lineage chain, verified; empty if absent
    ///
    /// # Errors
    /// Returns error if the chain is malformed or fails integrity checks
    pub fn lineage_chain(&self) -> Result<LineageChain, LedgerError> {
        LineageChain::load(&self.file(LINEAGE_CHAIN_FILE))
    }

    /// Persist the lineage chain
    ///
    /// # Errors
    /// Returns error if the write fails
    pub fn save_lineage_chain(&self, chain: &LineageChain) -> Result<(), LedgerError> {
        chain.save(&self.file(LINEAGE_CHAIN_FILE))
    }

    /// Dismissed-hypothesis chain, verified; empty if absent
    ///
    /// # Errors
    /// Returns error if the chain is malformed or fails integrity checks
    pub fn dismissed_chain(&self) -> Result<DismissedChain, LedgerError> {
        DismissedChain::load(&self.file(DISMISSED_CHAIN_FILE))
    }

    /// Persist the dismissed-hypothesis chain
    ///
    /// # Errors
    /// Returns error if the write fails
    pub fn save_dismissed_chain(&self, chain: &DismissedChain) -> Result<(), LedgerError> {
        chain.save(&self.file(DISMISSED_CHAIN_FILE))
    }

    /// True if a handover was written for this run
    #[must_use]
    pub fn has_handover(&self) -> bool {
        self.section_path(HandoverSection::Prior).is_file()
    }

    /// Persist a handover, one file per section
    ///
    /// # Errors
    /// Returns error if any section write fails
    pub fn save_handover(&self, handover: &Handover) -> Result<(), LedgerError> {
        write_json_atomic(&self.section_path(HandoverSection::Delta), &handover.delta)?;
        write_json_atomic(&self.section_path(HandoverSection::Findings), &handover.findings)?;
        write_json_atomic(&self.section_path(HandoverSection::Dismissed), &handover.dismissed)?;
        write_json_atomic(&self.section_path(HandoverSection::Conclusions), &handover.conclusions)?;
        write_json_atomic(&self.section_path(HandoverSection::Lineage), &handover.lineage)?;
        // written last: its presence marks a complete handover
        write_json_atomic(&self.section_path(HandoverSection::Prior), &handover.prior)
    }

    /// Read one handover section, `None` if there is no handover
    ///
    /// # Errors
    /// Returns error if the section exists but cannot be parsed
    pub fn handover_section<T: DeserializeOwned>(&self, section: HandoverSection) -> Result<Option<T>, LedgerError> {
        if !self.has_handover() {
            return Ok(None);
        }
        read_json_opt(&self.section_path(section))
    }

    /// Output store for one phase's units
    #[must_use]
    pub fn units(&self, phase: Phase) -> UnitStore {
        UnitStore::new(self.dir.join(UNITS_DIR).join(phase.name()))
    }

    fn section_path(&self, section: HandoverSection) -> PathBuf {
        self.dir.join(HANDOVER_DIR).join(section.file_name())
    }
}

/// Per-phase unit outputs: `units/<phase>/<unit>.json`
///
/// Each unit writes only its own file, so concurrent units never contend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitStore {
    dir: PathBuf,
}

impl UnitStore {
    /// Store rooted at `dir`
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of a unit's output
    #[must_use]
    pub fn path(&self, unit: &UnitId) -> PathBuf {
        self.dir.join(format!("{unit}.json"))
    }

    /// Load one unit's output
    ///
    /// # Errors
    /// Returns error if the output exists but cannot be parsed
    pub fn load(&self, unit: &UnitId) -> Result<Option<Report>, LedgerError> {
        read_json_opt(&self.path(unit))
    }

    /// Every persisted output, ordered by unit id
    ///
    /// # Errors
    /// Returns error if the directory cannot be listed or an output is malformed
    pub fn load_all(&self) -> Result<Vec<Report>, LedgerError> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(&self.dir).map_err(|e| io_error(&self.dir, e))? {
            let path = entry.map_err(|e| io_error(&self.dir, e))?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();
        paths.iter().map(|p| read_json(p)).collect()
    }
}

impl ReportSink for UnitStore {
    fn exists(&self, unit: &UnitId) -> bool {
        self.path(unit).is_file()
    }

    fn persist(&self, report: &Report) -> Result<(), SinkError> {
        let path = self.path(&report.id);
        write_json_atomic(&path, report)?;
        debug!(unit = %report.id, path = %path.display(), "unit output persisted");
        Ok(())
    }
}

fn io_error(path: &Path, source: std::io::Error) -> LedgerError {
    LedgerError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Repository-level state directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    repo: PathBuf,
    state: PathBuf,
}

impl Workspace {
    /// Workspace for a repository, state under `<repo>/.strata`
    #[must_use]
    pub fn new(repo: impl Into<PathBuf>) -> Self {
        let repo = repo.into();
        let state = repo.join(STATE_DIR);
        Self { repo, state }
    }

    /// Workspace with an explicit state directory
    #[must_use]
    pub fn with_state_dir(repo: impl Into<PathBuf>, state: impl Into<PathBuf>) -> Self {
        Self {
            repo: repo.into(),
            state: state.into(),
        }
    }

    /// Repository root
    #[inline]
    #[must_use]
    pub fn repo(&self) -> &Path {
        &self.repo
    }

    /// State directory
    #[inline]
    #[must_use]
    pub fn state_dir(&self) -> &Path {
        &self.state
    }

    /// Active run directory
    #[must_use]
    pub fn current(&self) -> RunDir {
        RunDir::new(self.state.join(CURRENT_DIR))
    }

    /// Archive manager over `history/`
    #[must_use]
    pub fn archives(&self) -> ArchiveManager {
        ArchiveManager::new(self.state.join(HISTORY_DIR))
    }

    /// Move the active run into history
    ///
    /// # Errors
    /// Returns error if there is no active run or the move fails
    pub fn archive_current(&self, info: ArchiveInfo) -> Result<ArchiveEntry, ArchiveError> {
        self.archives().archive(self.current().path(), info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrataConfig;
    use crate::run::RunSettingsSnapshot;
    use chrono::Utc;
    use strata_artifact::{tag_set, Analysis, Payload};
    use strata_delta::Delta;
    use strata_ledger::{DeltaSection, LineageRow, PriorRun};

    fn report(id: &str) -> Report {
        Report::new(UnitId(id.into()), tag_set(["focus:a"]), Payload::Analysis(Analysis::default()))
    }

    #[test]
    fn unit_store_is_a_resumable_sink() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunDir::new(dir.path()).units(Phase::Analyze);
        let unit = UnitId("analyze-1".into());
        assert!(!store.exists(&unit));
        store.persist(&report("analyze-1")).unwrap();
        store.persist(&report("analyze-0")).unwrap();
        assert!(store.exists(&unit));
        assert!(store.path(&unit).ends_with("units/analyze/analyze-1.json"));
        let all = store.load_all().unwrap();
        assert_eq!(all.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), vec!["analyze-0", "analyze-1"]);
    }

    #[test]
    fn run_record_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let run_dir = RunDir::new(dir.path().join("current"));
        assert!(run_dir.load_run().unwrap().is_none());
        let run = RunRecord::new(3, "abc", RunSettingsSnapshot::from(&StrataConfig::default()));
        run_dir.save_run(&run).unwrap();
        assert_eq!(run_dir.load_run().unwrap(), Some(run));
    }

    #[test]
    fn handover_sections_read_independently() {
        let dir = tempfile::tempdir().unwrap();
        let run_dir = RunDir::new(dir.path());
        assert!(run_dir
            .handover_section::<DeltaSection>(HandoverSection::Delta)
            .unwrap()
            .is_none());

        let delta = Delta {
            prior_ref: Some("a".into()),
            current_ref: "b".into(),
            files: Default::default(),
            massive_rewrite: false,
            fallback: None,
        };
        let handover = Handover {
            prior: PriorRun {
                run_id: "r1".into(),
                seq: 1,
                reference: "a".into(),
                archive: dir.path().join("history/x"),
            },
            delta: DeltaSection {
                summary: delta.summary(),
                delta,
            },
            findings: Vec::new(),
            dismissed: Vec::new(),
            conclusions: Vec::new(),
            lineage: vec![LineageRow::open(2, "r2", "b", Utc::now())],
        };
        run_dir.save_handover(&handover).unwrap();
        assert!(run_dir.has_handover());
        let lineage: Vec<LineageRow> = run_dir.handover_section(HandoverSection::Lineage).unwrap().unwrap();
        assert_eq!(lineage.len(), 1);
        let section: DeltaSection = run_dir.handover_section(HandoverSection::Delta).unwrap().unwrap();
        assert_eq!(section.delta.current_ref, "b");
    }

    #[test]
    fn archive_moves_current_into_history() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path());
        let run = RunRecord::new(1, "abcdef12", RunSettingsSnapshot::default());
        ws.current().save_run(&run).unwrap();
        let entry = ws
            .archive_current(ArchiveInfo {
                run_id: run.run_id.clone(),
                seq: 1,
                reference: "abcdef12".into(),
                completed: false,
                phase_reached: "scan".into(),
            })
            .unwrap();
        assert!(!ws.current().exists());
        let archived = RunDir::new(&entry.path);
        assert_eq!(archived.load_run().unwrap().unwrap().run_id, run.run_id);
        assert_eq!(ws.archives().scan().unwrap().valid.len(), 1);
    }
}
