//! Handover Builder
//!
//! Bridges an archived run into a new one. Each section is consumed
//! selectively by later phases, so the document is persisted one file per
//! section.

use crate::dedup::DismissedEntry;
use crate::lineage::LineageRow;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;
use strata_artifact::{Conclusion, Finding, ReportId, TagSet};
use strata_delta::{Delta, DeltaSummary, FileStatus};
use tracing::info;

/// How a carried finding must be treated in the new run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CarryTag {
    /// File unchanged: verify cheaply
    Verify,
    /// File changed: re-investigate
    Recheck,
    /// File deleted: resolved
    ResolvedByRemoval,
}

impl CarryTag {
    /// Tag for a finding whose file has `status` (`None` if the file left scope)
    #[must_use]
    pub fn for_status(status: Option<FileStatus>) -> Self {
        match status {
            Some(FileStatus::Unchanged) => Self::Verify,
            Some(FileStatus::Deleted) => Self::ResolvedByRemoval,
            Some(FileStatus::Modified | FileStatus::New) | None => Self::Recheck,
        }
    }
}

impl Display for CarryTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Verify => "VERIFY",
            Self::Recheck => "RECHECK",
            Self::ResolvedByRemoval => "RESOLVED_BY_REMOVAL",
        };
        f.write_str(s)
    }
}

/// One prior finding with its carry tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigestEntry {
    /// Prior finding
    pub finding: Finding,
    /// Carry tag
    pub tag: CarryTag,
    /// Current status of the finding's file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_status: Option<FileStatus>,
}

/// Condensed prior analysis for one focus area
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConclusionSnapshot {
    /// Focus area
    pub focus: String,
    /// Prior report id
    pub report: ReportId,
    /// Tags the prior report provided
    #[serde(default)]
    pub provides: TagSet,
    /// Prior summary
    #[serde(default)]
    pub summary: String,
    /// Prior conclusions
    #[serde(default)]
    pub conclusions: Vec<Conclusion>,
}

/// Delta section: summary plus per-file classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaSection {
    /// Counts
    pub summary: DeltaSummary,
    /// Full delta
    pub delta: Delta,
}

/// The prior run the handover bridges from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorRun {
    /// Run id
    pub run_id: String,
    /// Sequence number
    pub seq: u64,
    /// Codebase reference
    pub reference: String,
    /// Archive directory
    pub archive: PathBuf,
}

/// Everything read from the prior archive
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandoverInputs {
    /// Prior findings (all statuses; only open ones are carried)
    pub findings: Vec<Finding>,
    /// Prior dismissed-hypothesis ledger view
    pub dismissed: Vec<DismissedEntry>,
    /// Prior conclusions per focus area
    pub conclusions: Vec<ConclusionSnapshot>,
    /// Prior lineage table
    pub lineage: Vec<LineageRow>,
}

/// Handover document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Handover {
    /// Prior run
    pub prior: PriorRun,
    /// Delta summary and classification
    pub delta: DeltaSection,
    /// Findings digest
    pub findings: Vec<DigestEntry>,
    /// Dismissed-hypothesis ledger (UNCHANGED files only)
    pub dismissed: Vec<DismissedEntry>,
    /// Condensed prior conclusions
    pub conclusions: Vec<ConclusionSnapshot>,
    /// Cumulative lineage table including the current run's open row
    pub lineage: Vec<LineageRow>,
}

impl Handover {
    /// Digest entries with the given tag
    pub fn entries(&self, tag: CarryTag) -> impl Iterator<Item = &DigestEntry> {
        self.findings.iter().filter(move |e| e.tag == tag)
    }

    /// Prior conclusions for a focus area
    #[must_use]
    pub fn conclusions_for(&self, focus: &str) -> Option<&ConclusionSnapshot> {
        self.conclusions.iter().find(|c| c.focus == focus)
    }
}

/// Builds a [`Handover`] from prior-run inputs and a fresh delta
#[derive(Debug)]
pub struct HandoverBuilder<'a> {
    delta: &'a Delta,
    prior: PriorRun,
}

impl<'a> HandoverBuilder<'a> {
    /// Create new builder
    #[must_use]
    pub fn new(prior: PriorRun, delta: &'a Delta) -> Self {
        Self { delta, prior }
    }

    /// Build the handover; `current_row` is the new run's open lineage row
    #[must_use]
    pub fn build(self, inputs: HandoverInputs, current_row: LineageRow) -> Handover {
        let findings: Vec<DigestEntry> = inputs
            .findings
            .into_iter()
            .filter(|f| f.status.is_open())
            .map(|finding| {
                let file_status = self.delta.status(&finding.location.file);
                DigestEntry {
                    tag: CarryTag::for_status(file_status),
                    file_status,
                    finding,
                }
            })
            .collect();

        let dismissed: Vec<DismissedEntry> = inputs
            .dismissed
            .into_iter()
            .filter(|e| self.delta.is_unchanged(&e.file))
            .collect();

        let mut lineage: Vec<LineageRow> = inputs
            .lineage
            .into_iter()
            .filter(|r| r.seq != current_row.seq)
            .collect();
        lineage.push(current_row);
        lineage.sort_by_key(|r| r.seq);

        let count = |tag: CarryTag| findings.iter().filter(|e| e.tag == tag).count();
        info!(
            prior = %self.prior.run_id,
            verify = count(CarryTag::Verify),
            recheck = count(CarryTag::Recheck),
            resolved = count(CarryTag::ResolvedByRemoval),
            dismissed = dismissed.len(),
            lineage = lineage.len(),
            "handover built"
        );

        Handover {
            prior: self.prior,
            delta: DeltaSection {
                summary: self.delta.summary(),
                delta: self.delta.clone(),
            },
            findings,
            dismissed,
            conclusions: inputs.conclusions,
            lineage,
        }
    }
}
