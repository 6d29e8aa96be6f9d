//! Report: lineage classification, ledger updates and the run report

use super::scan::ScanResult;
use super::PhaseWork;
use crate::error::OrchestratorError;
use crate::orchestrator::Orchestrator;
use crate::run::{BackPointer, RunNote, RunRecord};
use crate::state_machine::Phase;
use crate::workspace::{HandoverSection, FINDINGS_FILE, REPORT_FILE, SCAN_FILE};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use strata_artifact::{EvolutionTag, Finding, FindingId, FindingStatus, Severity};
use strata_delta::DeltaSummary;
use strata_ledger::{
    dismissals, dismissed_view, lineage_view, retirements, CarryTag, Classification, DigestEntry, DismissedOp,
    FindingTrace, LineageCounts, LineageRow, LineageTracker,
};
use tracing::{debug, info};

/// Why a prior finding is no longer present
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionCause {
    /// Its file was deleted
    Removed,
    /// Investigation no longer reproduces it
    NotReproduced,
}

/// Prior finding resolved in this run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedFinding {
    /// Last trace of the finding
    pub trace: FindingTrace,
    /// Cause
    pub cause: ResolutionCause,
}

/// Severity raised on a regression
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Escalation {
    /// Finding
    pub finding: FindingId,
    /// Severity the investigation reported
    pub from: Severity,
    /// Severity after escalation
    pub to: Severity,
}

/// `report.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub seq: u64,
    pub reference: String,
    pub generated_at: DateTime<Utc>,
    /// Prior run, for a stacked run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior: Option<BackPointer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<DeltaSummary>,
    #[serde(default)]
    pub massive_rewrite: bool,
    /// Counts written to the lineage row
    pub counts: LineageCounts,
    /// Open findings, persistent first, then by severity
    pub findings: Vec<Finding>,
    /// Persistent findings needing prioritized attention
    #[serde(default)]
    pub attention: Vec<FindingId>,
    /// Findings dismissed by investigation
    #[serde(default)]
    pub dismissed: usize,
    #[serde(default)]
    pub resolved: Vec<ResolvedFinding>,
    #[serde(default)]
    pub escalations: Vec<Escalation>,
    /// Lineage table including this run's closed row
    pub lineage: Vec<LineageRow>,
    #[serde(default)]
    pub notes: Vec<RunNote>,
}

/// Resolved findings with their cause
///
/// Findings on deleted files are resolved by removal even when no closed
/// prior row lists them.
fn resolutions(classification: &Classification, digest: &[DigestEntry]) -> Vec<ResolvedFinding> {
    let removed: Vec<&Finding> = digest
        .iter()
        .filter(|e| e.tag == CarryTag::ResolvedByRemoval)
        .map(|e| &e.finding)
        .collect();
    let mut out: Vec<ResolvedFinding> = classification
        .resolved
        .iter()
        .map(|trace| ResolvedFinding {
            cause: if removed.iter().any(|f| f.key() == trace.key) {
                ResolutionCause::Removed
            } else {
                ResolutionCause::NotReproduced
            },
            trace: trace.clone(),
        })
        .collect();
    for finding in removed {
        let key = finding.key();
        if out.iter().any(|r| r.trace.key == key) {
            continue;
        }
        out.push(ResolvedFinding {
            trace: FindingTrace {
                key,
                id: finding.id.clone(),
                condition: finding.condition.clone(),
                title: finding.title.clone(),
                location: finding.location.clone(),
                status: finding.status,
                severity: finding.severity,
                original_severity: finding.severity,
                evolution: Some(EvolutionTag::Resolved),
                streak: 0,
            },
            cause: ResolutionCause::Removed,
        });
    }
    out
}

/// Open findings ordered for the operator
fn ranked(findings: &[Finding]) -> Vec<Finding> {
    let mut open: Vec<Finding> = findings.iter().filter(|f| f.status.is_open()).cloned().collect();
    open.sort_by(|a, b| {
        (Reverse(a.persistent), Reverse(a.severity), &a.id).cmp(&(Reverse(b.persistent), Reverse(b.severity), &b.id))
    });
    open
}

impl Orchestrator {
    pub(crate) fn report_phase(&self, run: &RunRecord) -> Result<PhaseWork, OrchestratorError> {
        let current = self.current();
        let mut findings: Vec<Finding> = current.read(FINDINGS_FILE)?.ok_or(OrchestratorError::MissingInput {
            phase: Phase::Report,
            input: FINDINGS_FILE,
        })?;
        let scan: Option<ScanResult> = current.read(SCAN_FILE)?;
        let digest: Vec<DigestEntry> = current.handover_section(HandoverSection::Findings)?.unwrap_or_default();

        let mut chain = current.lineage_chain()?;
        let view = lineage_view(&chain);
        let prior_rows: Vec<LineageRow> = current
            .handover_section::<Vec<LineageRow>>(HandoverSection::Lineage)?
            .unwrap_or_else(|| view.clone())
            .into_iter()
            .filter(|r| r.seq < run.seq)
            .collect();

        let tracker = LineageTracker::new(self.config.lineage.persistence_threshold);
        let classification = tracker.classify(&findings, &prior_rows);
        tracker.apply(&mut findings, &classification);
        let traces = tracker.traces(&findings, &classification);

        let resolved = resolutions(&classification, &digest);
        let mut counts = classification.counts();
        counts.resolved = resolved.len();

        let open_row = view
            .into_iter()
            .find(|r| r.seq == run.seq)
            .unwrap_or_else(|| LineageRow::open(run.seq, run.run_id.clone(), run.reference.clone(), run.started_at));
        chain.append(run.seq, open_row.close(counts, traces))?;
        current.save_lineage_chain(&chain)?;

        let mut ledger = current.dismissed_chain()?;
        let retired = retirements(&findings, &dismissed_view(&ledger));
        let dismissed = dismissals(&findings, run.seq);
        if !retired.is_empty() || !dismissed.is_empty() {
            if !retired.is_empty() {
                debug!(retired = retired.len(), "open findings retire dismissals");
                ledger.append(run.seq, DismissedOp::Retire(retired))?;
            }
            if !dismissed.is_empty() {
                ledger.append(run.seq, DismissedOp::Record(dismissed))?;
            }
            current.save_dismissed_chain(&ledger)?;
        }
        current.write(FINDINGS_FILE, &findings)?;

        let escalations = classification
            .escalations
            .iter()
            .map(|(finding, (from, to))| Escalation {
                finding: finding.clone(),
                from: *from,
                to: *to,
            })
            .collect();
        let report = RunReport {
            run_id: run.run_id.clone(),
            seq: run.seq,
            reference: run.reference.clone(),
            generated_at: Utc::now(),
            prior: run.back_pointer.clone(),
            delta: scan.as_ref().and_then(|s| s.delta),
            massive_rewrite: scan.as_ref().is_some_and(|s| s.massive_rewrite),
            counts,
            findings: ranked(&findings),
            attention: classification.persistent.iter().cloned().collect(),
            dismissed: findings.iter().filter(|f| f.status == FindingStatus::Dismissed).count(),
            resolved,
            escalations,
            lineage: lineage_view(&chain),
            notes: run.notes.clone(),
        };
        current.write(REPORT_FILE, &report)?;
        info!(
            run = %run.run_id,
            open = counts.open,
            new = counts.new,
            recurrent = counts.recurrent,
            regression = counts.regression,
            resolved = counts.resolved,
            "run reported"
        );
        Ok(PhaseWork {
            completed: findings.len(),
            ..PhaseWork::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use strata_artifact::{HypothesisId, Location};

    fn finding(id: &str, condition: &str, severity: Severity, persistent: bool) -> Finding {
        Finding {
            id: FindingId(id.into()),
            hypothesis: HypothesisId("h".into()),
            status: FindingStatus::Confirmed,
            severity,
            condition: condition.into(),
            title: condition.into(),
            location: Location::file("a.src"),
            evidence: String::new(),
            evolution: None,
            persistent,
        }
    }

    #[test]
    fn ranking_puts_persistent_first() {
        let mut dismissed = finding("F-d", "d", Severity::Critical, false);
        dismissed.status = FindingStatus::Dismissed;
        let out = ranked(&[
            finding("F-a", "a", Severity::Low, false),
            finding("F-b", "b", Severity::High, false),
            finding("F-c", "c", Severity::Low, true),
            dismissed,
        ]);
        let ids: Vec<&str> = out.iter().map(|f| f.id.0.as_str()).collect();
        assert_eq!(ids, vec!["F-c", "F-b", "F-a"]);
    }

    #[test]
    fn removed_files_resolve_by_removal() {
        let gone = finding("F1-y", "leak", Severity::High, false);
        let digest = vec![DigestEntry {
            finding: gone.clone(),
            tag: CarryTag::ResolvedByRemoval,
            file_status: Some(strata_delta::FileStatus::Deleted),
        }];
        let out = resolutions(&Classification::default(), &digest);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].cause, ResolutionCause::Removed);
        assert_eq!(out[0].trace.key, gone.key());
        assert_eq!(out[0].trace.evolution, Some(EvolutionTag::Resolved));
    }
}
