//! Scan: delta, archive chain, handover and the lineage row

use super::PhaseWork;
use crate::error::OrchestratorError;
use crate::orchestrator::Orchestrator;
use crate::run::{BackPointer, HandoverState, RunRecord};
use crate::verification::condense;
use crate::workspace::{RunDir, ANALYSIS_FILE, FINDINGS_FILE, SCAN_FILE};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strata_artifact::{Finding, Report};
use strata_delta::{DeltaEngine, DeltaSummary, TrackedFile};
use strata_ledger::{
    dismissed_view, lineage_view, ArchiveEntry, DismissedChain, DismissedOp, HandoverBuilder, HandoverInputs,
    LineageChain, LineageRow, PriorRun,
};
use tracing::{info, warn};

/// `scan.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    /// Resolved reference
    pub reference: String,
    /// Files in scope at the reference
    pub tracked: Vec<TrackedFile>,
    /// Delta counts, when there was a prior run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<DeltaSummary>,
    /// Change volume disabled verification
    #[serde(default)]
    pub massive_rewrite: bool,
    /// Why the delta fell back to all-NEW
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

impl Orchestrator {
    pub(crate) async fn scan_phase(&self, run: &mut RunRecord) -> Result<PhaseWork, OrchestratorError> {
        let mut work = PhaseWork::default();
        let current = self.current();

        let history = self.workspace.archives().scan()?;
        for corrupt in &history.corrupt {
            work.note(format!("archive {} ignored: {}", corrupt.key, corrupt.reason));
        }
        let prior = history
            .valid
            .iter()
            .filter(|e| e.manifest.info.seq < run.seq)
            .max_by_key(|e| e.manifest.info.seq);

        let engine = DeltaEngine::new(Arc::clone(&self.vcs), self.config.delta).with_scope(self.config.include.clone());
        let tracked: Vec<TrackedFile> = self
            .vcs
            .tracked_files(&run.reference)?
            .into_iter()
            .filter(|f| engine.in_scope(&f.path))
            .collect();

        let open_row = LineageRow::open(run.seq, run.run_id.clone(), run.reference.clone(), run.started_at);
        let mut scan = ScanResult {
            reference: run.reference.clone(),
            tracked,
            delta: None,
            massive_rewrite: false,
            fallback: None,
        };

        let (mut lineage, dismissed) = match prior {
            None => {
                run.handover = HandoverState::FirstRun;
                run.back_pointer = None;
                info!(run = %run.run_id, "first run in chain");
                (LineageChain::new(), DismissedChain::new())
            }
            Some(entry) => self.stack_on(entry, run, &open_row, &mut scan, &mut work)?,
        };

        lineage.append(run.seq, open_row)?;
        current.save_lineage_chain(&lineage)?;
        current.save_dismissed_chain(&dismissed)?;
        current.write(SCAN_FILE, &scan)?;
        work.completed = scan.tracked.len();
        Ok(work)
    }

    /// Delta, back-pointer and (for a completed prior) the handover
    fn stack_on(
        &self,
        entry: &ArchiveEntry,
        run: &mut RunRecord,
        open_row: &LineageRow,
        scan: &mut ScanResult,
        work: &mut PhaseWork,
    ) -> Result<(LineageChain, DismissedChain), OrchestratorError> {
        let info = &entry.manifest.info;
        let prior_dir = RunDir::new(&entry.path);
        let engine = DeltaEngine::new(Arc::clone(&self.vcs), self.config.delta).with_scope(self.config.include.clone());

        let lineage = prior_dir.lineage_chain().unwrap_or_else(|e| {
            warn!(archive = %entry.key(), error = %e, "prior lineage chain unusable; starting a new chain");
            work.note(format!("prior lineage chain unusable ({e}); lineage restarted"));
            LineageChain::new()
        });
        let prior_rows = lineage_view(&lineage);

        let delta = engine.compute(Some(info.reference.as_str()), &run.reference, &scan.tracked);
        if let Some(reason) = &delta.fallback {
            work.note(format!("delta fallback, every file treated as NEW: {reason}"));
        }
        if delta.massive_rewrite {
            work.note("massive rewrite: verification disabled for this run");
        }
        scan.delta = Some(delta.summary());
        scan.massive_rewrite = delta.massive_rewrite;
        scan.fallback.clone_from(&delta.fallback);

        run.back_pointer = Some(BackPointer {
            archive: entry.path.clone(),
            prior_run_id: info.run_id.clone(),
            prior_seq: info.seq,
            prior_ref: info.reference.clone(),
            prior_completed: info.completed,
            prior_summary: prior_rows.iter().find(|r| r.seq == info.seq).and_then(|r| r.counts),
        });

        if !info.completed {
            let reason = format!(
                "prior run {} (seq {}) stopped during {}; handover skipped, no findings carried forward",
                info.run_id, info.seq, info.phase_reached
            );
            warn!(run = %run.run_id, prior = %info.run_id, "{reason}");
            work.note(reason.clone());
            run.handover = HandoverState::Skipped { reason };
            return Ok((lineage, DismissedChain::new()));
        }

        let mut dismissed = prior_dir.dismissed_chain().unwrap_or_else(|e| {
            warn!(archive = %entry.key(), error = %e, "prior dismissed ledger unusable; starting empty");
            work.note(format!("prior dismissed ledger unusable ({e}); no dismissals carried"));
            DismissedChain::new()
        });
        let findings: Vec<Finding> = prior_dir.read(FINDINGS_FILE)?.unwrap_or_default();
        let reports: Vec<Report> = prior_dir.read(ANALYSIS_FILE)?.unwrap_or_default();
        let inputs = HandoverInputs {
            findings,
            dismissed: dismissed_view(&dismissed),
            conclusions: condense(&reports),
            lineage: prior_rows,
        };
        let prior = PriorRun {
            run_id: info.run_id.clone(),
            seq: info.seq,
            reference: info.reference.clone(),
            archive: entry.path.clone(),
        };
        let handover = HandoverBuilder::new(prior, &delta).build(inputs, open_row.clone());
        self.current().save_handover(&handover)?;

        dismissed.append(run.seq, DismissedOp::Carry(handover.dismissed.clone()))?;
        run.handover = HandoverState::Built;
        Ok((lineage, dismissed))
    }
}
