//! Analyze: full or incremental analysis per focus area, plus verification

use super::index::{FocusFiles, IndexResult};
use super::PhaseWork;
use crate::error::OrchestratorError;
use crate::orchestrator::Orchestrator;
use crate::run::RunRecord;
use crate::state_machine::Phase;
use crate::verification::{resolve_verdicts, spawn_verification, VerificationGate};
use crate::workspace::{HandoverSection, ANALYSIS_FILE, INDEX_FILE};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use strata_artifact::{Payload, Report, Tag, TagSet, UnitId};
use strata_delta::{Delta, FileDelta, FileStatus, TrackedFile};
use strata_dispatch::{InputSlice, TaskKind, TaskSpec};
use strata_ledger::{ConclusionSnapshot, DeltaSection};
use tracing::{debug, info};

/// How a focus area is analyzed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    /// Every file, from scratch
    Full,
    /// Changed files only; unchanged ones go to verification
    Incremental,
}

impl AnalysisMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
        }
    }
}

impl fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn analysis_task(focus: &str, mode: AnalysisMode, files: &[&TrackedFile], delta: Option<&Delta>) -> TaskSpec {
    let changes: BTreeMap<&str, FileDelta> = delta
        .map(|d| {
            files
                .iter()
                .map(|f| (f.path.as_str(), d.files.get(&f.path).copied().unwrap_or(FileDelta::of(FileStatus::New))))
                .collect()
        })
        .unwrap_or_default();
    let provides: TagSet = [Tag::focus(focus)].into_iter().collect();
    TaskSpec::new(UnitId::derive("analyze", &[focus, mode.as_str()]), "analyze", TaskKind::Analyze)
        .with_focus(focus)
        .with_inputs(files.iter().map(|f| InputSlice::whole(f.path.clone(), f.lines)).collect())
        .with_provides(provides)
        .with_context(json!({
            "mode": mode,
            "focus": focus,
            "changes": changes,
        }))
}

/// Tasks for one focus area
fn plan_focus(focus: &FocusFiles, delta: Option<&Delta>, prior: Option<&ConclusionSnapshot>) -> Vec<TaskSpec> {
    let (Some(delta), Some(prior)) = (delta, prior) else {
        let all: Vec<&TrackedFile> = focus.files.iter().collect();
        return vec![analysis_task(&focus.name, AnalysisMode::Full, &all, None)];
    };

    let (unchanged, changed): (Vec<&TrackedFile>, Vec<&TrackedFile>) =
        focus.files.iter().partition(|f| delta.is_unchanged(&f.path));
    let mut tasks = Vec::with_capacity(2);
    if !changed.is_empty() {
        tasks.push(analysis_task(&focus.name, AnalysisMode::Incremental, &changed, Some(delta)));
    }
    if !unchanged.is_empty() {
        let names: Vec<String> = unchanged.iter().map(|f| f.path.clone()).collect();
        tasks.push(spawn_verification(prior, delta, &names));
    }
    debug!(focus = %focus.name, changed = changed.len(), unchanged = unchanged.len(), "incremental plan");
    tasks
}

impl Orchestrator {
    pub(crate) async fn analyze_phase(&self, _run: &RunRecord) -> Result<PhaseWork, OrchestratorError> {
        let current = self.current();
        let index: IndexResult = current.read(INDEX_FILE)?.ok_or(OrchestratorError::MissingInput {
            phase: Phase::Analyze,
            input: INDEX_FILE,
        })?;
        let section: Option<DeltaSection> = current.handover_section(HandoverSection::Delta)?;
        let conclusions: Vec<ConclusionSnapshot> = current
            .handover_section(HandoverSection::Conclusions)?
            .unwrap_or_default();

        let gate = VerificationGate::new(self.config.verification.enabled, section.as_ref().map(|s| &s.delta));
        let mut gate_note = None;
        if section.is_some() {
            if let Some(reason) = gate.closed_reason() {
                info!(reason, "verification skipped; analyzing every focus area in full");
                gate_note = Some(format!("verification skipped: {reason}"));
            }
        }

        let tasks: Vec<TaskSpec> = index
            .focuses
            .iter()
            .flat_map(|focus| {
                let prior = conclusions.iter().find(|c| c.focus == focus.name);
                plan_focus(focus, gate.delta(), prior)
            })
            .map(|task| self.decorate(task))
            .collect();

        let (plan, mut work) = self.dispatch(Phase::Analyze, tasks).await;
        work.notes.extend(gate_note);

        let mut reports = self.logical_reports(Phase::Analyze, &plan)?;
        for report in &mut reports {
            carry_verified(report, &conclusions, &mut work);
        }
        current.write(ANALYSIS_FILE, &reports)?;
        Ok(work)
    }
}

/// Record the verified prior conclusions on a verification report
fn carry_verified(report: &mut Report, conclusions: &[ConclusionSnapshot], work: &mut PhaseWork) {
    let Payload::Verification(verification) = &mut report.payload else {
        return;
    };
    let focus = report.focus.as_deref().unwrap_or(verification.focus.as_str());
    let Some(snapshot) = conclusions.iter().find(|c| c.focus == focus) else {
        return;
    };
    let outcome = resolve_verdicts(snapshot, verification);
    if !outcome.needs_recheck.is_empty() {
        work.note(format!(
            "{focus}: {} of {} prior conclusions need recheck",
            outcome.needs_recheck.len(),
            snapshot.conclusions.len()
        ));
    }
    verification.carried = outcome.verified;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use strata_artifact::{Conclusion, VerificationReport};

    fn focus() -> FocusFiles {
        FocusFiles {
            name: "auth".into(),
            files: vec![TrackedFile::new("auth/a.src", 40), TrackedFile::new("auth/b.src", 15)],
        }
    }

    fn delta(b: FileStatus) -> Delta {
        let mut files = BTreeMap::new();
        files.insert("auth/a.src".to_string(), FileDelta::of(FileStatus::Unchanged));
        files.insert("auth/b.src".to_string(), FileDelta::of(b));
        Delta {
            prior_ref: Some("r1".into()),
            current_ref: "r2".into(),
            files,
            massive_rewrite: false,
            fallback: None,
        }
    }

    fn prior() -> ConclusionSnapshot {
        ConclusionSnapshot {
            focus: "auth".into(),
            report: UnitId("analyze-old".into()),
            provides: TagSet::new(),
            summary: String::new(),
            conclusions: vec![
                Conclusion {
                    id: "c1".into(),
                    statement: "a validates input".into(),
                    files: vec!["auth/a.src".into()],
                },
                Conclusion {
                    id: "c2".into(),
                    statement: "b logs".into(),
                    files: vec!["auth/b.src".into()],
                },
            ],
        }
    }

    #[test]
    fn without_prior_every_file_is_analyzed() {
        let d = delta(FileStatus::Modified);
        let tasks = plan_focus(&focus(), Some(&d), None);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].kind, TaskKind::Analyze);
        assert_eq!(tasks[0].inputs.len(), 2);
        assert_eq!(tasks[0].context["mode"], "full");
    }

    #[test]
    fn incremental_splits_changed_and_unchanged() {
        let d = delta(FileStatus::Modified);
        let p = prior();
        let tasks = plan_focus(&focus(), Some(&d), Some(&p));
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].context["mode"], "incremental");
        assert_eq!(tasks[0].inputs, vec![InputSlice::whole("auth/b.src", 15)]);
        assert_eq!(tasks[0].context["changes"]["auth/b.src"]["status"], "MODIFIED");
        assert_eq!(tasks[1].kind, TaskKind::Verify);
        assert!(tasks[1].inputs.is_empty());
    }

    #[test]
    fn fully_unchanged_focus_only_verifies() {
        let d = delta(FileStatus::Unchanged);
        let p = prior();
        let tasks = plan_focus(&focus(), Some(&d), Some(&p));
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].kind, TaskKind::Verify);
    }

    #[test]
    fn verified_conclusions_are_carried() {
        let mut report = Report::new(
            UnitId("verify-x".into()),
            TagSet::new(),
            Payload::Verification(VerificationReport {
                focus: "auth".into(),
                verdicts: vec![strata_artifact::ConclusionVerdict {
                    conclusion_id: "c1".into(),
                    verdict: strata_artifact::Verdict::Verified,
                }],
                ..VerificationReport::default()
            }),
        )
        .with_focus("auth");
        let mut work = PhaseWork::default();
        carry_verified(&mut report, &[prior()], &mut work);
        let Payload::Verification(v) = &report.payload else {
            panic!("payload changed kind");
        };
        assert_eq!(v.carried.len(), 1);
        assert_eq!(v.carried[0].id, "c1");
        assert_eq!(work.notes, vec!["auth: 1 of 2 prior conclusions need recheck".to_string()]);
    }
}
