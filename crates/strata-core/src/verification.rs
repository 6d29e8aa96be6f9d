//! Verification subsystem
//!
//! Re-validates prior conclusions about UNCHANGED regions instead of
//! re-deriving them. A verification task sees only the condensed prior
//! conclusions and the delta; it never receives source inputs.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use strata_artifact::{Concern, Conclusion, Payload, Report, Tag, TagSet, UnitId, Verdict, VerificationReport};
use strata_delta::{Delta, FileDelta, FileStatus};
use strata_dispatch::{TaskKind, TaskSpec};
use strata_ledger::ConclusionSnapshot;
use tracing::{debug, warn};

/// Reason recorded for conclusions a verifier did not address
pub const UNADDRESSED: &str = "not addressed by verification";

/// Decides whether verification runs at all for a run
#[derive(Debug, Clone, Copy)]
pub struct VerificationGate<'a> {
    enabled: bool,
    delta: Option<&'a Delta>,
}

impl<'a> VerificationGate<'a> {
    /// Gate over the configured switch and the handover delta, if any
    #[must_use]
    pub fn new(enabled: bool, delta: Option<&'a Delta>) -> Self {
        Self { enabled, delta }
    }

    /// Delta to verify against, only when the gate is open
    #[must_use]
    pub fn delta(&self) -> Option<&'a Delta> {
        self.delta.filter(|_| self.is_open())
    }

    /// True if verification tasks may be spawned
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.closed_reason().is_none()
    }

    /// Why the gate is closed
    #[must_use]
    pub fn closed_reason(&self) -> Option<&'static str> {
        match self.delta {
            _ if !self.enabled => Some("verification disabled"),
            None => Some("no handover"),
            Some(d) if d.massive_rewrite => Some("massive rewrite"),
            Some(_) => None,
        }
    }
}

/// Build the verification task for one focus area
///
/// `unchanged` are the focus area's UNCHANGED files; the task carries them
/// by name only.
#[must_use]
pub fn spawn_verification(snapshot: &ConclusionSnapshot, delta: &Delta, unchanged: &[String]) -> TaskSpec {
    let focus_tag = Tag::focus(&snapshot.focus);
    let changes: BTreeMap<&str, &FileDelta> = delta
        .files
        .iter()
        .filter(|(_, d)| d.status != FileStatus::Unchanged)
        .map(|(p, d)| (p.as_str(), d))
        .collect();
    let tags: TagSet = [focus_tag].into_iter().collect();
    debug!(focus = %snapshot.focus, unchanged = unchanged.len(), changes = changes.len(), "spawning verification");

    TaskSpec::new(UnitId::derive("verify", &[&snapshot.focus]), "analyze", TaskKind::Verify)
        .with_focus(snapshot.focus.clone())
        .with_provides(tags.clone())
        .with_requires(tags)
        .with_context(json!({
            "mode": "verify",
            "prior": snapshot,
            "unchanged_files": unchanged,
            "changes": changes,
        }))
}

/// Resolved verdicts for one focus area
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    /// Focus area
    pub focus: String,
    /// Conclusions that still hold
    pub verified: Vec<Conclusion>,
    /// Conclusions that must be re-examined, with the reason
    pub needs_recheck: Vec<(Conclusion, String)>,
    /// Paths a change opened into the unchanged region
    pub new_concerns: Vec<Concern>,
}

impl VerificationOutcome {
    /// Files named by conclusions needing recheck
    #[must_use]
    pub fn recheck_files(&self) -> BTreeSet<&str> {
        self.needs_recheck
            .iter()
            .flat_map(|(c, _)| c.files.iter().map(String::as_str))
            .collect()
    }

    /// True if a conclusion without files needs recheck, which taints the
    /// whole focus area
    #[must_use]
    pub fn invalidates_all(&self) -> bool {
        self.needs_recheck.iter().any(|(c, _)| c.files.is_empty())
    }

    /// True if prior findings on `file` can be carried without re-investigation
    #[must_use]
    pub fn is_verified(&self, file: &str) -> bool {
        !self.invalidates_all() && !self.recheck_files().contains(file)
    }
}

/// Resolve a verification report against the prior conclusions it was given
///
/// Conclusions the report does not mention default to NEEDS_RECHECK.
#[must_use]
pub fn resolve_verdicts(snapshot: &ConclusionSnapshot, report: &VerificationReport) -> VerificationOutcome {
    let verdicts: BTreeMap<&str, &Verdict> = report
        .verdicts
        .iter()
        .map(|v| (v.conclusion_id.as_str(), &v.verdict))
        .collect();
    let known: BTreeSet<&str> = snapshot.conclusions.iter().map(|c| c.id.as_str()).collect();
    for unknown in verdicts.keys().filter(|id| !known.contains(*id)) {
        warn!(focus = %snapshot.focus, conclusion = %unknown, "verdict for unknown conclusion ignored");
    }

    let mut outcome = VerificationOutcome {
        focus: snapshot.focus.clone(),
        new_concerns: report.new_concerns.clone(),
        ..VerificationOutcome::default()
    };
    for conclusion in &snapshot.conclusions {
        match verdicts.get(conclusion.id.as_str()) {
            Some(Verdict::Verified) => outcome.verified.push(conclusion.clone()),
            Some(Verdict::NeedsRecheck { reason }) => outcome.needs_recheck.push((conclusion.clone(), reason.clone())),
            None => outcome
                .needs_recheck
                .push((conclusion.clone(), UNADDRESSED.to_string())),
        }
    }
    outcome
}

/// Condense a run's logical reports into per-focus conclusion snapshots
///
/// Analysis conclusions are taken as-is; verification reports contribute
/// the prior conclusions they verified, so unchanged conclusions survive
/// any number of runs.
#[must_use]
pub fn condense(reports: &[Report]) -> Vec<ConclusionSnapshot> {
    let mut by_focus: BTreeMap<&str, ConclusionSnapshot> = BTreeMap::new();
    for report in reports {
        let Some(focus) = report.focus.as_deref() else {
            continue;
        };
        if !matches!(report.payload, Payload::Analysis(_) | Payload::Verification(_)) {
            continue;
        }
        let entry = by_focus.entry(focus).or_insert_with(|| ConclusionSnapshot {
            focus: focus.to_string(),
            report: report.id.clone(),
            provides: TagSet::new(),
            summary: String::new(),
            conclusions: Vec::new(),
        });
        match &report.payload {
            Payload::Analysis(analysis) => {
                entry.report = report.id.clone();
                if !analysis.summary.is_empty() {
                    if !entry.summary.is_empty() {
                        entry.summary.push_str("\n\n");
                    }
                    entry.summary.push_str(&analysis.summary);
                }
                entry.conclusions.extend(analysis.conclusions.iter().cloned());
            }
            Payload::Verification(verification) => {
                entry.conclusions.extend(verification.carried.iter().cloned());
            }
            Payload::Hypotheses(_) | Payload::Finding(_) => {}
        }
        entry.provides.extend(report.provides.iter().cloned());
    }
    let mut snapshots: Vec<ConclusionSnapshot> = by_focus.into_values().collect();
    for snapshot in &mut snapshots {
        let mut seen = BTreeSet::new();
        snapshot.conclusions.retain(|c| seen.insert(c.id.clone()));
    }
    snapshots
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_artifact::{tag_set, Analysis, ConclusionVerdict};

    fn conclusion(id: &str, files: &[&str]) -> Conclusion {
        Conclusion {
            id: id.into(),
            statement: format!("{id} holds"),
            files: files.iter().map(|f| (*f).to_string()).collect(),
        }
    }

    fn snapshot() -> ConclusionSnapshot {
        ConclusionSnapshot {
            focus: "auth".into(),
            report: UnitId("analyze-1".into()),
            provides: tag_set(["focus:auth"]),
            summary: "prior".into(),
            conclusions: vec![
                conclusion("c1", &["auth/a.src"]),
                conclusion("c2", &["auth/b.src"]),
                conclusion("c3", &["auth/c.src"]),
            ],
        }
    }

    fn delta(massive: bool) -> Delta {
        let mut files = BTreeMap::new();
        files.insert("auth/a.src".to_string(), FileDelta::of(FileStatus::Unchanged));
        files.insert("db/x.src".to_string(), FileDelta::of(FileStatus::New));
        Delta {
            prior_ref: Some("a".into()),
            current_ref: "b".into(),
            files,
            massive_rewrite: massive,
            fallback: None,
        }
    }

    #[test]
    fn gate_closes_on_massive_rewrite() {
        let calm = delta(false);
        let massive = delta(true);
        assert!(VerificationGate::new(true, Some(&calm)).is_open());
        assert_eq!(VerificationGate::new(true, Some(&massive)).closed_reason(), Some("massive rewrite"));
        assert!(VerificationGate::new(true, Some(&massive)).delta().is_none());
        assert_eq!(VerificationGate::new(true, None).closed_reason(), Some("no handover"));
        assert_eq!(VerificationGate::new(false, Some(&calm)).closed_reason(), Some("verification disabled"));
    }

    #[test]
    fn verification_task_has_no_source_inputs() {
        let task = spawn_verification(&snapshot(), &delta(false), &["auth/a.src".to_string()]);
        assert_eq!(task.kind, TaskKind::Verify);
        assert!(task.inputs.is_empty());
        assert_eq!(task.provides, tag_set(["focus:auth"]));
        assert_eq!(task.context["unchanged_files"][0], "auth/a.src");
        assert!(task.context["changes"].get("db/x.src").is_some());
        assert!(task.context["changes"].get("auth/a.src").is_none());
        assert!(task.unit.as_str().starts_with("verify-"));
    }

    #[test]
    fn unmentioned_conclusions_need_recheck() {
        let report = VerificationReport {
            focus: "auth".into(),
            verdicts: vec![
                ConclusionVerdict {
                    conclusion_id: "c1".into(),
                    verdict: Verdict::Verified,
                },
                ConclusionVerdict {
                    conclusion_id: "c2".into(),
                    verdict: Verdict::NeedsRecheck {
                        reason: "calls changed db code".into(),
                    },
                },
                ConclusionVerdict {
                    conclusion_id: "zz".into(),
                    verdict: Verdict::Verified,
                },
            ],
            new_concerns: Vec::new(),
            carried: Vec::new(),
        };
        let outcome = resolve_verdicts(&snapshot(), &report);
        assert_eq!(outcome.verified.len(), 1);
        assert_eq!(outcome.needs_recheck.len(), 2);
        assert_eq!(outcome.needs_recheck[1].1, UNADDRESSED);
        assert!(outcome.is_verified("auth/a.src"));
        assert!(!outcome.is_verified("auth/b.src"));
        assert!(!outcome.is_verified("auth/c.src"));
    }

    #[test]
    fn fileless_recheck_taints_focus() {
        let mut snap = snapshot();
        snap.conclusions.push(conclusion("global", &[]));
        let outcome = resolve_verdicts(&snap, &VerificationReport::default());
        assert!(outcome.invalidates_all());
        assert!(!outcome.is_verified("auth/a.src"));
    }

    #[test]
    fn condense_merges_analysis_and_verified_conclusions() {
        let analysis = Report::new(
            UnitId("analyze-1".into()),
            tag_set(["focus:auth"]),
            Payload::Analysis(Analysis {
                summary: "changed part".into(),
                conclusions: vec![conclusion("c4", &["auth/b.src"])],
            }),
        )
        .with_focus("auth");
        let verification = Report::new(
            UnitId("verify-1".into()),
            tag_set(["focus:auth"]),
            Payload::Verification(VerificationReport {
                focus: "auth".into(),
                carried: vec![conclusion("c1", &["auth/a.src"])],
                ..VerificationReport::default()
            }),
        )
        .with_focus("auth");
        let unfocused = Report::new(UnitId("x".into()), TagSet::new(), Payload::Analysis(Analysis::default()));

        let snapshots = condense(&[verification, analysis, unfocused]);
        assert_eq!(snapshots.len(), 1);
        let snap = &snapshots[0];
        assert_eq!(snap.report.as_str(), "analyze-1");
        assert_eq!(snap.summary, "changed part");
        let ids: Vec<&str> = snap.conclusions.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c4"]);
    }
}
