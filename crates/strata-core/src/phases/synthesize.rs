//! Synthesize: propose, carry and deduplicate hypotheses

use super::index::IndexResult;
use super::PhaseWork;
use crate::config::ScopeTier;
use crate::error::OrchestratorError;
use crate::orchestrator::Orchestrator;
use crate::run::RunRecord;
use crate::state_machine::Phase;
use crate::verification::{resolve_verdicts, VerificationOutcome};
use crate::workspace::{HandoverSection, ANALYSIS_FILE, HYPOTHESES_FILE, INDEX_FILE};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use strata_artifact::{
    Disposition, Hypothesis, Location, Origin, Payload, Report, Tag, TagSet, UnitId,
};
use strata_dispatch::{TagIndex, TaskKind, TaskSpec};
use strata_ledger::{
    CarryTag, ConclusionSnapshot, DedupEngine, DeltaSection, DigestEntry, DismissedEntry, DropReason, DroppedHypothesis,
};
use tracing::{debug, info};

/// `hypotheses.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HypothesisSet {
    /// Hypotheses to investigate or carry, in order
    pub hypotheses: Vec<Hypothesis>,
    /// Suppressed by the dismissed ledger or as duplicates
    #[serde(default)]
    pub dropped: Vec<DroppedHypothesis>,
    /// Over the scope tier's per-focus cap
    #[serde(default)]
    pub deferred: Vec<Hypothesis>,
    /// Novel hypotheses kept by the novel floor
    #[serde(default)]
    pub rescued: usize,
}

impl HypothesisSet {
    /// Hypotheses needing an investigation task
    pub fn to_investigate(&self) -> impl Iterator<Item = &Hypothesis> {
        self.hypotheses.iter().filter(|h| h.disposition == Disposition::Investigate)
    }

    /// Hypotheses carried from a verified prior finding
    pub fn carried(&self) -> impl Iterator<Item = &Hypothesis> {
        self.hypotheses.iter().filter(|h| h.disposition == Disposition::Carried)
    }
}

fn focus_tags(focus: &str) -> TagSet {
    [Tag::focus(focus)].into_iter().collect()
}

/// Focus area a hypothesis is counted against
fn focus_key(hyp: &Hypothesis) -> String {
    hyp.requires
        .iter()
        .find_map(Tag::focus_name)
        .unwrap_or_default()
        .to_string()
}

/// Hypotheses for prior findings, per their carry tag
///
/// VERIFY findings are carried when verification confirmed every conclusion
/// about their file; otherwise they are rechecked like changed files.
fn from_digest(
    digest: &[DigestEntry],
    index: &IndexResult,
    outcomes: &BTreeMap<String, VerificationOutcome>,
) -> Vec<Hypothesis> {
    let mut out = Vec::with_capacity(digest.len());
    for entry in digest {
        let finding = &entry.finding;
        let file = finding.location.file.as_str();
        let focus = index.focus_of(file);
        let requires = focus.map(focus_tags).unwrap_or_default();
        let hyp = Hypothesis::new(
            Origin::Recheck {
                prior_finding: finding.id.clone(),
            },
            finding.condition.clone(),
            finding.title.clone(),
            finding.location.clone(),
        )
        .with_severity(finding.severity)
        .with_requires(requires);

        match entry.tag {
            CarryTag::ResolvedByRemoval => continue,
            CarryTag::Verify => {
                let verified = focus
                    .and_then(|f| outcomes.get(f))
                    .is_some_and(|o| o.is_verified(file));
                if verified {
                    out.push(hyp.carried());
                } else {
                    debug!(finding = %finding.id, file, "verification did not cover finding; rechecking");
                    out.push(hyp);
                }
            }
            CarryTag::Recheck => out.push(hyp),
        }
    }
    out
}

/// Worker proposals, normalized and bound to their focus area
fn from_proposals(reports: &[Report]) -> Vec<Hypothesis> {
    let mut out = Vec::new();
    for report in reports {
        let Payload::Hypotheses(proposed) = &report.payload else {
            continue;
        };
        let requires = report.focus.as_deref().map(focus_tags).unwrap_or_default();
        for hyp in proposed {
            let mut hyp = hyp.clone();
            hyp.disposition = Disposition::Investigate;
            if hyp.requires.is_empty() {
                hyp.requires.clone_from(&requires);
            }
            hyp.normalize_id();
            out.push(hyp);
        }
    }
    out
}

/// New concerns raised by verification become novel hypotheses
fn from_concerns(outcomes: &BTreeMap<String, VerificationOutcome>) -> Vec<Hypothesis> {
    outcomes
        .values()
        .flat_map(|o| {
            o.new_concerns.iter().map(move |c| {
                Hypothesis::new(Origin::Novel, c.condition.clone(), c.description.clone(), Location::file(c.file.clone()))
                    .with_requires(focus_tags(&o.focus))
            })
        })
        .collect()
}

/// Verification outcomes per focus area, re-resolved from the analysis reports
fn outcomes(reports: &[Report], conclusions: &[ConclusionSnapshot]) -> BTreeMap<String, VerificationOutcome> {
    reports
        .iter()
        .filter_map(|r| match &r.payload {
            Payload::Verification(v) => {
                let focus = r.focus.as_deref().unwrap_or(v.focus.as_str());
                let snapshot = conclusions.iter().find(|c| c.focus == focus)?;
                Some((focus.to_string(), resolve_verdicts(snapshot, v)))
            }
            _ => None,
        })
        .collect()
}

/// Apply the scope tier's per-focus cap to non-recheck hypotheses
fn cap(hypotheses: Vec<Hypothesis>, scope: ScopeTier) -> (Vec<Hypothesis>, Vec<Hypothesis>) {
    let Some(max) = scope.max_hypotheses_per_focus() else {
        return (hypotheses, Vec::new());
    };
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut kept = Vec::with_capacity(hypotheses.len());
    let mut deferred = Vec::new();
    for hyp in hypotheses {
        if matches!(hyp.origin, Origin::Recheck { .. }) {
            kept.push(hyp);
            continue;
        }
        let count = counts.entry(focus_key(&hyp)).or_default();
        if *count < max {
            *count += 1;
            kept.push(hyp);
        } else {
            deferred.push(hyp);
        }
    }
    (kept, deferred)
}

impl Orchestrator {
    pub(crate) async fn synthesize_phase(&self, _run: &RunRecord) -> Result<PhaseWork, OrchestratorError> {
        let current = self.current();
        let analysis: Vec<Report> = current.read(ANALYSIS_FILE)?.ok_or(OrchestratorError::MissingInput {
            phase: Phase::Synthesize,
            input: ANALYSIS_FILE,
        })?;
        let index: IndexResult = current.read(INDEX_FILE)?.ok_or(OrchestratorError::MissingInput {
            phase: Phase::Synthesize,
            input: INDEX_FILE,
        })?;
        let digest: Vec<DigestEntry> = current.handover_section(HandoverSection::Findings)?.unwrap_or_default();
        let dismissed: Vec<DismissedEntry> = current.handover_section(HandoverSection::Dismissed)?.unwrap_or_default();
        let conclusions: Vec<ConclusionSnapshot> =
            current.handover_section(HandoverSection::Conclusions)?.unwrap_or_default();
        let delta: Option<DeltaSection> = current.handover_section(HandoverSection::Delta)?;

        let scope = self.config.run.scope;
        let router = TagIndex::build(analysis.iter().cloned());
        let tasks: Vec<TaskSpec> = index
            .focuses
            .iter()
            .map(|focus| {
                let tags = focus_tags(&focus.name);
                let routed = router.route_owned(&tags);
                TaskSpec::new(UnitId::derive("synthesize", &[&focus.name]), "synthesize", TaskKind::Synthesize)
                    .with_focus(focus.name.clone())
                    .with_routed(routed)
                    .with_provides(tags.clone())
                    .with_requires(tags)
                    .with_context(json!({
                        "focus": focus.name,
                        "scope": scope,
                        "max_hypotheses": scope.max_hypotheses_per_focus(),
                        "files": focus.paths().collect::<Vec<_>>(),
                        "conclusions": conclusions.iter().find(|c| c.focus == focus.name),
                    }))
            })
            .map(|task| self.decorate(task))
            .collect();

        let (plan, mut work) = self.dispatch(Phase::Synthesize, tasks).await;
        let proposals = self.logical_reports(Phase::Synthesize, &plan)?;

        let outcomes = outcomes(&analysis, &conclusions);
        let mut proposed = from_digest(&digest, &index, &outcomes);
        proposed.extend(from_proposals(&proposals));
        proposed.extend(from_concerns(&outcomes));

        let dedup = DedupEngine::new(self.config.dedup.novel_floor_percent).filter(
            proposed,
            &dismissed,
            delta.as_ref().map(|s| &s.delta),
        );
        let (hypotheses, deferred) = cap(dedup.kept, scope);
        let suppressed = dedup
            .dropped
            .iter()
            .filter(|d| matches!(d.reason, DropReason::Dismissed { .. }))
            .count();
        if suppressed > 0 {
            work.note(format!("{suppressed} hypotheses suppressed by the dismissed ledger"));
        }
        if !deferred.is_empty() {
            work.note(format!("{} hypotheses deferred by the {scope} scope tier", deferred.len()));
        }

        let set = HypothesisSet {
            hypotheses,
            dropped: dedup.dropped,
            deferred,
            rescued: dedup.rescued,
        };
        info!(
            investigate = set.to_investigate().count(),
            carried = set.carried().count(),
            dropped = set.dropped.len(),
            deferred = set.deferred.len(),
            "hypotheses ready"
        );
        current.write(HYPOTHESES_FILE, &set)?;
        Ok(work)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phases::index::FocusFiles;
    use pretty_assertions::assert_eq;
    use strata_artifact::{Concern, Conclusion, ConclusionVerdict, Finding, FindingId, FindingStatus, Severity, Verdict, VerificationReport};
    use strata_delta::{FileStatus, TrackedFile};

    fn index() -> IndexResult {
        IndexResult {
            focuses: vec![FocusFiles {
                name: "auth".into(),
                files: vec![TrackedFile::new("auth/a.src", 10), TrackedFile::new("auth/b.src", 10)],
            }],
        }
    }

    fn finding(condition: &str, file: &str) -> Finding {
        Finding {
            id: FindingId(format!("F-{condition}")),
            hypothesis: strata_artifact::HypothesisId("h".into()),
            status: FindingStatus::Confirmed,
            severity: Severity::High,
            condition: condition.into(),
            title: condition.into(),
            location: Location::file(file),
            evidence: String::new(),
            evolution: None,
            persistent: false,
        }
    }

    fn entry(f: Finding, tag: CarryTag, status: FileStatus) -> DigestEntry {
        DigestEntry {
            finding: f,
            tag,
            file_status: Some(status),
        }
    }

    fn outcome(verified_a: bool) -> BTreeMap<String, VerificationOutcome> {
        let snapshot = ConclusionSnapshot {
            focus: "auth".into(),
            report: UnitId("analyze-1".into()),
            provides: TagSet::new(),
            summary: String::new(),
            conclusions: vec![Conclusion {
                id: "c1".into(),
                statement: "a is safe".into(),
                files: vec!["auth/a.src".into()],
            }],
        };
        let verdict = if verified_a {
            Verdict::Verified
        } else {
            Verdict::NeedsRecheck { reason: "changed callee".into() }
        };
        let report = VerificationReport {
            focus: "auth".into(),
            verdicts: vec![ConclusionVerdict {
                conclusion_id: "c1".into(),
                verdict,
            }],
            new_concerns: vec![Concern {
                condition: "path-opened".into(),
                description: "new caller reaches a".into(),
                file: "auth/a.src".into(),
            }],
            carried: Vec::new(),
        };
        [("auth".to_string(), resolve_verdicts(&snapshot, &report))].into_iter().collect()
    }

    #[test]
    fn digest_tags_map_to_dispositions() {
        let digest = vec![
            entry(finding("leak", "auth/a.src"), CarryTag::Verify, FileStatus::Unchanged),
            entry(finding("race", "auth/b.src"), CarryTag::Recheck, FileStatus::Modified),
            entry(finding("gone", "auth/c.src"), CarryTag::ResolvedByRemoval, FileStatus::Deleted),
        ];
        let hyps = from_digest(&digest, &index(), &outcome(true));
        assert_eq!(hyps.len(), 2);
        assert_eq!(hyps[0].disposition, Disposition::Carried);
        assert_eq!(hyps[0].severity_hint, Severity::High);
        assert_eq!(hyps[1].disposition, Disposition::Investigate);
        assert!(matches!(&hyps[1].origin, Origin::Recheck { prior_finding } if prior_finding.0 == "F-race"));
        assert_eq!(hyps[1].requires, focus_tags("auth"));
    }

    #[test]
    fn unverified_finding_is_rechecked() {
        let digest = vec![entry(finding("leak", "auth/a.src"), CarryTag::Verify, FileStatus::Unchanged)];
        let hyps = from_digest(&digest, &index(), &outcome(false));
        assert_eq!(hyps[0].disposition, Disposition::Investigate);

        let without_outcome = from_digest(&digest, &index(), &BTreeMap::new());
        assert_eq!(without_outcome[0].disposition, Disposition::Investigate);
    }

    #[test]
    fn concerns_become_novel_hypotheses() {
        let hyps = from_concerns(&outcome(true));
        assert_eq!(hyps.len(), 1);
        assert!(hyps[0].origin.is_novel());
        assert_eq!(hyps[0].location.file, "auth/a.src");
        assert_eq!(hyps[0].requires, focus_tags("auth"));
    }

    #[test]
    fn proposals_get_focus_requires_and_normalized_ids() {
        let mut odd = Hypothesis::new(Origin::Novel, "leak", "Leak", Location::file("auth/b.src")).carried();
        odd.id = strata_artifact::HypothesisId("worker-chosen".into());
        let report = Report::new(UnitId("synthesize-1".into()), TagSet::new(), Payload::Hypotheses(vec![odd]))
            .with_focus("auth");
        let hyps = from_proposals(&[report]);
        assert_eq!(hyps[0].disposition, Disposition::Investigate);
        assert_eq!(hyps[0].requires, focus_tags("auth"));
        assert_eq!(
            hyps[0].id,
            Hypothesis::new(Origin::Novel, "leak", "Leak", Location::file("auth/b.src")).id
        );
    }

    #[test]
    fn scope_cap_spares_rechecks() {
        let mut hyps: Vec<Hypothesis> = (0..7)
            .map(|i| {
                Hypothesis::new(Origin::Novel, format!("c{i}"), "t", Location::file("auth/a.src"))
                    .with_requires(focus_tags("auth"))
            })
            .collect();
        hyps.push(
            Hypothesis::new(
                Origin::Recheck {
                    prior_finding: FindingId("F-1".into()),
                },
                "old",
                "t",
                Location::file("auth/a.src"),
            )
            .with_requires(focus_tags("auth")),
        );
        let (kept, deferred) = cap(hyps.clone(), ScopeTier::Quick);
        assert_eq!(kept.len(), 6);
        assert_eq!(deferred.len(), 2);
        assert!(kept.iter().any(|h| matches!(h.origin, Origin::Recheck { .. })));

        let (all, none) = cap(hyps, ScopeTier::Deep);
        assert_eq!(all.len(), 8);
        assert!(none.is_empty());
    }
}
