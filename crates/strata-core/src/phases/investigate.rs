//! Investigate: one task per hypothesis; carried hypotheses reuse the prior finding

use super::synthesize::HypothesisSet;
use super::PhaseWork;
use crate::error::OrchestratorError;
use crate::orchestrator::Orchestrator;
use crate::run::RunRecord;
use crate::state_machine::Phase;
use crate::workspace::{HandoverSection, ANALYSIS_FILE, FINDINGS_FILE, HYPOTHESES_FILE};
use serde_json::json;
use std::cmp::Reverse;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use strata_artifact::{tag_set, Finding, FindingKey, Hypothesis, Origin, Payload, Report, Tag, TagSet, UnitId};
use strata_dispatch::{TagIndex, TaskKind, TaskSpec};
use strata_ledger::DigestEntry;
use tracing::{debug, warn};

/// Tag every investigation output provides
pub const FINDING_TAG: &str = "finding";

fn investigation_task(hyp: &Hypothesis, router: &TagIndex) -> TaskSpec {
    let mut provides: TagSet = tag_set([FINDING_TAG]);
    provides.extend(hyp.requires.iter().filter(|t| t.focus_name().is_some()).cloned());
    let mut task = TaskSpec::new(UnitId::derive("investigate", &[hyp.id.0.as_str()]), "investigate", TaskKind::Investigate)
        .with_routed(router.route_owned(&hyp.requires))
        .with_provides(provides)
        .with_requires(hyp.requires.clone())
        .with_context(json!({ "hypothesis": hyp }));
    if let Some(focus) = hyp.requires.iter().find_map(Tag::focus_name) {
        task = task.with_focus(focus);
    }
    task
}

/// Prior finding a carried hypothesis stands for, bound to this run
fn materialize(hyp: &Hypothesis, digest: &[DigestEntry], seq: u64) -> Option<Finding> {
    let Origin::Recheck { prior_finding } = &hyp.origin else {
        return None;
    };
    let entry = digest.iter().find(|e| &e.finding.id == prior_finding)?;
    let mut finding = entry.finding.clone();
    finding.evolution = None;
    finding.persistent = false;
    finding.bind(hyp, seq);
    Some(finding)
}

/// One finding per key, ordered by id
///
/// An open finding beats a dismissed one, then higher severity wins, then
/// the lower id.
fn consolidate(findings: Vec<Finding>) -> Vec<Finding> {
    let mut best: HashMap<FindingKey, Finding> = HashMap::new();
    for finding in findings {
        match best.entry(finding.key()) {
            Entry::Vacant(slot) => {
                slot.insert(finding);
            }
            Entry::Occupied(mut slot) => {
                if outranks(&finding, slot.get()) {
                    slot.insert(finding);
                }
            }
        }
    }
    let mut out: Vec<Finding> = best.into_values().collect();
    out.sort_by(|a, b| a.id.cmp(&b.id));
    out
}

fn outranks(candidate: &Finding, held: &Finding) -> bool {
    let rank = |f: &Finding| (f.status.is_open(), f.severity, Reverse(f.id.clone()));
    rank(candidate) > rank(held)
}

impl Orchestrator {
    pub(crate) async fn investigate_phase(&self, run: &RunRecord) -> Result<PhaseWork, OrchestratorError> {
        let current = self.current();
        let set: HypothesisSet = current.read(HYPOTHESES_FILE)?.ok_or(OrchestratorError::MissingInput {
            phase: Phase::Investigate,
            input: HYPOTHESES_FILE,
        })?;
        let analysis: Vec<Report> = current.read(ANALYSIS_FILE)?.ok_or(OrchestratorError::MissingInput {
            phase: Phase::Investigate,
            input: ANALYSIS_FILE,
        })?;
        let digest: Vec<DigestEntry> = current.handover_section(HandoverSection::Findings)?.unwrap_or_default();

        let router = TagIndex::build(analysis);
        let mut by_unit: BTreeMap<UnitId, &Hypothesis> = BTreeMap::new();
        let tasks: Vec<TaskSpec> = set
            .to_investigate()
            .map(|hyp| {
                let task = investigation_task(hyp, &router);
                by_unit.insert(task.unit.clone(), hyp);
                self.decorate(task)
            })
            .collect();

        let (plan, mut work) = self.dispatch(Phase::Investigate, tasks).await;
        let mut findings = Vec::with_capacity(set.hypotheses.len());
        for report in self.logical_reports(Phase::Investigate, &plan)? {
            let Some(hyp) = by_unit.get(&report.id) else {
                warn!(unit = %report.id, "investigation output without a hypothesis");
                continue;
            };
            if let Payload::Finding(mut finding) = report.payload {
                finding.bind(hyp, run.seq);
                findings.push(finding);
            }
        }

        let mut carried = 0usize;
        for hyp in set.carried() {
            match materialize(hyp, &digest, run.seq) {
                Some(finding) => {
                    carried += 1;
                    findings.push(finding);
                }
                None => {
                    warn!(hypothesis = %hyp.id, "carried hypothesis has no prior finding");
                    work.note(format!("carried hypothesis {} has no prior finding", hyp.id));
                }
            }
        }
        if carried > 0 {
            work.note(format!("{carried} findings carried from verified prior conclusions"));
        }

        let findings = consolidate(findings);
        debug!(findings = findings.len(), carried, "findings consolidated");
        current.write(FINDINGS_FILE, &findings)?;
        Ok(work)
    }
}
