//! Dismissed-hypothesis ledger and deduplication
//!
//! The ledger is an append-only chain of operations. A handover appends a
//! `Carry` that resets the view to the entries still valid for the new run;
//! a report appends a `Record` with the run's own dismissals and a `Retire`
//! for dismissed signatures that were found open again.

use crate::chain::Chain;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use strata_artifact::{Finding, FindingStatus, Hypothesis, HypothesisId, Signature};
use strata_delta::Delta;
use tracing::{debug, info};

/// A hypothesis investigated and dismissed in some run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DismissedEntry {
    /// Signature of the dismissed hypothesis
    pub signature: Signature,
    /// Hypothesis id
    pub hypothesis: HypothesisId,
    /// Condition
    pub condition: String,
    /// Target file
    pub file: String,
    /// Run that dismissed it
    pub dismissed_in: u64,
}

impl DismissedEntry {
    /// Entry for a dismissed finding
    #[must_use]
    pub fn from_finding(finding: &Finding, seq: u64) -> Self {
        Self {
            signature: finding.key(),
            hypothesis: finding.hypothesis.clone(),
            condition: finding.condition.clone(),
            file: finding.location.file.clone(),
            dismissed_in: seq,
        }
    }
}

/// Ledger operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "entries", rename_all = "snake_case")]
pub enum DismissedOp {
    /// Replace the view with entries carried into a new run
    Carry(Vec<DismissedEntry>),
    /// Add a run's own dismissals
    Record(Vec<DismissedEntry>),
    /// Remove signatures a later run confirmed or kept open
    Retire(Vec<Signature>),
}

/// Dismissed-hypothesis chain
pub type DismissedChain = Chain<DismissedOp>;

/// Current ledger: fold of the chain, one entry per signature
#[must_use]
pub fn dismissed_view(chain: &DismissedChain) -> Vec<DismissedEntry> {
    chain
        .fold(IndexMap::new(), |mut view: IndexMap<Signature, DismissedEntry>, record| {
            match &record.body {
                DismissedOp::Carry(entries) => {
                    view.clear();
                    view.extend(entries.iter().map(|e| (e.signature, e.clone())));
                }
                DismissedOp::Record(entries) => {
                    view.extend(entries.iter().map(|e| (e.signature, e.clone())));
                }
                DismissedOp::Retire(signatures) => {
                    for signature in signatures {
                        view.shift_remove(signature);
                    }
                }
            }
            view
        })
        .into_values()
        .collect()
}

/// Entries of a run's findings that were dismissed
#[must_use]
pub fn dismissals(findings: &[Finding], seq: u64) -> Vec<DismissedEntry> {
    findings
        .iter()
        .filter(|f| f.status == FindingStatus::Dismissed)
        .map(|f| DismissedEntry::from_finding(f, seq))
        .collect()
}

/// Ledger signatures that `findings` hold open again
///
/// An open finding outranks an earlier dismissal of the same key; leaving the
/// entry in place would suppress the finding's own recheck in the next run.
#[must_use]
pub fn retirements(findings: &[Finding], ledger: &[DismissedEntry]) -> Vec<Signature> {
    let open: HashSet<Signature> = findings.iter().filter(|f| f.status.is_open()).map(Finding::key).collect();
    ledger
        .iter()
        .map(|e| e.signature)
        .filter(|s| open.contains(s))
        .collect()
}

/// Hypothesis dropped by deduplication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroppedHypothesis {
    /// Dropped hypothesis
    pub hypothesis: Hypothesis,
    /// Why
    pub reason: DropReason,
}

/// Why a hypothesis was dropped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Matches a dismissal on an unchanged file
    Dismissed {
        /// Run that dismissed it
        dismissed_in: u64,
    },
    /// Same signature already proposed
    Duplicate,
}

/// Result of filtering proposed hypotheses
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DedupOutcome {
    /// Surviving hypotheses, in proposal order
    pub kept: Vec<Hypothesis>,
    /// Dropped hypotheses
    pub dropped: Vec<DroppedHypothesis>,
    /// Novel hypotheses kept only to satisfy the novel floor
    pub rescued: usize,
}

/// Suppresses hypotheses already dismissed on unchanged files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupEngine {
    floor_percent: usize,
}

impl Default for DedupEngine {
    fn default() -> Self {
        Self::new(20)
    }
}

impl DedupEngine {
    /// Create new engine; `floor_percent` is the minimum share of proposed
    /// novel hypotheses always preserved
    #[must_use]
    pub fn new(floor_percent: u32) -> Self {
        Self {
            floor_percent: usize::try_from(floor_percent.min(100)).unwrap_or(100),
        }
    }

    /// Novel hypotheses the floor preserves out of `proposed`
    #[inline]
    #[must_use]
    pub fn floor(&self, proposed: usize) -> usize {
        (self.floor_percent * proposed).div_ceil(100)
    }

    /// Filter proposed hypotheses against the ledger
    ///
    /// A hypothesis is dropped when its signature matches a ledger entry and
    /// its target file is UNCHANGED in `delta`. Without a delta nothing is
    /// known to be unchanged and nothing is dropped for dismissal. Recheck
    /// hypotheses are never dropped for dismissal, and they win over any
    /// other proposal with the same signature.
    #[must_use]
    pub fn filter(&self, proposed: Vec<Hypothesis>, ledger: &[DismissedEntry], delta: Option<&Delta>) -> DedupOutcome {
        let dismissed: IndexMap<Signature, &DismissedEntry> = ledger.iter().map(|e| (e.signature, e)).collect();
        let rechecked: HashSet<Signature> = proposed
            .iter()
            .filter(|h| h.origin.is_recheck())
            .map(Hypothesis::signature)
            .collect();

        let mut seen = HashSet::new();
        let mut out = DedupOutcome::default();
        let mut suppressed: Vec<DroppedHypothesis> = Vec::new();
        let proposed_novel = proposed.iter().filter(|h| h.origin.is_novel()).count();

        for hyp in proposed {
            let signature = hyp.signature();
            let shadowed = !hyp.origin.is_recheck() && rechecked.contains(&signature);
            if shadowed || !seen.insert(signature) {
                out.dropped.push(DroppedHypothesis {
                    hypothesis: hyp,
                    reason: DropReason::Duplicate,
                });
                continue;
            }

            let unchanged = delta.is_some_and(|d| d.is_unchanged(&hyp.location.file));
            match dismissed.get(&signature) {
                Some(entry) if unchanged && !hyp.origin.is_recheck() => {
                    debug!(hypothesis = %hyp.id, file = %hyp.location.file, "suppressing dismissed hypothesis");
                    suppressed.push(DroppedHypothesis {
                        hypothesis: hyp,
                        reason: DropReason::Dismissed {
                            dismissed_in: entry.dismissed_in,
                        },
                    });
                }
                _ => out.kept.push(hyp),
            }
        }

        let floor = self.floor(proposed_novel);
        let mut kept_novel = out.kept.iter().filter(|h| h.origin.is_novel()).count();

        for dropped in suppressed {
            if kept_novel < floor && dropped.hypothesis.origin.is_novel() {
                kept_novel += 1;
                out.rescued += 1;
                out.kept.push(dropped.hypothesis);
            } else {
                out.dropped.push(dropped);
            }
        }

        info!(
            kept = out.kept.len(),
            dropped = out.dropped.len(),
            rescued = out.rescued,
            "hypotheses deduplicated"
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use strata_artifact::{FindingId, Location, Origin, Severity};
    use strata_delta::{FileDelta, FileStatus};

    fn delta(files: &[(&str, FileStatus)]) -> Delta {
        Delta {
            prior_ref: Some("a".into()),
            current_ref: "b".into(),
            files: files
                .iter()
                .map(|(p, s)| ((*p).to_string(), FileDelta::of(*s)))
                .collect::<BTreeMap<_, _>>(),
            massive_rewrite: false,
            fallback: None,
        }
    }

    fn novel(condition: &str, file: &str) -> Hypothesis {
        Hypothesis::new(Origin::Novel, condition, condition, Location::file(file))
    }

    fn entry_for(h: &Hypothesis) -> DismissedEntry {
        DismissedEntry {
            signature: h.signature(),
            hypothesis: h.id.clone(),
            condition: h.condition.clone(),
            file: h.location.file.clone(),
            dismissed_in: 1,
        }
    }

    #[test]
    fn drops_dismissed_on_unchanged_keeps_on_modified() {
        let on_unchanged = novel("leak", "u.src");
        let on_modified = novel("leak", "m.src");
        let ledger = vec![entry_for(&on_unchanged), entry_for(&on_modified)];
        let d = delta(&[("u.src", FileStatus::Unchanged), ("m.src", FileStatus::Modified)]);

        let out = DedupEngine::new(0).filter(vec![on_unchanged, on_modified.clone()], &ledger, Some(&d));
        assert_eq!(out.kept, vec![on_modified]);
        assert_eq!(out.dropped.len(), 1);
        assert!(matches!(out.dropped[0].reason, DropReason::Dismissed { dismissed_in: 1 }));
    }

    #[test]
    fn novel_floor_rescues_some_hypotheses() {
        let proposed: Vec<Hypothesis> = (0..10).map(|i| novel(&format!("c{i}"), "u.src")).collect();
        let ledger: Vec<DismissedEntry> = proposed.iter().map(entry_for).collect();
        let d = delta(&[("u.src", FileStatus::Unchanged)]);

        let out = DedupEngine::default().filter(proposed, &ledger, Some(&d));
        assert_eq!(out.kept.len(), 2);
        assert_eq!(out.rescued, 2);
        assert_eq!(out.dropped.len(), 8);
    }

    fn recheck(h: &Hypothesis) -> Hypothesis {
        Hypothesis::new(
            Origin::Recheck {
                prior_finding: FindingId("F1-x".into()),
            },
            h.condition.clone(),
            h.title.clone(),
            h.location.clone(),
        )
    }

    #[test]
    fn rechecks_survive_the_ledger_and_skip_the_floor() {
        let again = recheck(&novel("leak", "u.src"));
        let ledger = vec![entry_for(&again)];
        let d = delta(&[("u.src", FileStatus::Unchanged)]);
        let out = DedupEngine::new(100).filter(vec![again.clone()], &ledger, Some(&d));
        assert_eq!(out.kept, vec![again]);
        assert!(out.dropped.is_empty());
        assert_eq!(out.rescued, 0);
    }

    #[test]
    fn recheck_shadows_same_signature_proposal() {
        let proposal = novel("race", "a.src");
        let again = recheck(&proposal);
        assert_ne!(proposal.id, again.id);

        let out = DedupEngine::default().filter(vec![proposal.clone(), again.clone()], &[], None);
        assert_eq!(out.kept, vec![again]);
        assert_eq!(out.dropped.len(), 1);
        assert_eq!(out.dropped[0].hypothesis, proposal);
        assert_eq!(out.dropped[0].reason, DropReason::Duplicate);
    }

    #[test]
    fn floor_rounds_up() {
        let engine = DedupEngine::default();
        assert_eq!(engine.floor(0), 0);
        assert_eq!(engine.floor(1), 1);
        assert_eq!(engine.floor(5), 1);
        assert_eq!(engine.floor(6), 2);
        assert_eq!(engine.floor(10), 2);
        assert_eq!(DedupEngine::new(250).floor(3), 3);
    }

    #[test]
    fn duplicates_are_collapsed() {
        let h = novel("leak", "a.src");
        let out = DedupEngine::default().filter(vec![h.clone(), h], &[], None);
        assert_eq!(out.kept.len(), 1);
        assert_eq!(out.dropped[0].reason, DropReason::Duplicate);
    }

    #[test]
    fn view_folds_carry_and_record() {
        let a = entry_for(&novel("a", "a.src"));
        let b = entry_for(&novel("b", "b.src"));
        let c = entry_for(&novel("c", "c.src"));
        let mut chain = DismissedChain::new();
        chain.append(1, DismissedOp::Record(vec![a.clone(), b.clone()])).unwrap();
        chain.append(2, DismissedOp::Carry(vec![b.clone()])).unwrap();
        chain.append(2, DismissedOp::Record(vec![c.clone()])).unwrap();
        assert_eq!(dismissed_view(&chain), vec![b, c]);
    }

    #[test]
    fn retired_signatures_leave_the_view() {
        let a = entry_for(&novel("a", "a.src"));
        let b = entry_for(&novel("b", "b.src"));
        let mut chain = DismissedChain::new();
        chain.append(1, DismissedOp::Record(vec![a.clone(), b.clone()])).unwrap();
        chain.append(2, DismissedOp::Retire(vec![a.signature])).unwrap();
        assert_eq!(dismissed_view(&chain), vec![b]);
    }

    #[test]
    fn open_findings_retire_their_dismissals() {
        let leak = novel("leak", "u.src");
        let race = novel("race", "u.src");
        let ledger = vec![entry_for(&leak), entry_for(&race)];
        let found = |h: &Hypothesis, status| Finding {
            id: FindingId::derive(2, &h.signature()),
            hypothesis: h.id.clone(),
            status,
            severity: Severity::Medium,
            condition: h.condition.clone(),
            title: h.title.clone(),
            location: h.location.clone(),
            evidence: String::new(),
            evolution: None,
            persistent: false,
        };
        let findings = [found(&leak, FindingStatus::Confirmed), found(&race, FindingStatus::Dismissed)];
        assert_eq!(retirements(&findings, &ledger), vec![leak.signature()]);
    }
}
