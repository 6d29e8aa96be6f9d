//! Lineage tracking
//!
//! The lineage chain holds one row per run. A row is appended `Open` when the
//! run starts and again, `Closed` with counts and finding traces, when the
//! run reports. Folding the chain keeps the newest record per run, so an
//! abandoned run stays visible as an open row.
//!
//! Classification of a current finding against the chain:
//!
//! | tag          | rule                                                          |
//! |--------------|---------------------------------------------------------------|
//! | `NEW`        | no matching finding in any closed prior row                   |
//! | `RECURRENT`  | present and unresolved in the immediately prior closed row    |
//! | `REGRESSION` | present in an older row, absent from the immediately prior one |
//! | `RESOLVED`   | present in the immediately prior row, absent now              |

use crate::chain::Chain;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use strata_artifact::{EvolutionTag, Finding, FindingId, FindingKey, FindingStatus, Location, Severity};
use tracing::debug;

/// Whether a run has reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowState {
    /// Run started; counts unknown
    Open,
    /// Run reported
    Closed,
}

/// Per-run evolution counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageCounts {
    /// NEW findings
    pub new: usize,
    /// RECURRENT findings
    pub recurrent: usize,
    /// REGRESSION findings
    pub regression: usize,
    /// Findings resolved since the prior run
    pub resolved: usize,
    /// Open (confirmed or potential) findings in the run
    pub open: usize,
}

/// Trace of one finding as recorded in a closed row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindingTrace {
    /// Stable cross-run identity
    pub key: FindingKey,
    /// Finding id in that run
    pub id: FindingId,
    /// Condition
    pub condition: String,
    /// Title
    pub title: String,
    /// Location
    pub location: Location,
    /// Status in that run
    pub status: FindingStatus,
    /// Severity in that run
    pub severity: Severity,
    /// Severity when the finding was first recorded
    pub original_severity: Severity,
    /// Evolution tag in that run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evolution: Option<EvolutionTag>,
    /// Consecutive runs the finding has been present
    pub streak: u32,
}

impl FindingTrace {
    /// True if the finding was open (confirmed or potential) in that run
    #[inline]
    #[must_use]
    pub fn is_present(&self) -> bool {
        self.status.is_open()
    }
}

/// One run in the lineage table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageRow {
    /// Run sequence number
    pub seq: u64,
    /// Run id
    pub run_id: String,
    /// Codebase reference
    pub reference: String,
    /// Run start
    pub started_at: DateTime<Utc>,
    /// Row state
    pub state: RowState,
    /// Counts (closed rows only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counts: Option<LineageCounts>,
    /// Finding traces (closed rows only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<FindingTrace>,
}

impl LineageRow {
    /// Open row for a starting run
    #[must_use]
    pub fn open(seq: u64, run_id: impl Into<String>, reference: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            seq,
            run_id: run_id.into(),
            reference: reference.into(),
            started_at,
            state: RowState::Open,
            counts: None,
            findings: Vec::new(),
        }
    }

    /// Close the row with counts and traces
    #[must_use]
    pub fn close(mut self, counts: LineageCounts, findings: Vec<FindingTrace>) -> Self {
        self.state = RowState::Closed;
        self.counts = Some(counts);
        self.findings = findings;
        self
    }

    /// True if the run reported
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state == RowState::Closed
    }

    fn present(&self, key: &FindingKey) -> Option<&FindingTrace> {
        self.findings.iter().find(|t| &t.key == key && t.is_present())
    }
}

/// Lineage chain
pub type LineageChain = Chain<LineageRow>;

/// Current lineage table: the newest record per run, ordered by sequence
#[must_use]
pub fn lineage_view(chain: &LineageChain) -> Vec<LineageRow> {
    chain
        .fold(BTreeMap::new(), |mut rows, record| {
            rows.insert(record.body.seq, record.body.clone());
            rows
        })
        .into_values()
        .collect()
}

/// Classification of a run's findings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    /// Evolution tag per current open finding
    pub tags: BTreeMap<FindingId, EvolutionTag>,
    /// Regressions whose severity was raised: (from, to)
    pub escalations: BTreeMap<FindingId, (Severity, Severity)>,
    /// Findings flagged for prioritized attention
    pub persistent: BTreeSet<FindingId>,
    /// Consecutive-run streak per current finding
    pub streaks: BTreeMap<FindingId, u32>,
    /// Original severity per current finding
    pub original_severity: BTreeMap<FindingId, Severity>,
    /// Findings present in the prior run and absent now
    pub resolved: Vec<FindingTrace>,
}

impl Classification {
    /// Counts for the closing lineage row
    #[must_use]
    pub fn counts(&self) -> LineageCounts {
        let mut counts = LineageCounts {
            resolved: self.resolved.len(),
            open: self.tags.len(),
            ..LineageCounts::default()
        };
        for tag in self.tags.values() {
            match tag {
                EvolutionTag::New => counts.new += 1,
                EvolutionTag::Recurrent => counts.recurrent += 1,
                EvolutionTag::Regression => counts.regression += 1,
                EvolutionTag::Resolved => {}
            }
        }
        counts
    }
}

/// Classifies findings against the prior chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineageTracker {
    persistence_threshold: u32,
}

impl Default for LineageTracker {
    fn default() -> Self {
        Self::new(2)
    }
}

impl LineageTracker {
    /// Create new tracker; findings whose streak exceeds the threshold are
    /// flagged persistent
    #[must_use]
    pub fn new(persistence_threshold: u32) -> Self {
        Self {
            persistence_threshold,
        }
    }

    /// Classify current findings against prior rows
    ///
    /// `prior` may contain open rows from abandoned runs; they carry no
    /// finding information and are skipped.
    #[must_use]
    pub fn classify(&self, current: &[Finding], prior: &[LineageRow]) -> Classification {
        let closed: Vec<&LineageRow> = prior.iter().filter(|r| r.is_closed()).collect();
        let previous = closed.iter().max_by_key(|r| r.seq).copied();
        let mut first_seen: HashMap<FindingKey, &FindingTrace> = HashMap::new();
        let mut ordered = closed.clone();
        ordered.sort_by_key(|r| r.seq);
        for row in &ordered {
            for trace in row.findings.iter().filter(|t| t.is_present()) {
                first_seen.entry(trace.key).or_insert(trace);
            }
        }

        let mut out = Classification::default();
        let mut current_keys = BTreeSet::new();

        for finding in current.iter().filter(|f| f.status.is_open()) {
            let key = finding.key();
            current_keys.insert(key);
            let in_previous = previous.and_then(|row| row.present(&key));

            let (tag, streak, original) = match (in_previous, first_seen.get(&key)) {
                (Some(trace), _) => (EvolutionTag::Recurrent, trace.streak + 1, trace.original_severity),
                (None, Some(earliest)) => {
                    let escalated = finding.severity.max(earliest.original_severity.escalate());
                    if escalated != finding.severity {
                        out.escalations.insert(finding.id.clone(), (finding.severity, escalated));
                    }
                    (EvolutionTag::Regression, 1, earliest.original_severity)
                }
                (None, None) => (EvolutionTag::New, 1, finding.severity),
            };

            debug!(finding = %finding.id, tag = %tag, streak, "classified finding");
            if streak > self.persistence_threshold {
                out.persistent.insert(finding.id.clone());
            }
            out.tags.insert(finding.id.clone(), tag);
            out.streaks.insert(finding.id.clone(), streak);
            out.original_severity.insert(finding.id.clone(), original);
        }

        if let Some(row) = previous {
            out.resolved = row
                .findings
                .iter()
                .filter(|t| t.is_present() && !current_keys.contains(&t.key))
                .cloned()
                .map(|mut t| {
                    t.evolution = Some(EvolutionTag::Resolved);
                    t
                })
                .collect();
        }
        out
    }

    /// Write tags, escalated severities and persistence flags onto findings
    pub fn apply(&self, findings: &mut [Finding], classification: &Classification) {
        for finding in findings.iter_mut() {
            finding.evolution = classification.tags.get(&finding.id).copied();
            if let Some((_, to)) = classification.escalations.get(&finding.id) {
                finding.severity = *to;
            }
            finding.persistent = classification.persistent.contains(&finding.id);
        }
    }

    /// Traces for the closing row of the current run
    #[must_use]
    pub fn traces(&self, findings: &[Finding], classification: &Classification) -> Vec<FindingTrace> {
        findings
            .iter()
            .map(|f| FindingTrace {
                key: f.key(),
                id: f.id.clone(),
                condition: f.condition.clone(),
                title: f.title.clone(),
                location: f.location.clone(),
                status: f.status,
                severity: f.severity,
                original_severity: classification
                    .original_severity
                    .get(&f.id)
                    .copied()
                    .unwrap_or(f.severity),
                evolution: f.evolution,
                streak: classification.streaks.get(&f.id).copied().unwrap_or(0),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_artifact::{Hypothesis, HypothesisId, Origin};

    fn finding(seq: u64, condition: &str, file: &str, severity: Severity) -> Finding {
        let hyp = Hypothesis::new(Origin::Novel, condition, condition, Location::file(file));
        let mut f = Finding {
            id: FindingId(String::new()),
            hypothesis: HypothesisId(String::new()),
            status: FindingStatus::Confirmed,
            severity,
            condition: String::new(),
            title: String::new(),
            location: Location::file(file),
            evidence: String::new(),
            evolution: None,
            persistent: false,
        };
        f.bind(&hyp, seq);
        f
    }

    /// Run one report cycle: classify, apply, close the row
    fn cycle(tracker: &LineageTracker, seq: u64, mut findings: Vec<Finding>, rows: &mut Vec<LineageRow>) -> (Vec<Finding>, Classification) {
        let c = tracker.classify(&findings, rows);
        tracker.apply(&mut findings, &c);
        let traces = tracker.traces(&findings, &c);
        rows.push(LineageRow::open(seq, format!("run{seq}"), "ref", Utc::now()).close(c.counts(), traces));
        (findings, c)
    }

    #[test]
    fn first_sighting_is_new() {
        let tracker = LineageTracker::default();
        let mut rows = Vec::new();
        let (findings, c) = cycle(&tracker, 1, vec![finding(1, "leak", "a.src", Severity::Low)], &mut rows);
        assert_eq!(findings[0].evolution, Some(EvolutionTag::New));
        assert_eq!(c.counts().new, 1);
    }

    #[test]
    fn present_twice_is_recurrent() {
        let tracker = LineageTracker::default();
        let mut rows = Vec::new();
        cycle(&tracker, 1, vec![finding(1, "leak", "a.src", Severity::Low)], &mut rows);
        let (findings, _) = cycle(&tracker, 2, vec![finding(2, "leak", "a.src", Severity::Low)], &mut rows);
        assert_eq!(findings[0].evolution, Some(EvolutionTag::Recurrent));
        assert!(!findings[0].persistent);
    }

    #[test]
    fn reappearance_after_gap_is_escalated_regression() {
        let tracker = LineageTracker::default();
        let mut rows = Vec::new();
        cycle(&tracker, 1, vec![finding(1, "leak", "a.src", Severity::Medium)], &mut rows);
        let (_, c2) = cycle(&tracker, 2, Vec::new(), &mut rows);
        assert_eq!(c2.resolved.len(), 1);

        let (findings, c3) = cycle(&tracker, 3, vec![finding(3, "leak", "a.src", Severity::Low)], &mut rows);
        assert_eq!(findings[0].evolution, Some(EvolutionTag::Regression));
        assert!(findings[0].severity >= Severity::Medium);
        assert_eq!(findings[0].severity, Severity::High);
        assert_eq!(c3.escalations.len(), 1);
    }

    #[test]
    fn regression_never_lowers_severity() {
        let tracker = LineageTracker::default();
        let mut rows = Vec::new();
        cycle(&tracker, 1, vec![finding(1, "leak", "a.src", Severity::Low)], &mut rows);
        cycle(&tracker, 2, Vec::new(), &mut rows);
        let (findings, c) = cycle(&tracker, 3, vec![finding(3, "leak", "a.src", Severity::Critical)], &mut rows);
        assert_eq!(findings[0].severity, Severity::Critical);
        assert!(c.escalations.is_empty());
    }

    #[test]
    fn long_survivors_are_flagged_persistent() {
        let tracker = LineageTracker::new(2);
        let mut rows = Vec::new();
        let mut last = Vec::new();
        for seq in 1..=3 {
            let (findings, _) = cycle(&tracker, seq, vec![finding(seq, "race", "b.src", Severity::High)], &mut rows);
            last = findings;
        }
        assert!(last[0].persistent);
    }

    #[test]
    fn open_rows_are_skipped() {
        let tracker = LineageTracker::default();
        let mut rows = Vec::new();
        cycle(&tracker, 1, vec![finding(1, "leak", "a.src", Severity::Low)], &mut rows);
        rows.push(LineageRow::open(2, "abandoned", "ref", Utc::now()));
        let (findings, _) = cycle(&tracker, 3, vec![finding(3, "leak", "a.src", Severity::Low)], &mut rows);
        assert_eq!(findings[0].evolution, Some(EvolutionTag::Recurrent));
    }

    #[test]
    fn dismissed_findings_are_not_tagged() {
        let tracker = LineageTracker::default();
        let mut dismissed = finding(1, "leak", "a.src", Severity::Low);
        dismissed.status = FindingStatus::Dismissed;
        let c = tracker.classify(&[dismissed], &[]);
        assert!(c.tags.is_empty());
    }

    #[test]
    fn view_keeps_newest_record_per_run() {
        let mut chain = LineageChain::new();
        let row = LineageRow::open(1, "r1", "abc", Utc::now());
        chain.append(1, row.clone()).unwrap();
        chain.append(1, row.close(LineageCounts::default(), Vec::new())).unwrap();
        chain.append(2, LineageRow::open(2, "r2", "def", Utc::now())).unwrap();

        let view = lineage_view(&chain);
        assert_eq!(view.len(), 2);
        assert!(view[0].is_closed());
        assert!(!view[1].is_closed());
    }
}
