//! Worker reports
//!
//! A [`Report`] is the immutable output of one dispatched unit. Its
//! `provides` tag set is what the router indexes.

use crate::finding::{Finding, Hypothesis};
use crate::hash::{ContentHash, HashError};
use crate::tag::TagSet;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Identifier of a dispatched unit of work
///
/// Content-addressed: the same phase and scope always yield the same id, which
/// is what lets an interrupted phase skip already-persisted units.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(pub String);

impl UnitId {
    /// Derive a unit id from a phase name and scope fields
    #[must_use]
    pub fn derive(phase: &str, scope: &[&str]) -> Self {
        let parts: Vec<&[u8]> = scope.iter().map(|s| s.as_bytes()).collect();
        let hash = ContentHash::compute_parts(&parts);
        Self(format!("{phase}-{}", hash.short()))
    }

    /// Id of the `index`th part of a split unit
    #[must_use]
    pub fn part(&self, index: usize) -> Self {
        Self(format!("{}.part{index}", self.0))
    }

    /// Logical unit this id belongs to (strips any part suffix)
    #[must_use]
    pub fn logical(&self) -> Self {
        match self.0.split_once(".part") {
            Some((base, _)) => Self(base.to_string()),
            None => self.clone(),
        }
    }

    /// String form
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for UnitId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Report identifier (the logical unit id that produced it)
pub type ReportId = UnitId;

/// One conclusion drawn by an analysis worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conclusion {
    /// Identifier, unique within the report
    pub id: String,
    /// Statement
    pub statement: String,
    /// Files the conclusion rests on
    #[serde(default)]
    pub files: Vec<String>,
}

/// Analysis output for one focus area
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analysis {
    /// Free-form summary
    #[serde(default)]
    pub summary: String,
    /// Conclusions
    #[serde(default)]
    pub conclusions: Vec<Conclusion>,
}

/// Verdict on one prior conclusion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    /// Still holds
    Verified,
    /// Depends on changed code; must be re-derived
    NeedsRecheck {
        /// Why the dependency matters
        #[serde(default)]
        reason: String,
    },
}

/// Verdict bound to a conclusion id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConclusionVerdict {
    /// Prior conclusion id
    pub conclusion_id: String,
    /// Verdict
    #[serde(flatten)]
    pub verdict: Verdict,
}

/// New concern opened by a change elsewhere
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Concern {
    /// Condition
    pub condition: String,
    /// Description
    pub description: String,
    /// File inside the unchanged region
    pub file: String,
}

/// Output of a verification task
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// Focus area verified
    pub focus: String,
    /// Verdict per prior conclusion
    #[serde(default)]
    pub verdicts: Vec<ConclusionVerdict>,
    /// Concerns opened by changes elsewhere
    #[serde(default)]
    pub new_concerns: Vec<Concern>,
    /// Prior conclusions that were verified and carried forward
    #[serde(default)]
    pub carried: Vec<Conclusion>,
}

/// Report payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Payload {
    /// Analysis of a focus area
    Analysis(Analysis),
    /// Hypotheses proposed by synthesis
    Hypotheses(Vec<Hypothesis>),
    /// Investigation outcome
    Finding(Finding),
    /// Verification outcome
    Verification(VerificationReport),
}

impl Payload {
    /// Payload kind name
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Analysis(_) => "analysis",
            Self::Hypotheses(_) => "hypotheses",
            Self::Finding(_) => "finding",
            Self::Verification(_) => "verification",
        }
    }
}

/// Immutable, tagged output of one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Logical unit id
    pub id: ReportId,
    /// Focus area, if the unit was focus-scoped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus: Option<String>,
    /// Tags this report provides to downstream consumers
    #[serde(default)]
    pub provides: TagSet,
    /// Payload
    pub payload: Payload,
    /// Split parts merged into this report
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<UnitId>,
    /// Production time
    #[serde(default = "Utc::now")]
    pub produced_at: DateTime<Utc>,
}

impl Report {
    /// Create new report
    #[must_use]
    pub fn new(id: ReportId, provides: TagSet, payload: Payload) -> Self {
        Self {
            id,
            focus: None,
            provides,
            payload,
            parts: Vec::new(),
            produced_at: Utc::now(),
        }
    }

    /// With focus area
    #[inline]
    #[must_use]
    pub fn with_focus(mut self, focus: impl Into<String>) -> Self {
        self.focus = Some(focus.into());
        self
    }

    /// Content hash of the serialized report
    ///
    /// # Errors
    /// Returns error if serialization fails
    pub fn content_hash(&self) -> Result<ContentHash, HashError> {
        ContentHash::compute_serializable(self)
    }

    /// Serialized size, used as the routed-input cost of this report
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        serde_json::to_vec(self).map_or(0, |v| v.len() as u64)
    }

    /// Merge the outputs of a split unit into one logical report
    ///
    /// Parts must share a payload kind. Provides sets are unioned; analysis
    /// conclusions, hypotheses and verification verdicts are concatenated in
    /// part order.
    ///
    /// # Errors
    /// Returns error for an empty part list, mixed payload kinds or finding
    /// payloads (which are never split)
    pub fn merge(id: ReportId, mut parts: Vec<Report>) -> Result<Self, ReportError> {
        if parts.is_empty() {
            return Err(ReportError::NothingToMerge(id));
        }
        if parts.len() == 1 {
            let mut only = parts.remove(0);
            if only.id != id {
                only.parts = vec![only.id.clone()];
                only.id = id;
            }
            return Ok(only);
        }
        let kind = parts[0].payload.kind();
        if let Some(other) = parts.iter().find(|p| p.payload.kind() != kind) {
            return Err(ReportError::MixedPayloads {
                id,
                first: kind,
                other: other.payload.kind(),
            });
        }

        let focus = parts[0].focus.clone();
        let part_ids: Vec<UnitId> = parts.iter().map(|p| p.id.clone()).collect();
        let provides: TagSet = parts.iter().flat_map(|p| p.provides.iter().cloned()).collect();
        let produced_at = parts.iter().map(|p| p.produced_at).max().unwrap_or_else(Utc::now);

        let payload = match kind {
            "analysis" => {
                let mut merged = Analysis::default();
                let mut summaries = Vec::new();
                for part in parts {
                    if let Payload::Analysis(a) = part.payload {
                        if !a.summary.is_empty() {
                            summaries.push(a.summary);
                        }
                        merged.conclusions.extend(a.conclusions);
                    }
                }
                merged.summary = summaries.join("\n\n");
                Payload::Analysis(merged)
            }
            "hypotheses" => Payload::Hypotheses(
                parts
                    .into_iter()
                    .filter_map(|p| match p.payload {
                        Payload::Hypotheses(h) => Some(h),
                        _ => None,
                    })
                    .flatten()
                    .collect(),
            ),
            "verification" => {
                let mut merged = VerificationReport::default();
                for part in parts {
                    if let Payload::Verification(v) = part.payload {
                        merged.focus = v.focus;
                        merged.verdicts.extend(v.verdicts);
                        merged.new_concerns.extend(v.new_concerns);
                        merged.carried.extend(v.carried);
                    }
                }
                Payload::Verification(merged)
            }
            other => return Err(ReportError::Unmergeable { id, kind: other }),
        };

        Ok(Self {
            id,
            focus,
            provides,
            payload,
            parts: part_ids,
            produced_at,
        })
    }
}

/// Report errors
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// No parts were supplied
    #[error("no parts to merge for {0}")]
    NothingToMerge(ReportId),

    /// Parts disagree on payload kind
    #[error("cannot merge {id}: parts mix {first} and {other} payloads")]
    MixedPayloads {
        id: ReportId,
        first: &'static str,
        other: &'static str,
    },

    /// Payload kind cannot be merged
    #[error("cannot merge {id}: {kind} payloads are never split")]
    Unmergeable { id: ReportId, kind: &'static str },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::tag_set;

    fn analysis_part(id: &str, tags: &[&str], conclusion: &str) -> Report {
        Report::new(
            UnitId(id.to_string()),
            tag_set(tags.iter().copied()),
            Payload::Analysis(Analysis {
                summary: format!("summary {conclusion}"),
                conclusions: vec![Conclusion {
                    id: conclusion.to_string(),
                    statement: "holds".to_string(),
                    files: vec![],
                }],
            }),
        )
        .with_focus("auth")
    }

    #[test]
    fn unit_ids_are_content_addressed() {
        let a = UnitId::derive("analyze", &["auth", "src/a.rs"]);
        let b = UnitId::derive("analyze", &["auth", "src/a.rs"]);
        let c = UnitId::derive("analyze", &["auth", "src/b.rs"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.as_str().starts_with("analyze-"));
    }

    #[test]
    fn part_ids_map_back_to_logical() {
        let unit = UnitId::derive("analyze", &["auth"]);
        assert_eq!(unit.part(1).logical(), unit);
        assert_eq!(unit.logical(), unit);
    }

    #[test]
    fn merge_unions_tags_and_conclusions() {
        let id = UnitId("analyze-x".into());
        let merged = Report::merge(
            id.clone(),
            vec![
                analysis_part("analyze-x.part0", &["focus:auth"], "c1"),
                analysis_part("analyze-x.part1", &["focus:auth", "crypto"], "c2"),
            ],
        )
        .unwrap();
        assert_eq!(merged.id, id);
        assert_eq!(merged.parts.len(), 2);
        assert_eq!(merged.provides, tag_set(["focus:auth", "crypto"]));
        match merged.payload {
            Payload::Analysis(a) => assert_eq!(a.conclusions.len(), 2),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn merge_rejects_mixed_payloads() {
        let mut other = analysis_part("p1", &[], "c");
        other.payload = Payload::Hypotheses(vec![]);
        let result = Report::merge(
            UnitId("x".into()),
            vec![analysis_part("p0", &[], "c"), other],
        );
        assert!(matches!(result, Err(ReportError::MixedPayloads { .. })));
    }

    #[test]
    fn payload_serializes_with_type_tag() {
        let report = analysis_part("u", &["focus:auth"], "c1");
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"type\":\"analysis\""));
        let back: Report = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
    }
}
