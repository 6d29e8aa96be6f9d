//! Hypotheses and findings
//!
//! A [`Hypothesis`] is a candidate issue created during synthesis; a
//! [`Finding`] is the investigated outcome. Both are keyed across runs by a
//! [`Signature`] over (condition, file, symbol), so moved lines still match.

use crate::hash::ContentHash;
use crate::tag::TagSet;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Finding severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational only
    Info,
    /// Low impact
    Low,
    /// Medium impact
    Medium,
    /// High impact
    High,
    /// Critical impact
    Critical,
}

impl Severity {
    /// Next level up; `Critical` saturates
    #[inline]
    #[must_use]
    pub fn escalate(self) -> Self {
        match self {
            Self::Info => Self::Low,
            Self::Low => Self::Medium,
            Self::Medium => Self::High,
            Self::High | Self::Critical => Self::Critical,
        }
    }
}

impl Default for Severity {
    fn default() -> Self {
        Self::Medium
    }
}

/// Investigation outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingStatus {
    /// Reproduced
    Confirmed,
    /// Plausible but not reproduced
    Potential,
    /// Investigated and rejected
    Dismissed,
}

impl FindingStatus {
    /// Confirmed or potential findings are carried forward between runs
    #[inline]
    #[must_use]
    pub fn is_open(self) -> bool {
        matches!(self, Self::Confirmed | Self::Potential)
    }
}

/// Where a hypothesis or finding points
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    /// Repository-relative file path
    pub file: String,
    /// Line number, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// Enclosing symbol, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
}

impl Location {
    /// Location covering a whole file
    #[inline]
    #[must_use]
    pub fn file(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line: None,
            symbol: None,
        }
    }

    /// With line number
    #[inline]
    #[must_use]
    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    /// With enclosing symbol
    #[inline]
    #[must_use]
    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }
}

impl Display for Location {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.file)?;
        if let Some(line) = self.line {
            write!(f, ":{line}")?;
        }
        if let Some(symbol) = &self.symbol {
            write!(f, " ({symbol})")?;
        }
        Ok(())
    }
}

/// Stable identity of an issue: same location and same underlying condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(pub ContentHash);

impl Signature {
    /// Compute the signature of a condition at a location
    ///
    /// The condition is case- and whitespace-normalized and the line number
    /// is ignored.
    #[must_use]
    pub fn of(condition: &str, location: &Location) -> Self {
        let normalized: String = condition
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        let symbol = location.symbol.as_deref().unwrap_or("");
        Self(ContentHash::compute_parts(&[
            normalized.as_bytes(),
            location.file.as_bytes(),
            symbol.as_bytes(),
        ]))
    }

    /// Short form
    #[inline]
    #[must_use]
    pub fn short(&self) -> String {
        self.0.short()
    }
}

impl Display for Signature {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.short())
    }
}

/// Cross-run identity of a finding
pub type FindingKey = Signature;

/// Finding identifier, unique within a run
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FindingId(pub String);

impl FindingId {
    /// Derive the id of a finding produced in run `seq`
    #[must_use]
    pub fn derive(seq: u64, signature: &Signature) -> Self {
        Self(format!("F{seq}-{}", signature.short()))
    }
}

impl Display for FindingId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hypothesis identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HypothesisId(pub String);

impl HypothesisId {
    /// Derive the id from signature and origin
    #[must_use]
    pub fn derive(signature: &Signature, origin: &Origin) -> Self {
        Self(format!("H-{}-{}", signature.short(), origin.code()))
    }
}

impl Display for HypothesisId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a hypothesis came from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Origin {
    /// Newly proposed by a synthesis worker
    Novel,
    /// Re-examination of a prior finding
    Recheck {
        /// Prior finding being rechecked
        prior_finding: FindingId,
    },
    /// Derived from a catalog pattern
    Catalog {
        /// Pattern identifier
        pattern: String,
    },
    /// Derived from a playbook
    Playbook {
        /// Playbook name
        name: String,
    },
}

impl Origin {
    /// Short code used in derived ids
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Novel => "n",
            Self::Recheck { .. } => "r",
            Self::Catalog { .. } => "c",
            Self::Playbook { .. } => "p",
        }
    }

    /// Novel hypotheses count towards the dedup floor
    #[inline]
    #[must_use]
    pub fn is_novel(&self) -> bool {
        matches!(self, Self::Novel)
    }

    /// Re-examinations are never gated by the dismissed ledger
    #[inline]
    #[must_use]
    pub fn is_recheck(&self) -> bool {
        matches!(self, Self::Recheck { .. })
    }
}

/// What the investigate phase does with a hypothesis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Dispatch an investigation task
    #[default]
    Investigate,
    /// Prior finding verified unchanged; carry it without investigation
    Carried,
}

/// Candidate issue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    /// Identifier (derived from signature and origin)
    pub id: HypothesisId,
    /// Origin
    pub origin: Origin,
    /// Underlying condition, e.g. `unchecked-input`
    pub condition: String,
    /// Human-readable title
    pub title: String,
    /// Target location
    pub location: Location,
    /// Severity suggested by the proposer
    #[serde(default)]
    pub severity_hint: Severity,
    /// Tags of the reports the investigation needs
    #[serde(default)]
    pub requires: TagSet,
    /// Investigation disposition
    #[serde(default)]
    pub disposition: Disposition,
}

impl Hypothesis {
    /// Create new hypothesis; the id is derived
    #[must_use]
    pub fn new(
        origin: Origin,
        condition: impl Into<String>,
        title: impl Into<String>,
        location: Location,
    ) -> Self {
        let condition = condition.into();
        let signature = Signature::of(&condition, &location);
        Self {
            id: HypothesisId::derive(&signature, &origin),
            origin,
            condition,
            title: title.into(),
            location,
            severity_hint: Severity::default(),
            requires: TagSet::new(),
            disposition: Disposition::Investigate,
        }
    }

    /// With severity hint
    #[inline]
    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity_hint = severity;
        self
    }

    /// With required tags
    #[inline]
    #[must_use]
    pub fn with_requires(mut self, requires: TagSet) -> Self {
        self.requires = requires;
        self
    }

    /// Mark as carried
    #[inline]
    #[must_use]
    pub fn carried(mut self) -> Self {
        self.disposition = Disposition::Carried;
        self
    }

    /// Stable signature
    #[inline]
    #[must_use]
    pub fn signature(&self) -> Signature {
        Signature::of(&self.condition, &self.location)
    }

    /// Re-derive the id after fields were edited by a worker
    pub fn normalize_id(&mut self) {
        self.id = HypothesisId::derive(&self.signature(), &self.origin);
    }
}

/// How a finding relates to the prior run chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvolutionTag {
    /// Never seen before
    New,
    /// Present and unresolved in the immediately prior run
    Recurrent,
    /// Seen before, resolved in between, back again
    Regression,
    /// Present in the prior run, absent now
    Resolved,
}

impl Display for EvolutionTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "NEW",
            Self::Recurrent => "RECURRENT",
            Self::Regression => "REGRESSION",
            Self::Resolved => "RESOLVED",
        };
        f.write_str(s)
    }
}

/// Investigated outcome of exactly one hypothesis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Identifier
    pub id: FindingId,
    /// Hypothesis this finding answers
    pub hypothesis: HypothesisId,
    /// Outcome
    pub status: FindingStatus,
    /// Severity
    pub severity: Severity,
    /// Underlying condition
    pub condition: String,
    /// Title
    pub title: String,
    /// Location
    pub location: Location,
    /// Supporting evidence
    #[serde(default)]
    pub evidence: String,
    /// Lineage classification (stacked runs only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evolution: Option<EvolutionTag>,
    /// Survived enough consecutive runs to need prioritized attention
    #[serde(default)]
    pub persistent: bool,
}

impl Finding {
    /// Stable cross-run key
    #[inline]
    #[must_use]
    pub fn key(&self) -> FindingKey {
        Signature::of(&self.condition, &self.location)
    }

    /// Bind a worker-produced finding to its hypothesis and run
    ///
    /// Condition and location come from the hypothesis unless the worker
    /// refined the line number; the id is re-derived for `seq`.
    pub fn bind(&mut self, hypothesis: &Hypothesis, seq: u64) {
        self.hypothesis = hypothesis.id.clone();
        self.condition = hypothesis.condition.clone();
        let line = self.location.line.or(hypothesis.location.line);
        self.location = hypothesis.location.clone();
        self.location.line = line;
        if self.title.is_empty() {
            self.title = hypothesis.title.clone();
        }
        self.id = FindingId::derive(seq, &self.key());
    }
}
