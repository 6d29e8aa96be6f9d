//! Task specifications
//!
//! A [`TaskSpec`] is everything a worker receives: scope, routed reports,
//! reference material and its resource budget.

use serde::{Deserialize, Serialize};
use strata_artifact::{Report, TagSet, UnitId};

/// What a task asks the worker to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Analyze source for a focus area
    Analyze,
    /// Re-validate prior conclusions against a delta
    Verify,
    /// Propose hypotheses from analysis reports
    Synthesize,
    /// Investigate one hypothesis
    Investigate,
}

impl TaskKind {
    /// Payload kind a worker must return for this task
    #[must_use]
    pub fn expected_payload(self) -> &'static str {
        match self {
            Self::Analyze => "analysis",
            Self::Verify => "verification",
            Self::Synthesize => "hypotheses",
            Self::Investigate => "finding",
        }
    }

    /// Split inputs of this kind across several workers
    ///
    /// Only analysis reads source directly; other kinds work from reports.
    #[inline]
    #[must_use]
    pub fn is_splittable(self) -> bool {
        matches!(self, Self::Analyze)
    }
}

/// Half-open line range `[start, end)` of one file
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputSlice {
    /// Repository-relative path
    pub path: String,
    /// First line (0-based)
    pub start: u64,
    /// One past the last line
    pub end: u64,
}

impl InputSlice {
    /// Whole file of `lines` lines
    #[inline]
    #[must_use]
    pub fn whole(path: impl Into<String>, lines: u64) -> Self {
        Self {
            path: path.into(),
            start: 0,
            end: lines,
        }
    }

    /// Line count
    #[inline]
    #[must_use]
    pub fn lines(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }
}

/// Knowledge-reference document handed to a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceDoc {
    /// Name
    pub name: String,
    /// Path on disk
    pub path: String,
    /// Size in bytes, known before dispatch
    pub bytes: u64,
}

/// Unit of dispatched work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Unit id (a split part carries its part id)
    pub unit: UnitId,
    /// Phase name
    pub phase: String,
    /// Task kind
    pub kind: TaskKind,
    /// Focus area
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus: Option<String>,
    /// Assigned source input
    #[serde(default)]
    pub inputs: Vec<InputSlice>,
    /// Reports selected by the router
    #[serde(default)]
    pub routed: Vec<Report>,
    /// Reference material subset
    #[serde(default)]
    pub references: Vec<ReferenceDoc>,
    /// Tags the output will provide
    #[serde(default)]
    pub provides: TagSet,
    /// Tags of the reports this task consumes
    #[serde(default)]
    pub requires: TagSet,
    /// Phase-specific context (delta fragment, conclusions snapshot, hypothesis)
    #[serde(default)]
    pub context: serde_json::Value,
    /// Worker tier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
    /// Capacity ceiling this task was sized against
    #[serde(default)]
    pub budget: u64,
}

impl TaskSpec {
    /// Create new task
    #[must_use]
    pub fn new(unit: UnitId, phase: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            unit,
            phase: phase.into(),
            kind,
            focus: None,
            inputs: Vec::new(),
            routed: Vec::new(),
            references: Vec::new(),
            provides: TagSet::new(),
            requires: TagSet::new(),
            context: serde_json::Value::Null,
            tier: None,
            budget: 0,
        }
    }

    /// With focus area
    #[inline]
    #[must_use]
    pub fn with_focus(mut self, focus: impl Into<String>) -> Self {
        self.focus = Some(focus.into());
        self
    }

    /// With assigned inputs
    #[inline]
    #[must_use]
    pub fn with_inputs(mut self, inputs: Vec<InputSlice>) -> Self {
        self.inputs = inputs;
        self
    }

    /// With routed reports
    #[inline]
    #[must_use]
    pub fn with_routed(mut self, routed: Vec<Report>) -> Self {
        self.routed = routed;
        self
    }

    /// With reference documents
    #[inline]
    #[must_use]
    pub fn with_references(mut self, references: Vec<ReferenceDoc>) -> Self {
        self.references = references;
        self
    }

    /// With provided tags
    #[inline]
    #[must_use]
    pub fn with_provides(mut self, provides: TagSet) -> Self {
        self.provides = provides;
        self
    }

    /// With required tags
    #[inline]
    #[must_use]
    pub fn with_requires(mut self, requires: TagSet) -> Self {
        self.requires = requires;
        self
    }

    /// With phase context
    #[inline]
    #[must_use]
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    /// With worker tier
    #[inline]
    #[must_use]
    pub fn with_tier(mut self, tier: Option<String>) -> Self {
        self.tier = tier;
        self
    }

    /// Total assigned source lines
    #[must_use]
    pub fn input_lines(&self) -> u64 {
        self.inputs.iter().map(InputSlice::lines).sum()
    }

    /// Total reference bytes
    #[must_use]
    pub fn reference_bytes(&self) -> u64 {
        self.references.iter().map(|r| r.bytes).sum()
    }

    /// Total serialized size of routed reports
    #[must_use]
    pub fn routed_bytes(&self) -> u64 {
        self.routed.iter().map(Report::size_bytes).sum()
    }

    /// Copy of this task with different inputs and unit id
    #[must_use]
    pub fn part(&self, index: usize, inputs: Vec<InputSlice>) -> Self {
        let mut part = self.clone();
        part.unit = self.unit.part(index);
        part.inputs = inputs;
        part
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_artifact::tag_set;

    #[test]
    fn slices_count_lines() {
        assert_eq!(InputSlice::whole("a", 40).lines(), 40);
        let slice = InputSlice {
            path: "a".into(),
            start: 10,
            end: 4,
        };
        assert_eq!(slice.lines(), 0);
    }

    #[test]
    fn parts_keep_scope_and_tags() {
        let task = TaskSpec::new(UnitId("analyze-1".into()), "analyze", TaskKind::Analyze)
            .with_focus("auth")
            .with_provides(tag_set(["focus:auth"]))
            .with_inputs(vec![InputSlice::whole("a", 10)]);
        let part = task.part(1, vec![InputSlice::whole("b", 3)]);
        assert_eq!(part.unit.as_str(), "analyze-1.part1");
        assert_eq!(part.provides, task.provides);
        assert_eq!(part.focus, task.focus);
        assert_eq!(part.input_lines(), 3);
    }
}
