//! Phase bodies
//!
//! Each phase reads the documents earlier phases wrote, dispatches its units
//! through the planner and worker pool, and writes its own document. Unit
//! outputs already on disk are skipped, which is what makes a phase
//! resumable.

mod analyze;
mod index;
mod investigate;
mod report;
mod scan;
mod synthesize;

pub use analyze::AnalysisMode;
pub use index::{FocusFiles, IndexResult, ROOT_FOCUS};
pub use investigate::FINDING_TAG;
pub use report::{Escalation, ResolutionCause, ResolvedFinding, RunReport};
pub use scan::ScanResult;
pub use synthesize::HypothesisSet;

use crate::error::OrchestratorError;
use crate::orchestrator::Orchestrator;
use crate::state_machine::{Phase, PhaseStatus};
use serde::{Deserialize, Serialize};
use strata_artifact::{Report, TagSet};
use strata_dispatch::{DegradedUnit, DispatchPlan, ReferenceDoc, TaskSpec};
use tracing::{debug, warn};

/// What a phase body produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct PhaseWork {
    pub(crate) completed: usize,
    pub(crate) skipped: usize,
    pub(crate) degraded: Vec<DegradedUnit>,
    pub(crate) notes: Vec<String>,
}

impl PhaseWork {
    pub(crate) fn note(&mut self, message: impl Into<String>) {
        self.notes.push(message.into());
    }
}

/// Result of one phase invocation, as reported to the operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseOutcome {
    /// Phase
    pub phase: Phase,
    /// Sub-status after the invocation
    pub status: PhaseStatus,
    /// Units with a persisted output
    pub completed: usize,
    /// Units skipped because their output already existed
    pub skipped: usize,
    /// Units that failed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded: Vec<DegradedUnit>,
    /// Phase-level failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Notes recorded during the phase
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
    /// Phase had already completed; nothing ran
    #[serde(default)]
    pub already_completed: bool,
}

impl PhaseOutcome {
    pub(crate) fn already_completed(phase: Phase) -> Self {
        Self {
            phase,
            status: PhaseStatus::Completed,
            completed: 0,
            skipped: 0,
            degraded: Vec::new(),
            error: None,
            notes: Vec::new(),
            already_completed: true,
        }
    }

    /// True if the phase completed
    #[inline]
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == PhaseStatus::Completed
    }
}

impl Orchestrator {
    /// Plan and dispatch a phase's tasks, persisting outputs under `units/<phase>/`
    pub(crate) async fn dispatch(&self, phase: Phase, tasks: Vec<TaskSpec>) -> (DispatchPlan, PhaseWork) {
        let plan = self.planner.plan(tasks);
        let store = self.current().units(phase);
        let outcome = self.pool.dispatch(&plan, &store).await;

        let mut work = PhaseWork {
            completed: outcome.completed.len() + outcome.skipped.len(),
            skipped: outcome.skipped.len(),
            degraded: outcome.degraded,
            notes: Vec::new(),
        };
        for rejected in &plan.rejected {
            work.degraded.push(DegradedUnit {
                unit: rejected.unit.clone(),
                attempts: 0,
                error: rejected.error.to_string(),
            });
        }
        for (logical, parts) in plan.split_units() {
            work.note(format!("{logical} split into {} parts", parts.len()));
        }
        (plan, work)
    }

    /// Logical reports of a dispatched plan; split parts are merged
    ///
    /// Logical units with a missing part are left out.
    pub(crate) fn logical_reports(&self, phase: Phase, plan: &DispatchPlan) -> Result<Vec<Report>, OrchestratorError> {
        let store = self.current().units(phase);
        let mut reports = Vec::with_capacity(plan.units.len());
        for (logical, parts) in &plan.units {
            let mut loaded = Vec::with_capacity(parts.len());
            for part in parts {
                if let Some(report) = store.load(part)? {
                    loaded.push(report);
                }
            }
            if loaded.len() != parts.len() {
                debug!(unit = %logical, have = loaded.len(), want = parts.len(), "logical unit incomplete");
                continue;
            }
            reports.push(Report::merge(logical.clone(), loaded)?);
        }
        Ok(reports)
    }

    /// Knowledge references serving a task with these tags
    pub(crate) fn references_for(&self, tags: &TagSet) -> Vec<ReferenceDoc> {
        self.config
            .reference
            .iter()
            .filter(|r| r.serves(tags))
            .map(|r| {
                let full = self.workspace.repo().join(&r.path);
                let bytes = match std::fs::metadata(&full) {
                    Ok(meta) => meta.len(),
                    Err(e) => {
                        warn!(reference = %r.name, path = %full.display(), error = %e, "reference unreadable");
                        0
                    }
                };
                ReferenceDoc {
                    name: r.name.clone(),
                    path: r.path.to_string_lossy().into_owned(),
                    bytes,
                }
            })
            .collect()
    }

    /// Common task decoration: references and worker tier
    pub(crate) fn decorate(&self, task: TaskSpec) -> TaskSpec {
        let tags: TagSet = task.provides.union(&task.requires).cloned().collect();
        let references = self.references_for(&tags);
        let tier = self.config.tier_for(&task.phase);
        task.with_references(references).with_tier(tier)
    }
}
