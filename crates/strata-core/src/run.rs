//! Run Record
//!
//! The persisted state of one run: identity, configuration summary, the
//! phase/sub-status map and, for a stacked run, a back-pointer to the prior
//! archive. External tools read it without re-running anything.

use crate::config::{ScopeTier, StrataConfig};
use crate::state_machine::{check_barrier, validate_transition, Phase, PhaseStatus, StateMachineError};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use strata_dispatch::DegradedUnit;
use strata_ledger::LineageCounts;
use ulid::Ulid;

/// State of one phase
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseState {
    /// Sub-status
    pub status: PhaseStatus,
    /// First entry into `in_progress`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Last completion or degradation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Number of entries into `in_progress`
    #[serde(default)]
    pub attempts: u32,
    /// Units with a persisted output
    #[serde(default)]
    pub units_completed: usize,
    /// Units that exhausted their retries on the last attempt
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded_units: Vec<DegradedUnit>,
    /// Phase-level failure, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Configuration the run was started with
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSettingsSnapshot {
    /// Scope tier
    pub scope: ScopeTier,
    /// Worker tier per phase
    #[serde(default)]
    pub tiers: BTreeMap<String, String>,
    /// Verification enabled
    pub verification: bool,
}

impl From<&StrataConfig> for RunSettingsSnapshot {
    fn from(config: &StrataConfig) -> Self {
        Self {
            scope: config.run.scope,
            tiers: config.run.tiers.clone(),
            verification: config.verification.enabled,
        }
    }
}

/// Link to the prior run's archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackPointer {
    /// Archive directory
    pub archive: PathBuf,
    /// Prior run id
    pub prior_run_id: String,
    /// Prior sequence number
    pub prior_seq: u64,
    /// Prior codebase reference
    pub prior_ref: String,
    /// Prior run reached its terminal phase
    pub prior_completed: bool,
    /// Prior lineage counts, when the prior run closed its row
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_summary: Option<LineageCounts>,
}

/// What happened to the handover at scan time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum HandoverState {
    /// No prior run
    #[default]
    FirstRun,
    /// Built from the prior archive
    Built,
    /// Prior run exists but nothing was carried
    Skipped {
        /// Operator-facing reason
        reason: String,
    },
}

/// Operator-facing note attached to a phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunNote {
    /// Phase the note belongs to
    pub phase: Phase,
    /// Message
    pub message: String,
    /// Time recorded
    pub at: DateTime<Utc>,
}

/// Run Record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Run id (ULID)
    pub run_id: String,
    /// Sequence number along the chain
    pub seq: u64,
    /// Resolved codebase reference
    pub reference: String,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// Set when the report phase completes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Configuration summary
    pub settings: RunSettingsSnapshot,
    /// Phase map, in execution order
    pub phases: IndexMap<Phase, PhaseState>,
    /// Prior archive, for a stacked run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub back_pointer: Option<BackPointer>,
    /// Handover outcome
    #[serde(default)]
    pub handover: HandoverState,
    /// Notes for the operator
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<RunNote>,
}

impl RunRecord {
    /// Create a new record with every phase pending
    #[must_use]
    pub fn new(seq: u64, reference: impl Into<String>, settings: RunSettingsSnapshot) -> Self {
        Self {
            run_id: Ulid::new().to_string(),
            seq,
            reference: reference.into(),
            started_at: Utc::now(),
            finished_at: None,
            settings,
            phases: Phase::ALL.into_iter().map(|p| (p, PhaseState::default())).collect(),
            back_pointer: None,
            handover: HandoverState::default(),
            notes: Vec::new(),
        }
    }

    /// Sub-status of a phase
    #[must_use]
    pub fn status(&self, phase: Phase) -> PhaseStatus {
        self.phases.get(&phase).map(|s| s.status).unwrap_or_default()
    }

    /// State of a phase
    #[must_use]
    pub fn phase(&self, phase: Phase) -> Option<&PhaseState> {
        self.phases.get(&phase)
    }

    /// Last phase that left `pending`
    #[must_use]
    pub fn phase_reached(&self) -> Option<Phase> {
        Phase::ALL
            .into_iter()
            .rev()
            .find(|p| self.status(*p) != PhaseStatus::Pending)
    }

    /// True once the terminal phase completed
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.status(Phase::Report) == PhaseStatus::Completed
    }

    /// Degraded phases
    #[must_use]
    pub fn degraded(&self) -> Vec<Phase> {
        self.phases
            .iter()
            .filter(|(_, s)| s.status == PhaseStatus::Degraded)
            .map(|(p, _)| *p)
            .collect()
    }

    /// Enter `in_progress`, enforcing the barrier and the transition table
    ///
    /// # Errors
    /// - `StateMachineError::BarrierNotMet` if the predecessor is not completed
    /// - `StateMachineError::IllegalTransition` if the phase cannot be (re)entered
    pub fn begin(&mut self, phase: Phase) -> Result<(), StateMachineError> {
        check_barrier(phase, phase.predecessor().map(|p| self.status(p)))?;
        let state = self.phases.entry(phase).or_default();
        validate_transition(state.status, PhaseStatus::InProgress)?;
        state.status = PhaseStatus::InProgress;
        state.attempts += 1;
        state.started_at.get_or_insert_with(Utc::now);
        state.error = None;
        Ok(())
    }

    /// Leave `in_progress` as completed or degraded
    ///
    /// # Errors
    /// `StateMachineError::IllegalTransition` if the phase is not in progress
    pub fn finish(
        &mut self,
        phase: Phase,
        units_completed: usize,
        degraded_units: Vec<DegradedUnit>,
        error: Option<String>,
    ) -> Result<PhaseStatus, StateMachineError> {
        let state = self.phases.entry(phase).or_default();
        let to = if degraded_units.is_empty() && error.is_none() {
            PhaseStatus::Completed
        } else {
            PhaseStatus::Degraded
        };
        validate_transition(state.status, to)?;
        state.status = to;
        state.finished_at = Some(Utc::now());
        state.units_completed = units_completed;
        state.degraded_units = degraded_units;
        state.error = error;
        if phase.is_terminal() && to == PhaseStatus::Completed {
            self.finished_at = state.finished_at;
        }
        Ok(to)
    }

    /// Attach a note
    pub fn note(&mut self, phase: Phase, message: impl Into<String>) {
        self.notes.push(RunNote {
            phase,
            message: message.into(),
            at: Utc::now(),
        });
    }
}
