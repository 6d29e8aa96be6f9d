//! Error types for the orchestrator
//!
//! Failures inside a phase body degrade that phase and are recorded in the
//! Run Record. The errors below are the ones that prevent a phase from
//! starting at all.

use crate::config::ConfigError;
use crate::state_machine::{Phase, StateMachineError};
use strata_artifact::ReportError;
use strata_delta::VcsError;
use strata_dispatch::WorkerError;
use strata_ledger::{ArchiveError, LedgerError};

/// Main orchestrator error type
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Configuration invalid
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Phase ordering or sub-status violation
    #[error("state machine error: {0}")]
    StateMachine(#[from] StateMachineError),

    /// Version control unusable for the current reference
    #[error("version control error: {0}")]
    Vcs(#[from] VcsError),

    /// Persisted state unreadable or unwritable
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// History store unusable
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// Worker could not be constructed
    #[error("worker error: {0}")]
    Worker(#[from] WorkerError),

    /// Split outputs could not be merged
    #[error("report error: {0}")]
    Report(#[from] ReportError),

    /// No active run in the workspace
    #[error("no active run; start one with `scan`")]
    NoActiveRun,

    /// A phase input written by an earlier phase is missing
    #[error("{phase}: missing input {input}")]
    MissingInput { phase: Phase, input: &'static str },
}

impl OrchestratorError {
    /// True for errors that an operator re-run cannot fix without changing
    /// configuration or repository state
    #[must_use]
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Vcs(_) | Self::Archive(_) | Self::NoActiveRun | Self::StateMachine(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::PhaseStatus;

    #[test]
    fn structural_classification() {
        assert!(OrchestratorError::NoActiveRun.is_structural());
        assert!(OrchestratorError::StateMachine(StateMachineError::BarrierNotMet {
            phase: Phase::Analyze,
            predecessor: Phase::Index,
            status: PhaseStatus::Pending,
        })
        .is_structural());
        assert!(!OrchestratorError::MissingInput {
            phase: Phase::Synthesize,
            input: "analysis.json",
        }
        .is_structural());
    }

    #[test]
    fn messages_name_the_phase() {
        let err = OrchestratorError::MissingInput {
            phase: Phase::Investigate,
            input: "hypotheses.json",
        };
        assert_eq!(err.to_string(), "investigate: missing input hypotheses.json");
    }
}
