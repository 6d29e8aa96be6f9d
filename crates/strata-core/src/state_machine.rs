//! Phase state machine
//!
//! Phases run strictly in order; each carries a sub-status. A phase may
//! start only once its predecessor is completed.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Pipeline phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Scan,
    Index,
    Analyze,
    Synthesize,
    Investigate,
    Report,
}

impl Phase {
    /// All phases in execution order
    pub const ALL: [Phase; 6] = [
        Phase::Scan,
        Phase::Index,
        Phase::Analyze,
        Phase::Synthesize,
        Phase::Investigate,
        Phase::Report,
    ];

    /// Lowercase name, used for unit ids and directories
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Scan => "scan",
            Self::Index => "index",
            Self::Analyze => "analyze",
            Self::Synthesize => "synthesize",
            Self::Investigate => "investigate",
            Self::Report => "report",
        }
    }

    /// Phase that must complete first
    #[must_use]
    pub fn predecessor(self) -> Option<Self> {
        let idx = Self::ALL.iter().position(|p| *p == self)?;
        idx.checked_sub(1).map(|i| Self::ALL[i])
    }

    /// Phase that follows
    #[must_use]
    pub fn successor(self) -> Option<Self> {
        let idx = Self::ALL.iter().position(|p| *p == self)?;
        Self::ALL.get(idx + 1).copied()
    }

    /// True for the terminal phase
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == Self::Report
    }
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Phase {
    type Err = StateMachineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.name() == s.trim().to_lowercase())
            .ok_or_else(|| StateMachineError::UnknownPhase(s.to_string()))
    }
}

/// Sub-status of one phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Degraded,
}

impl Display for PhaseStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Degraded => "degraded",
        };
        f.write_str(s)
    }
}

/// Validates a sub-status transition.
///
/// `in_progress -> in_progress` is the resume after a process interruption.
pub fn validate_transition(from: PhaseStatus, to: PhaseStatus) -> Result<(), StateMachineError> {
    if allowed(from, to) {
        Ok(())
    } else {
        Err(StateMachineError::IllegalTransition { from, to })
    }
}

pub fn allowed_transitions(from: PhaseStatus) -> Vec<PhaseStatus> {
    use PhaseStatus::*;
    match from {
        Pending => vec![InProgress],
        InProgress => vec![InProgress, Completed, Degraded],
        Degraded => vec![InProgress],
        Completed => vec![],
    }
}

fn allowed(from: PhaseStatus, to: PhaseStatus) -> bool {
    allowed_transitions(from).into_iter().any(|s| s == to)
}

/// Phase barrier: `phase` may start only when its predecessor completed
pub fn check_barrier(phase: Phase, predecessor_status: Option<PhaseStatus>) -> Result<(), StateMachineError> {
    match (phase.predecessor(), predecessor_status) {
        (None, _) | (Some(_), Some(PhaseStatus::Completed)) => Ok(()),
        (Some(predecessor), status) => Err(StateMachineError::BarrierNotMet {
            phase,
            predecessor,
            status: status.unwrap_or_default(),
        }),
    }
}

/// State machine errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateMachineError {
    /// Sub-status transition not allowed
    #[error("illegal phase transition {from} -> {to}")]
    IllegalTransition { from: PhaseStatus, to: PhaseStatus },

    /// Predecessor has not completed
    #[error("cannot start {phase}: {predecessor} is {status}")]
    BarrierNotMet {
        phase: Phase,
        predecessor: Phase,
        status: PhaseStatus,
    },

    /// Unrecognized phase name
    #[error("unknown phase {0:?}")]
    UnknownPhase(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_are_ordered() {
        assert_eq!(Phase::Scan.predecessor(), None);
        assert_eq!(Phase::Analyze.predecessor(), Some(Phase::Index));
        assert_eq!(Phase::Report.successor(), None);
        assert_eq!(Phase::Index.successor(), Some(Phase::Analyze));
        assert!(Phase::Scan < Phase::Report);
        assert_eq!("Synthesize".parse::<Phase>().unwrap(), Phase::Synthesize);
        assert!(matches!("deploy".parse::<Phase>(), Err(StateMachineError::UnknownPhase(_))));
    }

    #[test]
    fn legal_transitions() {
        use PhaseStatus::*;
        assert!(validate_transition(Pending, InProgress).is_ok());
        assert!(validate_transition(InProgress, Completed).is_ok());
        assert!(validate_transition(InProgress, Degraded).is_ok());
        assert!(validate_transition(Degraded, InProgress).is_ok());
        assert!(validate_transition(InProgress, InProgress).is_ok());
    }

    #[test]
    fn illegal_transitions() {
        use PhaseStatus::*;
        assert_eq!(
            validate_transition(Pending, Completed),
            Err(StateMachineError::IllegalTransition {
                from: Pending,
                to: Completed
            })
        );
        assert!(validate_transition(Completed, InProgress).is_err());
        assert!(validate_transition(Degraded, Completed).is_err());
        assert!(allowed_transitions(Completed).is_empty());
    }

    #[test]
    fn barrier_requires_completed_predecessor() {
        assert!(check_barrier(Phase::Scan, None).is_ok());
        assert!(check_barrier(Phase::Index, Some(PhaseStatus::Completed)).is_ok());
        assert_eq!(
            check_barrier(Phase::Synthesize, Some(PhaseStatus::Degraded)),
            Err(StateMachineError::BarrierNotMet {
                phase: Phase::Synthesize,
                predecessor: Phase::Analyze,
                status: PhaseStatus::Degraded,
            })
        );
        assert!(matches!(
            check_barrier(Phase::Index, None),
            Err(StateMachineError::BarrierNotMet {
                status: PhaseStatus::Pending,
                ..
            })
        ));
    }

    fn any_status() -> impl proptest::strategy::Strategy<Value = PhaseStatus> {
        proptest::sample::select(vec![
            PhaseStatus::Pending,
            PhaseStatus::InProgress,
            PhaseStatus::Completed,
            PhaseStatus::Degraded,
        ])
    }

    proptest::proptest! {
        #[test]
        fn completed_is_terminal(steps in proptest::collection::vec(any_status(), 0..24)) {
            let mut status = PhaseStatus::Pending;
            for to in steps {
                if validate_transition(status, to).is_ok() {
                    proptest::prop_assert_ne!(status, PhaseStatus::Completed);
                    proptest::prop_assert_ne!(to, PhaseStatus::Pending);
                    status = to;
                }
            }
        }
    }
}
