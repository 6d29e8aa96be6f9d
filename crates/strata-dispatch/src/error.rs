//! Error types for dispatch
//!
//! Every error names the unit it concerns, so a degraded phase can report
//! exactly which units failed.

use strata_artifact::UnitId;

/// Planning and dispatch errors
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Task exceeds the ceiling and its kind cannot be split
    #[error("unit {unit}: estimate {estimate} exceeds ceiling {ceiling} and cannot be split")]
    Oversized {
        unit: UnitId,
        estimate: u64,
        ceiling: u64,
    },

    /// No partition of the task fits the ceiling
    #[error("unit {unit}: fixed cost {floor} leaves no room under ceiling {ceiling}")]
    Unsplittable {
        unit: UnitId,
        floor: u64,
        ceiling: u64,
    },

    /// Worker failed after exhausting retries
    #[error("unit {unit}: worker failed after {attempts} attempt(s): {source}")]
    WorkerExhausted {
        unit: UnitId,
        attempts: u32,
        #[source]
        source: WorkerError,
    },

    /// Output could not be persisted
    #[error("unit {unit}: failed to persist output: {message}")]
    Persist { unit: UnitId, message: String },
}

impl DispatchError {
    /// Unit the error concerns
    #[must_use]
    pub fn unit(&self) -> &UnitId {
        match self {
            Self::Oversized { unit, .. }
            | Self::Unsplittable { unit, .. }
            | Self::WorkerExhausted { unit, .. }
            | Self::Persist { unit, .. } => unit,
        }
    }
}

/// Errors returned by a single worker invocation
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// Worker process exited unsuccessfully
    #[error("worker exited with {status}: {stderr}")]
    Exit { status: String, stderr: String },

    /// Worker exceeded its time limit
    #[error("worker timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Temporary failure reported by the worker
    #[error("transient failure: {0}")]
    Transient(String),

    /// Output was not a valid report
    #[error("malformed output: {0}")]
    Malformed(String),

    /// Output payload does not match the task kind
    #[error("expected {expected} payload, got {actual}")]
    WrongPayload {
        expected: &'static str,
        actual: &'static str,
    },

    /// Worker could not be started
    #[error("failed to start worker: {0}")]
    Spawn(#[source] std::io::Error),

    /// I/O with a running worker failed
    #[error("worker io error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Exit { .. } | Self::Timeout { .. } | Self::Transient(_) | Self::Io(_)
        )
    }
}
