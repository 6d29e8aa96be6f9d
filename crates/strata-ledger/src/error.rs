//! Error types for ledgers and archives

use std::path::{Path, PathBuf};

/// Ledger and persistence errors
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Filesystem failure
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed or unserializable JSON
    #[error("json error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Hash chain does not verify
    #[error("chain integrity violation at record {index}")]
    IntegrityViolation { index: usize },

    /// Record appended with a sequence number lower than the chain head
    #[error("record for run {got} appended after run {last}")]
    OutOfOrder { last: u64, got: u64 },

    /// Record body could not be hashed
    #[error("failed to encode record: {0}")]
    Encode(#[source] serde_json::Error),
}

impl LedgerError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn json(path: &Path, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Archive errors
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// No workspace to archive
    #[error("workspace not found: {0}")]
    MissingWorkspace(PathBuf),

    /// Archive is incomplete or its digest does not match
    #[error("archive {key} is corrupt: {reason}")]
    Corrupt { key: String, reason: String },

    /// Archive key not present in history
    #[error("archive {0} not found")]
    NotFound(String),

    /// Underlying persistence failure
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl ArchiveError {
    /// Structural failures disable the dependent optimization instead of
    /// aborting the run
    #[inline]
    #[must_use]
    pub fn is_structural(&self) -> bool {
        matches!(self, Self::Corrupt { .. } | Self::NotFound(_))
    }
}
