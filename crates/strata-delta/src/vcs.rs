//! Version-control collaborator
//!
//! The orchestrator only ever asks three things of version control: resolve a
//! reference, list the files it tracks, and diff two references.

use serde::{Deserialize, Serialize};

/// A file tracked at some reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedFile {
    /// Repository-relative path
    pub path: String,
    /// Line count (0 when unknown or binary)
    pub lines: u64,
}

impl TrackedFile {
    /// Create new tracked file
    #[inline]
    #[must_use]
    pub fn new(path: impl Into<String>, lines: u64) -> Self {
        Self {
            path: path.into(),
            lines,
        }
    }
}

/// Path-level change kind reported by a diff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    /// Present only in the newer reference
    Added,
    /// Present in both with different content
    Modified,
    /// Present only in the older reference
    Deleted,
}

/// One entry of a path-level diff
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    /// Repository-relative path
    pub path: String,
    /// Change kind
    pub kind: ChangeKind,
    /// Lines added
    pub added: u64,
    /// Lines removed
    pub removed: u64,
    /// Binary content (line counts unavailable)
    pub binary: bool,
}

impl FileChange {
    /// Text change with line counts
    #[must_use]
    pub fn text(path: impl Into<String>, kind: ChangeKind, added: u64, removed: u64) -> Self {
        Self {
            path: path.into(),
            kind,
            added,
            removed,
            binary: false,
        }
    }

    /// Binary change
    #[must_use]
    pub fn binary(path: impl Into<String>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
            added: 0,
            removed: 0,
            binary: true,
        }
    }

    /// Total changed lines
    #[inline]
    #[must_use]
    pub fn changed_lines(&self) -> u64 {
        self.added + self.removed
    }
}

/// Version-control operations the Delta Engine depends on
pub trait VersionControl: Send + Sync {
    /// Resolve a reference to a stable identifier (e.g. a commit hash)
    ///
    /// # Errors
    /// Returns `VcsError::UnknownRef` if the reference does not exist
    fn resolve(&self, reference: &str) -> Result<String, VcsError>;

    /// Files tracked at `reference`, with line counts
    ///
    /// # Errors
    /// Returns error if the listing cannot be produced
    fn tracked_files(&self, reference: &str) -> Result<Vec<TrackedFile>, VcsError>;

    /// Path-level diff from `from` to `to`
    ///
    /// # Errors
    /// Returns error if either reference is unknown or the diff fails
    fn diff(&self, from: &str, to: &str) -> Result<Vec<FileChange>, VcsError>;
}

/// Version-control errors
#[derive(Debug, thiserror::Error)]
pub enum VcsError {
    /// Reference could not be resolved
    #[error("unknown reference: {0}")]
    UnknownRef(String),

    /// Command exited unsuccessfully
    #[error("`{command}` failed with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    /// Command output could not be parsed
    #[error("unparseable output from `{command}`: {line:?}")]
    Parse { command: String, line: String },

    /// Process could not be spawned or read
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
