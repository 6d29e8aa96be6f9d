//! Strata Delta Engine
//!
//! File-level change classification between two codebase snapshots.
//!
//! - [`VersionControl`]: the collaborator boundary (resolve, list, diff)
//! - [`GitCli`]: `git` binary adapter
//! - [`DeltaEngine`]: NEW / MODIFIED(minor|major) / UNCHANGED / DELETED
//!   classification with the massive-rewrite flag

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod delta;
mod git;
mod vcs;

pub use delta::{Delta, DeltaConfig, DeltaEngine, DeltaError, DeltaSummary, FileDelta, FileStatus, Magnitude};
pub use git::GitCli;
pub use vcs::{ChangeKind, FileChange, TrackedFile, VcsError, VersionControl};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
