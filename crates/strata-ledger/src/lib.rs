//! Strata Ledger
//!
//! Everything that outlives a single run:
//!
//! - [`Chain`]: append-only, SHA-256 linked records keyed by run sequence
//! - [`ArchiveManager`]: atomic move of a finished workspace into history
//! - [`HandoverBuilder`]: carried findings, filtered dismissals, prior
//!   conclusions and the lineage table for a new run
//! - [`DedupEngine`]: suppresses hypotheses dismissed on unchanged files
//! - [`LineageTracker`]: NEW / RECURRENT / REGRESSION / RESOLVED classification

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod archive;
mod chain;
mod dedup;
mod error;
mod fsio;
mod handover;
mod lineage;

pub use archive::{
    ArchiveEntry, ArchiveInfo, ArchiveManager, ArchiveManifest, CorruptArchive, HistoryScan,
    MANIFEST_FILE, RUN_RECORD_FILE,
};
pub use chain::{Chain, ChainRecord};
pub use dedup::{
    dismissals, dismissed_view, retirements, DedupEngine, DedupOutcome, DismissedChain, DismissedEntry,
    DismissedOp, DropReason, DroppedHypothesis,
};
pub use error::{ArchiveError, LedgerError};
pub use fsio::{read_json, read_json_opt, write_json_atomic};
pub use handover::{
    CarryTag, ConclusionSnapshot, DeltaSection, DigestEntry, Handover, HandoverBuilder,
    HandoverInputs, PriorRun,
};
pub use lineage::{
    lineage_view, Classification, FindingTrace, LineageChain, LineageCounts, LineageRow,
    LineageTracker, RowState,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
