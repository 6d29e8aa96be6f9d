//! Strata Artifact System
//!
//! Content-addressed, immutable outputs exchanged between the orchestrator
//! and its workers.
//!
//! # Core Concepts
//!
//! - [`ContentHash`]: 32-byte Blake3 hash for content addressing
//! - [`Tag`]: provides/requires routing tag
//! - [`Report`]: immutable tagged output of one unit
//! - [`Hypothesis`] / [`Finding`]: candidate issue and its investigated outcome
//! - [`Signature`]: cross-run identity (condition + file + symbol)
//!
//! # Example
//!
//! ```rust
//! use strata_artifact::{Hypothesis, Location, Origin};
//!
//! let hyp = Hypothesis::new(Origin::Novel, "unchecked-input", "Unchecked input", Location::file("src/api.rs"));
//! assert_eq!(hyp.signature(), hyp.signature());
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod finding;
mod hash;
mod report;
mod tag;

pub use finding::{
    Disposition, EvolutionTag, Finding, FindingId, FindingKey, FindingStatus, Hypothesis,
    HypothesisId, Location, Origin, Severity, Signature,
};
pub use hash::{ContentHash, HashError};
pub use report::{
    Analysis, Concern, Conclusion, ConclusionVerdict, Payload, Report, ReportError, ReportId,
    UnitId, Verdict, VerificationReport,
};
pub use tag::{tag_set, Tag, TagError, TagSet, FOCUS_PREFIX};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
