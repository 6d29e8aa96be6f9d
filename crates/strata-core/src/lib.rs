//! Strata Core - Phase Orchestrator
//!
//! Drives one analysis run through scan → index → analyze → synthesize →
//! investigate → report and stacks it on the prior run:
//! - Computes the delta against the prior run's reference
//! - Builds the handover (carried findings, dismissals, conclusions, lineage)
//! - Verifies prior conclusions about unchanged code instead of re-deriving them
//! - Classifies findings as NEW / RECURRENT / REGRESSION / RESOLVED
//!
//! Every phase is resumable: unit outputs already on disk are never
//! re-dispatched.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use strata_core::{Orchestrator, StrataConfig, Workspace};
//! use strata_delta::GitCli;
//!
//! # async fn example(worker: Arc<dyn strata_dispatch::Worker>) -> Result<(), Box<dyn std::error::Error>> {
//! let orchestrator = Orchestrator::new(
//!     StrataConfig::new(),
//!     Workspace::new("."),
//!     Arc::new(GitCli::new(".")),
//!     worker,
//! )?;
//! let summary = orchestrator.run("HEAD").await?;
//! println!("run {} clean: {}", summary.run_id, summary.is_clean());
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod phases;
pub mod run;
pub mod state_machine;
pub mod verification;
pub mod workspace;

pub use config::{
    ConfigError, DedupSettings, FocusArea, LineageSettings, ReferenceSource, RunSettings, ScopeTier,
    StrataConfig, VerificationSettings, WorkerSettings, CONFIG_FILE,
};
pub use error::OrchestratorError;
pub use orchestrator::{Orchestrator, RunSummary, StatusReport};
pub use phases::{
    AnalysisMode, Escalation, FocusFiles, HypothesisSet, IndexResult, PhaseOutcome, ResolutionCause,
    ResolvedFinding, RunReport, ScanResult,
};
pub use run::{BackPointer, HandoverState, PhaseState, RunNote, RunRecord, RunSettingsSnapshot};
pub use state_machine::{allowed_transitions, check_barrier, validate_transition, Phase, PhaseStatus, StateMachineError};
pub use verification::{VerificationGate, VerificationOutcome};
pub use workspace::{HandoverSection, RunDir, UnitStore, Workspace};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for driving runs
    pub use crate::{
        Orchestrator, OrchestratorError, Phase, PhaseOutcome, PhaseStatus, RunRecord, RunReport, RunSummary,
        StrataConfig, Workspace,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
