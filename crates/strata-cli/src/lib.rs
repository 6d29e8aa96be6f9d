//! Strata CLI
//!
//! The `strata` binary drives the phase orchestrator against a git
//! repository and an external worker command:
//! - `scan` starts a run (archive, delta, handover) and indexes focus areas
//! - `analyze`, `synthesize`, `investigate`, `report` run one phase each
//! - `run` runs every remaining phase
//! - `status` reads the Run Record and lineage without changing anything

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod cli;
pub mod commands;
pub mod logging;

pub use cli::build_cli;
pub use commands::{execute, exit_code, exit_code_for, status, Invocation, EXIT_DEGRADED, EXIT_OK, EXIT_STRUCTURAL};
pub use logging::{init_logging, LogFormat, LogOptions, LOG_ENV};
