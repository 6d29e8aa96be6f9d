//! Testing utilities for the Strata workspace
//!
//! In-memory version control, a deterministic worker and run fixtures.

#![allow(missing_docs)]

mod fixture;
mod vcs;
mod worker;

pub use fixture::{hypothesis, test_config, Harness};
pub use vcs::{body, InMemoryVcs};
pub use worker::{calls_per_unit, ScriptedWorker};
