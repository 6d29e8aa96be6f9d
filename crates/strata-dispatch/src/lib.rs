//! Strata Dispatch
//!
//! Everything between "a phase wants these tasks done" and "each unit has
//! exactly one persisted output":
//!
//! - [`CostEstimator`]: pluggable, monotone cost estimation
//! - [`Planner`]: splits oversized tasks and packs capacity-bounded batches
//! - [`TagIndex`]: provides/requires router
//! - [`Worker`] / [`CommandWorker`]: the worker invocation boundary
//! - [`WorkerPool`]: concurrent batch dispatch with bounded retries
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use strata_artifact::UnitId;
//! use strata_dispatch::{BudgetConfig, InputSlice, LinearEstimator, Planner, TaskKind, TaskSpec};
//!
//! let budget = BudgetConfig::default();
//! let planner = Planner::new(Arc::new(LinearEstimator::from(&budget)), budget);
//! let task = TaskSpec::new(UnitId("analyze-1".into()), "analyze", TaskKind::Analyze)
//!     .with_inputs(vec![InputSlice::whole("src/lib.rs", 200)]);
//! let plan = planner.plan(vec![task]);
//! assert_eq!(plan.batches.len(), 1);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod batch;
mod error;
mod estimate;
mod pool;
mod router;
mod task;
mod worker;

pub use batch::{Batch, DispatchPlan, PlannedTask, Planner, Rejected};
pub use error::{DispatchError, WorkerError};
pub use estimate::{BudgetConfig, CostEstimator, LinearEstimator};
pub use pool::{DegradedUnit, DispatchOutcome, PoolStats, ReportSink, RetryPolicy, SinkError, WorkerPool};
pub use router::TagIndex;
pub use task::{InputSlice, ReferenceDoc, TaskKind, TaskSpec};
pub use worker::{CommandWorker, Worker};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
