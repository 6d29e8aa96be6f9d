//! Worker pool
//!
//! Dispatches a plan batch by batch. Units within a batch run concurrently
//! and share no state; each output is persisted through a [`ReportSink`] as
//! soon as it arrives. A unit that exhausts its retries is recorded as
//! degraded without cancelling its siblings.

use crate::batch::{Batch, DispatchPlan};
use crate::error::{DispatchError, WorkerError};
use crate::task::TaskSpec;
use crate::worker::Worker;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use strata_artifact::{Report, TagSet, UnitId};
use tracing::{debug, info, warn};

/// Error type returned by sinks
pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// Durable destination for unit outputs
pub trait ReportSink: Send + Sync {
    /// True if `unit` already has a persisted output
    fn exists(&self, unit: &UnitId) -> bool;

    /// Persist one unit output
    ///
    /// # Errors
    /// Returns error if the output cannot be written
    fn persist(&self, report: &Report) -> Result<(), SinkError>;
}

/// Retry policy for transient worker failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts per unit, including the first
    pub max_attempts: u32,
    /// Base backoff; attempt `n` waits `n × backoff_ms`
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 500,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based)
    #[inline]
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(u64::from(attempt)))
    }
}

/// Unit that could not be completed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradedUnit {
    /// Unit id
    pub unit: UnitId,
    /// Attempts made
    pub attempts: u32,
    /// Last error
    pub error: String,
}

/// Result of dispatching a plan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    /// Units completed in this invocation
    pub completed: Vec<UnitId>,
    /// Units skipped because an output already existed
    pub skipped: Vec<UnitId>,
    /// Units that exhausted retries or failed fatally
    pub degraded: Vec<DegradedUnit>,
}

impl DispatchOutcome {
    /// True if no unit degraded
    #[inline]
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.degraded.is_empty()
    }

    fn absorb(&mut self, other: Self) {
        self.completed.extend(other.completed);
        self.skipped.extend(other.skipped);
        self.degraded.extend(other.degraded);
    }
}

/// Pool statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Worker invocations
    pub invocations: u64,
    /// Retries after transient failures
    pub retries: u64,
    /// Units completed
    pub completed: u64,
    /// Units degraded
    pub degraded: u64,
}

/// Dispatches tasks to a worker with bounded retries
pub struct WorkerPool {
    worker: Arc<dyn Worker>,
    retry: RetryPolicy,
    in_flight: DashMap<UnitId, u32>,
    stats: Mutex<PoolStats>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("worker", &self.worker.name())
            .field("retry", &self.retry)
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

impl WorkerPool {
    /// Create new pool
    #[must_use]
    pub fn new(worker: Arc<dyn Worker>, retry: RetryPolicy) -> Self {
        Self {
            worker,
            retry,
            in_flight: DashMap::new(),
            stats: Mutex::new(PoolStats::default()),
        }
    }

    /// Snapshot of pool statistics
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        *self.stats.lock()
    }

    /// Units currently being executed, with their attempt number
    #[must_use]
    pub fn in_flight(&self) -> Vec<(UnitId, u32)> {
        self.in_flight
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }

    /// Dispatch every batch of `plan` in order
    ///
    /// Units whose output already exists in `sink` are skipped; this is what
    /// makes an interrupted phase resumable.
    pub async fn dispatch(&self, plan: &DispatchPlan, sink: &dyn ReportSink) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        for batch in &plan.batches {
            outcome.absorb(self.run_batch(batch, sink).await);
        }
        outcome
    }

    /// Dispatch one batch concurrently
    pub async fn run_batch(&self, batch: &Batch, sink: &dyn ReportSink) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        let mut pending: Vec<&TaskSpec> = Vec::new();
        for planned in &batch.tasks {
            if sink.exists(&planned.spec.unit) {
                outcome.skipped.push(planned.spec.unit.clone());
            } else {
                pending.push(&planned.spec);
            }
        }

        info!(
            batch = batch.index,
            dispatch = pending.len(),
            skipped = outcome.skipped.len(),
            estimate = batch.total_estimate(),
            "dispatching batch"
        );

        let results = join_all(pending.into_iter().map(|task| self.run_unit(task, sink))).await;
        for (unit, result) in results {
            match result {
                Ok(()) => outcome.completed.push(unit),
                Err((attempts, error)) => {
                    warn!(unit = %unit, attempts, error = %error, "unit degraded");
                    outcome.degraded.push(DegradedUnit {
                        unit,
                        attempts,
                        error: error.to_string(),
                    });
                }
            }
        }

        let mut stats = self.stats.lock();
        stats.completed += outcome.completed.len() as u64;
        stats.degraded += outcome.degraded.len() as u64;
        outcome
    }

    async fn run_unit(
        &self,
        task: &TaskSpec,
        sink: &dyn ReportSink,
    ) -> (UnitId, Result<(), (u32, DispatchError)>) {
        let unit = task.unit.clone();
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        let result = loop {
            attempt += 1;
            self.in_flight.insert(unit.clone(), attempt);
            self.stats.lock().invocations += 1;

            match self.worker.execute(task).await.and_then(|r| normalize(task, r)) {
                Ok(report) => {
                    break sink.persist(&report).map_err(|e| {
                        (
                            attempt,
                            DispatchError::Persist {
                                unit: unit.clone(),
                                message: e.to_string(),
                            },
                        )
                    });
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    debug!(unit = %unit, attempt, error = %e, "retrying unit");
                    self.stats.lock().retries += 1;
                    tokio::time::sleep(self.retry.backoff(attempt)).await;
                }
                Err(source) => {
                    break Err((
                        attempt,
                        DispatchError::WorkerExhausted {
                            unit: unit.clone(),
                            attempts: attempt,
                            source,
                        },
                    ));
                }
            }
        };

        self.in_flight.remove(&unit);
        (unit, result)
    }
}

/// Bind a worker's report to the task that produced it
///
/// The report takes the task's unit id and focus; declared `provides` tags
/// are unioned with the task's so routing never loses a declared tag.
fn normalize(task: &TaskSpec, mut report: Report) -> Result<Report, WorkerError> {
    let expected = task.kind.expected_payload();
    if report.payload.kind() != expected {
        return Err(WorkerError::WrongPayload {
            expected,
            actual: report.payload.kind(),
        });
    }
    report.id = task.unit.clone();
    if report.focus.is_none() {
        report.focus.clone_from(&task.focus);
    }
    let provides: TagSet = report.provides.union(&task.provides).cloned().collect();
    report.provides = provides;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{Batch, PlannedTask};
    use crate::task::TaskKind;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use strata_artifact::{tag_set, Analysis, Payload};

    #[derive(Default)]
    struct MemorySink {
        saved: Mutex<HashMap<UnitId, Report>>,
    }

    impl ReportSink for MemorySink {
        fn exists(&self, unit: &UnitId) -> bool {
            self.saved.lock().contains_key(unit)
        }

        fn persist(&self, report: &Report) -> Result<(), SinkError> {
            self.saved.lock().insert(report.id.clone(), report.clone());
            Ok(())
        }
    }

    /// Fails the first `failures` calls per unit with the given error kind
    struct FlakyWorker {
        failures: u32,
        fatal: bool,
        calls: Mutex<HashMap<UnitId, u32>>,
        total: AtomicU32,
    }

    impl FlakyWorker {
        fn new(failures: u32, fatal: bool) -> Self {
            Self {
                failures,
                fatal,
                calls: Mutex::new(HashMap::new()),
                total: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Worker for FlakyWorker {
        async fn execute(&self, task: &TaskSpec) -> Result<Report, WorkerError> {
            self.total.fetch_add(1, Ordering::SeqCst);
            let n = {
                let mut calls = self.calls.lock();
                let n = calls.entry(task.unit.clone()).or_insert(0);
                *n += 1;
                *n
            };
            if n <= self.failures {
                return Err(if self.fatal {
                    WorkerError::Malformed("bad".into())
                } else {
                    WorkerError::Transient("busy".into())
                });
            }
            Ok(Report::new(
                UnitId("whatever".into()),
                tag_set(["extra"]),
                Payload::Analysis(Analysis::default()),
            ))
        }
    }

    fn batch(ids: &[&str]) -> Batch {
        Batch {
            index: 0,
            tasks: ids
                .iter()
                .map(|id| PlannedTask {
                    spec: TaskSpec::new(UnitId((*id).into()), "analyze", TaskKind::Analyze)
                        .with_focus("auth")
                        .with_provides(tag_set(["focus:auth"])),
                    estimate: 1,
                })
                .collect(),
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff_ms: 1,
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let worker = Arc::new(FlakyWorker::new(2, false));
        let pool = WorkerPool::new(worker.clone(), fast_retry(3));
        let sink = MemorySink::default();

        let outcome = pool.run_batch(&batch(&["a", "b"]), &sink).await;
        assert!(outcome.is_clean());
        assert_eq!(outcome.completed.len(), 2);
        assert_eq!(worker.total.load(Ordering::SeqCst), 6);
        assert_eq!(pool.stats().retries, 4);
        assert!(pool.in_flight().is_empty());
    }

    #[tokio::test]
    async fn exhausted_units_degrade_without_touching_siblings() {
        let worker = Arc::new(FlakyWorker::new(5, false));
        let pool = WorkerPool::new(worker, fast_retry(2));
        let sink = MemorySink::default();
        sink.persist(&Report::new(
            UnitId("done".into()),
            TagSet::new(),
            Payload::Analysis(Analysis::default()),
        ))
        .unwrap();

        let outcome = pool.run_batch(&batch(&["done", "x"]), &sink).await;
        assert_eq!(outcome.skipped, vec![UnitId("done".into())]);
        assert_eq!(outcome.degraded.len(), 1);
        assert_eq!(outcome.degraded[0].unit.as_str(), "x");
        assert_eq!(outcome.degraded[0].attempts, 2);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let worker = Arc::new(FlakyWorker::new(1, true));
        let pool = WorkerPool::new(worker.clone(), fast_retry(3));
        let outcome = pool.run_batch(&batch(&["a"]), &MemorySink::default()).await;
        assert_eq!(outcome.degraded[0].attempts, 1);
        assert_eq!(worker.total.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn outputs_are_bound_to_their_task() {
        let pool = WorkerPool::new(Arc::new(FlakyWorker::new(0, false)), fast_retry(1));
        let sink = MemorySink::default();
        pool.run_batch(&batch(&["a"]), &sink).await;
        let saved = sink.saved.lock();
        let report = &saved[&UnitId("a".into())];
        assert_eq!(report.focus.as_deref(), Some("auth"));
        assert_eq!(report.provides, tag_set(["extra", "focus:auth"]));
    }

    #[test]
    fn wrong_payload_is_rejected() {
        let task = TaskSpec::new(UnitId("i".into()), "investigate", TaskKind::Investigate);
        let report = Report::new(
            UnitId("i".into()),
            TagSet::new(),
            Payload::Analysis(Analysis::default()),
        );
        let err = normalize(&task, report).unwrap_err();
        assert!(matches!(err, WorkerError::WrongPayload { expected: "finding", .. }));
    }
}
