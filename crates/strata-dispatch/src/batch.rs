//! Adaptive batching and task splitting
//!
//! The [`Planner`] turns a phase's task list into capacity-bounded batches:
//!
//! - a task whose estimate exceeds the task ceiling is split into parts that
//!   cover the same scope and declare the same `provides` tags
//! - batches are packed so the summed estimate stays under the batch ceiling;
//!   small tasks yield wide batches, large tasks narrow ones

use crate::error::DispatchError;
use crate::estimate::{BudgetConfig, CostEstimator};
use crate::task::{InputSlice, TaskSpec};
use std::collections::BTreeMap;
use std::sync::Arc;
use strata_artifact::UnitId;
use tracing::{debug, info, warn};

/// Task with its estimate
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedTask {
    /// Task
    pub spec: TaskSpec,
    /// Estimated cost
    pub estimate: u64,
}

/// Group of tasks dispatched concurrently
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Position in the plan
    pub index: usize,
    /// Tasks
    pub tasks: Vec<PlannedTask>,
}

impl Batch {
    /// Summed estimate
    #[must_use]
    pub fn total_estimate(&self) -> u64 {
        self.tasks.iter().map(|t| t.estimate).sum()
    }

    /// Number of tasks
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// True if the batch has no tasks
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Task that could not be sized under the ceiling
#[derive(Debug)]
pub struct Rejected {
    /// Logical unit
    pub unit: UnitId,
    /// Why
    pub error: DispatchError,
}

/// Output of planning one phase
#[derive(Debug, Default)]
pub struct DispatchPlan {
    /// Batches in dispatch order
    pub batches: Vec<Batch>,
    /// Logical unit → dispatched unit ids (one entry per part when split)
    pub units: BTreeMap<UnitId, Vec<UnitId>>,
    /// Tasks rejected during sizing
    pub rejected: Vec<Rejected>,
}

impl DispatchPlan {
    /// Dispatched task count
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.batches.iter().map(Batch::len).sum()
    }

    /// Logical units that were split into several parts
    pub fn split_units(&self) -> impl Iterator<Item = (&UnitId, &Vec<UnitId>)> {
        self.units.iter().filter(|(_, parts)| parts.len() > 1)
    }
}

/// Sizes, splits and batches tasks
#[derive(Debug, Clone)]
pub struct Planner {
    estimator: Arc<dyn CostEstimator>,
    budget: BudgetConfig,
}

impl Planner {
    /// Create new planner
    #[must_use]
    pub fn new(estimator: Arc<dyn CostEstimator>, budget: BudgetConfig) -> Self {
        Self { estimator, budget }
    }

    /// Budget in use
    #[inline]
    #[must_use]
    pub fn budget(&self) -> &BudgetConfig {
        &self.budget
    }

    /// Estimate one task
    #[inline]
    #[must_use]
    pub fn estimate(&self, task: &TaskSpec) -> u64 {
        self.estimator.estimate(task)
    }

    /// Size a task, splitting it when it exceeds the task ceiling
    ///
    /// Parts partition the task's line ranges into balanced chunks. The part
    /// count starts at `ceil(estimate / ceiling)` and grows until every part
    /// fits.
    ///
    /// # Errors
    /// - `DispatchError::Oversized` if the task kind cannot be split
    /// - `DispatchError::Unsplittable` if no partition fits the ceiling
    pub fn split(&self, mut task: TaskSpec) -> Result<Vec<PlannedTask>, DispatchError> {
        let ceiling = self.budget.task_ceiling;
        task.budget = ceiling;
        let estimate = self.estimator.estimate(&task);
        if estimate <= ceiling {
            return Ok(vec![PlannedTask {
                spec: task,
                estimate,
            }]);
        }
        if !task.kind.is_splittable() {
            return Err(DispatchError::Oversized {
                unit: task.unit,
                estimate,
                ceiling,
            });
        }

        let floor = self.estimator.estimate(&task.part(0, Vec::new()));
        let total_lines = task.input_lines();
        if floor > ceiling || total_lines < 2 {
            return Err(DispatchError::Unsplittable {
                unit: task.unit,
                floor,
                ceiling,
            });
        }

        let start = usize::try_from(estimate.div_ceil(ceiling).max(2)).unwrap_or(usize::MAX);
        let max_parts = usize::try_from(total_lines).unwrap_or(usize::MAX);
        for k in start..=max_parts {
            let parts: Vec<PlannedTask> = partition(&task.inputs, k)
                .into_iter()
                .enumerate()
                .map(|(i, inputs)| {
                    let spec = task.part(i, inputs);
                    let estimate = self.estimator.estimate(&spec);
                    PlannedTask { spec, estimate }
                })
                .collect();
            if parts.iter().all(|p| p.estimate <= ceiling) {
                debug!(unit = %task.unit, parts = parts.len(), estimate, ceiling, "split oversized task");
                return Ok(parts);
            }
        }
        Err(DispatchError::Unsplittable {
            unit: task.unit,
            floor,
            ceiling,
        })
    }

    /// Pack sized tasks into batches, preserving order
    #[must_use]
    pub fn batch(&self, tasks: Vec<PlannedTask>) -> Vec<Batch> {
        let max_size = self.budget.max_batch_size.max(1);
        let mut batches = Vec::new();
        let mut current: Vec<PlannedTask> = Vec::new();
        let mut sum = 0u64;

        for task in tasks {
            let overflows = sum.saturating_add(task.estimate) > self.budget.batch_ceiling;
            if !current.is_empty() && (overflows || current.len() >= max_size) {
                batches.push(Batch {
                    index: batches.len(),
                    tasks: std::mem::take(&mut current),
                });
                sum = 0;
            }
            sum = sum.saturating_add(task.estimate);
            current.push(task);
        }
        if !current.is_empty() {
            batches.push(Batch {
                index: batches.len(),
                tasks: current,
            });
        }
        batches
    }

    /// Size, split and batch a phase's tasks
    #[must_use]
    pub fn plan(&self, tasks: Vec<TaskSpec>) -> DispatchPlan {
        let mut plan = DispatchPlan::default();
        let mut sized = Vec::new();

        for task in tasks {
            let unit = task.unit.clone();
            match self.split(task) {
                Ok(parts) => {
                    plan.units
                        .insert(unit, parts.iter().map(|p| p.spec.unit.clone()).collect());
                    sized.extend(parts);
                }
                Err(error) => {
                    warn!(unit = %unit, error = %error, "task rejected by planner");
                    plan.rejected.push(Rejected { unit, error });
                }
            }
        }

        plan.batches = self.batch(sized);
        info!(
            estimator = self.estimator.name(),
            tasks = plan.task_count(),
            batches = plan.batches.len(),
            rejected = plan.rejected.len(),
            "dispatch plan ready"
        );
        plan
    }
}

/// Balanced partition of line ranges into at most `k` non-empty parts
fn partition(inputs: &[InputSlice], k: usize) -> Vec<Vec<InputSlice>> {
    let total: u64 = inputs.iter().map(InputSlice::lines).sum();
    let k = u64::try_from(k.max(1)).unwrap_or(u64::MAX);
    let target = total.div_ceil(k).max(1);

    let mut parts: Vec<Vec<InputSlice>> = Vec::new();
    let mut current: Vec<InputSlice> = Vec::new();
    let mut room = target;

    for slice in inputs {
        if slice.lines() == 0 {
            current.push(slice.clone());
            continue;
        }
        let mut start = slice.start;
        while start < slice.end {
            let take = room.min(slice.end - start);
            current.push(InputSlice {
                path: slice.path.clone(),
                start,
                end: start + take,
            });
            start += take;
            room -= take;
            if room == 0 {
                parts.push(std::mem::take(&mut current));
                room = target;
            }
        }
    }

    if !current.is_empty() {
        let only_empty = current.iter().all(|s| s.lines() == 0);
        match parts.last_mut() {
            Some(last) if only_empty => last.extend(current),
            _ => parts.push(current),
        }
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimate::LinearEstimator;
    use crate::task::TaskKind;
    use proptest::prelude::*;
    use strata_artifact::tag_set;

    fn planner(fixed: u64, per_line: u64, task_ceiling: u64, batch_ceiling: u64, max: usize) -> Planner {
        Planner::new(
            Arc::new(LinearEstimator::new(fixed, per_line)),
            BudgetConfig {
                task_ceiling,
                batch_ceiling,
                max_batch_size: max,
                fixed_cost: fixed,
                cost_per_line: per_line,
                ..BudgetConfig::default()
            },
        )
    }

    fn analyze(id: &str, files: &[u64]) -> TaskSpec {
        TaskSpec::new(UnitId(id.into()), "analyze", TaskKind::Analyze)
            .with_focus("auth")
            .with_provides(tag_set(["focus:auth"]))
            .with_inputs(
                files
                    .iter()
                    .enumerate()
                    .map(|(i, l)| InputSlice::whole(format!("src/f{i}.rs"), *l))
                    .collect(),
            )
    }

    #[test]
    fn task_under_ceiling_is_not_split() {
        let p = planner(100, 1, 1_000, 5_000, 4);
        let parts = p.split(analyze("a", &[200])).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].spec.unit.as_str(), "a");
        assert_eq!(parts[0].spec.budget, 1_000);
    }

    #[test]
    fn one_and_a_half_times_ceiling_splits_in_two() {
        let p = planner(100, 1, 1_000, 5_000, 4);
        let task = analyze("a", &[1_400]);
        assert_eq!(p.estimate(&task), 1_500);

        let parts = p.split(task).unwrap();
        assert_eq!(parts.len(), 2);
        for part in &parts {
            assert!(part.estimate <= 1_000);
            assert_eq!(part.spec.provides, tag_set(["focus:auth"]));
        }
        let lines: u64 = parts.iter().map(|p| p.spec.input_lines()).sum();
        assert_eq!(lines, 1_400);
    }

    #[test]
    fn fixed_cost_over_ceiling_is_unsplittable() {
        let p = planner(2_000, 1, 1_000, 5_000, 4);
        let err = p.split(analyze("a", &[10])).unwrap_err();
        assert!(matches!(err, DispatchError::Unsplittable { .. }));
    }

    #[test]
    fn non_analysis_tasks_are_not_split() {
        let p = planner(2_000, 1, 1_000, 5_000, 4);
        let task = TaskSpec::new(UnitId("s".into()), "synthesize", TaskKind::Synthesize);
        assert!(matches!(p.split(task), Err(DispatchError::Oversized { .. })));
    }

    #[test]
    fn batches_narrow_as_estimates_grow() {
        let p = planner(0, 1, 1_000, 1_000, 10);
        let small: Vec<PlannedTask> = (0..10).map(|i| p.split(analyze(&format!("s{i}"), &[100])).unwrap().remove(0)).collect();
        let large: Vec<PlannedTask> = (0..10).map(|i| p.split(analyze(&format!("l{i}"), &[500])).unwrap().remove(0)).collect();
        assert_eq!(p.batch(small).len(), 1);
        assert_eq!(p.batch(large).len(), 5);
    }

    #[test]
    fn plan_records_parts_and_rejections() {
        let p = planner(100, 1, 1_000, 5_000, 4);
        let plan = p.plan(vec![
            analyze("a", &[1_400]),
            analyze("b", &[10]),
            TaskSpec::new(UnitId("c".into()), "synthesize", TaskKind::Synthesize)
                .with_inputs(vec![InputSlice::whole("x", 5_000)]),
        ]);
        assert_eq!(plan.units[&UnitId("a".into())].len(), 2);
        assert_eq!(plan.units[&UnitId("b".into())].len(), 1);
        assert_eq!(plan.rejected.len(), 1);
        assert_eq!(plan.split_units().count(), 1);
        assert_eq!(plan.task_count(), 3);
    }

    #[test]
    fn partition_keeps_empty_files() {
        let inputs = vec![
            InputSlice::whole("a", 4),
            InputSlice::whole("b", 0),
            InputSlice::whole("c", 4),
            InputSlice::whole("d", 0),
        ];
        let parts = partition(&inputs, 2);
        assert_eq!(parts.len(), 2);
        let paths: Vec<&str> = parts.iter().flatten().map(|s| s.path.as_str()).collect();
        assert_eq!(paths, vec!["a", "b", "c", "d"]);
    }

    proptest! {
        #[test]
        fn split_parts_fit_and_cover_input(files in prop::collection::vec(1u64..3_000, 1..6)) {
            let p = planner(50, 1, 1_000, 4_000, 4);
            let task = analyze("t", &files);
            let total = task.input_lines();
            let parts = p.split(task).unwrap();
            prop_assert!(parts.iter().all(|part| part.estimate <= 1_000));
            prop_assert_eq!(parts.iter().map(|part| part.spec.input_lines()).sum::<u64>(), total);
        }

        #[test]
        fn batches_respect_ceilings(estimates in prop::collection::vec(0u64..1_000, 0..40)) {
            let p = planner(0, 1, 1_000, 2_500, 3);
            let tasks: Vec<PlannedTask> = estimates
                .iter()
                .enumerate()
                .map(|(i, e)| PlannedTask { spec: analyze(&format!("u{i}"), &[]), estimate: *e })
                .collect();
            let batches = p.batch(tasks);
            prop_assert_eq!(batches.iter().map(Batch::len).sum::<usize>(), estimates.len());
            for batch in &batches {
                prop_assert!(batch.len() <= 3);
                prop_assert!(batch.total_estimate() <= 2_500);
            }
        }
    }
}
