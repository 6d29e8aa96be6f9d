//! Resource estimation
//!
//! Estimation is a pluggable strategy: batching and splitting only rely on
//! two properties of a [`CostEstimator`]:
//!
//! 1. **Monotonicity**: more assigned input never lowers the estimate
//! 2. **Determinism**: the same task always yields the same estimate

use crate::task::TaskSpec;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Capacity limits and linear cost constants
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Hard ceiling for one dispatched task
    pub task_ceiling: u64,
    /// Ceiling for the summed estimates of one batch
    pub batch_ceiling: u64,
    /// Maximum tasks per batch
    pub max_batch_size: usize,
    /// Fixed template cost per task
    pub fixed_cost: u64,
    /// Cost per assigned source line
    pub cost_per_line: u64,
    /// Cost per byte of reference material
    pub cost_per_reference_byte: f64,
    /// Cost per byte of routed reports
    pub cost_per_routed_byte: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            task_ceiling: 120_000,
            batch_ceiling: 600_000,
            max_batch_size: 8,
            fixed_cost: 4_000,
            cost_per_line: 12,
            cost_per_reference_byte: 0.25,
            cost_per_routed_byte: 0.25,
        }
    }
}

/// Estimation strategy
pub trait CostEstimator: Send + Sync + Debug {
    /// Estimated cost of dispatching `task`
    fn estimate(&self, task: &TaskSpec) -> u64;

    /// Strategy name, for logs
    fn name(&self) -> &'static str;
}

/// Fixed cost + lines × per-line cost + reference and routed bytes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearEstimator {
    fixed: u64,
    per_line: u64,
    per_reference_byte: f64,
    per_routed_byte: f64,
}

impl LinearEstimator {
    /// Create new estimator
    #[must_use]
    pub fn new(fixed: u64, per_line: u64) -> Self {
        Self {
            fixed,
            per_line,
            per_reference_byte: 0.0,
            per_routed_byte: 0.0,
        }
    }

    /// With byte costs for reference material and routed reports
    #[must_use]
    pub fn with_byte_costs(mut self, per_reference_byte: f64, per_routed_byte: f64) -> Self {
        self.per_reference_byte = per_reference_byte.max(0.0);
        self.per_routed_byte = per_routed_byte.max(0.0);
        self
    }
}

impl From<&BudgetConfig> for LinearEstimator {
    fn from(config: &BudgetConfig) -> Self {
        Self::new(config.fixed_cost, config.cost_per_line)
            .with_byte_costs(config.cost_per_reference_byte, config.cost_per_routed_byte)
    }
}

impl CostEstimator for LinearEstimator {
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn estimate(&self, task: &TaskSpec) -> u64 {
        let bytes = task.reference_bytes() as f64 * self.per_reference_byte
            + task.routed_bytes() as f64 * self.per_routed_byte;
        self.fixed
            .saturating_add(task.input_lines().saturating_mul(self.per_line))
            .saturating_add(bytes.ceil() as u64)
    }

    fn name(&self) -> &'static str {
        "linear"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{InputSlice, ReferenceDoc, TaskKind};
    use proptest::prelude::*;
    use strata_artifact::UnitId;

    fn task_with_lines(lines: &[u64]) -> TaskSpec {
        TaskSpec::new(UnitId("analyze-t".into()), "analyze", TaskKind::Analyze).with_inputs(
            lines
                .iter()
                .enumerate()
                .map(|(i, l)| InputSlice::whole(format!("f{i}"), *l))
                .collect(),
        )
    }

    #[test]
    fn linear_cost_adds_components() {
        let estimator = LinearEstimator::new(100, 2).with_byte_costs(0.5, 0.0);
        let task = task_with_lines(&[10, 5]).with_references(vec![ReferenceDoc {
            name: "guide".into(),
            path: "ref/guide.md".into(),
            bytes: 20,
        }]);
        assert_eq!(estimator.estimate(&task), 100 + 30 + 10);
    }

    #[test]
    fn from_budget_uses_configured_constants() {
        let budget = BudgetConfig {
            fixed_cost: 7,
            cost_per_line: 3,
            ..BudgetConfig::default()
        };
        let estimator = LinearEstimator::from(&budget);
        assert_eq!(estimator.estimate(&task_with_lines(&[2])), 13);
    }

    proptest! {
        #[test]
        fn more_input_never_lowers_estimate(
            lines in prop::collection::vec(0u64..5_000, 0..8),
            extra in 0u64..5_000,
        ) {
            let estimator = LinearEstimator::from(&BudgetConfig::default());
            let base = estimator.estimate(&task_with_lines(&lines));
            let mut grown = lines.clone();
            grown.push(extra);
            prop_assert!(estimator.estimate(&task_with_lines(&grown)) >= base);
        }
    }
}
