//! Cost-quality optimization
//!
//! Resolves the final pick among a candidate set under a budget. Every
//! algorithm first drops candidates that violate the budget's per-request cost
//! ceiling or quality floor, then picks among the survivors:
//!
//! - `weighted_sum`: maximize `quality_weight * quality - cost_weight * normalized_cost`
//! - `pareto`: keep the non-dominated candidates, then weighted sum over that front
//! - `constraint`: optimize the configured secondary objective
//! - `heuristic`: simulated annealing for large sets, exact weighted sum otherwise
//!
//! [`CostQualityOptimizer::optimize`] is a pure function of its inputs and
//! configuration. Seeded search makes the heuristic reproducible too.

mod constraint;
mod heuristic;
mod pareto;
mod scalar;

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::types::{Budget, DecisionStrategy, OptimizerAlgorithm, OptimizerObjective};
use crate::error::{Error, Result};

pub use heuristic::{AnnealingConfig, ChainPlan, GeneticConfig};
pub use pareto::{dominates, pareto_front};

/// Largest chain search space that is enumerated exhaustively
const EXHAUSTIVE_CHAIN_LIMIT: usize = 4096;

/// One arm as the optimizer sees it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerCandidate {
    pub arm_id: String,
    /// Declared cost for this request
    pub expected_cost: f64,
    /// Expected quality (0.0 to 1.0)
    pub expected_quality: f64,
    /// Tie-break score; higher wins
    pub prior: f64,
}

impl OptimizerCandidate {
    /// Create a candidate with a neutral prior
    pub fn new(arm_id: impl Into<String>, expected_cost: f64, expected_quality: f64) -> Self {
        Self {
            arm_id: arm_id.into(),
            expected_cost,
            expected_quality,
            prior: 0.0,
        }
    }

    /// Set the tie-break prior
    pub fn with_prior(mut self, prior: f64) -> Self {
        self.prior = prior;
        self
    }
}

/// Quality/cost trade-off weights
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptimizerWeights {
    pub quality: f64,
    pub cost: f64,
}

impl Default for OptimizerWeights {
    fn default() -> Self {
        Self {
            quality: 0.7,
            cost: 0.3,
        }
    }
}

impl OptimizerWeights {
    /// Create weights
    pub fn new(quality: f64, cost: f64) -> Self {
        Self { quality, cost }
    }

    /// Weights implied by an objective. `balanced` and `constrained` keep `self`.
    pub fn for_objective(&self, objective: OptimizerObjective) -> Self {
        match objective {
            OptimizerObjective::MinimizeCost => Self::new(0.0, 1.0),
            OptimizerObjective::MaximizeQuality => Self::new(1.0, 0.0),
            OptimizerObjective::Balanced | OptimizerObjective::Constrained => *self,
        }
    }
}

/// Optimizer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    pub objective: OptimizerObjective,
    pub algorithm: OptimizerAlgorithm,
    /// Candidate count above which the heuristic searches instead of scanning
    pub heuristic_threshold: usize,
    pub annealing: AnnealingConfig,
    pub genetic: GeneticConfig,
    /// Seed for heuristic search
    pub seed: u64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            objective: OptimizerObjective::Balanced,
            algorithm: OptimizerAlgorithm::WeightedSum,
            heuristic_threshold: 100,
            annealing: AnnealingConfig::default(),
            genetic: GeneticConfig::default(),
            seed: 0x5eed,
        }
    }
}

/// The optimizer's pick
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerChoice {
    pub candidate: OptimizerCandidate,
    pub strategy: DecisionStrategy,
    /// Candidates that satisfied the budget
    pub feasible: usize,
}

/// Higher score wins, then higher prior, then lowest arm id
pub(crate) fn compare(a: &OptimizerCandidate, a_score: f64, b: &OptimizerCandidate, b_score: f64) -> Ordering {
    a_score
        .total_cmp(&b_score)
        .then_with(|| a.prior.total_cmp(&b.prior))
        .then_with(|| b.arm_id.cmp(&a.arm_id))
}

/// The candidate with the best `score`, using the standard tie-break
pub(crate) fn best_by<'a, F>(candidates: &[&'a OptimizerCandidate], score: F) -> Option<&'a OptimizerCandidate>
where
    F: Fn(&OptimizerCandidate) -> f64,
{
    candidates
        .iter()
        .map(|c| (*c, score(*c)))
        .max_by(|(a, sa), (b, sb)| compare(a, *sa, b, *sb))
        .map(|(c, _)| c)
}

/// Candidates within the budget's per-request cost ceiling and quality floor
pub fn feasible<'a>(candidates: &'a [OptimizerCandidate], budget: &Budget) -> Vec<&'a OptimizerCandidate> {
    candidates
        .iter()
        .filter(|c| budget.allows_cost(c.expected_cost) && budget.allows_quality(c.expected_quality))
        .collect()
}

/// Multi-objective optimizer
#[derive(Debug, Clone, Default)]
pub struct CostQualityOptimizer {
    config: OptimizerConfig,
}

impl CostQualityOptimizer {
    /// Create an optimizer
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    /// The configuration
    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Pick one candidate under `budget`.
    ///
    /// Fails with `NoCandidates` on empty input and `NoFeasibleCandidate` when
    /// no candidate satisfies the budget. Constraints are never relaxed.
    pub fn optimize(
        &self,
        candidates: &[OptimizerCandidate],
        weights: &OptimizerWeights,
        budget: &Budget,
    ) -> Result<OptimizerChoice> {
        if candidates.is_empty() {
            return Err(Error::NoCandidates(
                "optimizer received an empty candidate set".to_string(),
            ));
        }

        let feasible = feasible(candidates, budget);
        if feasible.is_empty() {
            return Err(Error::NoFeasibleCandidate(format!(
                "none of {} candidates satisfies {}",
                candidates.len(),
                budget
            )));
        }

        let weights = weights.for_objective(self.config.objective);
        let (chosen, strategy) = match self.config.algorithm {
            OptimizerAlgorithm::WeightedSum => (
                scalar::pick(&feasible, &weights),
                DecisionStrategy::WeightedSum,
            ),
            OptimizerAlgorithm::Pareto => {
                let front = pareto_front(&feasible);
                (scalar::pick(&front, &weights), DecisionStrategy::Pareto)
            }
            OptimizerAlgorithm::Constraint => (
                constraint::pick(&feasible, self.config.objective, &weights),
                DecisionStrategy::Constraint,
            ),
            OptimizerAlgorithm::Heuristic => {
                if feasible.len() > self.config.heuristic_threshold {
                    (
                        heuristic::anneal(&feasible, &weights, &self.config.annealing, self.config.seed),
                        DecisionStrategy::Heuristic,
                    )
                } else {
                    (
                        scalar::pick(&feasible, &weights),
                        DecisionStrategy::WeightedSum,
                    )
                }
            }
        };

        let candidate = chosen
            .cloned()
            .ok_or_else(|| Error::Other("optimizer produced no choice".to_string()))?;

        debug!(
            arm_id = %candidate.arm_id,
            strategy = %strategy,
            feasible = feasible.len(),
            total = candidates.len(),
            "Optimizer picked candidate"
        );

        Ok(OptimizerChoice {
            candidate,
            strategy,
            feasible: feasible.len(),
        })
    }

    /// Pick one arm per step of a chained call, maximizing total quality with
    /// total cost at most `max_total_cost`.
    ///
    /// Small search spaces are enumerated exactly; larger ones use a seeded
    /// genetic search.
    pub fn optimize_chain(
        &self,
        steps: &[Vec<OptimizerCandidate>],
        max_total_cost: Option<f64>,
    ) -> Result<ChainPlan> {
        if steps.is_empty() || steps.iter().any(|s| s.is_empty()) {
            return Err(Error::NoCandidates(
                "every chain step needs at least one candidate".to_string(),
            ));
        }

        let limit = max_total_cost.unwrap_or(f64::INFINITY);
        let cheapest: f64 = steps
            .iter()
            .map(|s| {
                s.iter()
                    .map(|c| c.expected_cost)
                    .fold(f64::INFINITY, f64::min)
            })
            .sum();
        if cheapest > limit {
            return Err(Error::NoFeasibleCandidate(format!(
                "cheapest chain costs {cheapest:.6}, budget is {limit:.6}"
            )));
        }

        let space = steps
            .iter()
            .try_fold(1usize, |acc, s| acc.checked_mul(s.len()));
        let plan = match space {
            Some(size) if size <= EXHAUSTIVE_CHAIN_LIMIT => heuristic::exhaustive_chain(steps, limit),
            _ => heuristic::genetic_chain(steps, limit, &self.config.genetic, self.config.seed),
        };

        debug!(
            steps = steps.len(),
            total_cost = plan.total_cost,
            total_quality = plan.total_quality,
            "Optimized chain"
        );
        Ok(plan)
    }
}
