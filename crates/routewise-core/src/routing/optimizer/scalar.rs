//! Weighted-sum scalarization

use super::{OptimizerCandidate, OptimizerWeights, best_by};

/// Highest declared cost in the set; normalizes costs into `[0, 1]`
pub(super) fn max_cost(candidates: &[&OptimizerCandidate]) -> f64 {
    candidates
        .iter()
        .map(|c| c.expected_cost)
        .fold(0.0, f64::max)
}

/// `quality_weight * quality - cost_weight * cost / max_cost`
pub(super) fn score(candidate: &OptimizerCandidate, max_cost: f64, weights: &OptimizerWeights) -> f64 {
    let normalized_cost = if max_cost > 0.0 {
        candidate.expected_cost / max_cost
    } else {
        0.0
    };
    weights.quality * candidate.expected_quality - weights.cost * normalized_cost
}

/// The best candidate by weighted sum
pub(super) fn pick<'a>(
    candidates: &[&'a OptimizerCandidate],
    weights: &OptimizerWeights,
) -> Option<&'a OptimizerCandidate> {
    let max_cost = max_cost(candidates);
    best_by(candidates, |c| score(c, max_cost, weights))
}
