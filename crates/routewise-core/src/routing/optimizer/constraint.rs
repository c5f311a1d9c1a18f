//! Constraint satisfaction with a secondary objective
//!
//! Budget filtering happens before this runs, so every candidate here is
//! feasible; what remains is picking by the secondary objective.

use super::{OptimizerCandidate, OptimizerWeights, best_by, scalar};
use crate::routing::types::OptimizerObjective;

pub(super) fn pick<'a>(
    feasible: &[&'a OptimizerCandidate],
    objective: OptimizerObjective,
    weights: &OptimizerWeights,
) -> Option<&'a OptimizerCandidate> {
    match objective {
        OptimizerObjective::MinimizeCost => best_by(feasible, |c| -c.expected_cost),
        OptimizerObjective::MaximizeQuality => best_by(feasible, |c| c.expected_quality),
        OptimizerObjective::Balanced | OptimizerObjective::Constrained => {
            scalar::pick(feasible, weights)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates() -> Vec<OptimizerCandidate> {
        vec![
            OptimizerCandidate::new("cheap", 0.001, 0.5),
            OptimizerCandidate::new("balanced", 0.004, 0.85),
            OptimizerCandidate::new("premium", 0.008, 0.9),
        ]
    }

    #[test]
    fn test_secondary_objectives() {
        let owned = candidates();
        let feasible: Vec<&OptimizerCandidate> = owned.iter().collect();
        let weights = OptimizerWeights::new(0.8, 0.2);

        let pick_for = |objective| pick(&feasible, objective, &weights).unwrap().arm_id.clone();
        assert_eq!(pick_for(OptimizerObjective::MinimizeCost), "cheap");
        assert_eq!(pick_for(OptimizerObjective::MaximizeQuality), "premium");
        assert_eq!(pick_for(OptimizerObjective::Constrained), "balanced");
    }
}
