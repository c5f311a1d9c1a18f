//! Pareto front over (cost, quality)

use super::OptimizerCandidate;

/// Whether `a` is strictly cheaper and strictly better than `b`
///
/// Candidates tied on either axis never dominate each other; the weighted
/// sum over the front decides between them.
pub fn dominates(a: &OptimizerCandidate, b: &OptimizerCandidate) -> bool {
    a.expected_cost < b.expected_cost && a.expected_quality > b.expected_quality
}

/// Candidates no other candidate dominates, in input order
pub fn pareto_front<'a>(candidates: &[&'a OptimizerCandidate]) -> Vec<&'a OptimizerCandidate> {
    candidates
        .iter()
        .filter(|c| !candidates.iter().any(|other| dominates(other, c)))
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::optimizer::{OptimizerWeights, scalar};

    #[test]
    fn test_dominates() {
        let a = OptimizerCandidate::new("a", 0.01, 0.9);
        let b = OptimizerCandidate::new("b", 0.02, 0.8);
        let c = OptimizerCandidate::new("c", 0.01, 0.9);

        assert!(dominates(&a, &b));
        assert!(!dominates(&b, &a));
        // Identical points do not dominate each other
        assert!(!dominates(&a, &c));
        assert!(!dominates(&c, &a));

        // A tie on one axis is not dominance
        let same_cost = OptimizerCandidate::new("same-cost", 0.01, 0.7);
        let same_quality = OptimizerCandidate::new("same-quality", 0.03, 0.9);
        assert!(!dominates(&a, &same_cost));
        assert!(!dominates(&a, &same_quality));
    }

    #[test]
    fn test_front_keeps_ties_on_one_axis() {
        let best = OptimizerCandidate::new("best", 0.01, 0.9);
        let same_cost = OptimizerCandidate::new("same-cost", 0.01, 0.6);
        let dominated = OptimizerCandidate::new("dominated", 0.02, 0.5);

        let all = [&best, &same_cost, &dominated];
        let ids: Vec<&str> = pareto_front(&all).iter().map(|c| c.arm_id.as_str()).collect();
        assert_eq!(ids, vec!["best", "same-cost"]);

        let picked = scalar::pick(&pareto_front(&all), &OptimizerWeights::new(0.5, 0.5)).unwrap();
        assert_eq!(picked.arm_id, "best");
    }

    #[test]
    fn test_front_drops_dominated() {
        let cheap = OptimizerCandidate::new("cheap", 0.001, 0.5);
        let mid = OptimizerCandidate::new("mid", 0.01, 0.8);
        let worse_mid = OptimizerCandidate::new("worse-mid", 0.02, 0.7);
        let premium = OptimizerCandidate::new("premium", 0.05, 0.95);

        let all = [&cheap, &mid, &worse_mid, &premium];
        let front = pareto_front(&all);
        let ids: Vec<&str> = front.iter().map(|c| c.arm_id.as_str()).collect();
        assert_eq!(ids, vec!["cheap", "mid", "premium"]);

        // Weighted sum over the front only
        let picked = scalar::pick(&front, &OptimizerWeights::new(1.0, 0.0)).unwrap();
        assert_eq!(picked.arm_id, "premium");
    }

    #[test]
    fn test_front_of_single_candidate() {
        let only = OptimizerCandidate::new("only", 1.0, 0.1);
        assert_eq!(pareto_front(&[&only]).len(), 1);
    }
}
