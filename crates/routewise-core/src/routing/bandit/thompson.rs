//! Thompson Sampling over per-objective Beta posteriors
//!
//! Each arm keeps one Beta(α, β) posterior per reward objective (quality,
//! cost efficiency, latency, success). Selection draws one sample from each
//! posterior and combines them with the reward weights:
//!
//! 1. For each objective i, sample θᵢ ~ Beta(αᵢ, βᵢ)
//! 2. score = Σ wᵢ·θᵢ
//! 3. Pick the candidate with the highest score
//! 4. Observe reward r and update: α += r, β += (1 - r)
//!
//! Uncertain arms produce widely spread samples and get explored; arms with a
//! high posterior mean win most draws and get exploited.

use std::sync::{Arc, Mutex};

use rand::Rng;
use rand_distr::{Beta, Distribution};
use serde::{Deserialize, Serialize};

use super::{BanditScore, PosteriorTable, lock, read_slot, sort_scores, with_slot};
use crate::routing::aggregator::RewardVector;
use crate::routing::types::{Arm, RewardWeights};

/// Parameters of one Beta posterior
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BetaParams {
    pub alpha: f64,
    pub beta: f64,
}

impl Default for BetaParams {
    fn default() -> Self {
        Self::uniform()
    }
}

impl BetaParams {
    /// The uniform prior Beta(1, 1)
    pub fn uniform() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
        }
    }

    /// Fold one reward into the posterior
    pub fn update(&mut self, reward: f64) {
        let reward = reward.clamp(0.0, 1.0);
        self.alpha += reward;
        self.beta += 1.0 - reward;
    }

    /// Posterior mean α / (α + β)
    pub fn mean(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    /// Draw one sample; unusable parameters yield 0.5
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match Beta::new(self.alpha, self.beta) {
            Ok(dist) => dist.sample(rng),
            Err(_) => 0.5,
        }
    }

    fn clamped(self) -> Self {
        Self {
            alpha: finite_at_least_one(self.alpha),
            beta: finite_at_least_one(self.beta),
        }
    }
}

fn finite_at_least_one(value: f64) -> f64 {
    if value.is_finite() { value.max(1.0) } else { 1.0 }
}

/// Per-arm posterior state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThompsonPosterior {
    pub quality: BetaParams,
    pub cost_efficiency: BetaParams,
    pub latency: BetaParams,
    pub success: BetaParams,
    /// Number of updates applied
    pub pulls: u64,
}

impl ThompsonPosterior {
    /// Posteriors in objective order: quality, cost efficiency, latency, success
    pub fn objectives(&self) -> [BetaParams; 4] {
        [self.quality, self.cost_efficiency, self.latency, self.success]
    }

    /// Apply the same reward to every objective
    pub fn update_scalar(&mut self, reward: f64) {
        self.update_vector(&RewardVector::splat(reward));
    }

    /// Apply one reward per objective
    pub fn update_vector(&mut self, rewards: &RewardVector) {
        self.quality.update(rewards.quality);
        self.cost_efficiency.update(rewards.cost_efficiency);
        self.latency.update(rewards.latency);
        self.success.update(rewards.success);
        self.pulls += 1;
    }

    /// Weighted posterior mean
    pub fn expected_value(&self, weights: &RewardWeights) -> f64 {
        self.objectives()
            .iter()
            .zip(weights.as_array())
            .map(|(p, w)| p.mean() * w)
            .sum()
    }

    /// Weighted sample across objectives
    pub fn sample<R: Rng + ?Sized>(&self, weights: &RewardWeights, rng: &mut R) -> f64 {
        self.objectives()
            .iter()
            .zip(weights.as_array())
            .map(|(p, w)| p.sample(&mut *rng) * w)
            .sum()
    }

    fn clamped(self) -> Self {
        Self {
            quality: self.quality.clamped(),
            cost_efficiency: self.cost_efficiency.clamped(),
            latency: self.latency.clamped(),
            success: self.success.clamped(),
            pulls: self.pulls,
        }
    }
}

/// Thompson Sampling policy
#[derive(Debug)]
pub struct ThompsonSampling {
    /// Normalized objective weights
    weights: RewardWeights,
    /// Updates before an arm is no longer considered exploratory
    min_samples_for_confidence: u64,
    arms: PosteriorTable<ThompsonPosterior>,
}

impl ThompsonSampling {
    /// Create a policy; weights are normalized here
    pub fn new(weights: RewardWeights, min_samples_for_confidence: u64) -> Self {
        Self {
            weights: weights.normalized(),
            min_samples_for_confidence,
            arms: PosteriorTable::default(),
        }
    }

    /// Objective weights used to combine samples
    pub fn weights(&self) -> &RewardWeights {
        &self.weights
    }

    /// Create a uniform posterior for an arm if it has none
    pub fn ensure_arm(&self, arm_id: &str) {
        if !self.arms.contains_key(arm_id) {
            self.arms
                .entry(arm_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(ThompsonPosterior::default())));
        }
    }

    /// Drop an arm's posterior
    pub fn remove_arm(&self, arm_id: &str) {
        self.arms.remove(arm_id);
    }

    /// Reset an arm to the uniform prior
    pub fn reset(&self, arm_id: &str) -> bool {
        with_slot(&self.arms, arm_id, |p| *p = ThompsonPosterior::default())
    }

    /// Copy of an arm's posterior
    pub fn posterior(&self, arm_id: &str) -> Option<ThompsonPosterior> {
        read_slot(&self.arms, arm_id)
    }

    /// Replace an arm's posterior; parameters below 1.0 are raised to 1.0
    pub fn restore(&self, arm_id: &str, posterior: ThompsonPosterior) {
        let posterior = posterior.clamped();
        match self.arms.get(arm_id).map(|s| s.value().clone()) {
            Some(slot) => *lock(&slot) = posterior,
            None => {
                self.arms
                    .insert(arm_id.to_string(), Arc::new(Mutex::new(posterior)));
            }
        }
    }

    /// Weighted posterior mean of an arm
    pub fn expected_value(&self, arm_id: &str) -> Option<f64> {
        self.posterior(arm_id).map(|p| p.expected_value(&self.weights))
    }

    /// Sample every candidate, best first.
    ///
    /// Candidates without a posterior are sampled from the uniform prior. The
    /// draws happen in candidate order, so a seeded `rng` reproduces the ranking.
    pub fn rank<R: Rng + ?Sized>(&self, candidates: &[Arc<Arm>], rng: &mut R) -> Vec<BanditScore> {
        let mut scores: Vec<BanditScore> = candidates
            .iter()
            .map(|arm| {
                let posterior = self.posterior(&arm.id).unwrap_or_default();
                BanditScore {
                    arm_id: arm.id.clone(),
                    score: posterior.sample(&self.weights, &mut *rng),
                    expected_reward: posterior.expected_value(&self.weights),
                    pulls: posterior.pulls,
                    exploration: posterior.pulls < self.min_samples_for_confidence,
                }
            })
            .collect();
        sort_scores(&mut scores);
        scores
    }

    /// Apply a scalar reward to every objective of an arm
    pub fn update(&self, arm_id: &str, reward: f64) -> bool {
        with_slot(&self.arms, arm_id, |p| p.update_scalar(reward))
    }

    /// Apply per-objective rewards to an arm
    pub fn update_vector(&self, arm_id: &str, rewards: &RewardVector) -> bool {
        with_slot(&self.arms, arm_id, |p| p.update_vector(rewards))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashMap;

    fn candidates(ids: &[&str]) -> Vec<Arc<Arm>> {
        ids.iter().map(|id| Arc::new(Arm::new(*id))).collect()
    }

    fn policy(ids: &[&str]) -> ThompsonSampling {
        let policy = ThompsonSampling::new(RewardWeights::default(), 10);
        for id in ids {
            policy.ensure_arm(id);
        }
        policy
    }

    #[test]
    fn test_new_arm_has_uniform_prior() {
        let policy = policy(&["a"]);
        let posterior = policy.posterior("a").unwrap();
        for params in posterior.objectives() {
            assert_eq!(params, BetaParams::uniform());
        }
        assert_eq!(posterior.pulls, 0);
        assert!((policy.expected_value("a").unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_update_moves_alpha_and_beta() {
        let policy = policy(&["a"]);
        policy.update("a", 0.75);

        let posterior = policy.posterior("a").unwrap();
        assert_eq!(posterior.success.alpha, 1.75);
        assert_eq!(posterior.success.beta, 1.25);
        assert_eq!(posterior.pulls, 1);
    }

    #[test]
    fn test_update_clamps_reward() {
        let policy = policy(&["a"]);
        policy.update("a", 4.0);
        policy.update("a", -2.0);

        let posterior = policy.posterior("a").unwrap();
        assert_eq!(posterior.quality.alpha, 2.0);
        assert_eq!(posterior.quality.beta, 2.0);
    }

    #[test]
    fn test_update_vector_per_objective() {
        let policy = policy(&["a"]);
        policy.update_vector(
            "a",
            &RewardVector {
                quality: 1.0,
                cost_efficiency: 0.0,
                latency: 0.5,
                success: 1.0,
            },
        );

        let posterior = policy.posterior("a").unwrap();
        assert_eq!(posterior.quality.alpha, 2.0);
        assert_eq!(posterior.cost_efficiency.beta, 2.0);
        assert_eq!(posterior.latency.alpha, 1.5);
    }

    #[test]
    fn test_parameters_never_drop_below_one() {
        let policy = policy(&["a"]);
        for i in 0..100 {
            policy.update("a", if i % 3 == 0 { 1.0 } else { 0.0 });
        }
        for params in policy.posterior("a").unwrap().objectives() {
            assert!(params.alpha >= 1.0);
            assert!(params.beta >= 1.0);
        }

        policy.restore(
            "a",
            ThompsonPosterior {
                quality: BetaParams {
                    alpha: 0.1,
                    beta: f64::NAN,
                },
                ..Default::default()
            },
        );
        let restored = policy.posterior("a").unwrap();
        assert_eq!(restored.quality, BetaParams::uniform());
    }

    #[test]
    fn test_reset_restores_prior() {
        let policy = policy(&["a"]);
        policy.update("a", 1.0);
        assert!(policy.reset("a"));
        assert_eq!(policy.posterior("a").unwrap(), ThompsonPosterior::default());
        assert!(!policy.reset("missing"));
    }

    #[test]
    fn test_rank_is_reproducible_with_seed() {
        let policy = policy(&["a", "b", "c"]);
        let arms = candidates(&["a", "b", "c"]);

        let first = policy.rank(&arms, &mut StdRng::seed_from_u64(42));
        let second = policy.rank(&arms, &mut StdRng::seed_from_u64(42));
        assert_eq!(first, second);
    }

    #[test]
    fn test_rank_marks_exploration() {
        let policy = policy(&["a"]);
        let arms = candidates(&["a"]);
        let mut rng = StdRng::seed_from_u64(7);

        assert!(policy.rank(&arms, &mut rng)[0].exploration);
        for _ in 0..10 {
            policy.update("a", 1.0);
        }
        assert!(!policy.rank(&arms, &mut rng)[0].exploration);
    }

    #[test]
    fn test_rewarded_arm_wins_most_draws() {
        let policy = policy(&["model-a", "model-b"]);
        for _ in 0..20 {
            policy.update("model-a", 1.0);
            policy.update("model-b", 0.0);
        }

        let arms = candidates(&["model-a", "model-b"]);
        let mut rng = StdRng::seed_from_u64(42);
        let mut wins: HashMap<String, u32> = HashMap::new();
        for _ in 0..100 {
            let best = policy.rank(&arms, &mut rng).remove(0);
            *wins.entry(best.arm_id).or_default() += 1;
        }

        assert!(
            wins.get("model-a").copied().unwrap_or(0) > 90,
            "Expected model-a to win most draws, got {:?}",
            wins
        );
    }

    #[test]
    fn test_converges_to_better_arm() {
        let policy = policy(&["a", "b"]);
        let arms = candidates(&["a", "b"]);
        let means: HashMap<&str, f64> = [("a", 0.9), ("b", 0.3)].into_iter().collect();
        let mut rng = StdRng::seed_from_u64(42);

        let mut a_picks = 0;
        for _ in 0..1000 {
            let pick = policy.rank(&arms, &mut rng).remove(0).arm_id;
            if pick == "a" {
                a_picks += 1;
            }
            let reward = if rng.gen_bool(means[pick.as_str()]) { 1.0 } else { 0.0 };
            policy.update(&pick, reward);
        }

        assert!(a_picks > 900, "Expected at least 900 picks of a, got {}", a_picks);
        let a = policy.expected_value("a").unwrap();
        assert!((a - 0.9).abs() < 0.05, "posterior mean of a was {}", a);
    }

    #[test]
    fn test_unknown_candidate_uses_prior() {
        let policy = policy(&[]);
        let arms = candidates(&["fresh"]);
        let ranked = policy.rank(&arms, &mut StdRng::seed_from_u64(1));
        assert_eq!(ranked[0].pulls, 0);
        assert!((ranked[0].expected_reward - 0.5).abs() < 1e-12);
        assert!(policy.posterior("fresh").is_none());
    }
}
