//! Outcome aggregation
//!
//! Converts raw observed metrics into rewards in `[0, 1]`:
//!
//! - quality passes through
//! - cost maps through `1 / (1 + cost / reference_cost)`
//! - latency maps through `1 / (1 + latency / reference_latency)`
//! - success is 0 or 1
//!
//! A failed call always yields the configured failure reward, whatever the
//! other fields say.

use serde::{Deserialize, Serialize};

use super::types::{Observation, RewardShaping, RewardWeights};

/// Per-objective rewards, each in `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RewardVector {
    pub quality: f64,
    pub cost_efficiency: f64,
    pub latency: f64,
    pub success: f64,
}

impl RewardVector {
    /// The same reward on every objective
    pub fn splat(value: f64) -> Self {
        Self {
            quality: value,
            cost_efficiency: value,
            latency: value,
            success: value,
        }
    }

    /// Rewards in objective order: quality, cost efficiency, latency, success
    pub fn as_array(&self) -> [f64; 4] {
        [self.quality, self.cost_efficiency, self.latency, self.success]
    }

    /// Weighted sum; `weights` are expected to be normalized
    pub fn weighted(&self, weights: &RewardWeights) -> f64 {
        self.as_array()
            .iter()
            .zip(weights.as_array())
            .map(|(r, w)| r * w)
            .sum()
    }
}

/// The aggregated form of one observation
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    /// The observation after clamping
    pub observation: Observation,
    /// Per-objective rewards
    pub vector: RewardVector,
    /// Combined reward in `[0, 1]`
    pub scalar: f64,
}

/// Settings for reward normalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Default objective weights
    pub weights: RewardWeights,
    /// Cost at which cost efficiency is 0.5
    pub reference_cost: f64,
    /// Latency at which latency efficiency is 0.5
    pub reference_latency_seconds: f64,
    /// How objectives combine into the scalar reward
    pub shaping: RewardShaping,
    /// Scalar reward for a failed call
    pub failure_reward: f64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            weights: RewardWeights::default(),
            reference_cost: 0.01,
            reference_latency_seconds: 2.0,
            shaping: RewardShaping::WeightedSum,
            failure_reward: 0.0,
        }
    }
}

/// Normalizes observations into rewards
#[derive(Debug, Clone)]
pub struct OutcomeAggregator {
    config: AggregatorConfig,
}

impl Default for OutcomeAggregator {
    fn default() -> Self {
        Self::new(AggregatorConfig::default())
    }
}

impl OutcomeAggregator {
    /// Create an aggregator; configured weights are normalized once here
    pub fn new(mut config: AggregatorConfig) -> Self {
        config.weights = config.weights.normalized();
        config.reference_cost = positive_or(config.reference_cost, 0.01);
        config.reference_latency_seconds = positive_or(config.reference_latency_seconds, 2.0);
        config.failure_reward = config.failure_reward.clamp(0.0, 1.0);
        Self { config }
    }

    /// The effective configuration
    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// The normalized default weights
    pub fn weights(&self) -> &RewardWeights {
        &self.config.weights
    }

    /// Per-objective rewards for an observation
    pub fn normalize_vector(&self, observation: &Observation) -> RewardVector {
        let observation = observation.clone().sanitized();
        self.vector_for(&observation)
    }

    /// Scalar reward for an observation under the given weights.
    ///
    /// Weights that do not sum to 1.0 are normalized first.
    pub fn normalize(&self, observation: &Observation, weights: &RewardWeights) -> f64 {
        let observation = observation.clone().sanitized();
        let vector = self.vector_for(&observation);
        self.scalar_for(&observation, &vector, &weights.normalized())
    }

    /// Clamp, normalize and combine an observation with the default weights
    pub fn aggregate(&self, observation: Observation) -> Outcome {
        let observation = observation.sanitized();
        let vector = self.vector_for(&observation);
        let scalar = self.scalar_for(&observation, &vector, &self.config.weights);
        Outcome {
            observation,
            vector,
            scalar,
        }
    }

    fn vector_for(&self, observation: &Observation) -> RewardVector {
        RewardVector {
            quality: observation.quality_score,
            cost_efficiency: 1.0 / (1.0 + observation.cost / self.config.reference_cost),
            latency: 1.0
                / (1.0 + observation.latency_seconds / self.config.reference_latency_seconds),
            success: if observation.success { 1.0 } else { 0.0 },
        }
    }

    fn scalar_for(
        &self,
        observation: &Observation,
        vector: &RewardVector,
        weights: &RewardWeights,
    ) -> f64 {
        if !observation.success {
            return self.config.failure_reward;
        }

        let reward = match self.config.shaping {
            RewardShaping::WeightedSum => vector.weighted(weights),
            // Efficiency-weighted accuracy; each factor is already in [0, 1]
            // so a zero in any of them zeroes the reward instead of dividing by it
            RewardShaping::Multiplicative => {
                vector.quality * vector.cost_efficiency * vector.latency
            }
        };
        reward.clamp(0.0, 1.0)
    }
}

fn positive_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observation() -> Observation {
        Observation::new("arm", true)
            .with_quality(0.8)
            .with_cost(0.01)
            .with_latency(2.0)
    }

    #[test]
    fn test_normalize_vector_reference_points() {
        let aggregator = OutcomeAggregator::default();
        let vector = aggregator.normalize_vector(&observation());

        assert_eq!(vector.quality, 0.8);
        assert!((vector.cost_efficiency - 0.5).abs() < 1e-12);
        assert!((vector.latency - 0.5).abs() < 1e-12);
        assert_eq!(vector.success, 1.0);
    }

    #[test]
    fn test_zero_cost_and_latency_are_fully_efficient() {
        let aggregator = OutcomeAggregator::default();
        let vector = aggregator.normalize_vector(&Observation::new("arm", true));
        assert_eq!(vector.cost_efficiency, 1.0);
        assert_eq!(vector.latency, 1.0);
    }

    #[test]
    fn test_normalize_weighted_sum() {
        let aggregator = OutcomeAggregator::default();
        let weights = RewardWeights::new(0.5, 0.5, 0.0, 0.0);
        let reward = aggregator.normalize(&observation(), &weights);
        assert!((reward - 0.65).abs() < 1e-12);
    }

    #[test]
    fn test_unnormalized_weights_behave_like_normalized() {
        let aggregator = OutcomeAggregator::default();
        let raw = aggregator.normalize(&observation(), &RewardWeights::new(2.0, 2.0, 0.0, 0.0));
        let unit = aggregator.normalize(&observation(), &RewardWeights::new(0.5, 0.5, 0.0, 0.0));
        assert!((raw - unit).abs() < 1e-12);
    }

    #[test]
    fn test_failure_forces_failure_reward() {
        let aggregator = OutcomeAggregator::default();
        let failed = Observation::new("arm", false).with_quality(1.0);
        assert_eq!(aggregator.normalize(&failed, &RewardWeights::uniform()), 0.0);

        let lenient = OutcomeAggregator::new(AggregatorConfig {
            failure_reward: 0.1,
            ..Default::default()
        });
        assert_eq!(lenient.aggregate(failed).scalar, 0.1);
    }

    #[test]
    fn test_out_of_range_quality_is_clamped() {
        let aggregator = OutcomeAggregator::default();
        let outcome = aggregator.aggregate(observation().with_quality(3.0));
        assert_eq!(outcome.observation.quality_score, 1.0);
        assert_eq!(outcome.vector.quality, 1.0);
        assert!(outcome.scalar <= 1.0);
    }

    #[test]
    fn test_multiplicative_shaping() {
        let aggregator = OutcomeAggregator::new(AggregatorConfig {
            shaping: RewardShaping::Multiplicative,
            ..Default::default()
        });
        let outcome = aggregator.aggregate(observation());
        assert!((outcome.scalar - 0.8 * 0.5 * 0.5).abs() < 1e-12);

        let zero_quality = aggregator.aggregate(observation().with_quality(0.0));
        assert_eq!(zero_quality.scalar, 0.0);
    }

    #[test]
    fn test_invalid_references_fall_back() {
        let aggregator = OutcomeAggregator::new(AggregatorConfig {
            reference_cost: 0.0,
            reference_latency_seconds: -1.0,
            ..Default::default()
        });
        assert_eq!(aggregator.config().reference_cost, 0.01);
        assert_eq!(aggregator.config().reference_latency_seconds, 2.0);
    }

    #[test]
    fn test_aggregate_scalar_in_unit_interval() {
        let aggregator = OutcomeAggregator::default();
        for quality in [0.0, 0.3, 1.0] {
            for cost in [0.0, 0.5, 100.0] {
                let outcome = aggregator.aggregate(observation().with_quality(quality).with_cost(cost));
                assert!((0.0..=1.0).contains(&outcome.scalar));
            }
        }
    }
}
