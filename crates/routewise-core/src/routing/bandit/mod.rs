//! Bandit policies for arm selection
//!
//! Two interchangeable families are provided, chosen once at construction:
//!
//! - [`ThompsonSampling`]: Beta posteriors per objective, sampled at selection time.
//! - [`UcbPolicy`]: UCB1, UCB-Normal, Discounted UCB and Bernstein UCB.
//!
//! Each policy owns its per-arm posterior state. State lives in a sharded map
//! of individually locked slots, so updates to different arms never contend on
//! a shared lock and updates to the same arm are serialized.

mod thompson;
mod ucb;

use std::cmp::Ordering;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::aggregator::RewardVector;
use super::types::{Arm, BanditStrategyKind, DecisionStrategy, RewardWeights};
use crate::error::{Error, Result};

pub use thompson::{BetaParams, ThompsonPosterior, ThompsonSampling};
pub use ucb::{UcbPolicy, UcbStats, UcbVariant};

/// Per-arm state slots, one lock per arm
type PosteriorTable<S> = DashMap<String, Arc<Mutex<S>>>;

fn lock<S>(slot: &Mutex<S>) -> MutexGuard<'_, S> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Copy an arm's state out of the table without holding the shard lock
fn read_slot<S: Clone>(table: &PosteriorTable<S>, arm_id: &str) -> Option<S> {
    let slot = table.get(arm_id).map(|s| s.value().clone())?;
    let state = lock(&slot).clone();
    Some(state)
}

/// Apply `f` to an arm's state under its own lock. Returns false if the arm is unknown.
fn with_slot<S>(table: &PosteriorTable<S>, arm_id: &str, f: impl FnOnce(&mut S)) -> bool {
    let Some(slot) = table.get(arm_id).map(|s| s.value().clone()) else {
        return false;
    };
    f(&mut lock(&slot));
    true
}

/// Bandit configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanditConfig {
    /// Which strategy to run
    pub strategy: BanditStrategyKind,
    /// Scales the UCB bound width
    pub exploration_factor: f64,
    /// Samples before an arm's statistics are trusted
    pub min_samples_for_confidence: u64,
    /// Per-step decay for Discounted UCB
    pub discount_factor: f64,
    /// Objective weights for combining Thompson samples
    pub weights: RewardWeights,
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            strategy: BanditStrategyKind::Thompson,
            exploration_factor: 2.0,
            min_samples_for_confidence: 10,
            discount_factor: 0.95,
            weights: RewardWeights::default(),
        }
    }
}

/// A candidate's selection score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanditScore {
    /// The arm
    pub arm_id: String,
    /// Sampled value (Thompson) or upper confidence bound (UCB)
    pub score: f64,
    /// Expected reward under the current posterior
    pub expected_reward: f64,
    /// Number of updates folded into the arm's state
    pub pulls: u64,
    /// Whether the arm has fewer samples than `min_samples_for_confidence`
    pub exploration: bool,
}

/// Reward fed to a bandit update
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BanditReward {
    /// Combined reward in `[0, 1]`
    pub scalar: f64,
    /// Per-objective rewards, when they are consistent with the scalar
    pub vector: Option<RewardVector>,
}

impl BanditReward {
    /// A scalar-only reward
    pub fn scalar(reward: f64) -> Self {
        Self {
            scalar: reward,
            vector: None,
        }
    }
}

/// Serializable copy of one arm's bandit state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PosteriorSnapshot {
    Thompson(ThompsonPosterior),
    Ucb(UcbStats),
}

/// Sort scores best first; equal scores go to the lowest arm id
fn sort_scores(scores: &mut [BanditScore]) {
    scores.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.arm_id.cmp(&b.arm_id))
    });
}

/// The configured bandit strategy
#[derive(Debug)]
pub enum BanditPolicy {
    Thompson(ThompsonSampling),
    Ucb(UcbPolicy),
}

impl BanditPolicy {
    /// Build the policy named by the configuration
    pub fn from_config(config: &BanditConfig) -> Self {
        let variant = match config.strategy {
            BanditStrategyKind::Thompson => {
                return Self::Thompson(ThompsonSampling::new(
                    config.weights,
                    config.min_samples_for_confidence,
                ));
            }
            BanditStrategyKind::Ucb1 => UcbVariant::Ucb1,
            BanditStrategyKind::UcbNormal => UcbVariant::Normal,
            BanditStrategyKind::DiscountedUcb => UcbVariant::Discounted {
                gamma: config.discount_factor,
            },
            BanditStrategyKind::BernsteinUcb => UcbVariant::Bernstein,
        };
        Self::Ucb(UcbPolicy::new(
            variant,
            config.exploration_factor,
            config.min_samples_for_confidence,
        ))
    }

    /// The strategy this policy runs
    pub fn kind(&self) -> BanditStrategyKind {
        match self {
            Self::Thompson(_) => BanditStrategyKind::Thompson,
            Self::Ucb(policy) => policy.variant().kind(),
        }
    }

    /// The decision strategy reported when the bandit's pick is final
    pub fn decision_strategy(&self) -> DecisionStrategy {
        match self {
            Self::Thompson(_) => DecisionStrategy::Thompson,
            Self::Ucb(_) => DecisionStrategy::Ucb,
        }
    }

    /// Create state for a newly registered arm
    pub fn ensure_arm(&self, arm_id: &str) {
        match self {
            Self::Thompson(policy) => policy.ensure_arm(arm_id),
            Self::Ucb(policy) => policy.ensure_arm(arm_id),
        }
    }

    /// Drop state for a deregistered arm
    pub fn remove_arm(&self, arm_id: &str) {
        match self {
            Self::Thompson(policy) => policy.remove_arm(arm_id),
            Self::Ucb(policy) => policy.remove_arm(arm_id),
        }
    }

    /// Explicitly reset an arm back to its prior. Returns false if unknown.
    pub fn reset(&self, arm_id: &str) -> bool {
        match self {
            Self::Thompson(policy) => policy.reset(arm_id),
            Self::Ucb(policy) => policy.reset(arm_id),
        }
    }

    /// Score every candidate, best first
    pub fn rank<R: Rng + ?Sized>(&self, candidates: &[Arc<Arm>], rng: &mut R) -> Vec<BanditScore> {
        match self {
            Self::Thompson(policy) => policy.rank(candidates, rng),
            Self::Ucb(policy) => policy.rank(candidates),
        }
    }

    /// Pick the best candidate
    pub fn select<R: Rng + ?Sized>(&self, candidates: &[Arc<Arm>], rng: &mut R) -> Result<BanditScore> {
        self.rank(candidates, rng)
            .into_iter()
            .next()
            .ok_or_else(|| Error::NoCandidates("bandit received an empty candidate set".to_string()))
    }

    /// Fold a reward into an arm's state. Returns false if the arm is unknown.
    pub fn update(&self, arm_id: &str, reward: &BanditReward) -> bool {
        match self {
            Self::Thompson(policy) => match reward.vector {
                Some(vector) => policy.update_vector(arm_id, &vector),
                None => policy.update(arm_id, reward.scalar),
            },
            Self::Ucb(policy) => policy.update(arm_id, reward.scalar),
        }
    }

    /// Expected reward of an arm under the current state
    pub fn expected_reward(&self, arm_id: &str) -> Option<f64> {
        match self {
            Self::Thompson(policy) => policy.expected_value(arm_id),
            Self::Ucb(policy) => policy.stats(arm_id).map(|s| s.mean_reward),
        }
    }

    /// Number of updates folded into an arm's state
    pub fn pulls(&self, arm_id: &str) -> Option<u64> {
        match self {
            Self::Thompson(policy) => policy.posterior(arm_id).map(|p| p.pulls),
            Self::Ucb(policy) => policy.stats(arm_id).map(|s| s.pull_count),
        }
    }

    /// Copy of an arm's state
    pub fn snapshot(&self, arm_id: &str) -> Option<PosteriorSnapshot> {
        match self {
            Self::Thompson(policy) => policy.posterior(arm_id).map(PosteriorSnapshot::Thompson),
            Self::Ucb(policy) => policy.stats(arm_id).map(PosteriorSnapshot::Ucb),
        }
    }

    /// Load a previously saved state. Snapshots of the other family are ignored.
    pub fn restore(&self, arm_id: &str, snapshot: PosteriorSnapshot) -> bool {
        match (self, snapshot) {
            (Self::Thompson(policy), PosteriorSnapshot::Thompson(posterior)) => {
                policy.restore(arm_id, posterior);
                true
            }
            (Self::Ucb(policy), PosteriorSnapshot::Ucb(stats)) => {
                policy.restore(arm_id, stats);
                true
            }
            _ => false,
        }
    }
}
