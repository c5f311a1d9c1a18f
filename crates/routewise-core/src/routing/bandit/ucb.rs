//! Upper Confidence Bound policies
//!
//! Every variant scores a pulled arm as its mean reward plus an exploration
//! bonus that shrinks as the arm accumulates samples. Let `c` be the
//! exploration factor, `N` the total pulls across the candidate set and `n`
//! the arm's own pulls:
//!
//! - UCB1: `mean + sqrt(c·ln N / n)`
//! - UCB-Normal: `mean + sqrt(8c·var·ln(N - 1) / n)`, UCB1 until the arm has
//!   `min_samples_for_confidence` samples
//! - Bernstein: `mean + sqrt(c·var·ln N / n) + 1.5c·ln N / n`, with the
//!   worst-case variance 0.25 until the arm has enough samples
//! - Discounted: UCB1 over exponentially decayed counts and means, so arms
//!   whose reward drifts are re-explored
//!
//! Arms that were never pulled are always tried first, in candidate order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{BanditScore, PosteriorTable, lock, read_slot, sort_scores, with_slot};
use crate::routing::types::{Arm, BanditStrategyKind};

/// Worst-case variance of a reward in `[0, 1]`
const MAX_UNIT_VARIANCE: f64 = 0.25;

/// Which confidence bound to use
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UcbVariant {
    Ucb1,
    Normal,
    Discounted { gamma: f64 },
    Bernstein,
}

impl UcbVariant {
    /// The configuration name of this variant
    pub fn kind(&self) -> BanditStrategyKind {
        match self {
            Self::Ucb1 => BanditStrategyKind::Ucb1,
            Self::Normal => BanditStrategyKind::UcbNormal,
            Self::Discounted { .. } => BanditStrategyKind::DiscountedUcb,
            Self::Bernstein => BanditStrategyKind::BernsteinUcb,
        }
    }
}

/// Running reward statistics for one arm
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UcbStats {
    /// Number of rewards folded in; only an explicit reset lowers it
    pub pull_count: u64,
    /// Mean reward (decayed for Discounted UCB)
    pub mean_reward: f64,
    /// Reward variance (decayed for Discounted UCB)
    pub variance_estimate: f64,
    /// Sum of squared deviations behind `variance_estimate`
    #[serde(default)]
    pub m2: f64,
    /// Decayed pull count as of `last_step` (Discounted UCB only)
    #[serde(default)]
    pub discounted_count: f64,
    /// Global step of the last update (Discounted UCB only)
    #[serde(default)]
    pub last_step: u64,
}

impl UcbStats {
    /// Fold in one reward with Welford's update
    pub fn record(&mut self, reward: f64) {
        self.pull_count += 1;
        let n = self.pull_count as f64;
        let delta = reward - self.mean_reward;
        self.mean_reward += delta / n;
        self.m2 += delta * (reward - self.mean_reward);
        self.variance_estimate = if self.pull_count > 1 {
            self.m2 / (n - 1.0)
        } else {
            0.0
        };
    }

    /// Fold in one reward at global step `step`, decaying older rewards by
    /// `gamma` per elapsed step
    pub fn record_discounted(&mut self, reward: f64, gamma: f64, step: u64) {
        let decay = gamma.powf(step.saturating_sub(self.last_step) as f64);
        self.discounted_count = self.discounted_count * decay + 1.0;
        self.m2 *= decay;

        let delta = reward - self.mean_reward;
        self.mean_reward += delta / self.discounted_count;
        self.m2 += delta * (reward - self.mean_reward);
        self.variance_estimate = self.m2 / self.discounted_count;

        self.pull_count += 1;
        self.last_step = self.last_step.max(step);
    }

    /// Decayed pull count as seen at global step `now`
    pub fn discounted_count_at(&self, gamma: f64, now: u64) -> f64 {
        self.discounted_count * gamma.powf(now.saturating_sub(self.last_step) as f64)
    }
}

/// UCB family policy
#[derive(Debug)]
pub struct UcbPolicy {
    variant: UcbVariant,
    exploration_factor: f64,
    min_samples_for_confidence: u64,
    /// Global update clock for Discounted UCB
    step: AtomicU64,
    arms: PosteriorTable<UcbStats>,
}

impl UcbPolicy {
    /// Create a policy. Invalid parameters fall back to their defaults with a warning.
    pub fn new(variant: UcbVariant, exploration_factor: f64, min_samples_for_confidence: u64) -> Self {
        let exploration_factor = if exploration_factor.is_finite() && exploration_factor > 0.0 {
            exploration_factor
        } else {
            warn!(exploration_factor, "Invalid exploration factor, using 2.0");
            2.0
        };

        let variant = match variant {
            UcbVariant::Discounted { gamma } if !(gamma > 0.0 && gamma <= 1.0) => {
                warn!(gamma, "Invalid discount factor, using 0.95");
                UcbVariant::Discounted { gamma: 0.95 }
            }
            other => other,
        };

        Self {
            variant,
            exploration_factor,
            min_samples_for_confidence,
            step: AtomicU64::new(0),
            arms: PosteriorTable::default(),
        }
    }

    /// The confidence bound in use
    pub fn variant(&self) -> UcbVariant {
        self.variant
    }

    /// Create empty statistics for an arm if it has none
    pub fn ensure_arm(&self, arm_id: &str) {
        if !self.arms.contains_key(arm_id) {
            self.arms
                .entry(arm_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(UcbStats::default())));
        }
    }

    /// Drop an arm's statistics
    pub fn remove_arm(&self, arm_id: &str) {
        self.arms.remove(arm_id);
    }

    /// Clear an arm's statistics, including its pull count
    pub fn reset(&self, arm_id: &str) -> bool {
        with_slot(&self.arms, arm_id, |s| *s = UcbStats::default())
    }

    /// Copy of an arm's statistics
    pub fn stats(&self, arm_id: &str) -> Option<UcbStats> {
        read_slot(&self.arms, arm_id)
    }

    /// Replace an arm's statistics
    pub fn restore(&self, arm_id: &str, mut stats: UcbStats) {
        self.step.fetch_max(stats.last_step, Ordering::Relaxed);
        if !stats.variance_estimate.is_finite() || stats.variance_estimate < 0.0 {
            stats.variance_estimate = 0.0;
        }
        match self.arms.get(arm_id).map(|s| s.value().clone()) {
            Some(slot) => *lock(&slot) = stats,
            None => {
                self.arms
                    .insert(arm_id.to_string(), Arc::new(Mutex::new(stats)));
            }
        }
    }

    /// Fold one reward into an arm's statistics
    pub fn update(&self, arm_id: &str, reward: f64) -> bool {
        let reward = reward.clamp(0.0, 1.0);
        match self.variant {
            UcbVariant::Discounted { gamma } => {
                if !self.arms.contains_key(arm_id) {
                    return false;
                }
                let step = self.step.fetch_add(1, Ordering::Relaxed) + 1;
                with_slot(&self.arms, arm_id, |s| s.record_discounted(reward, gamma, step))
            }
            _ => with_slot(&self.arms, arm_id, |s| s.record(reward)),
        }
    }

    /// Score every candidate.
    ///
    /// Unpulled candidates come first in the order given; pulled candidates
    /// follow, highest bound first.
    pub fn rank(&self, candidates: &[Arc<Arm>]) -> Vec<BanditScore> {
        let now = self.step.load(Ordering::Relaxed);
        let stats: Vec<(&Arc<Arm>, UcbStats)> = candidates
            .iter()
            .map(|arm| (arm, self.stats(&arm.id).unwrap_or_default()))
            .collect();

        let total = stats
            .iter()
            .map(|(_, s)| self.effective_count(s, now))
            .sum::<f64>();

        let mut unpulled = Vec::new();
        let mut pulled = Vec::new();
        for (arm, s) in &stats {
            let score = if s.pull_count == 0 {
                f64::INFINITY
            } else {
                self.upper_bound(s, total, now)
            };
            let entry = BanditScore {
                arm_id: arm.id.clone(),
                score,
                expected_reward: s.mean_reward,
                pulls: s.pull_count,
                exploration: s.pull_count < self.min_samples_for_confidence,
            };
            if s.pull_count == 0 {
                unpulled.push(entry);
            } else {
                pulled.push(entry);
            }
        }

        sort_scores(&mut pulled);
        unpulled.extend(pulled);
        unpulled
    }

    fn effective_count(&self, stats: &UcbStats, now: u64) -> f64 {
        match self.variant {
            UcbVariant::Discounted { gamma } => stats.discounted_count_at(gamma, now),
            _ => stats.pull_count as f64,
        }
    }

    /// Upper confidence bound of a pulled arm given the candidate-set total
    pub(crate) fn upper_bound(&self, stats: &UcbStats, total: f64, now: u64) -> f64 {
        let c = self.exploration_factor;
        let mean = stats.mean_reward;
        let n = stats.pull_count as f64;
        let ln_total = total.max(1.0).ln();
        let trusted = stats.pull_count >= self.min_samples_for_confidence;

        match self.variant {
            UcbVariant::Ucb1 => mean + (c * ln_total / n).sqrt(),
            UcbVariant::Normal if !trusted => mean + (c * ln_total / n).sqrt(),
            UcbVariant::Normal => {
                let ln = (total - 1.0).max(1.0).ln();
                mean + (8.0 * c * stats.variance_estimate * ln / n).sqrt()
            }
            UcbVariant::Bernstein => {
                let variance = if trusted {
                    stats.variance_estimate
                } else {
                    MAX_UNIT_VARIANCE
                };
                mean + (c * variance * ln_total / n).sqrt() + 1.5 * c * ln_total / n
            }
            UcbVariant::Discounted { gamma } => {
                let discounted = stats.discounted_count_at(gamma, now);
                if discounted <= f64::MIN_POSITIVE {
                    return f64::INFINITY;
                }
                mean + (c * ln_total / discounted).sqrt()
            }
        }
    }
}
