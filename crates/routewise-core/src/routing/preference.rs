//! Preference learning
//!
//! Slow-moving per-arm, per-metric estimates of historical performance. The
//! estimates are reported to operators through [`PreferenceLearner::rank`] and
//! feed the optimizer as a prior; they never drive the bandit directly.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::types::{Confidence, PreferenceAlgorithm, RankEntry, Ranking};

/// Bounds on the weighted regression history
const REGRESSION_WINDOW_MIN: usize = 500;
const REGRESSION_WINDOW_MAX: usize = 1000;

/// Preference learner settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferenceConfig {
    pub algorithm: PreferenceAlgorithm,
    /// Weight of the newest sample for exponential smoothing
    pub smoothing_alpha: f64,
    /// Samples averaged by the moving average
    pub moving_average_window: usize,
    /// Samples kept for weighted regression
    pub regression_window: usize,
    /// Samples before an estimate is considered reliable
    pub min_samples_for_learning: u64,
}

impl Default for PreferenceConfig {
    fn default() -> Self {
        Self {
            algorithm: PreferenceAlgorithm::ExponentialSmoothing,
            smoothing_alpha: 0.3,
            moving_average_window: 20,
            regression_window: REGRESSION_WINDOW_MIN,
            min_samples_for_learning: 10,
        }
    }
}

/// Smoothed estimate of one metric for one arm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferenceEstimate {
    pub metric_name: String,
    pub smoothed_value: f64,
    pub sample_count: u64,
    pub last_updated: DateTime<Utc>,
    /// Recent samples, oldest first; empty for exponential smoothing
    #[serde(default)]
    pub history: VecDeque<f64>,
}

impl PreferenceEstimate {
    fn new(metric_name: &str) -> Self {
        Self {
            metric_name: metric_name.to_string(),
            smoothed_value: 0.0,
            sample_count: 0,
            last_updated: Utc::now(),
            history: VecDeque::new(),
        }
    }

    fn fold(&mut self, value: f64, config: &PreferenceConfig) {
        self.smoothed_value = match config.algorithm {
            PreferenceAlgorithm::ExponentialSmoothing => {
                if self.sample_count == 0 {
                    value
                } else {
                    config.smoothing_alpha * value
                        + (1.0 - config.smoothing_alpha) * self.smoothed_value
                }
            }
            PreferenceAlgorithm::MovingAverage => {
                self.push_bounded(value, config.moving_average_window);
                self.history.iter().sum::<f64>() / self.history.len() as f64
            }
            PreferenceAlgorithm::WeightedRegression => {
                self.push_bounded(value, config.regression_window);
                weighted_trend(&self.history)
            }
        };
        self.sample_count += 1;
        self.last_updated = Utc::now();
    }

    fn push_bounded(&mut self, value: f64, bound: usize) {
        self.history.push_back(value);
        while self.history.len() > bound.max(1) {
            self.history.pop_front();
        }
    }
}

/// Linearly weighted least-squares fit over `samples`, evaluated at the
/// newest sample and clamped to the observed range
fn weighted_trend(samples: &VecDeque<f64>) -> f64 {
    let n = samples.len();
    if n == 0 {
        return 0.0;
    }

    let weights = || (1..=n).map(|i| i as f64);
    let total: f64 = weights().sum();
    let x_mean = weights()
        .zip(0..n)
        .map(|(w, x)| w * x as f64)
        .sum::<f64>()
        / total;
    let y_mean = weights().zip(samples).map(|(w, y)| w * y).sum::<f64>() / total;

    let (sxx, sxy) = weights()
        .zip(samples)
        .enumerate()
        .fold((0.0, 0.0), |(sxx, sxy), (x, (w, y))| {
            let dx = x as f64 - x_mean;
            (sxx + w * dx * dx, sxy + w * dx * (y - y_mean))
        });

    if sxx <= f64::EPSILON {
        return y_mean;
    }

    let slope = sxy / sxx;
    let latest = y_mean + slope * ((n - 1) as f64 - x_mean);

    let (min, max) = samples
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), y| {
            (lo.min(*y), hi.max(*y))
        });
    latest.clamp(min, max)
}

type ArmEstimates = HashMap<String, PreferenceEstimate>;

/// Per-arm, per-metric preference estimates
#[derive(Debug)]
pub struct PreferenceLearner {
    config: PreferenceConfig,
    arms: DashMap<String, Arc<Mutex<ArmEstimates>>>,
}

impl Default for PreferenceLearner {
    fn default() -> Self {
        Self::new(PreferenceConfig::default())
    }
}

impl PreferenceLearner {
    /// Create a learner. Out-of-range settings are adjusted with a warning.
    pub fn new(mut config: PreferenceConfig) -> Self {
        if !(config.smoothing_alpha > 0.0 && config.smoothing_alpha <= 1.0) {
            warn!(alpha = config.smoothing_alpha, "Invalid smoothing alpha, using 0.3");
            config.smoothing_alpha = 0.3;
        }
        if config.moving_average_window == 0 {
            warn!("Moving average window must be positive, using 20");
            config.moving_average_window = 20;
        }
        let window = config
            .regression_window
            .clamp(REGRESSION_WINDOW_MIN, REGRESSION_WINDOW_MAX);
        if window != config.regression_window {
            warn!(
                requested = config.regression_window,
                window, "Regression window out of range, clamping"
            );
            config.regression_window = window;
        }
        Self {
            config,
            arms: DashMap::new(),
        }
    }

    /// The effective configuration
    pub fn config(&self) -> &PreferenceConfig {
        &self.config
    }

    fn slot(&self, arm_id: &str) -> Arc<Mutex<ArmEstimates>> {
        match self.arms.get(arm_id) {
            Some(slot) => slot.value().clone(),
            None => self
                .arms
                .entry(arm_id.to_string())
                .or_default()
                .value()
                .clone(),
        }
    }

    /// Fold a new sample into an arm's estimate of `metric_name`.
    ///
    /// Non-finite samples are dropped with a warning.
    pub fn update(&self, arm_id: &str, metric_name: &str, value: f64) {
        if !value.is_finite() {
            warn!(arm_id = %arm_id, metric = %metric_name, value, "Dropping non-finite preference sample");
            return;
        }

        let slot = self.slot(arm_id);
        let mut estimates = slot.lock().unwrap_or_else(PoisonError::into_inner);
        let estimate = estimates
            .entry(metric_name.to_string())
            .or_insert_with(|| PreferenceEstimate::new(metric_name));
        estimate.fold(value, &self.config);

        debug!(
            arm_id = %arm_id,
            metric = %metric_name,
            value,
            smoothed = estimate.smoothed_value,
            samples = estimate.sample_count,
            "Updated preference estimate"
        );
    }

    /// Copy of an arm's estimate for one metric
    pub fn estimate(&self, arm_id: &str, metric_name: &str) -> Option<PreferenceEstimate> {
        let slot = self.arms.get(arm_id).map(|s| s.value().clone())?;
        let estimates = slot.lock().unwrap_or_else(PoisonError::into_inner);
        estimates.get(metric_name).cloned()
    }

    /// Smoothed value, only when the estimate has enough samples to be reliable
    pub fn reliable_value(&self, arm_id: &str, metric_name: &str) -> Option<f64> {
        self.estimate(arm_id, metric_name)
            .filter(|e| e.sample_count >= self.config.min_samples_for_learning)
            .map(|e| e.smoothed_value)
    }

    /// Rank `arm_ids` on one metric.
    ///
    /// Reliable estimates come first, highest value first. Arms below
    /// `min_samples_for_learning` follow in the order given and mark the
    /// ranking as low confidence.
    pub fn rank(&self, metric_name: &str, arm_ids: &[String]) -> Ranking {
        let mut reliable = Vec::new();
        let mut low = Vec::new();

        for arm_id in arm_ids {
            let (value, sample_count) = self
                .estimate(arm_id, metric_name)
                .map(|e| (e.smoothed_value, e.sample_count))
                .unwrap_or((0.0, 0));

            if sample_count >= self.config.min_samples_for_learning {
                reliable.push(RankEntry {
                    arm_id: arm_id.clone(),
                    value,
                    sample_count,
                    confidence: Confidence::Reliable,
                });
            } else {
                low.push(RankEntry {
                    arm_id: arm_id.clone(),
                    value,
                    sample_count,
                    confidence: Confidence::Low,
                });
            }
        }

        reliable.sort_by(|a, b| {
            b.value
                .total_cmp(&a.value)
                .then_with(|| a.arm_id.cmp(&b.arm_id))
        });

        let low_confidence = !low.is_empty();
        reliable.extend(low);
        Ranking {
            metric_name: metric_name.to_string(),
            entries: reliable,
            low_confidence,
        }
    }

    /// Drop every estimate for an arm
    pub fn forget(&self, arm_id: &str) {
        self.arms.remove(arm_id);
    }

    /// Copy of every estimate for an arm, keyed by metric
    pub fn snapshot(&self, arm_id: &str) -> HashMap<String, PreferenceEstimate> {
        let Some(slot) = self.arms.get(arm_id).map(|s| s.value().clone()) else {
            return HashMap::new();
        };
        let estimates = slot.lock().unwrap_or_else(PoisonError::into_inner);
        estimates.clone()
    }

    /// Replace an arm's estimates
    pub fn restore(&self, arm_id: &str, estimates: HashMap<String, PreferenceEstimate>) {
        let slot = self.slot(arm_id);
        *slot.lock().unwrap_or_else(PoisonError::into_inner) = estimates;
    }
}
