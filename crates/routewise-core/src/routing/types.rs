//! Types for adaptive model routing
//!
//! This module defines the data model shared by the registry, the bandit
//! policies, the preference learner, the optimizer and the router.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::warn;

use crate::cost::CostModel;
use crate::error::{Error, Result};

/// A selectable backend (model/provider)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arm {
    /// Unique identifier (e.g., "openai/gpt-4o-mini")
    pub id: String,
    /// Declared cost as a function of request token count
    pub cost_model: CostModel,
    /// Capability tags used for candidate filtering (e.g., "vision")
    pub capability_tags: BTreeSet<String>,
    /// Maximum context size in tokens
    pub max_tokens: usize,
    /// Declared expected quality (0.0 to 1.0) before any observation
    pub quality_prior: f64,
    /// Declared expected latency in seconds
    pub expected_latency_seconds: f64,
}

impl Arm {
    /// Create a new arm with default metadata
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            cost_model: CostModel::default(),
            capability_tags: BTreeSet::new(),
            max_tokens: 128_000,
            quality_prior: 0.5,
            expected_latency_seconds: 2.0,
        }
    }

    /// Set the cost model
    pub fn with_cost_model(mut self, cost_model: CostModel) -> Self {
        self.cost_model = cost_model;
        self
    }

    /// Shorthand for a flat per-request cost
    pub fn with_flat_cost(self, cost: f64) -> Self {
        self.with_cost_model(CostModel::flat(cost))
    }

    /// Set capability tags
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capability_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Set the context limit
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the declared quality prior
    pub fn with_quality_prior(mut self, quality: f64) -> Self {
        self.quality_prior = quality.clamp(0.0, 1.0);
        self
    }

    /// Set the declared latency
    pub fn with_expected_latency(mut self, seconds: f64) -> Self {
        self.expected_latency_seconds = seconds.max(0.0);
        self
    }

    /// Estimate cost for a given token count
    pub fn estimate_cost(&self, tokens: usize) -> f64 {
        self.cost_model.cost_for_tokens(tokens)
    }

    /// Whether the arm provides every required capability
    pub fn has_capabilities(&self, required: &BTreeSet<String>) -> bool {
        required.is_subset(&self.capability_tags)
    }

    /// Check the registry invariants for this arm
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::InvalidArm("arm id must not be empty".to_string()));
        }
        if self.max_tokens == 0 {
            return Err(Error::InvalidArm(format!(
                "arm '{}' must have a positive max_tokens",
                self.id
            )));
        }
        self.cost_model.validate()
    }
}

/// One reported outcome for one arm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// The arm that served the request
    pub arm_id: String,
    /// When the invocation completed
    pub timestamp: DateTime<Utc>,
    /// Quality score (0.0 to 1.0)
    pub quality_score: f64,
    /// Realized cost in currency units
    pub cost: f64,
    /// Observed latency in seconds
    pub latency_seconds: f64,
    /// Whether the invocation succeeded
    pub success: bool,
}

impl Observation {
    /// Create a new observation
    pub fn new(arm_id: impl Into<String>, success: bool) -> Self {
        Self {
            arm_id: arm_id.into(),
            timestamp: Utc::now(),
            quality_score: if success { 1.0 } else { 0.0 },
            cost: 0.0,
            latency_seconds: 0.0,
            success,
        }
    }

    /// Set quality score
    pub fn with_quality(mut self, score: f64) -> Self {
        self.quality_score = score;
        self
    }

    /// Set cost
    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    /// Set latency
    pub fn with_latency(mut self, seconds: f64) -> Self {
        self.latency_seconds = seconds;
        self
    }

    /// Set timestamp
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Clamp every field into its valid range.
    ///
    /// Non-finite values become the worst valid value for the metric. Each
    /// adjusted field is logged once.
    pub fn sanitized(mut self) -> Self {
        let quality = sanitize_field(self.quality_score, 0.0, 0.0, 1.0);
        if quality != self.quality_score {
            warn!(
                arm_id = %self.arm_id,
                quality_score = self.quality_score,
                "Clamped out-of-range quality score"
            );
            self.quality_score = quality;
        }

        let cost = sanitize_field(self.cost, f64::MAX, 0.0, f64::MAX);
        if cost != self.cost {
            warn!(arm_id = %self.arm_id, cost = self.cost, "Clamped invalid cost");
            self.cost = cost;
        }

        let latency = sanitize_field(self.latency_seconds, f64::MAX, 0.0, f64::MAX);
        if latency != self.latency_seconds {
            warn!(
                arm_id = %self.arm_id,
                latency_seconds = self.latency_seconds,
                "Clamped invalid latency"
            );
            self.latency_seconds = latency;
        }

        self
    }
}

fn sanitize_field(value: f64, worst: f64, min: f64, max: f64) -> f64 {
    if value.is_nan() {
        worst
    } else {
        value.clamp(min, max)
    }
}

/// Caller-supplied or process-wide spending and quality envelope
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    /// Hard ceiling on the declared cost of a single request
    #[serde(default)]
    pub max_cost_per_request: Option<f64>,
    /// Hard ceiling on realized spend per calendar day
    #[serde(default)]
    pub max_daily_cost: Option<f64>,
    /// Minimum expected quality (0.0 to 1.0)
    #[serde(default)]
    pub min_quality_threshold: f64,
}

impl Budget {
    /// A budget with no constraints
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Set the per-request cost ceiling
    pub fn with_max_cost_per_request(mut self, max_cost: f64) -> Self {
        self.max_cost_per_request = Some(max_cost);
        self
    }

    /// Set the daily cost ceiling
    pub fn with_max_daily_cost(mut self, max_cost: f64) -> Self {
        self.max_daily_cost = Some(max_cost);
        self
    }

    /// Set the quality floor
    pub fn with_min_quality(mut self, threshold: f64) -> Self {
        self.min_quality_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Whether a declared cost fits the per-request ceiling
    pub fn allows_cost(&self, cost: f64) -> bool {
        self.max_cost_per_request.is_none_or(|max| cost <= max)
    }

    /// Whether an expected quality meets the floor
    pub fn allows_quality(&self, quality: f64) -> bool {
        quality >= self.min_quality_threshold
    }
}

impl std::fmt::Display for Budget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let per_request = self
            .max_cost_per_request
            .map(|c| format!("{c}"))
            .unwrap_or_else(|| "unbounded".to_string());
        let daily = self
            .max_daily_cost
            .map(|c| format!("{c}"))
            .unwrap_or_else(|| "unbounded".to_string());
        write!(
            f,
            "max_cost_per_request={}, max_daily_cost={}, min_quality={}",
            per_request, daily, self.min_quality_threshold
        )
    }
}

/// Per-request routing context supplied by the orchestration layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingContext {
    /// Opaque correlation id, passed through to the decision
    pub request_id: String,
    /// Tags every candidate must carry
    pub capability_requirements: BTreeSet<String>,
    /// Minimum context size the candidate must support
    pub min_context: usize,
    /// Estimated request token count, used with the declared cost model
    pub estimated_tokens: Option<usize>,
    /// Optional override of the process-wide budget
    pub budget: Option<Budget>,
}

impl Default for RoutingContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingContext {
    /// Create a context with a fresh request id and no requirements
    pub fn new() -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            capability_requirements: BTreeSet::new(),
            min_context: 0,
            estimated_tokens: None,
            budget: None,
        }
    }

    /// Set the correlation id
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// Set the required capabilities
    pub fn with_capabilities<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capability_requirements = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Set the minimum context size
    pub fn with_min_context(mut self, tokens: usize) -> Self {
        self.min_context = tokens;
        self
    }

    /// Set the estimated token count
    pub fn with_estimated_tokens(mut self, tokens: usize) -> Self {
        self.estimated_tokens = Some(tokens);
        self
    }

    /// Override the budget for this request
    pub fn with_budget(mut self, budget: Budget) -> Self {
        self.budget = Some(budget);
        self
    }
}

/// Which algorithm produced the final pick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStrategy {
    Thompson,
    Ucb,
    Pareto,
    WeightedSum,
    Constraint,
    Heuristic,
}

impl std::fmt::Display for DecisionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Thompson => write!(f, "thompson"),
            Self::Ucb => write!(f, "ucb"),
            Self::Pareto => write!(f, "pareto"),
            Self::WeightedSum => write!(f, "weighted_sum"),
            Self::Constraint => write!(f, "constraint"),
            Self::Heuristic => write!(f, "heuristic"),
        }
    }
}

/// Result of a routing decision; immutable once returned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// Selected arm
    pub chosen_arm_id: String,
    /// Declared cost of the selected arm for this request
    pub expected_cost: f64,
    /// Expected quality of the selected arm
    pub expected_quality: f64,
    /// Expected latency of the selected arm in seconds
    pub expected_latency_seconds: f64,
    /// Algorithm that produced the final pick
    pub decision_strategy: DecisionStrategy,
    /// Number of candidates that survived filtering
    pub alternatives_considered: usize,
    /// When the decision was made
    pub timestamp: DateTime<Utc>,
    /// Correlation id from the context
    pub request_id: String,
    /// Whether the pick was made with too few samples to trust the statistics
    pub exploration: bool,
    /// Arms the bandit handed to the optimizer, best first
    pub shortlist: Vec<String>,
}

/// Relative weights of the reward objectives
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RewardWeights {
    pub quality: f64,
    pub cost_efficiency: f64,
    pub latency: f64,
    pub success: f64,
}

impl Default for RewardWeights {
    fn default() -> Self {
        Self {
            quality: 0.3,
            cost_efficiency: 0.2,
            latency: 0.1,
            success: 0.4,
        }
    }
}

impl RewardWeights {
    /// Create weights in objective order
    pub fn new(quality: f64, cost_efficiency: f64, latency: f64, success: f64) -> Self {
        Self {
            quality,
            cost_efficiency,
            latency,
            success,
        }
    }

    /// Equal weight on every objective
    pub fn uniform() -> Self {
        Self::new(0.25, 0.25, 0.25, 0.25)
    }

    /// Weights in objective order: quality, cost efficiency, latency, success
    pub fn as_array(&self) -> [f64; 4] {
        [self.quality, self.cost_efficiency, self.latency, self.success]
    }

    /// Sum of the raw weights
    pub fn sum(&self) -> f64 {
        self.as_array().iter().sum()
    }

    /// Check that weights are usable at all (finite, non-negative, positive sum)
    pub fn validate(&self) -> Result<()> {
        let weights = self.as_array();
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(Error::ConfigError(format!(
                "reward weights must be finite and non-negative: {:?}",
                weights
            )));
        }
        if self.sum() <= 0.0 {
            return Err(Error::ConfigError(
                "reward weights must have a positive sum".to_string(),
            ));
        }
        Ok(())
    }

    /// Scale the weights so they sum to 1.0.
    ///
    /// Unusable weights fall back to uniform weights. Both adjustments log a
    /// warning; neither fails.
    pub fn normalized(&self) -> Self {
        if self.validate().is_err() {
            warn!(weights = ?self.as_array(), "Unusable reward weights, using uniform weights");
            return Self::uniform();
        }

        let sum = self.sum();
        if (sum - 1.0).abs() > 1e-9 {
            warn!(sum, "Reward weights do not sum to 1.0, normalizing");
        }

        Self::new(
            self.quality / sum,
            self.cost_efficiency / sum,
            self.latency / sum,
            self.success / sum,
        )
    }
}

/// How confident a ranking entry is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Enough samples to trust the estimate
    Reliable,
    /// Fewer than `min_samples_for_learning` samples
    Low,
}

/// A single row of a preference ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankEntry {
    pub arm_id: String,
    pub value: f64,
    pub sample_count: u64,
    pub confidence: Confidence,
}

/// Ranking of arms on one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ranking {
    pub metric_name: String,
    pub entries: Vec<RankEntry>,
    /// True when any entry has too few samples to be trusted
    pub low_confidence: bool,
}

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// All accepted values, in declaration order
            pub const VALUES: &'static [&'static str] = &[$($text),+];
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(Self::$variant => write!(f, $text)),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s.to_lowercase().as_str() {
                    $($text => Ok(Self::$variant),)+
                    _ => Err(format!(
                        "Unknown {}: {} (expected one of: {})",
                        stringify!($name),
                        s,
                        Self::VALUES.join(", ")
                    )),
                }
            }
        }
    };
}

string_enum! {
    /// Bandit strategy chosen at construction time
    BanditStrategyKind {
        Thompson => "thompson",
        Ucb1 => "ucb1",
        UcbNormal => "ucb_normal",
        DiscountedUcb => "discounted_ucb",
        BernsteinUcb => "bernstein_ucb",
    }
}

string_enum! {
    /// What the optimizer optimizes
    OptimizerObjective {
        MinimizeCost => "minimize_cost",
        MaximizeQuality => "maximize_quality",
        Balanced => "balanced",
        Constrained => "constrained",
    }
}

string_enum! {
    /// How the optimizer resolves the final pick
    OptimizerAlgorithm {
        WeightedSum => "weighted_sum",
        Pareto => "pareto",
        Constraint => "constraint",
        Heuristic => "heuristic",
    }
}

string_enum! {
    /// Smoothing algorithm used by the preference learner
    PreferenceAlgorithm {
        ExponentialSmoothing => "exponential_smoothing",
        MovingAverage => "moving_average",
        WeightedRegression => "weighted_regression",
    }
}

string_enum! {
    /// How per-objective rewards are combined into one scalar
    RewardShaping {
        WeightedSum => "weighted_sum",
        Multiplicative => "multiplicative",
    }
}

string_enum! {
    /// Which stages of the selection pipeline run
    Pipeline {
        /// The bandit's pick is final
        Bandit => "bandit",
        /// The bandit shortlists `top_k` arms, the optimizer picks among them
        Shortlist => "shortlist",
        /// The optimizer picks among all filtered candidates
        Optimizer => "optimizer",
    }
}
