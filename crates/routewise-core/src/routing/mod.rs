//! Adaptive model routing
//!
//! This module picks one backend ("arm") per request and learns from the
//! reported outcome. The key components are:
//!
//! - **Arm Registry**: the selectable arms with their declared cost model,
//!   capability tags and context limit.
//!
//! - **Outcome Aggregator**: turns a raw observation (quality, cost, latency,
//!   success) into a per-objective reward vector and one scalar reward.
//!
//! - **Bandit Policy**: Thompson Sampling or one of the UCB variants, chosen
//!   once at construction, balancing exploration against exploitation.
//!
//! - **Preference Learner**: smoothed per-arm metrics for dashboards and for
//!   the expected quality the optimizer works with.
//!
//! - **Cost-Quality Optimizer**: resolves the final pick under a budget with a
//!   weighted sum, a Pareto front, a constraint, or a seeded heuristic search.
//!
//! - **Routing Store**: optional SQLite persistence of per-arm snapshots.
//!
//! ## How It Works
//!
//! 1. Candidates are filtered by capability and context size
//! 2. Arms whose declared cost or expected quality breaks the budget are dropped
//! 3. The bandit ranks the survivors; depending on the pipeline its top pick is
//!    final or a shortlist is handed to the optimizer
//! 4. After the call completes, the outcome is reported to improve future picks
//!
//! ## Example
//!
//! ```rust
//! use routewise_core::routing::{Arm, Observation, Router, RoutingContext};
//!
//! let router = Router::new();
//! router.register(Arm::new("openai/gpt-4o-mini").with_flat_cost(0.002))?;
//! router.register(Arm::new("anthropic/claude-haiku").with_flat_cost(0.003))?;
//!
//! let context = RoutingContext::new().with_request_id("req-42");
//! let decision = router.select(&context)?;
//!
//! // Call the chosen backend, then report how it went
//! let observation = Observation::new(&decision.chosen_arm_id, true)
//!     .with_quality(0.9)
//!     .with_cost(0.0021)
//!     .with_latency(0.8);
//! router.update(&decision.chosen_arm_id, observation)?;
//! # Ok::<(), routewise_core::Error>(())
//! ```

mod aggregator;
mod bandit;
mod optimizer;
mod preference;
mod registry;
mod router;
mod store;
mod types;

pub use aggregator::{AggregatorConfig, Outcome, OutcomeAggregator, RewardVector};
pub use bandit::{
    BanditConfig, BanditPolicy, BanditReward, BanditScore, BetaParams, PosteriorSnapshot,
    ThompsonPosterior, ThompsonSampling, UcbPolicy, UcbStats, UcbVariant,
};
pub use optimizer::{
    AnnealingConfig, ChainPlan, CostQualityOptimizer, GeneticConfig, OptimizerCandidate,
    OptimizerChoice, OptimizerConfig, OptimizerWeights, dominates, feasible, pareto_front,
};
pub use preference::{PreferenceConfig, PreferenceEstimate, PreferenceLearner};
pub use registry::ArmRegistry;
pub use router::{
    METRIC_COST, METRIC_LATENCY, METRIC_QUALITY, METRIC_REWARD, METRIC_SUCCESS_RATE, Router,
    RouterBuilder, RouterConfig, RouterState,
};
pub use store::{ArmSnapshot, CREATE_ARM_SNAPSHOTS_TABLE_SQL, RoutingStore};
pub use types::{
    Arm, BanditStrategyKind, Budget, Confidence, DecisionStrategy, Observation,
    OptimizerAlgorithm, OptimizerObjective, Pipeline, PreferenceAlgorithm, RankEntry, Ranking,
    RewardShaping, RewardWeights, RoutingContext, RoutingDecision,
};
