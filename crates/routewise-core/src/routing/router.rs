//! Routing orchestrator
//!
//! Ties the registry, bandit policy, preference learner and optimizer together:
//!
//! 1. Filter registered arms by capability and context size
//! 2. Drop arms that break the budget (declared cost, remaining daily spend, quality floor)
//! 3. Rank the survivors with the bandit policy
//! 4. Let the bandit pick, or hand a shortlist (or everything) to the optimizer
//!
//! Outcomes reported through [`Router::update`] fan out to the bandit, the
//! preference learner and the spend tracker. Neither path performs I/O; an
//! attached [`RoutingStore`] is written in the background.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::aggregator::{AggregatorConfig, OutcomeAggregator};
use super::bandit::{BanditConfig, BanditPolicy, BanditReward, BanditScore};
use super::optimizer::{
    ChainPlan, CostQualityOptimizer, OptimizerCandidate, OptimizerChoice, OptimizerConfig,
    OptimizerWeights,
};
use super::preference::{PreferenceConfig, PreferenceLearner};
use super::registry::ArmRegistry;
use super::store::{ArmSnapshot, RoutingStore};
use super::types::{
    Arm, BanditStrategyKind, Budget, DecisionStrategy, Observation, Pipeline, Ranking,
    RewardShaping, RoutingContext, RoutingDecision,
};
use crate::cost::SpendTracker;
use crate::error::{Error, Result};

/// Metric names fed to the preference learner on every update
pub const METRIC_QUALITY: &str = "quality";
pub const METRIC_COST: &str = "cost";
pub const METRIC_LATENCY: &str = "latency";
pub const METRIC_SUCCESS_RATE: &str = "success_rate";
pub const METRIC_REWARD: &str = "reward";

/// Configuration for the router
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Name used to key persisted state, so several routers can share a store
    pub name: String,
    pub bandit: BanditConfig,
    pub aggregator: AggregatorConfig,
    pub preference: PreferenceConfig,
    pub optimizer: OptimizerConfig,
    /// Quality/cost trade-off for the optimizer
    pub optimizer_weights: OptimizerWeights,
    /// Which stages decide the final pick
    pub pipeline: Pipeline,
    /// Shortlist size handed to the optimizer; 0 lets the bandit pick directly
    pub top_k: usize,
    /// Budget used when the context carries none
    pub default_budget: Budget,
    /// Token estimate used when the context carries none
    pub estimated_tokens: usize,
    /// Seed for reproducible selection; entropy-seeded when absent
    pub seed: Option<u64>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            bandit: BanditConfig::default(),
            aggregator: AggregatorConfig::default(),
            preference: PreferenceConfig::default(),
            optimizer: OptimizerConfig::default(),
            optimizer_weights: OptimizerWeights::default(),
            pipeline: Pipeline::Bandit,
            top_k: 3,
            default_budget: Budget::unbounded(),
            estimated_tokens: 1_000,
            seed: None,
        }
    }
}

/// Everything the router learns, owned by one router instance
#[derive(Debug)]
pub struct RouterState {
    pub registry: ArmRegistry,
    pub bandit: BanditPolicy,
    pub preferences: PreferenceLearner,
    pub spend: SpendTracker,
    /// Selections made so far; offsets the seed so each call draws fresh numbers
    draws: AtomicU64,
    /// Held shared by updates and exclusively by register/deregister/reset, so
    /// an arm's learning state is created and dropped together with its registration
    lifecycle: RwLock<()>,
}

impl RouterState {
    fn lifecycle_shared(&self) -> RwLockReadGuard<'_, ()> {
        self.lifecycle.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn lifecycle_exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.lifecycle.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A candidate that survived the budget filter
#[derive(Debug, Clone)]
struct Feasible {
    arm: Arc<Arm>,
    cost: f64,
    quality: f64,
    latency: f64,
}

/// The adaptive model router
#[derive(Debug)]
pub struct Router {
    config: RouterConfig,
    aggregator: OutcomeAggregator,
    optimizer: CostQualityOptimizer,
    state: RouterState,
    store: Option<Arc<RoutingStore>>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    /// Create a router with default configuration
    pub fn new() -> Self {
        RouterBuilder::new().build()
    }

    /// Create with custom configuration
    pub fn with_config(config: RouterConfig) -> Self {
        RouterBuilder::new().config(config).build()
    }

    /// Attach a store for background persistence
    pub fn with_store(mut self, store: Arc<RoutingStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use a shared spend tracker
    pub fn with_spend_tracker(mut self, spend: SpendTracker) -> Self {
        self.state.spend = spend;
        self
    }

    /// The configuration
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// The learned state
    pub fn state(&self) -> &RouterState {
        &self.state
    }

    /// The arm registry
    pub fn registry(&self) -> &ArmRegistry {
        &self.state.registry
    }

    /// The bandit policy
    pub fn bandit(&self) -> &BanditPolicy {
        &self.state.bandit
    }

    /// The preference learner
    pub fn preferences(&self) -> &PreferenceLearner {
        &self.state.preferences
    }

    /// The spend tracker
    pub fn spend(&self) -> &SpendTracker {
        &self.state.spend
    }

    /// Register an arm and create its learning state
    pub fn register(&self, arm: Arm) -> Result<Arc<Arm>> {
        let _lifecycle = self.state.lifecycle_exclusive();
        let arm = self.state.registry.register(arm)?;
        self.state.bandit.ensure_arm(&arm.id);
        Ok(arm)
    }

    /// Deregister an arm and drop everything learned about it
    pub fn deregister(&self, arm_id: &str) -> Result<Arc<Arm>> {
        let _lifecycle = self.state.lifecycle_exclusive();
        let arm = self.state.registry.deregister(arm_id)?;
        self.state.bandit.remove_arm(arm_id);
        self.state.preferences.forget(arm_id);
        Ok(arm)
    }

    /// Reset an arm's bandit state and preference estimates
    pub fn reset_arm(&self, arm_id: &str) -> Result<()> {
        let _lifecycle = self.state.lifecycle_exclusive();
        if !self.state.registry.contains(arm_id) {
            return Err(Error::UnknownArm(arm_id.to_string()));
        }
        self.state.bandit.reset(arm_id);
        self.state.preferences.forget(arm_id);
        info!(arm_id = %arm_id, "Reset arm state");
        Ok(())
    }

    /// Select an arm for a request
    ///
    /// Fails with `NoCandidates` when no arm matches the capability filter and
    /// `NoFeasibleCandidate` when none fits the budget. No learning state is
    /// touched on either path.
    pub fn select(&self, context: &RoutingContext) -> Result<RoutingDecision> {
        let budget = context
            .budget
            .as_ref()
            .unwrap_or(&self.config.default_budget);
        let tokens = context
            .estimated_tokens
            .unwrap_or(self.config.estimated_tokens);

        let candidates = self
            .state
            .registry
            .list_candidates(&context.capability_requirements, context.min_context);
        if candidates.is_empty() {
            return Err(Error::NoCandidates(format!(
                "capabilities {:?} with min_context {}",
                context.capability_requirements, context.min_context
            )));
        }

        let total = candidates.len();
        let feasible = self.apply_budget_filter(candidates, budget, tokens);
        if feasible.is_empty() {
            return Err(Error::NoFeasibleCandidate(format!(
                "none of {} candidates satisfies {}",
                total, budget
            )));
        }

        let decision = match self.config.pipeline {
            Pipeline::Bandit => self.bandit_decision(&feasible),
            Pipeline::Shortlist if self.config.top_k == 0 => self.bandit_decision(&feasible),
            Pipeline::Shortlist => self.shortlist_decision(&feasible, budget),
            Pipeline::Optimizer => self.optimizer_decision(&feasible, budget),
        }?;

        let decision = RoutingDecision {
            request_id: context.request_id.clone(),
            ..decision
        };

        debug!(
            request_id = %decision.request_id,
            arm_id = %decision.chosen_arm_id,
            strategy = %decision.decision_strategy,
            expected_cost = decision.expected_cost,
            expected_quality = decision.expected_quality,
            expected_latency = decision.expected_latency_seconds,
            alternatives = decision.alternatives_considered,
            exploration = decision.exploration,
            "Selected arm"
        );

        Ok(decision)
    }

    /// Report the outcome of a call to `arm_id`
    ///
    /// Fails only with `UnknownArm`. Malformed fields are clamped by the
    /// aggregator rather than rejected. A non-finite cost or latency still
    /// scores as the worst value in the reward, but is neither charged to the
    /// spend tracker nor fed to the preference learner.
    pub fn update(&self, arm_id: &str, observation: Observation) -> Result<()> {
        let lifecycle = self.state.lifecycle_shared();
        if !self.state.registry.contains(arm_id) {
            warn!(arm_id = %arm_id, "Outcome reported for unknown arm");
            return Err(Error::UnknownArm(arm_id.to_string()));
        }

        let cost_reported = observation.cost.is_finite();
        let latency_reported = observation.latency_seconds.is_finite();
        let observation = Observation {
            arm_id: arm_id.to_string(),
            ..observation
        };
        let outcome = self.aggregator.aggregate(observation);
        let observation = &outcome.observation;

        // The per-objective vector only reproduces the scalar for successful weighted-sum rewards
        let vector = (observation.success
            && self.aggregator.config().shaping == RewardShaping::WeightedSum)
            .then_some(outcome.vector);
        let reward = BanditReward {
            scalar: outcome.scalar,
            vector,
        };
        if !self.state.bandit.update(arm_id, &reward) {
            warn!(arm_id = %arm_id, "Registered arm has no bandit state, outcome skipped");
        }

        let preferences = &self.state.preferences;
        preferences.update(arm_id, METRIC_QUALITY, observation.quality_score);
        if cost_reported {
            preferences.update(arm_id, METRIC_COST, observation.cost);
        }
        if latency_reported {
            preferences.update(arm_id, METRIC_LATENCY, observation.latency_seconds);
        }
        preferences.update(
            arm_id,
            METRIC_SUCCESS_RATE,
            if observation.success { 1.0 } else { 0.0 },
        );
        preferences.update(arm_id, METRIC_REWARD, outcome.scalar);

        if cost_reported {
            self.state
                .spend
                .record_at(arm_id, observation.cost, observation.timestamp);
        } else {
            warn!(arm_id = %arm_id, "Cost not reported as a finite value, spend not recorded");
        }
        drop(lifecycle);

        debug!(
            arm_id = %arm_id,
            success = observation.success,
            reward = outcome.scalar,
            cost = observation.cost,
            "Recorded outcome"
        );

        if let Some(store) = &self.store {
            self.persist_in_background(store.clone(), arm_id);
        }

        Ok(())
    }

    /// Rank registered arms on one preference metric; read-only
    pub fn rank(&self, metric_name: &str) -> Ranking {
        self.state
            .preferences
            .rank(metric_name, &self.state.registry.ids())
    }

    /// Pick one arm per step of a chained call, with total declared cost at
    /// most `max_total_cost`
    ///
    /// Each step's context supplies its capability filter, token estimate and
    /// quality floor.
    pub fn plan_chain(
        &self,
        steps: &[RoutingContext],
        max_total_cost: Option<f64>,
    ) -> Result<ChainPlan> {
        let mut step_candidates = Vec::with_capacity(steps.len());
        for (index, context) in steps.iter().enumerate() {
            let tokens = context
                .estimated_tokens
                .unwrap_or(self.config.estimated_tokens);
            let min_quality = context
                .budget
                .as_ref()
                .unwrap_or(&self.config.default_budget)
                .min_quality_threshold;

            let candidates: Vec<OptimizerCandidate> = self
                .state
                .registry
                .list_candidates(&context.capability_requirements, context.min_context)
                .into_iter()
                .map(|arm| self.optimizer_candidate(&arm, arm.estimate_cost(tokens)))
                .filter(|c| c.expected_quality >= min_quality)
                .collect();

            if candidates.is_empty() {
                return Err(Error::NoCandidates(format!(
                    "chain step {} ({:?}) has no candidate",
                    index, context.capability_requirements
                )));
            }
            step_candidates.push(candidates);
        }

        self.optimizer.optimize_chain(&step_candidates, max_total_cost)
    }

    /// Copy of everything learned about one arm
    pub fn snapshot(&self, arm_id: &str) -> Option<ArmSnapshot> {
        if !self.state.registry.contains(arm_id) {
            return None;
        }
        Some(ArmSnapshot {
            arm_id: arm_id.to_string(),
            posterior: self.state.bandit.snapshot(arm_id),
            preferences: self.state.preferences.snapshot(arm_id),
            taken_at: Utc::now(),
        })
    }

    /// Snapshots of every registered arm, in registration order
    pub fn snapshots(&self) -> Vec<ArmSnapshot> {
        self.state
            .registry
            .ids()
            .iter()
            .filter_map(|id| self.snapshot(id))
            .collect()
    }

    /// Load saved state for registered arms from `store`
    ///
    /// Returns the number of arms restored. Snapshots of unregistered arms are ignored.
    pub async fn restore(&self, store: &RoutingStore) -> Result<usize> {
        let snapshots = store.load_all(&self.config.name).await?;

        let _lifecycle = self.state.lifecycle_shared();
        let mut restored = 0;
        for snapshot in snapshots {
            if !self.state.registry.contains(&snapshot.arm_id) {
                debug!(arm_id = %snapshot.arm_id, "Skipping snapshot for unregistered arm");
                continue;
            }
            if let Some(posterior) = snapshot.posterior {
                if !self.state.bandit.restore(&snapshot.arm_id, posterior) {
                    warn!(
                        arm_id = %snapshot.arm_id,
                        strategy = %self.state.bandit.kind(),
                        "Saved bandit state belongs to another strategy, starting fresh"
                    );
                }
            }
            self.state
                .preferences
                .restore(&snapshot.arm_id, snapshot.preferences);
            restored += 1;
        }

        info!(router = %self.config.name, restored, "Restored routing state");
        Ok(restored)
    }

    /// Save every registered arm's state to `store`
    pub async fn save(&self, store: &RoutingStore) -> Result<usize> {
        let snapshots = self.snapshots();
        store.save_all(&self.config.name, &snapshots).await?;
        Ok(snapshots.len())
    }

    /// Load state from the attached store, if any
    pub async fn load_state(&self) -> Result<usize> {
        match &self.store {
            Some(store) => self.restore(store).await,
            None => Ok(0),
        }
    }

    /// Save state to the attached store, if any
    pub async fn save_state(&self) -> Result<usize> {
        match &self.store {
            Some(store) => self.save(store).await,
            None => Ok(0),
        }
    }

    fn apply_budget_filter(
        &self,
        candidates: Vec<Arc<Arm>>,
        budget: &Budget,
        tokens: usize,
    ) -> Vec<Feasible> {
        let remaining_today = budget
            .max_daily_cost
            .map(|limit| self.state.spend.remaining_today(limit));

        candidates
            .into_iter()
            .filter_map(|arm| {
                let cost = arm.estimate_cost(tokens);
                if !budget.allows_cost(cost) || remaining_today.is_some_and(|r| cost > r) {
                    debug!(arm_id = %arm.id, cost, "Arm filtered by cost budget");
                    return None;
                }
                let quality = self.expected_quality(&arm);
                if !budget.allows_quality(quality) {
                    debug!(arm_id = %arm.id, quality, "Arm filtered by quality floor");
                    return None;
                }
                let latency = self.expected_latency(&arm);
                Some(Feasible {
                    arm,
                    cost,
                    quality,
                    latency,
                })
            })
            .collect()
    }

    /// Preference-learned quality when reliable, otherwise the declared prior
    /// blended with whatever has been observed so far
    fn expected_quality(&self, arm: &Arm) -> f64 {
        let preferences = &self.state.preferences;
        if let Some(quality) = preferences.reliable_value(&arm.id, METRIC_QUALITY) {
            return quality.clamp(0.0, 1.0);
        }

        let observed = match &self.state.bandit {
            BanditPolicy::Thompson(policy) => policy
                .posterior(&arm.id)
                .filter(|p| p.pulls > 0)
                .map(|p| (p.quality.mean(), p.pulls)),
            BanditPolicy::Ucb(_) => preferences
                .estimate(&arm.id, METRIC_QUALITY)
                .map(|e| (e.smoothed_value, e.sample_count)),
        };

        match observed {
            Some((mean, samples)) => {
                let prior_weight = preferences.config().min_samples_for_learning.max(1) as f64;
                let samples = samples as f64;
                ((arm.quality_prior * prior_weight + mean * samples) / (prior_weight + samples))
                    .clamp(0.0, 1.0)
            }
            None => arm.quality_prior,
        }
    }

    /// Preference-learned latency when reliable, otherwise the declared value
    fn expected_latency(&self, arm: &Arm) -> f64 {
        self.state
            .preferences
            .reliable_value(&arm.id, METRIC_LATENCY)
            .unwrap_or(arm.expected_latency_seconds)
    }

    fn optimizer_candidate(&self, arm: &Arm, cost: f64) -> OptimizerCandidate {
        let prior = self.state.bandit.expected_reward(&arm.id).unwrap_or(0.0);
        OptimizerCandidate::new(arm.id.clone(), cost, self.expected_quality(arm)).with_prior(prior)
    }

    fn rng(&self) -> StdRng {
        let draw = self.state.draws.fetch_add(1, Ordering::Relaxed);
        match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(draw)),
            None => StdRng::from_entropy(),
        }
    }

    fn rank_feasible(&self, feasible: &[Feasible]) -> Vec<BanditScore> {
        let arms: Vec<Arc<Arm>> = feasible.iter().map(|f| f.arm.clone()).collect();
        self.state.bandit.rank(&arms, &mut self.rng())
    }

    fn bandit_decision(&self, feasible: &[Feasible]) -> Result<RoutingDecision> {
        let top = self
            .rank_feasible(feasible)
            .into_iter()
            .next()
            .ok_or_else(|| Error::NoCandidates("bandit ranked no candidates".to_string()))?;
        let chosen = find(feasible, &top.arm_id)?;

        Ok(self.decision(
            chosen,
            self.state.bandit.decision_strategy(),
            feasible.len(),
            top.exploration,
            Vec::new(),
        ))
    }

    fn shortlist_decision(&self, feasible: &[Feasible], budget: &Budget) -> Result<RoutingDecision> {
        let shortlist: Vec<BanditScore> = self
            .rank_feasible(feasible)
            .into_iter()
            .take(self.config.top_k)
            .collect();

        let mut candidates = Vec::with_capacity(shortlist.len());
        for score in &shortlist {
            let entry = find(feasible, &score.arm_id)?;
            candidates.push(
                OptimizerCandidate::new(score.arm_id.clone(), entry.cost, entry.quality)
                    .with_prior(score.score),
            );
        }

        let choice = self.optimize(&candidates, budget)?;
        let chosen = find(feasible, &choice.candidate.arm_id)?;
        let exploration = shortlist
            .iter()
            .find(|s| s.arm_id == chosen.arm.id)
            .is_some_and(|s| s.exploration);

        Ok(self.decision(
            chosen,
            choice.strategy,
            feasible.len(),
            exploration,
            shortlist.into_iter().map(|s| s.arm_id).collect(),
        ))
    }

    fn optimizer_decision(&self, feasible: &[Feasible], budget: &Budget) -> Result<RoutingDecision> {
        let candidates: Vec<OptimizerCandidate> = feasible
            .iter()
            .map(|f| {
                let prior = self.state.bandit.expected_reward(&f.arm.id).unwrap_or(0.0);
                OptimizerCandidate::new(f.arm.id.clone(), f.cost, f.quality).with_prior(prior)
            })
            .collect();

        let choice = self.optimize(&candidates, budget)?;
        let chosen = find(feasible, &choice.candidate.arm_id)?;
        let pulls = self.state.bandit.pulls(&chosen.arm.id).unwrap_or(0);

        Ok(self.decision(
            chosen,
            choice.strategy,
            feasible.len(),
            pulls < self.config.bandit.min_samples_for_confidence,
            Vec::new(),
        ))
    }

    fn optimize(&self, candidates: &[OptimizerCandidate], budget: &Budget) -> Result<OptimizerChoice> {
        self.optimizer
            .optimize(candidates, &self.config.optimizer_weights, budget)
    }

    fn decision(
        &self,
        chosen: &Feasible,
        strategy: DecisionStrategy,
        alternatives_considered: usize,
        exploration: bool,
        shortlist: Vec<String>,
    ) -> RoutingDecision {
        RoutingDecision {
            chosen_arm_id: chosen.arm.id.clone(),
            expected_cost: chosen.cost,
            expected_quality: chosen.quality,
            expected_latency_seconds: chosen.latency,
            decision_strategy: strategy,
            alternatives_considered,
            timestamp: Utc::now(),
            request_id: String::new(),
            exploration,
            shortlist,
        }
    }

    fn persist_in_background(&self, store: Arc<RoutingStore>, arm_id: &str) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!(arm_id = %arm_id, "No async runtime, skipping snapshot save");
            return;
        };
        let Some(snapshot) = self.snapshot(arm_id) else {
            return;
        };

        let router_name = self.config.name.clone();
        handle.spawn(async move {
            if let Err(e) = store.save_snapshot(&router_name, &snapshot).await {
                warn!(
                    router = %router_name,
                    arm_id = %snapshot.arm_id,
                    error = %e,
                    "Failed to persist arm snapshot"
                );
            }
        });
    }
}

fn find<'a>(feasible: &'a [Feasible], arm_id: &str) -> Result<&'a Feasible> {
    feasible
        .iter()
        .find(|f| f.arm.id == arm_id)
        .ok_or_else(|| Error::Other(format!("picked arm '{}' is not a candidate", arm_id)))
}

/// Builder for Router
pub struct RouterBuilder {
    config: RouterConfig,
    registry: Option<ArmRegistry>,
    store: Option<Arc<RoutingStore>>,
    spend: Option<SpendTracker>,
}

impl Default for RouterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self {
            config: RouterConfig::default(),
            registry: None,
            store: None,
            spend: None,
        }
    }

    /// Set configuration
    pub fn config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the router name used for persistence
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Set the bandit strategy
    pub fn strategy(mut self, strategy: BanditStrategyKind) -> Self {
        self.config.bandit.strategy = strategy;
        self
    }

    /// Set the selection pipeline
    pub fn pipeline(mut self, pipeline: Pipeline) -> Self {
        self.config.pipeline = pipeline;
        self
    }

    /// Set the selection seed
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    /// Set the default budget
    pub fn budget(mut self, budget: Budget) -> Self {
        self.config.default_budget = budget;
        self
    }

    /// Start from an existing registry
    pub fn registry(mut self, registry: ArmRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set routing store
    pub fn store(mut self, store: Arc<RoutingStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set spend tracker
    pub fn spend_tracker(mut self, spend: SpendTracker) -> Self {
        self.spend = Some(spend);
        self
    }

    /// Build the router
    pub fn build(self) -> Router {
        let aggregator = OutcomeAggregator::new(self.config.aggregator.clone());

        // Thompson combines its objectives with the same weights as the reward
        let mut bandit_config = self.config.bandit.clone();
        bandit_config.weights = *aggregator.weights();
        let bandit = BanditPolicy::from_config(&bandit_config);

        let registry = self.registry.unwrap_or_default();
        for id in registry.ids() {
            bandit.ensure_arm(&id);
        }

        info!(
            router = %self.config.name,
            strategy = %bandit.kind(),
            pipeline = %self.config.pipeline,
            arms = registry.len(),
            "Router initialized"
        );

        Router {
            optimizer: CostQualityOptimizer::new(self.config.optimizer.clone()),
            state: RouterState {
                registry,
                bandit,
                preferences: PreferenceLearner::new(self.config.preference.clone()),
                spend: self.spend.unwrap_or_default(),
                draws: AtomicU64::new(0),
                lifecycle: RwLock::new(()),
            },
            aggregator,
            store: self.store,
            config: self.config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::types::{OptimizerAlgorithm, OptimizerObjective};

    fn router_with(config: RouterConfig, arms: Vec<Arm>) -> Router {
        let router = Router::with_config(config);
        for arm in arms {
            router.register(arm).unwrap();
        }
        router
    }

    fn success(arm_id: &str, quality: f64) -> Observation {
        Observation::new(arm_id, true)
            .with_quality(quality)
            .with_cost(0.001)
            .with_latency(0.5)
    }

    #[test]
    fn test_select_basic() {
        let router = router_with(
            RouterConfig {
                seed: Some(1),
                ..Default::default()
            },
            vec![Arm::new("model-a"), Arm::new("model-b")],
        );

        let context = RoutingContext::new().with_request_id("req-1");
        let decision = router.select(&context).unwrap();

        assert!(["model-a", "model-b"].contains(&decision.chosen_arm_id.as_str()));
        assert_eq!(decision.request_id, "req-1");
        assert_eq!(decision.decision_strategy, DecisionStrategy::Thompson);
        assert_eq!(decision.alternatives_considered, 2);
        assert!(decision.exploration);
    }

    #[test]
    fn test_select_no_candidates() {
        let router = router_with(RouterConfig::default(), vec![Arm::new("model-a")]);

        let context = RoutingContext::new().with_capabilities(["vision"]);
        let err = router.select(&context).unwrap_err();
        assert!(matches!(err, Error::NoCandidates(_)));

        let empty = Router::new();
        assert!(matches!(
            empty.select(&RoutingContext::new()),
            Err(Error::NoCandidates(_))
        ));
    }

    #[test]
    fn test_budget_constrained_selection() {
        let config = RouterConfig {
            pipeline: Pipeline::Optimizer,
            optimizer: OptimizerConfig {
                objective: OptimizerObjective::MaximizeQuality,
                algorithm: OptimizerAlgorithm::Constraint,
                ..Default::default()
            },
            ..Default::default()
        };
        let router = router_with(
            config,
            vec![
                Arm::new("arm-a").with_flat_cost(0.02).with_quality_prior(0.9),
                Arm::new("arm-b").with_flat_cost(0.005).with_quality_prior(0.6),
            ],
        );

        let budget = Budget::unbounded().with_max_cost_per_request(0.01);
        let decision = router
            .select(&RoutingContext::new().with_budget(budget))
            .unwrap();
        assert_eq!(decision.chosen_arm_id, "arm-b");
        assert_eq!(decision.decision_strategy, DecisionStrategy::Constraint);
        assert!(decision.expected_cost <= 0.01);

        let tight = Budget::unbounded().with_max_cost_per_request(0.001);
        let err = router
            .select(&RoutingContext::new().with_budget(tight))
            .unwrap_err();
        assert!(matches!(err, Error::NoFeasibleCandidate(_)));
        assert_eq!(router.bandit().pulls("arm-a"), Some(0));
        assert_eq!(router.bandit().pulls("arm-b"), Some(0));
    }

    #[test]
    fn test_quality_floor_filters_arms() {
        let router = router_with(
            RouterConfig::default(),
            vec![
                Arm::new("weak").with_quality_prior(0.3),
                Arm::new("strong").with_quality_prior(0.8),
            ],
        );

        let budget = Budget::unbounded().with_min_quality(0.5);
        for _ in 0..10 {
            let decision = router
                .select(&RoutingContext::new().with_budget(budget.clone()))
                .unwrap();
            assert_eq!(decision.chosen_arm_id, "strong");
            assert_eq!(decision.alternatives_considered, 1);
        }
    }

    #[test]
    fn test_daily_budget_exhaustion() {
        let router = router_with(
            RouterConfig {
                default_budget: Budget::unbounded().with_max_daily_cost(0.05),
                ..Default::default()
            },
            vec![Arm::new("model-a").with_flat_cost(0.02)],
        );

        assert!(router.select(&RoutingContext::new()).is_ok());
        router
            .update("model-a", Observation::new("model-a", true).with_cost(0.04))
            .unwrap();

        let err = router.select(&RoutingContext::new()).unwrap_err();
        assert!(matches!(err, Error::NoFeasibleCandidate(_)));
    }

    #[test]
    fn test_non_finite_cost_is_not_charged() {
        let router = router_with(
            RouterConfig {
                default_budget: Budget::unbounded().with_max_daily_cost(100.0),
                ..Default::default()
            },
            vec![Arm::new("model-a").with_flat_cost(0.001)],
        );

        for cost in [f64::NAN, f64::INFINITY] {
            router
                .update(
                    "model-a",
                    Observation::new("model-a", true)
                        .with_cost(cost)
                        .with_latency(f64::NAN),
                )
                .unwrap();
        }

        assert_eq!(router.spend().today_total(), 0.0);
        assert!(router.select(&RoutingContext::new()).is_ok());
        assert_eq!(router.bandit().pulls("model-a"), Some(2));

        let learned = router.preferences().snapshot("model-a");
        assert!(!learned.contains_key(METRIC_COST));
        assert!(!learned.contains_key(METRIC_LATENCY));
        assert_eq!(learned[METRIC_REWARD].sample_count, 2);

        // Finite costs are still charged
        router
            .update("model-a", success("model-a", 0.9).with_cost(0.25))
            .unwrap();
        assert!((router.spend().today_total() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_update_unknown_arm_leaves_state_intact() {
        let router = router_with(
            RouterConfig {
                seed: Some(3),
                ..Default::default()
            },
            vec![Arm::new("model-a")],
        );
        router.update("model-a", success("model-a", 0.9)).unwrap();

        let err = router
            .update("ghost-arm", success("ghost-arm", 1.0))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownArm(ref id) if id == "ghost-arm"));

        assert_eq!(router.bandit().pulls("model-a"), Some(1));
        assert!(router.snapshot("ghost-arm").is_none());
        assert_eq!(
            router.select(&RoutingContext::new()).unwrap().chosen_arm_id,
            "model-a"
        );
    }

    #[test]
    fn test_ucb1_initial_exploration_in_registration_order() {
        let router = router_with(
            RouterConfig {
                bandit: BanditConfig {
                    strategy: BanditStrategyKind::Ucb1,
                    ..Default::default()
                },
                ..Default::default()
            },
            vec![Arm::new("zeta"), Arm::new("alpha"), Arm::new("mid")],
        );

        let mut picked = Vec::new();
        for _ in 0..3 {
            let decision = router.select(&RoutingContext::new()).unwrap();
            assert_eq!(decision.decision_strategy, DecisionStrategy::Ucb);
            router
                .update(&decision.chosen_arm_id, success(&decision.chosen_arm_id, 0.5))
                .unwrap();
            picked.push(decision.chosen_arm_id);
        }

        assert_eq!(picked, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_shortlist_pipeline() {
        let router = router_with(
            RouterConfig {
                pipeline: Pipeline::Shortlist,
                top_k: 2,
                seed: Some(11),
                ..Default::default()
            },
            vec![
                Arm::new("a").with_flat_cost(0.01),
                Arm::new("b").with_flat_cost(0.02),
                Arm::new("c").with_flat_cost(0.03),
            ],
        );

        let decision = router.select(&RoutingContext::new()).unwrap();
        assert_eq!(decision.shortlist.len(), 2);
        assert!(decision.shortlist.contains(&decision.chosen_arm_id));
        assert_eq!(decision.decision_strategy, DecisionStrategy::WeightedSum);
        assert_eq!(decision.alternatives_considered, 3);
    }

    #[test]
    fn test_seeded_selection_is_reproducible() {
        let build = || {
            let router = router_with(
                RouterConfig {
                    seed: Some(42),
                    ..Default::default()
                },
                vec![Arm::new("a"), Arm::new("b"), Arm::new("c")],
            );
            router.update("a", success("a", 0.7)).unwrap();
            router.update("b", success("b", 0.6)).unwrap();
            router
        };

        let first = build();
        let second = build();
        for _ in 0..20 {
            let x = first.select(&RoutingContext::new()).unwrap();
            let y = second.select(&RoutingContext::new()).unwrap();
            assert_eq!(x.chosen_arm_id, y.chosen_arm_id);
        }
    }

    #[test]
    fn test_register_deregister_register_starts_fresh() {
        let router = Router::new();
        router.register(Arm::new("model-a")).unwrap();
        router.update("model-a", success("model-a", 0.9)).unwrap();
        assert!(matches!(
            router.register(Arm::new("model-a")),
            Err(Error::DuplicateArm(_))
        ));

        router.deregister("model-a").unwrap();
        assert!(matches!(
            router.update("model-a", success("model-a", 0.9)),
            Err(Error::UnknownArm(_))
        ));

        router.register(Arm::new("model-a")).unwrap();
        assert_eq!(router.bandit().pulls("model-a"), Some(0));
        assert!(router.preferences().snapshot("model-a").is_empty());
        assert_eq!(router.registry().len(), 1);
    }

    #[test]
    fn test_concurrent_register_and_deregister_keep_state_consistent() {
        let router = Router::with_config(RouterConfig {
            bandit: BanditConfig {
                strategy: BanditStrategyKind::Ucb1,
                ..Default::default()
            },
            ..Default::default()
        });
        router.register(Arm::new("model-a")).unwrap();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for _ in 0..500 {
                    let _ = router.deregister("model-a");
                }
            });
            scope.spawn(|| {
                for _ in 0..500 {
                    let _ = router.register(Arm::new("model-a"));
                }
            });
            scope.spawn(|| {
                for _ in 0..500 {
                    let _ = router.update("model-a", success("model-a", 0.7));
                }
            });
        });

        // Learning state exists exactly when the arm is registered
        let registered = router.registry().contains("model-a");
        assert_eq!(router.bandit().pulls("model-a").is_some(), registered);
        if !registered {
            assert!(router.preferences().snapshot("model-a").is_empty());
            router.register(Arm::new("model-a")).unwrap();
        }

        router.update("model-a", success("model-a", 0.7)).unwrap();
        router.deregister("model-a").unwrap();
        assert_eq!(router.bandit().pulls("model-a"), None);
        assert!(router.preferences().snapshot("model-a").is_empty());
    }

    #[test]
    fn test_reset_arm() {
        let router = router_with(RouterConfig::default(), vec![Arm::new("model-a")]);
        router.update("model-a", success("model-a", 0.9)).unwrap();

        router.reset_arm("model-a").unwrap();
        assert_eq!(router.bandit().pulls("model-a"), Some(0));
        assert!(matches!(router.reset_arm("nope"), Err(Error::UnknownArm(_))));
    }

    #[test]
    fn test_rank_by_metric() {
        let router = router_with(
            RouterConfig {
                preference: PreferenceConfig {
                    min_samples_for_learning: 3,
                    ..Default::default()
                },
                ..Default::default()
            },
            vec![Arm::new("low"), Arm::new("high"), Arm::new("new")],
        );
        for _ in 0..5 {
            router.update("low", success("low", 0.4)).unwrap();
            router.update("high", success("high", 0.9)).unwrap();
        }

        let ranking = router.rank(METRIC_QUALITY);
        let ids: Vec<&str> = ranking.entries.iter().map(|e| e.arm_id.as_str()).collect();
        assert_eq!(ids, vec!["high", "low", "new"]);
        assert!(ranking.low_confidence);
    }

    #[test]
    fn test_expected_quality_uses_learned_value() {
        let router = router_with(
            RouterConfig {
                preference: PreferenceConfig {
                    min_samples_for_learning: 2,
                    ..Default::default()
                },
                ..Default::default()
            },
            vec![Arm::new("model-a").with_quality_prior(0.2)],
        );
        for _ in 0..4 {
            router.update("model-a", success("model-a", 0.8)).unwrap();
        }

        let decision = router.select(&RoutingContext::new()).unwrap();
        assert!((decision.expected_quality - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_expected_latency_prefers_learned_value() {
        let router = router_with(
            RouterConfig {
                preference: PreferenceConfig {
                    min_samples_for_learning: 2,
                    ..Default::default()
                },
                ..Default::default()
            },
            vec![Arm::new("model-a").with_expected_latency(0.8)],
        );

        let decision = router.select(&RoutingContext::new()).unwrap();
        assert_eq!(decision.expected_latency_seconds, 0.8);

        for _ in 0..3 {
            router
                .update("model-a", success("model-a", 0.8).with_latency(3.0))
                .unwrap();
        }
        let decision = router.select(&RoutingContext::new()).unwrap();
        assert!((decision.expected_latency_seconds - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_plan_chain() {
        let router = router_with(
            RouterConfig::default(),
            vec![
                Arm::new("draft-small").with_tags(["draft"]).with_flat_cost(0.001).with_quality_prior(0.5),
                Arm::new("draft-large").with_tags(["draft"]).with_flat_cost(0.03).with_quality_prior(0.9),
                Arm::new("review-small").with_tags(["review"]).with_flat_cost(0.002).with_quality_prior(0.6),
                Arm::new("review-large").with_tags(["review"]).with_flat_cost(0.04).with_quality_prior(0.8),
            ],
        );

        let steps = vec![
            RoutingContext::new().with_capabilities(["draft"]),
            RoutingContext::new().with_capabilities(["review"]),
        ];
        let plan = router.plan_chain(&steps, Some(0.035)).unwrap();
        assert_eq!(plan.arm_ids, vec!["draft-large", "review-small"]);

        let missing = vec![RoutingContext::new().with_capabilities(["audio"])];
        assert!(matches!(
            router.plan_chain(&missing, None),
            Err(Error::NoCandidates(_))
        ));
    }

    #[test]
    fn test_concurrent_updates() {
        let router = router_with(
            RouterConfig {
                bandit: BanditConfig {
                    strategy: BanditStrategyKind::Ucb1,
                    ..Default::default()
                },
                ..Default::default()
            },
            (0..4).map(|i| Arm::new(format!("arm-{i}"))).collect(),
        );

        std::thread::scope(|scope| {
            for t in 0..8 {
                let router = &router;
                scope.spawn(move || {
                    let arm_id = format!("arm-{}", t % 4);
                    for _ in 0..250 {
                        router.update(&arm_id, success(&arm_id, 0.5)).unwrap();
                        router.select(&RoutingContext::new()).unwrap();
                    }
                });
            }
        });

        for i in 0..4 {
            assert_eq!(router.bandit().pulls(&format!("arm-{i}")), Some(500));
        }
    }

    #[tokio::test]
    async fn test_background_persistence_and_restore() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            RoutingStore::connect(&dir.path().join("routing.db"))
                .await
                .unwrap(),
        );
        store.init().await.unwrap();

        let router = router_with(RouterConfig::default(), vec![Arm::new("model-a")])
            .with_store(store.clone());
        router.update("model-a", success("model-a", 0.9)).unwrap();

        let mut saved = Vec::new();
        for _ in 0..100 {
            saved = store.load_all("default").await.unwrap();
            if !saved.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].pulls(), 1);

        let fresh = router_with(RouterConfig::default(), vec![Arm::new("model-a")]);
        assert_eq!(fresh.restore(&store).await.unwrap(), 1);
        assert_eq!(fresh.bandit().pulls("model-a"), Some(1));
        assert_eq!(
            fresh
                .preferences()
                .estimate("model-a", METRIC_QUALITY)
                .map(|e| e.sample_count),
            Some(1)
        );
    }

    #[tokio::test]
    async fn test_save_and_load_state_without_store() {
        let router = Router::new();
        assert_eq!(router.save_state().await.unwrap(), 0);
        assert_eq!(router.load_state().await.unwrap(), 0);
    }
}
