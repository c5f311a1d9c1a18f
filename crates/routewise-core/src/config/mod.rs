//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::routing::{
    AggregatorConfig, BanditConfig, BanditStrategyKind, Budget, OptimizerAlgorithm,
    OptimizerConfig, OptimizerObjective, OptimizerWeights, Pipeline, PreferenceAlgorithm,
    PreferenceConfig, RewardShaping, RewardWeights, RouterConfig,
};

/// Every key accepted by [`Config::get`] and [`Config::set`]
pub const CONFIG_KEYS: &[&str] = &[
    "routing.name",
    "routing.bandit_strategy",
    "routing.exploration_factor",
    "routing.min_samples_for_confidence",
    "routing.discount_factor",
    "routing.pipeline",
    "routing.top_k",
    "routing.estimated_tokens",
    "routing.seed",
    "optimizer.objective",
    "optimizer.algorithm",
    "optimizer.quality_weight",
    "optimizer.cost_weight",
    "optimizer.heuristic_threshold",
    "reward.quality",
    "reward.cost_efficiency",
    "reward.latency",
    "reward.success",
    "reward.shaping",
    "reward.reference_cost",
    "reward.reference_latency_seconds",
    "reward.failure_reward",
    "preference.algorithm",
    "preference.smoothing_alpha",
    "preference.moving_average_window",
    "preference.regression_window",
    "preference.min_samples_for_learning",
    "budget.max_cost_per_request",
    "budget.max_daily_cost",
    "budget.min_quality_threshold",
];

/// Routewise configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub routing: RoutingSection,
    pub optimizer: OptimizerSection,
    pub reward: RewardSection,
    pub preference: PreferenceSection,
    pub budget: BudgetSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingSection {
    pub name: String,
    pub bandit_strategy: BanditStrategyKind,
    pub exploration_factor: f64,
    pub min_samples_for_confidence: u64,
    pub discount_factor: f64,
    pub pipeline: Pipeline,
    pub top_k: usize,
    pub estimated_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerSection {
    pub objective: OptimizerObjective,
    pub algorithm: OptimizerAlgorithm,
    pub quality_weight: f64,
    pub cost_weight: f64,
    pub heuristic_threshold: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardSection {
    pub quality: f64,
    pub cost_efficiency: f64,
    pub latency: f64,
    pub success: f64,
    pub shaping: RewardShaping,
    pub reference_cost: f64,
    pub reference_latency_seconds: f64,
    pub failure_reward: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreferenceSection {
    pub algorithm: PreferenceAlgorithm,
    pub smoothing_alpha: f64,
    pub moving_average_window: usize,
    pub regression_window: usize,
    pub min_samples_for_learning: u64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_cost_per_request: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_daily_cost: Option<f64>,
    pub min_quality_threshold: f64,
}

impl Default for RoutingSection {
    fn default() -> Self {
        let bandit = BanditConfig::default();
        let router = RouterConfig::default();
        Self {
            name: router.name,
            bandit_strategy: bandit.strategy,
            exploration_factor: bandit.exploration_factor,
            min_samples_for_confidence: bandit.min_samples_for_confidence,
            discount_factor: bandit.discount_factor,
            pipeline: router.pipeline,
            top_k: router.top_k,
            estimated_tokens: router.estimated_tokens,
            seed: None,
        }
    }
}

impl Default for OptimizerSection {
    fn default() -> Self {
        let optimizer = OptimizerConfig::default();
        let weights = OptimizerWeights::default();
        Self {
            objective: optimizer.objective,
            algorithm: optimizer.algorithm,
            quality_weight: weights.quality,
            cost_weight: weights.cost,
            heuristic_threshold: optimizer.heuristic_threshold,
        }
    }
}

impl Default for RewardSection {
    fn default() -> Self {
        let aggregator = AggregatorConfig::default();
        Self {
            quality: aggregator.weights.quality,
            cost_efficiency: aggregator.weights.cost_efficiency,
            latency: aggregator.weights.latency,
            success: aggregator.weights.success,
            shaping: aggregator.shaping,
            reference_cost: aggregator.reference_cost,
            reference_latency_seconds: aggregator.reference_latency_seconds,
            failure_reward: aggregator.failure_reward,
        }
    }
}

impl Default for PreferenceSection {
    fn default() -> Self {
        let preference = PreferenceConfig::default();
        Self {
            algorithm: preference.algorithm,
            smoothing_alpha: preference.smoothing_alpha,
            moving_average_window: preference.moving_average_window,
            regression_window: preference.regression_window,
            min_samples_for_learning: preference.min_samples_for_learning,
        }
    }
}

impl RewardSection {
    /// The configured weights as engine weights
    pub fn weights(&self) -> RewardWeights {
        RewardWeights::new(self.quality, self.cost_efficiency, self.latency, self.success)
    }
}

impl BudgetSection {
    /// The configured budget as an engine budget
    pub fn budget(&self) -> Budget {
        Budget {
            max_cost_per_request: self.max_cost_per_request,
            max_daily_cost: self.max_daily_cost,
            min_quality_threshold: self.min_quality_threshold,
        }
    }
}

fn parse<T>(key: &str, value: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| anyhow!("Invalid {} value '{}': {}", key, value, e))
}

fn parse_optional<T>(key: &str, value: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match value.trim() {
        "" | "none" | "unset" => Ok(None),
        other => parse(key, other).map(Some),
    }
}

fn show_optional<T: Display>(value: &Option<T>) -> String {
    value
        .as_ref()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "none".to_string())
}

fn ensure(condition: bool, message: impl FnOnce() -> String) -> anyhow::Result<()> {
    if condition {
        Ok(())
    } else {
        Err(anyhow!(message()))
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("ROUTEWISE_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("routewise")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from the default location, or defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from `path`, or defaults if it doesn't exist
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to `path`
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let routing = &self.routing;
        ensure(!routing.name.trim().is_empty(), || {
            "routing.name must not be empty".to_string()
        })?;
        ensure(
            routing.exploration_factor.is_finite() && routing.exploration_factor > 0.0,
            || format!("routing.exploration_factor must be positive, got {}", routing.exploration_factor),
        )?;
        ensure(
            routing.discount_factor > 0.0 && routing.discount_factor <= 1.0,
            || format!("routing.discount_factor must be in (0, 1], got {}", routing.discount_factor),
        )?;

        let optimizer = &self.optimizer;
        for (key, weight) in [
            ("optimizer.quality_weight", optimizer.quality_weight),
            ("optimizer.cost_weight", optimizer.cost_weight),
        ] {
            ensure(weight.is_finite() && weight >= 0.0, || {
                format!("{} must be non-negative, got {}", key, weight)
            })?;
        }

        let reward = &self.reward;
        reward
            .weights()
            .validate()
            .map_err(|e| anyhow!("Invalid reward weights: {}", e))?;
        for (key, value) in [
            ("reward.reference_cost", reward.reference_cost),
            ("reward.reference_latency_seconds", reward.reference_latency_seconds),
        ] {
            ensure(value.is_finite() && value > 0.0, || {
                format!("{} must be positive, got {}", key, value)
            })?;
        }
        ensure((0.0..=1.0).contains(&reward.failure_reward), || {
            format!("reward.failure_reward must be in [0, 1], got {}", reward.failure_reward)
        })?;

        let preference = &self.preference;
        ensure(
            preference.smoothing_alpha > 0.0 && preference.smoothing_alpha <= 1.0,
            || format!("preference.smoothing_alpha must be in (0, 1], got {}", preference.smoothing_alpha),
        )?;
        ensure(preference.moving_average_window > 0, || {
            "preference.moving_average_window must be positive".to_string()
        })?;
        ensure((500..=1000).contains(&preference.regression_window), || {
            format!(
                "preference.regression_window must be between 500 and 1000, got {}",
                preference.regression_window
            )
        })?;

        let budget = &self.budget;
        for (key, value) in [
            ("budget.max_cost_per_request", budget.max_cost_per_request),
            ("budget.max_daily_cost", budget.max_daily_cost),
        ] {
            if let Some(value) = value {
                ensure(value.is_finite() && value >= 0.0, || {
                    format!("{} must be non-negative, got {}", key, value)
                })?;
            }
        }
        ensure((0.0..=1.0).contains(&budget.min_quality_threshold), || {
            format!(
                "budget.min_quality_threshold must be in [0, 1], got {}",
                budget.min_quality_threshold
            )
        })?;

        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        let value = match key {
            "routing.name" => self.routing.name.clone(),
            "routing.bandit_strategy" => self.routing.bandit_strategy.to_string(),
            "routing.exploration_factor" => self.routing.exploration_factor.to_string(),
            "routing.min_samples_for_confidence" => {
                self.routing.min_samples_for_confidence.to_string()
            }
            "routing.discount_factor" => self.routing.discount_factor.to_string(),
            "routing.pipeline" => self.routing.pipeline.to_string(),
            "routing.top_k" => self.routing.top_k.to_string(),
            "routing.estimated_tokens" => self.routing.estimated_tokens.to_string(),
            "routing.seed" => show_optional(&self.routing.seed),

            "optimizer.objective" => self.optimizer.objective.to_string(),
            "optimizer.algorithm" => self.optimizer.algorithm.to_string(),
            "optimizer.quality_weight" => self.optimizer.quality_weight.to_string(),
            "optimizer.cost_weight" => self.optimizer.cost_weight.to_string(),
            "optimizer.heuristic_threshold" => self.optimizer.heuristic_threshold.to_string(),

            "reward.quality" => self.reward.quality.to_string(),
            "reward.cost_efficiency" => self.reward.cost_efficiency.to_string(),
            "reward.latency" => self.reward.latency.to_string(),
            "reward.success" => self.reward.success.to_string(),
            "reward.shaping" => self.reward.shaping.to_string(),
            "reward.reference_cost" => self.reward.reference_cost.to_string(),
            "reward.reference_latency_seconds" => {
                self.reward.reference_latency_seconds.to_string()
            }
            "reward.failure_reward" => self.reward.failure_reward.to_string(),

            "preference.algorithm" => self.preference.algorithm.to_string(),
            "preference.smoothing_alpha" => self.preference.smoothing_alpha.to_string(),
            "preference.moving_average_window" => {
                self.preference.moving_average_window.to_string()
            }
            "preference.regression_window" => self.preference.regression_window.to_string(),
            "preference.min_samples_for_learning" => {
                self.preference.min_samples_for_learning.to_string()
            }

            "budget.max_cost_per_request" => show_optional(&self.budget.max_cost_per_request),
            "budget.max_daily_cost" => show_optional(&self.budget.max_daily_cost),
            "budget.min_quality_threshold" => self.budget.min_quality_threshold.to_string(),

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `routewise config show` to see available keys.",
                    key
                ));
            }
        };
        Ok(value)
    }

    /// Set a configuration value by key
    ///
    /// The change is validated together with the rest of the configuration;
    /// on error the configuration is left unchanged.
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut next = self.clone();
        match key {
            "routing.name" => next.routing.name = value.trim().to_string(),
            "routing.bandit_strategy" => next.routing.bandit_strategy = parse(key, value)?,
            "routing.exploration_factor" => next.routing.exploration_factor = parse(key, value)?,
            "routing.min_samples_for_confidence" => {
                next.routing.min_samples_for_confidence = parse(key, value)?
            }
            "routing.discount_factor" => next.routing.discount_factor = parse(key, value)?,
            "routing.pipeline" => next.routing.pipeline = parse(key, value)?,
            "routing.top_k" => next.routing.top_k = parse(key, value)?,
            "routing.estimated_tokens" => next.routing.estimated_tokens = parse(key, value)?,
            "routing.seed" => next.routing.seed = parse_optional(key, value)?,

            "optimizer.objective" => next.optimizer.objective = parse(key, value)?,
            "optimizer.algorithm" => next.optimizer.algorithm = parse(key, value)?,
            "optimizer.quality_weight" => next.optimizer.quality_weight = parse(key, value)?,
            "optimizer.cost_weight" => next.optimizer.cost_weight = parse(key, value)?,
            "optimizer.heuristic_threshold" => {
                next.optimizer.heuristic_threshold = parse(key, value)?
            }

            "reward.quality" => next.reward.quality = parse(key, value)?,
            "reward.cost_efficiency" => next.reward.cost_efficiency = parse(key, value)?,
            "reward.latency" => next.reward.latency = parse(key, value)?,
            "reward.success" => next.reward.success = parse(key, value)?,
            "reward.shaping" => next.reward.shaping = parse(key, value)?,
            "reward.reference_cost" => next.reward.reference_cost = parse(key, value)?,
            "reward.reference_latency_seconds" => {
                next.reward.reference_latency_seconds = parse(key, value)?
            }
            "reward.failure_reward" => next.reward.failure_reward = parse(key, value)?,

            "preference.algorithm" => next.preference.algorithm = parse(key, value)?,
            "preference.smoothing_alpha" => next.preference.smoothing_alpha = parse(key, value)?,
            "preference.moving_average_window" => {
                next.preference.moving_average_window = parse(key, value)?
            }
            "preference.regression_window" => {
                next.preference.regression_window = parse(key, value)?
            }
            "preference.min_samples_for_learning" => {
                next.preference.min_samples_for_learning = parse(key, value)?
            }

            "budget.max_cost_per_request" => {
                next.budget.max_cost_per_request = parse_optional(key, value)?
            }
            "budget.max_daily_cost" => next.budget.max_daily_cost = parse_optional(key, value)?,
            "budget.min_quality_threshold" => {
                next.budget.min_quality_threshold = parse(key, value)?
            }

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `routewise config show` to see available keys.",
                    key
                ));
            }
        }

        next.validate()?;
        *self = next;
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        CONFIG_KEYS
            .iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}

impl From<&Config> for RouterConfig {
    fn from(config: &Config) -> Self {
        let weights = config.reward.weights();
        let defaults = RouterConfig::default();

        Self {
            name: config.routing.name.clone(),
            bandit: BanditConfig {
                strategy: config.routing.bandit_strategy,
                exploration_factor: config.routing.exploration_factor,
                min_samples_for_confidence: config.routing.min_samples_for_confidence,
                discount_factor: config.routing.discount_factor,
                weights,
            },
            aggregator: AggregatorConfig {
                weights,
                reference_cost: config.reward.reference_cost,
                reference_latency_seconds: config.reward.reference_latency_seconds,
                shaping: config.reward.shaping,
                failure_reward: config.reward.failure_reward,
            },
            preference: PreferenceConfig {
                algorithm: config.preference.algorithm,
                smoothing_alpha: config.preference.smoothing_alpha,
                moving_average_window: config.preference.moving_average_window,
                regression_window: config.preference.regression_window,
                min_samples_for_learning: config.preference.min_samples_for_learning,
            },
            optimizer: OptimizerConfig {
                objective: config.optimizer.objective,
                algorithm: config.optimizer.algorithm,
                heuristic_threshold: config.optimizer.heuristic_threshold,
                seed: config.routing.seed.unwrap_or(defaults.optimizer.seed),
                ..defaults.optimizer
            },
            optimizer_weights: OptimizerWeights::new(
                config.optimizer.quality_weight,
                config.optimizer.cost_weight,
            ),
            pipeline: config.routing.pipeline,
            top_k: config.routing.top_k,
            default_budget: config.budget.budget(),
            estimated_tokens: config.routing.estimated_tokens,
            seed: config.routing.seed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.routing.bandit_strategy, BanditStrategyKind::Thompson);
        assert_eq!(config.reward.weights(), RewardWeights::default());
        assert_eq!(config.preference.regression_window, 500);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.set("routing.bandit_strategy", "discounted_ucb").unwrap();
        config.set("budget.max_cost_per_request", "0.02").unwrap();
        config.set("routing.seed", "7").unwrap();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.budget.max_cost_per_request, Some(0.02));
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let loaded = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(loaded, Config::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[routing]\nbandit_strategy = \"ucb1\"\n").unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.routing.bandit_strategy, BanditStrategyKind::Ucb1);
        assert_eq!(loaded.optimizer, OptimizerSection::default());
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[reward]\nquality = -1.0\n").unwrap();
        assert!(Config::load_from(&path).is_err());

        fs::write(&path, "[routing]\nbandit_strategy = \"epsilon_greedy\"\n").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_get_and_set() {
        let mut config = Config::default();
        assert_eq!(config.get("routing.bandit_strategy").unwrap(), "thompson");
        assert_eq!(config.get("budget.max_daily_cost").unwrap(), "none");

        config.set("optimizer.algorithm", "pareto").unwrap();
        assert_eq!(config.optimizer.algorithm, OptimizerAlgorithm::Pareto);

        config.set("budget.max_daily_cost", "5").unwrap();
        assert_eq!(config.get("budget.max_daily_cost").unwrap(), "5");
        config.set("budget.max_daily_cost", "none").unwrap();
        assert_eq!(config.budget.max_daily_cost, None);
    }

    #[test]
    fn test_set_rejects_invalid_values() {
        let mut config = Config::default();
        assert!(config.set("unknown.key", "1").is_err());
        assert!(config.get("unknown.key").is_err());
        assert!(config.set("routing.exploration_factor", "0").is_err());
        assert!(config.set("routing.discount_factor", "1.5").is_err());
        assert!(config.set("preference.smoothing_alpha", "abc").is_err());
        assert!(config.set("preference.regression_window", "2000").is_err());
        assert!(config.set("budget.min_quality_threshold", "1.2").is_err());
        assert!(config.set("routing.pipeline", "random").is_err());

        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_list_covers_every_key() {
        let config = Config::default();
        let listed = config.list().unwrap();
        assert_eq!(listed.len(), CONFIG_KEYS.len());
    }

    #[test]
    fn test_router_config_conversion() {
        let mut config = Config::default();
        config.set("routing.bandit_strategy", "bernstein_ucb").unwrap();
        config.set("reward.quality", "2").unwrap();
        config.set("reward.success", "2").unwrap();
        config.set("routing.seed", "99").unwrap();
        config.set("budget.min_quality_threshold", "0.4").unwrap();

        let router = RouterConfig::from(&config);
        assert_eq!(router.bandit.strategy, BanditStrategyKind::BernsteinUcb);
        assert_eq!(router.aggregator.weights, router.bandit.weights);
        assert_eq!(router.aggregator.weights.quality, 2.0);
        assert_eq!(router.seed, Some(99));
        assert_eq!(router.optimizer.seed, 99);
        assert_eq!(router.default_budget.min_quality_threshold, 0.4);
    }
}
