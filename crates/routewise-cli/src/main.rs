//! Routewise CLI - configure and simulate adaptive model routing

use std::path::PathBuf;
use std::str::FromStr;

use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use routewise_core::config::Config;
use routewise_core::routing::{
    Arm, BanditStrategyKind, Observation, OptimizerAlgorithm, Pipeline, Ranking, Router,
    RouterConfig, RoutingContext, RoutingStore,
};
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "routewise")]
#[command(author, version, about = "Adaptive model routing and cost-quality optimization", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Default, PartialEq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Run the router against synthetic arms with Bernoulli outcomes
    Simulate {
        /// Arm as id:success_probability:cost_per_request (repeatable)
        #[arg(short, long = "arm", visible_alias = "arms", value_parser = parse_arm_spec, required = true)]
        arms: Vec<ArmSpec>,

        /// Number of select/update cycles
        #[arg(short = 'n', long, default_value_t = 1000)]
        iterations: usize,

        /// Seed for the router and the synthetic outcomes
        #[arg(short, long, default_value_t = 42)]
        seed: u64,

        /// Override the configured bandit strategy
        #[arg(long, value_parser = parse_choice::<BanditStrategyKind>)]
        strategy: Option<BanditStrategyKind>,

        /// Override the configured optimizer algorithm
        #[arg(long, value_parser = parse_choice::<OptimizerAlgorithm>)]
        algorithm: Option<OptimizerAlgorithm>,

        /// Override the configured selection pipeline
        #[arg(long, value_parser = parse_choice::<Pipeline>)]
        pipeline: Option<Pipeline>,

        /// Metric used for the final ranking
        #[arg(long, default_value = "reward")]
        metric: String,

        /// SQLite file to restore learned state from and save it to
        #[arg(long)]
        state: Option<PathBuf>,
    },

    /// Check configuration health
    Doctor,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// List all configuration values
    #[command(alias = "list")]
    Show,
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// Show config file path
    Path,
    /// Reset configuration to defaults
    Reset,
}

/// A synthetic arm for simulation
#[derive(Debug, Clone, PartialEq)]
struct ArmSpec {
    id: String,
    success_probability: f64,
    cost: f64,
}

fn parse_arm_spec(value: &str) -> Result<ArmSpec, String> {
    // Split from the right so ids may contain ':'
    let mut parts = value.rsplitn(3, ':');
    let (Some(cost), Some(probability), Some(id)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(format!(
            "expected id:success_probability:cost, got '{}'",
            value
        ));
    };

    if id.trim().is_empty() {
        return Err("arm id must not be empty".to_string());
    }
    let success_probability: f64 = probability
        .parse()
        .map_err(|e| format!("invalid success probability '{}': {}", probability, e))?;
    if !(0.0..=1.0).contains(&success_probability) {
        return Err(format!(
            "success probability must be between 0 and 1, got {}",
            success_probability
        ));
    }
    let cost: f64 = cost
        .parse()
        .map_err(|e| format!("invalid cost '{}': {}", cost, e))?;
    if !cost.is_finite() || cost < 0.0 {
        return Err(format!("cost must be non-negative, got {}", cost));
    }

    Ok(ArmSpec {
        id: id.to_string(),
        success_probability,
        cost,
    })
}

fn parse_choice<T: FromStr<Err = String>>(value: &str) -> Result<T, String> {
    value.parse()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; logs go to stderr so stdout stays parseable
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("routewise=info".parse()?);
    if cli.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Config { action } => cmd_config(action, cli.format, cli.quiet),

        Commands::Simulate {
            arms,
            iterations,
            seed,
            strategy,
            algorithm,
            pipeline,
            metric,
            state,
        } => {
            let overrides = Overrides {
                strategy,
                algorithm,
                pipeline,
            };
            cmd_simulate(
                &arms,
                iterations,
                seed,
                overrides,
                &metric,
                state,
                cli.format,
                cli.quiet,
            )
            .await
        }

        Commands::Doctor => cmd_doctor(cli.quiet),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

fn cmd_config(action: ConfigAction, format: OutputFormat, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            let config = Config::load()?;
            let items = config.list()?;
            if format == OutputFormat::Json {
                let map: serde_json::Map<String, serde_json::Value> = items
                    .into_iter()
                    .map(|(key, value)| (key, serde_json::Value::String(value)))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&map)?);
            } else {
                for (key, value) in items {
                    println!("{} = {}", key, value);
                }
            }
        }
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !quiet {
                println!("Configuration reset to defaults.");
            }
        }
    }
    Ok(())
}

/// Command-line overrides applied on top of the configuration file
#[derive(Debug, Clone, Copy, Default)]
struct Overrides {
    strategy: Option<BanditStrategyKind>,
    algorithm: Option<OptimizerAlgorithm>,
    pipeline: Option<Pipeline>,
}

impl Overrides {
    fn apply(&self, config: &mut RouterConfig) {
        if let Some(strategy) = self.strategy {
            config.bandit.strategy = strategy;
        }
        if let Some(algorithm) = self.algorithm {
            config.optimizer.algorithm = algorithm;
        }
        if let Some(pipeline) = self.pipeline {
            config.pipeline = pipeline;
        }
    }
}

#[derive(Debug, Serialize)]
struct ArmReport {
    id: String,
    success_probability: f64,
    cost: f64,
    selections: usize,
    share: f64,
}

#[derive(Debug, Serialize)]
struct SimulationReport {
    strategy: BanditStrategyKind,
    pipeline: Pipeline,
    iterations: usize,
    /// Cycles where no arm satisfied the budget
    rejected: usize,
    total_cost: f64,
    arms: Vec<ArmReport>,
    ranking: Ranking,
}

/// Register the synthetic arms on `router`
fn register_arms(router: &Router, arms: &[ArmSpec]) -> anyhow::Result<()> {
    for spec in arms {
        router.register(
            Arm::new(spec.id.clone())
                .with_flat_cost(spec.cost)
                .with_quality_prior(spec.success_probability),
        )?;
    }
    Ok(())
}

/// Run `iterations` select/update cycles against Bernoulli arms
fn simulate(
    router: &Router,
    arms: &[ArmSpec],
    iterations: usize,
    seed: u64,
    metric: &str,
) -> anyhow::Result<SimulationReport> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut selections = vec![0usize; arms.len()];
    let mut rejected = 0;
    let mut total_cost = 0.0;

    for i in 0..iterations {
        let context = RoutingContext::new().with_request_id(format!("sim-{i}"));
        let decision = match router.select(&context) {
            Ok(decision) => decision,
            Err(e) if e.is_routing_error() => {
                debug!(iteration = i, error = %e, "Simulation cycle rejected");
                rejected += 1;
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let Some(index) = arms.iter().position(|a| a.id == decision.chosen_arm_id) else {
            warn!(arm_id = %decision.chosen_arm_id, "Router picked an arm outside the simulation");
            continue;
        };
        let spec = &arms[index];
        selections[index] += 1;

        let success = rng.gen_bool(spec.success_probability);
        let observation = Observation::new(&spec.id, success)
            .with_cost(spec.cost)
            .with_latency(rng.gen_range(0.2..2.0));
        router.update(&spec.id, observation)?;
        total_cost += spec.cost;
    }

    let served = (iterations - rejected).max(1) as f64;
    Ok(SimulationReport {
        strategy: router.bandit().kind(),
        pipeline: router.config().pipeline,
        iterations,
        rejected,
        total_cost,
        arms: arms
            .iter()
            .zip(selections)
            .map(|(spec, count)| ArmReport {
                id: spec.id.clone(),
                success_probability: spec.success_probability,
                cost: spec.cost,
                selections: count,
                share: count as f64 / served,
            })
            .collect(),
        ranking: router.rank(metric),
    })
}

#[allow(clippy::too_many_arguments)]
async fn cmd_simulate(
    arms: &[ArmSpec],
    iterations: usize,
    seed: u64,
    overrides: Overrides,
    metric: &str,
    state: Option<PathBuf>,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<()> {
    let config = Config::load()?;
    let mut router_config = RouterConfig::from(&config);
    overrides.apply(&mut router_config);
    router_config.seed = Some(seed);

    let router = Router::with_config(router_config);
    register_arms(&router, arms)?;

    let store = match &state {
        Some(path) => {
            let store = RoutingStore::connect(path).await?;
            store.init().await?;
            let restored = router.restore(&store).await?;
            info!(restored, path = %path.display(), "Loaded simulation state");
            Some(store)
        }
        None => None,
    };

    let report = simulate(&router, arms, iterations, seed, metric)?;

    if let Some(store) = &store {
        router.save(store).await?;
    }

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    if quiet {
        return Ok(());
    }

    println!("Simulation ({} iterations)", report.iterations);
    println!("  Strategy: {}", report.strategy);
    println!("  Pipeline: {}", report.pipeline);
    println!("  Rejected: {}", report.rejected);
    println!("  Total cost: {:.6}", report.total_cost);
    println!();
    println!("Selections:");
    for arm in &report.arms {
        println!(
            "  {:<24} p={:.2} cost={:.4}  {:>6} ({:>5.1}%)",
            arm.id,
            arm.success_probability,
            arm.cost,
            arm.selections,
            arm.share * 100.0
        );
    }
    println!();
    println!("Ranking by {}:", report.ranking.metric_name);
    for (rank, entry) in report.ranking.entries.iter().enumerate() {
        println!(
            "  {}. {:<24} {:.4} (n={}, {:?})",
            rank + 1,
            entry.arm_id,
            entry.value,
            entry.sample_count,
            entry.confidence
        );
    }
    if report.ranking.low_confidence {
        println!("  (some arms have too few samples for a reliable estimate)");
    }
    Ok(())
}

fn cmd_doctor(quiet: bool) -> anyhow::Result<()> {
    if !quiet {
        println!("Routewise Health Check");
        println!("======================");
        println!();
    }

    let mut all_ok = true;

    match Config::load() {
        Ok(config) => {
            if !quiet {
                println!("[OK] Configuration: Valid");
                println!(
                    "     Strategy: {}, optimizer: {} ({}), pipeline: {}",
                    config.routing.bandit_strategy,
                    config.optimizer.algorithm,
                    config.optimizer.objective,
                    config.routing.pipeline
                );
            }

            let weights = config.reward.weights();
            if (weights.sum() - 1.0).abs() > 1e-9 && !quiet {
                println!(
                    "[--] Reward weights sum to {}; they will be normalized",
                    weights.sum()
                );
            }
        }
        Err(e) => {
            all_ok = false;
            if !quiet {
                println!("[!!] Configuration: Error - {:#}", e);
            }
        }
    }

    if !quiet {
        match Config::config_path() {
            Ok(path) => {
                if path.exists() {
                    println!("[OK] Config file: {}", path.display());
                } else {
                    println!("[--] Config file: {} (using defaults)", path.display());
                }
            }
            Err(e) => println!("[!!] Config file: {}", e),
        }
        println!();
    }

    if all_ok {
        if !quiet {
            println!("All checks passed.");
        }
        Ok(())
    } else {
        Err(anyhow::anyhow!("Health check found problems"))
    }
}
