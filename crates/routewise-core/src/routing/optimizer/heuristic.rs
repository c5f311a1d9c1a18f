//! Metaheuristic search
//!
//! Simulated annealing over large candidate sets, and a genetic search for
//! chained routing where one arm is chosen per step. Both take an explicit
//! seed so the same inputs always produce the same pick.

use std::cmp::Ordering;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::{OptimizerCandidate, OptimizerWeights, compare, scalar};

/// Simulated annealing settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnealingConfig {
    pub iterations: usize,
    pub initial_temperature: f64,
    /// Geometric cooling factor applied every iteration
    pub cooling_rate: f64,
}

impl Default for AnnealingConfig {
    fn default() -> Self {
        Self {
            iterations: 2_000,
            initial_temperature: 1.0,
            cooling_rate: 0.995,
        }
    }
}

/// Genetic search settings for chained routing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneticConfig {
    pub population_size: usize,
    pub generations: usize,
    /// Per-gene probability of a random reassignment
    pub mutation_rate: f64,
    pub tournament_size: usize,
}

impl Default for GeneticConfig {
    fn default() -> Self {
        Self {
            population_size: 40,
            generations: 120,
            mutation_rate: 0.1,
            tournament_size: 3,
        }
    }
}

/// One arm per chain step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainPlan {
    pub arm_ids: Vec<String>,
    pub total_cost: f64,
    pub total_quality: f64,
}

/// Simulated annealing over candidate indices, maximizing the weighted sum
pub(super) fn anneal<'a>(
    feasible: &[&'a OptimizerCandidate],
    weights: &OptimizerWeights,
    config: &AnnealingConfig,
    seed: u64,
) -> Option<&'a OptimizerCandidate> {
    if feasible.is_empty() {
        return None;
    }

    let max_cost = scalar::max_cost(feasible);
    let scores: Vec<f64> = feasible
        .iter()
        .map(|c| scalar::score(c, max_cost, weights))
        .collect();

    let mut rng = StdRng::seed_from_u64(seed);
    let mut current = rng.gen_range(0..feasible.len());
    let mut best = current;
    let mut temperature = config.initial_temperature.max(f64::MIN_POSITIVE);

    for _ in 0..config.iterations {
        let next = rng.gen_range(0..feasible.len());
        let delta = scores[next] - scores[current];
        if delta >= 0.0 || rng.r#gen::<f64>() < (delta / temperature).exp() {
            current = next;
        }
        if compare(feasible[current], scores[current], feasible[best], scores[best]) == Ordering::Greater {
            best = current;
        }
        temperature = (temperature * config.cooling_rate).max(f64::MIN_POSITIVE);
    }

    Some(feasible[best])
}

fn evaluate(steps: &[Vec<OptimizerCandidate>], genome: &[usize]) -> (f64, f64) {
    steps
        .iter()
        .zip(genome)
        .fold((0.0, 0.0), |(cost, quality), (step, &i)| {
            (cost + step[i].expected_cost, quality + step[i].expected_quality)
        })
}

fn plan(steps: &[Vec<OptimizerCandidate>], genome: &[usize]) -> ChainPlan {
    let (total_cost, total_quality) = evaluate(steps, genome);
    ChainPlan {
        arm_ids: steps
            .iter()
            .zip(genome)
            .map(|(step, &i)| step[i].arm_id.clone())
            .collect(),
        total_cost,
        total_quality,
    }
}

/// Higher quality wins, then lower cost, then the lexicographically smaller ids
fn better(steps: &[Vec<OptimizerCandidate>], a: &[usize], b: &[usize]) -> bool {
    let (a_cost, a_quality) = evaluate(steps, a);
    let (b_cost, b_quality) = evaluate(steps, b);
    a_quality
        .total_cmp(&b_quality)
        .then_with(|| b_cost.total_cmp(&a_cost))
        .then_with(|| chain_ids(steps, b).cmp(&chain_ids(steps, a)))
        == Ordering::Greater
}

fn chain_ids<'a>(steps: &'a [Vec<OptimizerCandidate>], genome: &[usize]) -> Vec<&'a str> {
    steps
        .iter()
        .zip(genome)
        .map(|(s, &i)| s[i].arm_id.as_str())
        .collect()
}

/// The cheapest arm of every step; feasible whenever any chain is
fn cheapest_genome(steps: &[Vec<OptimizerCandidate>]) -> Vec<usize> {
    steps
        .iter()
        .map(|step| {
            step.iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| a.expected_cost.total_cmp(&b.expected_cost))
                .map(|(i, _)| i)
                .unwrap_or(0)
        })
        .collect()
}

/// Enumerate every chain and keep the best one within `limit`
pub(super) fn exhaustive_chain(steps: &[Vec<OptimizerCandidate>], limit: f64) -> ChainPlan {
    let mut best = cheapest_genome(steps);
    let mut genome = vec![0usize; steps.len()];

    loop {
        if evaluate(steps, &genome).0 <= limit && better(steps, &genome, &best) {
            best.clone_from(&genome);
        }

        // Odometer increment; stop after the last digit wraps
        let mut position = 0;
        loop {
            if position == steps.len() {
                return plan(steps, &best);
            }
            genome[position] += 1;
            if genome[position] < steps[position].len() {
                break;
            }
            genome[position] = 0;
            position += 1;
        }
    }
}

/// Genetic search for the best chain within `limit`
pub(super) fn genetic_chain(
    steps: &[Vec<OptimizerCandidate>],
    limit: f64,
    config: &GeneticConfig,
    seed: u64,
) -> ChainPlan {
    let mut rng = StdRng::seed_from_u64(seed);
    let population_size = config.population_size.max(2);
    let tournament_size = config.tournament_size.max(1);
    let step_count = steps.len() as f64;

    // Infeasible chains always score below every feasible one
    let fitness = |genome: &[usize]| -> f64 {
        let (cost, quality) = evaluate(steps, genome);
        if cost <= limit {
            quality
        } else {
            -step_count - (cost - limit)
        }
    };

    let random_genome = |rng: &mut StdRng| -> Vec<usize> {
        steps.iter().map(|s| rng.gen_range(0..s.len())).collect()
    };

    let mut best = cheapest_genome(steps);
    let mut population: Vec<Vec<usize>> = std::iter::once(best.clone())
        .chain((1..population_size).map(|_| random_genome(&mut rng)))
        .collect();

    for _ in 0..config.generations {
        let mut scored: Vec<(f64, Vec<usize>)> = population
            .drain(..)
            .map(|g| (fitness(&g), g))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        for (_, genome) in &scored {
            if evaluate(steps, genome).0 <= limit && better(steps, genome, &best) {
                best.clone_from(genome);
            }
        }

        // Elitism: the two fittest survive unchanged
        population.extend(scored.iter().take(2).map(|(_, g)| g.clone()));

        while population.len() < population_size {
            let tournament = |rng: &mut StdRng| -> usize {
                (0..tournament_size)
                    .map(|_| rng.gen_range(0..scored.len()))
                    .max_by(|&a, &b| scored[a].0.total_cmp(&scored[b].0))
                    .unwrap_or(0)
            };
            let mother = scored[tournament(&mut rng)].1.clone();
            let father = scored[tournament(&mut rng)].1.clone();

            let child: Vec<usize> = mother
                .iter()
                .zip(&father)
                .zip(steps)
                .map(|((&m, &f), step)| {
                    let gene = if rng.gen_bool(0.5) { m } else { f };
                    if rng.gen_bool(config.mutation_rate.clamp(0.0, 1.0)) {
                        rng.gen_range(0..step.len())
                    } else {
                        gene
                    }
                })
                .collect();
            population.push(child);
        }
    }

    for genome in &population {
        if evaluate(steps, genome).0 <= limit && better(steps, genome, &best) {
            best.clone_from(genome);
        }
    }

    plan(steps, &best)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ladder(prefix: &str, count: usize) -> Vec<OptimizerCandidate> {
        (0..count)
            .map(|j| {
                OptimizerCandidate::new(
                    format!("{prefix}-{j}"),
                    j as f64 * 0.01,
                    j as f64 / count as f64,
                )
            })
            .collect()
    }

    #[test]
    fn test_anneal_finds_near_optimum_in_large_set() {
        let owned: Vec<OptimizerCandidate> = (0..500)
            .map(|i| OptimizerCandidate::new(format!("arm-{i:03}"), 0.01, i as f64 / 500.0))
            .collect();
        let feasible: Vec<&OptimizerCandidate> = owned.iter().collect();
        let weights = OptimizerWeights::new(1.0, 0.0);

        let pick = anneal(&feasible, &weights, &AnnealingConfig::default(), 7).unwrap();
        assert!(pick.expected_quality >= 0.98, "picked {}", pick.arm_id);

        let again = anneal(&feasible, &weights, &AnnealingConfig::default(), 7).unwrap();
        assert_eq!(pick.arm_id, again.arm_id);
    }

    #[test]
    fn test_anneal_empty() {
        assert!(anneal(&[], &OptimizerWeights::default(), &AnnealingConfig::default(), 1).is_none());
    }

    #[test]
    fn test_exhaustive_matches_brute_force_choice() {
        let steps = vec![ladder("a", 4), ladder("b", 4)];
        // Budget allows index sum up to 4 (cost 0.04)
        let plan = exhaustive_chain(&steps, 0.045);
        assert!(plan.total_cost <= 0.045);
        assert!((plan.total_quality - 1.0).abs() < 1e-12);
        assert_eq!(plan.arm_ids.len(), 2);
    }

    #[test]
    fn test_genetic_chain_unbounded_finds_top_arms() {
        let steps: Vec<Vec<OptimizerCandidate>> =
            (0..4).map(|s| ladder(&format!("s{s}"), 10)).collect();
        let plan = genetic_chain(&steps, f64::INFINITY, &GeneticConfig::default(), 42);
        assert!(plan.total_quality >= 3.3, "quality was {}", plan.total_quality);
    }

    #[test]
    fn test_genetic_chain_stays_within_budget() {
        let steps: Vec<Vec<OptimizerCandidate>> =
            (0..4).map(|s| ladder(&format!("s{s}"), 10)).collect();
        let plan = genetic_chain(&steps, 0.1, &GeneticConfig::default(), 42);
        assert!(plan.total_cost <= 0.1);

        let again = genetic_chain(&steps, 0.1, &GeneticConfig::default(), 42);
        assert_eq!(plan, again);
    }
}
