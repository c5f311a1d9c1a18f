//! Cost models and spend tracking
//!
//! This module provides:
//! - Declared per-arm cost models (token count -> monetary cost)
//! - Daily spend aggregation used to enforce `max_daily_cost`

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, Result};

/// Spend is accumulated in nano-units so totals can live in atomics
const NANOS_PER_UNIT: f64 = 1_000_000_000.0;

/// Number of daily summaries kept before the oldest are pruned
const RETAINED_DAYS: usize = 31;

/// A price step for tiered pricing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostTier {
    /// Inclusive upper bound on the request's token count
    pub up_to_tokens: usize,
    /// Cost charged for any request within this tier
    pub cost: f64,
}

/// Declared cost of invoking an arm, as a function of the request token count
///
/// Every variant is pure: the same token count always yields the same cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CostModel {
    /// Prices per million prompt and completion tokens.
    ///
    /// The completion is assumed to be as long as the prompt.
    PerMillion { input: f64, output: f64 },
    /// Fixed cost per request
    Flat { cost: f64 },
    /// Step pricing; requests beyond the last tier pay the last tier's price
    Tiered { tiers: Vec<CostTier> },
}

impl Default for CostModel {
    fn default() -> Self {
        Self::PerMillion {
            input: 1.0,
            output: 5.0,
        }
    }
}

impl CostModel {
    /// Per-million-token pricing
    pub fn per_million(input: f64, output: f64) -> Self {
        Self::PerMillion { input, output }
    }

    /// Flat per-request pricing
    pub fn flat(cost: f64) -> Self {
        Self::Flat { cost }
    }

    /// Tiered pricing; tiers are sorted by their token bound
    pub fn tiered(mut tiers: Vec<CostTier>) -> Self {
        tiers.sort_by_key(|t| t.up_to_tokens);
        Self::Tiered { tiers }
    }

    /// Estimate the cost of a request with the given token count
    pub fn cost_for_tokens(&self, tokens: usize) -> f64 {
        let cost = match self {
            Self::PerMillion { input, output } => {
                let millions = tokens as f64 / 1_000_000.0;
                millions * input + millions * output
            }
            Self::Flat { cost } => *cost,
            Self::Tiered { tiers } => tiers
                .iter()
                .find(|t| tokens <= t.up_to_tokens)
                .or_else(|| tiers.last())
                .map(|t| t.cost)
                .unwrap_or(0.0),
        };
        cost.max(0.0)
    }

    /// Reject prices that would make the model return negative or non-finite costs
    pub fn validate(&self) -> Result<()> {
        let prices: Vec<f64> = match self {
            Self::PerMillion { input, output } => vec![*input, *output],
            Self::Flat { cost } => vec![*cost],
            Self::Tiered { tiers } => {
                if tiers.is_empty() {
                    return Err(Error::InvalidArm("tiered cost model has no tiers".to_string()));
                }
                tiers.iter().map(|t| t.cost).collect()
            }
        };

        if prices.iter().any(|p| !p.is_finite() || *p < 0.0) {
            return Err(Error::InvalidArm(format!(
                "cost model prices must be finite and non-negative: {:?}",
                prices
            )));
        }
        Ok(())
    }
}

/// Spend recorded for a single arm within one day
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArmSpend {
    /// Total cost
    pub total_cost: f64,
    /// Number of calls
    pub call_count: u64,
}

/// Daily spend summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailySpendSummary {
    /// The date for this summary
    pub date: NaiveDate,
    /// Total cost
    pub total_cost: f64,
    /// Number of recorded calls
    pub call_count: u64,
    /// Breakdown by arm
    pub by_arm: HashMap<String, ArmSpend>,
}

#[derive(Debug, Default)]
struct SpendCounter {
    nanos: AtomicU64,
    calls: AtomicU64,
}

impl SpendCounter {
    fn add(&self, nanos: u64) {
        let _ = self
            .nanos
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_add(nanos))
            });
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    fn total(&self) -> f64 {
        self.nanos.load(Ordering::Relaxed) as f64 / NANOS_PER_UNIT
    }

    fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
struct DaySpend {
    total: SpendCounter,
    by_arm: DashMap<String, SpendCounter>,
}

/// Tracks realized spend per day
///
/// Recording only touches atomics and sharded maps, so concurrent updates for
/// different arms do not serialize on a shared lock.
#[derive(Debug, Clone, Default)]
pub struct SpendTracker {
    days: Arc<DashMap<NaiveDate, Arc<DaySpend>>>,
}

impl SpendTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record spend for an arm at the current time
    pub fn record(&self, arm_id: &str, cost: f64) {
        self.record_at(arm_id, cost, Utc::now());
    }

    /// Record spend for an arm at the given time
    pub fn record_at(&self, arm_id: &str, cost: f64, at: DateTime<Utc>) {
        // Float-to-int casts saturate, so absurd costs pin at u64::MAX
        let nanos = (cost.max(0.0) * NANOS_PER_UNIT).round() as u64;
        let date = at.date_naive();

        let day = match self.days.get(&date) {
            Some(day) => day.value().clone(),
            None => self
                .days
                .entry(date)
                .or_insert_with(|| Arc::new(DaySpend::default()))
                .value()
                .clone(),
        };

        day.total.add(nanos);
        match day.by_arm.get(arm_id) {
            Some(counter) => counter.add(nanos),
            None => day.by_arm.entry(arm_id.to_string()).or_default().add(nanos),
        }

        if self.days.len() > RETAINED_DAYS {
            self.prune();
        }
    }

    /// Total spend recorded today
    pub fn today_total(&self) -> f64 {
        self.total_for_date(Utc::now().date_naive())
    }

    /// Total spend recorded for a given date
    pub fn total_for_date(&self, date: NaiveDate) -> f64 {
        self.days
            .get(&date)
            .map(|d| d.total.total())
            .unwrap_or(0.0)
    }

    /// Remaining spend for today under a daily limit
    pub fn remaining_today(&self, daily_limit: f64) -> f64 {
        (daily_limit - self.today_total()).max(0.0)
    }

    /// Summary for a specific date
    pub fn summary_for_date(&self, date: NaiveDate) -> Option<DailySpendSummary> {
        self.days.get(&date).map(|day| DailySpendSummary {
            date,
            total_cost: day.total.total(),
            call_count: day.total.calls(),
            by_arm: day
                .by_arm
                .iter()
                .map(|entry| {
                    (
                        entry.key().clone(),
                        ArmSpend {
                            total_cost: entry.value().total(),
                            call_count: entry.value().calls(),
                        },
                    )
                })
                .collect(),
        })
    }

    /// Today's summary
    pub fn today_summary(&self) -> Option<DailySpendSummary> {
        self.summary_for_date(Utc::now().date_naive())
    }

    /// Clear all recorded spend
    pub fn clear(&self) {
        self.days.clear();
    }

    fn prune(&self) {
        let mut dates: Vec<NaiveDate> = self.days.iter().map(|e| *e.key()).collect();
        dates.sort();
        let excess = dates.len().saturating_sub(RETAINED_DAYS);
        for date in dates.into_iter().take(excess) {
            self.days.remove(&date);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_per_million_cost() {
        let model = CostModel::per_million(3.0, 15.0);
        // 1M prompt tokens + 1M completion tokens
        let cost = model.cost_for_tokens(1_000_000);
        assert!((cost - 18.0).abs() < 1e-9);
    }

    #[test]
    fn test_flat_cost_ignores_tokens() {
        let model = CostModel::flat(0.02);
        assert_eq!(model.cost_for_tokens(0), 0.02);
        assert_eq!(model.cost_for_tokens(1_000_000), 0.02);
    }

    #[test]
    fn test_tiered_cost() {
        let model = CostModel::tiered(vec![
            CostTier {
                up_to_tokens: 32_000,
                cost: 0.05,
            },
            CostTier {
                up_to_tokens: 4_000,
                cost: 0.01,
            },
        ]);

        assert_eq!(model.cost_for_tokens(1_000), 0.01);
        assert_eq!(model.cost_for_tokens(4_000), 0.01);
        assert_eq!(model.cost_for_tokens(10_000), 0.05);
        // Beyond the last tier pays the last price
        assert_eq!(model.cost_for_tokens(100_000), 0.05);
    }

    #[test]
    fn test_validate_rejects_negative_prices() {
        assert!(CostModel::flat(-1.0).validate().is_err());
        assert!(CostModel::per_million(1.0, f64::NAN).validate().is_err());
        assert!(CostModel::tiered(vec![]).validate().is_err());
        assert!(CostModel::default().validate().is_ok());
    }

    #[test]
    fn test_spend_tracker_today_total() {
        let tracker = SpendTracker::new();
        tracker.record("arm-a", 0.25);
        tracker.record("arm-b", 0.5);

        assert!((tracker.today_total() - 0.75).abs() < 1e-6);
        assert!((tracker.remaining_today(1.0) - 0.25).abs() < 1e-6);
        assert_eq!(tracker.remaining_today(0.5), 0.0);
    }

    #[test]
    fn test_spend_tracker_summary_by_arm() {
        let tracker = SpendTracker::new();
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        tracker.record_at("arm-a", 0.1, at);
        tracker.record_at("arm-a", 0.2, at);
        tracker.record_at("arm-b", 0.3, at);

        let summary = tracker
            .summary_for_date(at.date_naive())
            .expect("Should have a summary");
        assert_eq!(summary.call_count, 3);
        assert_eq!(summary.by_arm.len(), 2);
        assert_eq!(summary.by_arm["arm-a"].call_count, 2);
        assert!((summary.by_arm["arm-a"].total_cost - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_spend_tracker_prunes_old_days() {
        let tracker = SpendTracker::new();
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        for day in 0..40 {
            tracker.record_at("arm", 1.0, start + chrono::Duration::days(day));
        }

        assert!(tracker.days.len() <= RETAINED_DAYS);
        assert!(tracker.summary_for_date(start.date_naive()).is_none());
    }

    #[test]
    fn test_spend_tracker_clear() {
        let tracker = SpendTracker::new();
        tracker.record("arm", 1.0);
        assert!(tracker.today_summary().is_some());
        tracker.clear();
        assert!(tracker.today_summary().is_none());
    }
}
