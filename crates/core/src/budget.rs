//! # Budget Tracker
//!
//! Cumulative cost and token accounting for one run. The tracker only
//! *suggests* a degradation tier from the consumed fraction; transitions
//! belong to the [`crate::degrade::DegradationController`]. Totals are
//! monotonically non-decreasing within a run.

use crate::config::CostSettings;
use crate::degrade::DegradationTier;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Approximate pricing per 1M tokens (input, output) in USD.
const MODEL_PRICING: &[(&str, f64, f64)] = &[
    ("claude-sonnet-4-20250514", 3.00, 15.00),
    ("claude-3-5-haiku-20241022", 0.80, 4.00),
    ("gpt-4o", 2.50, 10.00),
    ("gpt-4o-mini", 0.15, 0.60),
];

/// Conservative fallback pricing for unknown models.
const DEFAULT_PRICING: (f64, f64) = (5.00, 15.00);

/// Record of a single LLM call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub provider: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    /// Graph node that made the call.
    pub node: String,
}

/// Snapshot of budget consumption, logged as `budget_tick`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetStatus {
    pub total_cost_usd: f64,
    pub total_calls: u32,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub remaining_usd: f64,
    pub fraction_used: f64,
    pub tier_suggestion: DegradationTier,
}

#[derive(Debug, Default)]
struct Totals {
    records: Vec<UsageRecord>,
    warned: bool,
}

/// Tracks cumulative cost of provider calls within a research run.
#[derive(Debug)]
pub struct BudgetTracker {
    max_cost: f64,
    max_calls: u32,
    warn_fraction: f64,
    reduce_fraction: f64,
    cache_fraction: f64,
    inner: Mutex<Totals>,
}

impl BudgetTracker {
    pub fn new(costs: &CostSettings) -> Self {
        Self {
            max_cost: costs.max_per_run,
            max_calls: costs.max_llm_calls,
            warn_fraction: costs.warn_fraction,
            reduce_fraction: costs.reduce_fraction,
            cache_fraction: costs.cache_fraction,
            inner: Mutex::new(Totals::default()),
        }
    }

    /// Compute the cost of a call from the pricing table.
    pub fn estimate_cost(model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        let (input_price, output_price) = MODEL_PRICING
            .iter()
            .find(|(id, _, _)| *id == model)
            .map(|(_, i, o)| (*i, *o))
            .unwrap_or(DEFAULT_PRICING);
        (input_tokens as f64 * input_price + output_tokens as f64 * output_price) / 1_000_000.0
    }

    /// Record a completed call. Warns once past the warn threshold.
    pub fn add(&self, record: UsageRecord) {
        let mut inner = self.inner.lock().expect("budget lock poisoned");
        inner.records.push(record);

        let fraction = self.fraction_of(&inner);
        if fraction >= self.warn_fraction && !inner.warned {
            inner.warned = true;
            let total: f64 = inner.records.iter().map(|r| r.cost_usd).sum();
            tracing::warn!(
                fraction_used = fraction,
                total_cost = total,
                max_cost = self.max_cost,
                "budget_warning"
            );
        }
    }

    /// Seed the tracker with totals carried in a resumed checkpoint so
    /// `fraction_used` stays monotonic across the crash boundary. The
    /// restored spend lands as a single synthetic record; the cost
    /// ceiling, not the call ceiling, governs resumed runs.
    pub fn restore_totals(&self, cost_usd: f64, tokens: u64) {
        if cost_usd <= 0.0 && tokens == 0 {
            return;
        }
        self.add(UsageRecord {
            provider: "checkpoint".to_string(),
            model: "restored".to_string(),
            input_tokens: tokens,
            output_tokens: 0,
            cost_usd,
            node: "resume".to_string(),
        });
    }

    pub fn total_cost(&self) -> f64 {
        let inner = self.inner.lock().expect("budget lock poisoned");
        inner.records.iter().map(|r| r.cost_usd).sum()
    }

    pub fn total_tokens(&self) -> u64 {
        let inner = self.inner.lock().expect("budget lock poisoned");
        inner
            .records
            .iter()
            .map(|r| r.input_tokens + r.output_tokens)
            .sum()
    }

    /// Fraction of the budget consumed, the greater of the cost and
    /// call-count ceilings. Can exceed 1.0.
    pub fn fraction_used(&self) -> f64 {
        let inner = self.inner.lock().expect("budget lock poisoned");
        self.fraction_of(&inner)
    }

    fn fraction_of(&self, inner: &Totals) -> f64 {
        let cost: f64 = inner.records.iter().map(|r| r.cost_usd).sum();
        let cost_fraction = if self.max_cost > 0.0 {
            cost / self.max_cost
        } else {
            0.0
        };
        let call_fraction = if self.max_calls > 0 {
            inner.records.len() as f64 / self.max_calls as f64
        } else {
            0.0
        };
        cost_fraction.max(call_fraction)
    }

    /// Tier suggested by consumption alone.
    pub fn tier_suggestion(&self) -> DegradationTier {
        self.suggestion_for(self.fraction_used())
    }

    pub fn status(&self) -> BudgetStatus {
        let inner = self.inner.lock().expect("budget lock poisoned");
        let total_cost: f64 = inner.records.iter().map(|r| r.cost_usd).sum();
        let fraction = self.fraction_of(&inner);

        BudgetStatus {
            total_cost_usd: total_cost,
            total_calls: inner.records.len() as u32,
            total_input_tokens: inner.records.iter().map(|r| r.input_tokens).sum(),
            total_output_tokens: inner.records.iter().map(|r| r.output_tokens).sum(),
            remaining_usd: (self.max_cost - total_cost).max(0.0),
            fraction_used: fraction,
            tier_suggestion: self.suggestion_for(fraction),
        }
    }

    fn suggestion_for(&self, fraction: f64) -> DegradationTier {
        if fraction >= 1.0 {
            DegradationTier::Partial
        } else if fraction >= self.cache_fraction {
            DegradationTier::Cached
        } else if fraction >= self.reduce_fraction {
            DegradationTier::Reduced
        } else {
            DegradationTier::Full
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(cost: f64) -> UsageRecord {
        UsageRecord {
            provider: "stub".into(),
            model: "stub-model".into(),
            input_tokens: 1000,
            output_tokens: 500,
            cost_usd: cost,
            node: "plan".into(),
        }
    }

    #[test]
    fn test_totals_accumulate_monotonically() {
        let tracker = BudgetTracker::new(&CostSettings::default());
        assert_eq!(tracker.total_cost(), 0.0);

        tracker.add(record(0.10));
        let after_one = tracker.total_cost();
        tracker.add(record(0.25));
        let after_two = tracker.total_cost();

        assert!(after_two > after_one);
        assert!((after_two - 0.35).abs() < 1e-9);
        assert_eq!(tracker.total_tokens(), 3000);
    }

    #[test]
    fn test_tier_suggestion_thresholds() {
        let costs = CostSettings {
            max_per_run: 1.00,
            ..CostSettings::default()
        };
        let tracker = BudgetTracker::new(&costs);
        assert_eq!(tracker.tier_suggestion(), DegradationTier::Full);

        tracker.add(record(0.80));
        assert_eq!(tracker.tier_suggestion(), DegradationTier::Reduced);

        tracker.add(record(0.15));
        assert_eq!(tracker.tier_suggestion(), DegradationTier::Cached);

        tracker.add(record(0.10));
        assert_eq!(tracker.tier_suggestion(), DegradationTier::Partial);
    }

    #[test]
    fn test_call_ceiling_counts_toward_fraction() {
        let costs = CostSettings {
            max_per_run: 100.0,
            max_llm_calls: 4,
            ..CostSettings::default()
        };
        let tracker = BudgetTracker::new(&costs);
        for _ in 0..4 {
            tracker.add(record(0.001));
        }
        assert!(tracker.fraction_used() >= 1.0);
        assert_eq!(tracker.tier_suggestion(), DegradationTier::Partial);
    }

    #[test]
    fn test_pricing_table_and_fallback() {
        let known = BudgetTracker::estimate_cost("gpt-4o-mini", 1_000_000, 0);
        assert!((known - 0.15).abs() < 1e-9);

        let unknown = BudgetTracker::estimate_cost("mystery-model", 1_000_000, 0);
        assert!((unknown - 5.00).abs() < 1e-9);
    }
}
