//! LLM cost tracking for the generation pipeline.
//!
//! Provides a thread-safe [`CostTracker`] that records token usage per
//! model call and computes estimated costs using configurable
//! per-million-token rates, accumulated per pipeline stage.
//!
//! All monetary calculations use [`rust_decimal::Decimal`] for financial
//! precision -- no floating-point arithmetic.

use std::collections::BTreeMap;
use std::sync::Mutex;

use caseforge_types::Stage;
use rust_decimal::Decimal;

/// One million, used as the denominator for per-million-token pricing.
const ONE_MILLION: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);

/// Per-million-token pricing for one backend alias.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CostRates {
    /// Dollars per million input tokens.
    pub input: Decimal,
    /// Dollars per million output tokens.
    pub output: Decimal,
}

/// Thread-safe model cost tracker.
///
/// Holds per-million-token pricing per backend alias and accumulates
/// token counts and estimated costs per pipeline stage. Safe to share
/// via `Arc<CostTracker>`.
#[derive(Debug, Default)]
pub struct CostTracker {
    /// Pricing per backend alias; unknown aliases cost zero.
    rates: BTreeMap<String, CostRates>,
    /// Mutable accumulation state protected by a mutex.
    inner: Mutex<BTreeMap<Stage, StageUsage>>,
}

/// Accumulated usage for one stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageUsage {
    /// Number of model calls the stage made (including retries).
    pub calls: u64,
    /// Total input tokens across the stage's calls.
    pub input_tokens: u64,
    /// Total output tokens across the stage's calls.
    pub output_tokens: u64,
    /// Estimated dollar cost of the stage's calls.
    pub estimated_cost: Decimal,
}

/// Snapshot of the whole run's usage returned by [`CostTracker::summary`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CostSummary {
    /// Per-stage usage, in stage order.
    pub stages: BTreeMap<Stage, StageUsage>,
    /// Total number of model calls.
    pub total_calls: u64,
    /// Running estimated cost in dollars.
    pub total_estimated_cost: Decimal,
}

impl CostTracker {
    /// Create a tracker with per-alias pricing.
    pub const fn new(rates: BTreeMap<String, CostRates>) -> Self {
        Self {
            rates,
            inner: Mutex::new(BTreeMap::new()),
        }
    }

    /// Record a completed model call with token usage.
    ///
    /// Unknown aliases are priced at zero. Token counts that would
    /// overflow the running totals are clamped via saturating addition.
    pub fn record_call(
        &self,
        alias: &str,
        stage: Stage,
        input_tokens: u64,
        output_tokens: u64,
    ) {
        let rates = self.rates.get(alias).copied().unwrap_or_default();

        // cost = (input / 1M) * input_rate + (output / 1M) * output_rate
        let input_cost = Decimal::from(input_tokens)
            .checked_div(ONE_MILLION)
            .unwrap_or(Decimal::ZERO)
            .checked_mul(rates.input)
            .unwrap_or(Decimal::ZERO);
        let output_cost = Decimal::from(output_tokens)
            .checked_div(ONE_MILLION)
            .unwrap_or(Decimal::ZERO)
            .checked_mul(rates.output)
            .unwrap_or(Decimal::ZERO);
        let call_cost = input_cost.checked_add(output_cost).unwrap_or(Decimal::ZERO);

        if let Ok(mut inner) = self.inner.lock() {
            let usage = inner.entry(stage).or_default();
            usage.calls = usage.calls.saturating_add(1);
            usage.input_tokens = usage.input_tokens.saturating_add(input_tokens);
            usage.output_tokens = usage.output_tokens.saturating_add(output_tokens);
            usage.estimated_cost = usage
                .estimated_cost
                .checked_add(call_cost)
                .unwrap_or(usage.estimated_cost);
        }
    }

    /// Snapshot the accumulated usage.
    pub fn summary(&self) -> CostSummary {
        let stages = self
            .inner
            .lock()
            .map(|inner| inner.clone())
            .unwrap_or_default();
        let total_calls = stages.values().map(|u| u.calls).fold(0u64, u64::saturating_add);
        let total_estimated_cost = stages
            .values()
            .map(|u| u.estimated_cost)
            .fold(Decimal::ZERO, |acc, c| {
                acc.checked_add(c).unwrap_or(acc)
            });
        CostSummary {
            stages,
            total_calls,
            total_estimated_cost,
        }
    }
}
