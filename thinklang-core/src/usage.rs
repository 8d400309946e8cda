//! Cost tracking for provider calls

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

/// Operation tags recorded against each provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Think,
    Infer,
    Reason,
    Agent,
    SemanticAssert,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Think => "think",
            Self::Infer => "infer",
            Self::Reason => "reason",
            Self::Agent => "agent",
            Self::SemanticAssert => "semantic_assert",
        }
    }
}

/// One record per successful provider call (including each agent turn).
/// Records are append-only, never backdated or amended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub timestamp: DateTime<Utc>,
    pub operation: Operation,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    /// First 100 chars of the prompt only.
    pub prompt_prefix: String,
    pub duration_ms: u64,
}

/// Per-model pricing in USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
}

const PROMPT_PREFIX_CHARS: usize = 100;

fn builtin_price_table() -> HashMap<String, ModelPrice> {
    let entries: &[(&str, f64, f64)] = &[
        ("claude-opus-4", 15.0, 75.0),
        ("claude-sonnet-4", 3.0, 15.0),
        ("claude-3-5-haiku", 0.8, 4.0),
        ("gpt-4o", 2.5, 10.0),
        ("gpt-4o-mini", 0.15, 0.6),
        ("gemini-2.0-flash", 0.1, 0.4),
        ("gemini-1.5-pro", 1.25, 5.0),
    ];
    entries
        .iter()
        .map(|(name, input, output)| {
            (
                name.to_string(),
                ModelPrice {
                    input_per_mtok: *input,
                    output_per_mtok: *output,
                },
            )
        })
        .collect()
}

/// Aggregate counters for one operation or one model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct UsageAggregate {
    pub calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

/// Session summary, grouped by operation and by model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CostSummary {
    pub total_calls: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cost_usd: f64,
    pub by_operation: BTreeMap<String, UsageAggregate>,
    pub by_model: BTreeMap<String, UsageAggregate>,
}

/// Append-only usage ledger with per-model pricing.
pub struct CostTracker {
    records: Mutex<Vec<UsageRecord>>,
    prices: HashMap<String, ModelPrice>,
    default_price: ModelPrice,
}

impl CostTracker {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            prices: builtin_price_table(),
            default_price: ModelPrice {
                input_per_mtok: 3.0,
                output_per_mtok: 15.0,
            },
        }
    }

    /// Price lookup matches the longest table entry that prefixes the model
    /// name, so dated variants (`claude-sonnet-4-20250514`) resolve without
    /// their own row. Unknown models fall back to the default price.
    pub fn price_for(&self, model: &str) -> ModelPrice {
        let mut best: Option<(&str, ModelPrice)> = None;
        for (name, price) in &self.prices {
            if model.starts_with(name.as_str()) {
                match best {
                    Some((prev, _)) if prev.len() >= name.len() => {}
                    _ => best = Some((name, *price)),
                }
            }
        }
        best.map(|(_, p)| p).unwrap_or(self.default_price)
    }

    pub fn cost_of(&self, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        let price = self.price_for(model);
        (input_tokens as f64 * price.input_per_mtok + output_tokens as f64 * price.output_per_mtok)
            / 1e6
    }

    /// Append a record for a completed call and return its cost.
    pub fn record(
        &self,
        operation: Operation,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
        prompt: &str,
        duration_ms: u64,
    ) -> f64 {
        let cost_usd = self.cost_of(model, input_tokens, output_tokens);
        let prompt_prefix: String = prompt.chars().take(PROMPT_PREFIX_CHARS).collect();

        let record = UsageRecord {
            timestamp: Utc::now(),
            operation,
            model: model.to_string(),
            input_tokens,
            output_tokens,
            cost_usd,
            prompt_prefix,
            duration_ms,
        };

        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
        cost_usd
    }

    pub fn get_records(&self) -> Vec<UsageRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn total_cost(&self) -> f64 {
        self.records
            .lock()
            .map(|r| r.iter().map(|rec| rec.cost_usd).sum())
            .unwrap_or(0.0)
    }

    pub fn get_summary(&self) -> CostSummary {
        let records = self.get_records();
        let mut summary = CostSummary::default();

        for record in &records {
            summary.total_calls += 1;
            summary.total_input_tokens += record.input_tokens;
            summary.total_output_tokens += record.output_tokens;
            summary.total_cost_usd += record.cost_usd;

            for agg in [
                summary
                    .by_operation
                    .entry(record.operation.as_str().to_string())
                    .or_default(),
                summary.by_model.entry(record.model.clone()).or_default(),
            ] {
                agg.calls += 1;
                agg.input_tokens += record.input_tokens;
                agg.output_tokens += record.output_tokens;
                agg.cost_usd += record.cost_usd;
            }
        }

        summary
    }

    pub fn reset(&self) {
        if let Ok(mut records) = self.records.lock() {
            records.clear();
        }
    }
}

impl Default for CostTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CostTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CostTracker")
            .field("records", &self.get_records().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_sums() {
        let tracker = CostTracker::new();
        tracker.record(Operation::Think, "gpt-4o", 1000, 500, "hello", 12);
        tracker.record(Operation::Infer, "gpt-4o", 2000, 100, "world", 8);

        let summary = tracker.get_summary();
        assert_eq!(summary.total_calls, 2);
        assert_eq!(summary.total_input_tokens, 3000);
        assert_eq!(summary.total_output_tokens, 600);
        assert_eq!(summary.by_operation.len(), 2);
        assert_eq!(summary.by_model.len(), 1);
    }

    #[test]
    fn summary_identities_hold() {
        let tracker = CostTracker::new();
        tracker.record(Operation::Think, "gpt-4o", 100, 10, "a", 1);
        tracker.record(Operation::Think, "claude-sonnet-4", 200, 20, "b", 1);
        tracker.record(Operation::Agent, "gpt-4o", 300, 30, "c", 1);

        let s = tracker.get_summary();
        let op_calls: u64 = s.by_operation.values().map(|a| a.calls).sum();
        let model_calls: u64 = s.by_model.values().map(|a| a.calls).sum();
        assert_eq!(s.total_calls, op_calls);
        assert_eq!(s.total_calls, model_calls);

        let op_cost: f64 = s.by_operation.values().map(|a| a.cost_usd).sum();
        assert!((s.total_cost_usd - op_cost).abs() < 1e-12);
    }

    #[test]
    fn unknown_model_uses_default_price() {
        let tracker = CostTracker::new();
        let price = tracker.price_for("totally-novel-model");
        assert_eq!(price.input_per_mtok, 3.0);
    }

    #[test]
    fn dated_model_matches_prefix() {
        let tracker = CostTracker::new();
        let price = tracker.price_for("claude-sonnet-4-20250514");
        assert_eq!(price.input_per_mtok, 3.0);
        assert_eq!(price.output_per_mtok, 15.0);
    }

    #[test]
    fn prompt_prefix_capped_at_100_chars() {
        let tracker = CostTracker::new();
        let long_prompt = "x".repeat(500);
        tracker.record(Operation::Think, "gpt-4o", 10, 10, &long_prompt, 1);
        let records = tracker.get_records();
        assert_eq!(records[0].prompt_prefix.len(), 100);
    }

    #[test]
    fn reset_clears_records() {
        let tracker = CostTracker::new();
        tracker.record(Operation::Think, "gpt-4o", 10, 10, "p", 1);
        tracker.reset();
        assert!(tracker.get_records().is_empty());
        assert_eq!(tracker.total_cost(), 0.0);
    }
}
