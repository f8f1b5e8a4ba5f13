//! Cost accounting: token usage per model, tool call counts, and a
//! priced / partially-priced / unpriced summary.
//!
//! The three-way distinction is load-bearing: silently reporting a wrong
//! total when pricing is incomplete is worse than reporting "unknown", so
//! models without a configured rate are excluded from the cost sum and
//! listed under `missing_pricing_for` instead.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::PricingTable;
use crate::llm::Usage;

#[derive(Debug, Clone, Copy, Default)]
struct ModelTally {
    input: u64,
    cached_input: u64,
    output: u64,
    reasoning: u64,
    total: u64,
}

/// Accumulated usage (and cost, when priced) for one model.
#[derive(Debug, Clone, Serialize)]
pub struct ModelCost {
    pub input_tokens: u64,
    pub cached_input_tokens: u64,
    pub output_tokens: u64,
    pub reasoning_tokens: u64,
    pub total_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
}

/// Grand totals across all models and tools.
#[derive(Debug, Clone, Serialize)]
pub struct CostTotals {
    pub input_tokens: u64,
    pub cached_input_tokens: u64,
    pub output_tokens: u64,
    pub reasoning_tokens: u64,
    pub total_tokens: u64,
    pub web_search_calls: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_cost_usd: Option<f64>,
}

/// Result of [`CostTracker::summary`].
#[derive(Debug, Clone, Serialize)]
pub struct CostSummary {
    pub totals: CostTotals,
    pub by_model: BTreeMap<String, ModelCost>,
    /// Fully priced: every recorded model/tool has a configured rate.
    pub priced: bool,
    /// Some cost computed, but rates are missing for some identifiers.
    pub partially_priced: bool,
    pub missing_pricing_for: Vec<String>,
}

/// Per-run accumulator for token and tool-call usage.
#[derive(Debug, Default)]
pub struct CostTracker {
    by_model: BTreeMap<String, ModelTally>,
    web_search_calls: u64,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a usage record for `model`. Absent fields count as zero; a
    /// missing total defaults to `input + output`.
    pub fn record(&mut self, model: &str, usage: Option<&Usage>) {
        let (input, cached, output, reasoning, total) = match usage {
            Some(u) => (u.input_tokens, u.cached_input(), u.output_tokens, u.reasoning(), u.total()),
            None => (0, 0, 0, 0, 0),
        };
        let tally = self.by_model.entry(model.to_string()).or_default();
        tally.input += input;
        tally.cached_input += cached;
        tally.output += output;
        tally.reasoning += reasoning;
        tally.total += total;
    }

    pub fn record_web_search_call(&mut self) {
        self.web_search_calls += 1;
    }

    /// Compute totals and an estimated cost under `pricing`.
    pub fn summary(&self, pricing: &PricingTable) -> CostSummary {
        let mut by_model = BTreeMap::new();
        let mut totals = CostTotals {
            input_tokens: 0,
            cached_input_tokens: 0,
            output_tokens: 0,
            reasoning_tokens: 0,
            total_tokens: 0,
            web_search_calls: self.web_search_calls,
            cost_usd: None,
            tool_cost_usd: None,
        };
        let mut model_cost = 0.0_f64;
        let mut tool_cost = 0.0_f64;
        let mut missing = Vec::new();

        for (model, tally) in &self.by_model {
            totals.input_tokens += tally.input;
            totals.cached_input_tokens += tally.cached_input;
            totals.output_tokens += tally.output;
            totals.reasoning_tokens += tally.reasoning;
            totals.total_tokens += tally.total;

            let price = pricing
                .usd_per_1m_tokens
                .as_ref()
                .and_then(|table| table.get(model));
            let cost_usd = match price {
                Some(p) => {
                    let cached_rate = p.cached_input.unwrap_or(p.input);
                    let non_cached = tally.input.saturating_sub(tally.cached_input);
                    let cost = (non_cached as f64 * p.input
                        + tally.cached_input as f64 * cached_rate
                        + tally.output as f64 * p.output)
                        / 1_000_000.0;
                    model_cost += cost;
                    Some(cost)
                }
                None => {
                    missing.push(format!("model:{model}"));
                    None
                }
            };

            by_model.insert(
                model.clone(),
                ModelCost {
                    input_tokens: tally.input,
                    cached_input_tokens: tally.cached_input,
                    output_tokens: tally.output,
                    reasoning_tokens: tally.reasoning,
                    total_tokens: tally.total,
                    cost_usd,
                },
            );
        }

        // web_search carries a per-call fee that token usage does not capture.
        if self.web_search_calls > 0 {
            match pricing.web_search_usd_per_1k_calls {
                Some(rate) => tool_cost += self.web_search_calls as f64 * rate / 1000.0,
                None => missing.push("tool:web_search".to_string()),
            }
        }

        let have_any_pricing = pricing.usd_per_1m_tokens.is_some()
            || (pricing.web_search_usd_per_1k_calls.is_some() && self.web_search_calls > 0);
        let priced = have_any_pricing && missing.is_empty();
        let partially_priced =
            have_any_pricing && !missing.is_empty() && (model_cost + tool_cost) > 0.0;

        if have_any_pricing {
            totals.cost_usd = Some(model_cost + tool_cost);
            totals.tool_cost_usd = Some(tool_cost);
        }

        CostSummary {
            totals,
            by_model,
            priced,
            partially_priced,
            missing_pricing_for: missing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelPrice;
    use std::collections::HashMap;

    fn usage(input: u64, cached: u64, output: u64) -> Usage {
        Usage {
            input_tokens: input,
            input_tokens_details: crate::llm::InputTokenDetails { cached_tokens: cached },
            output_tokens: output,
            ..Default::default()
        }
    }

    fn pricing_for(model: &str, input: f64, output: f64, cached: Option<f64>) -> PricingTable {
        PricingTable {
            usd_per_1m_tokens: Some(HashMap::from([(
                model.to_string(),
                ModelPrice { input, output, cached_input: cached },
            )])),
            web_search_usd_per_1k_calls: Some(10.0),
        }
    }

    #[test]
    fn totals_sum_recorded_usage() {
        let mut tracker = CostTracker::new();
        tracker.record("m1", Some(&usage(100, 0, 50)));
        tracker.record("m1", Some(&usage(200, 0, 100)));
        tracker.record("m2", Some(&usage(10, 0, 5)));
        tracker.record("m2", None);

        let summary = tracker.summary(&PricingTable::default());
        assert_eq!(summary.totals.input_tokens, 310);
        assert_eq!(summary.totals.output_tokens, 155);
        assert_eq!(summary.totals.total_tokens, 465);
        assert_eq!(summary.by_model.len(), 2);
        assert_eq!(summary.by_model["m1"].total_tokens, 450);
    }

    #[test]
    fn unpriced_when_no_pricing_configured() {
        let mut tracker = CostTracker::new();
        tracker.record("m1", Some(&usage(100, 0, 50)));
        let summary = tracker.summary(&PricingTable::default());
        assert!(summary.totals.cost_usd.is_none());
        assert!(!summary.priced);
        assert!(!summary.partially_priced);
    }

    #[test]
    fn fully_priced_with_cached_input_discount() {
        let mut tracker = CostTracker::new();
        tracker.record("m1", Some(&usage(1_000_000, 400_000, 500_000)));
        let summary = tracker.summary(&pricing_for("m1", 2.0, 8.0, Some(0.5)));

        // 600k non-cached * $2 + 400k cached * $0.5 + 500k out * $8, per 1M.
        let expected = (600_000.0 * 2.0 + 400_000.0 * 0.5 + 500_000.0 * 8.0) / 1_000_000.0;
        let cost = summary.totals.cost_usd.unwrap();
        assert!((cost - expected).abs() < 1e-9);
        assert!(summary.priced);
        assert!(!summary.partially_priced);
        assert!(summary.missing_pricing_for.is_empty());
    }

    #[test]
    fn partially_priced_lists_missing_identifiers() {
        let mut tracker = CostTracker::new();
        tracker.record("priced-model", Some(&usage(1_000_000, 0, 0)));
        tracker.record("mystery-model", Some(&usage(500, 0, 500)));
        let summary = tracker.summary(&pricing_for("priced-model", 1.0, 1.0, None));

        assert!(!summary.priced);
        assert!(summary.partially_priced);
        assert_eq!(summary.missing_pricing_for, vec!["model:mystery-model"]);
        assert!(summary.totals.cost_usd.unwrap() > 0.0);
        assert!(summary.by_model["mystery-model"].cost_usd.is_none());
    }

    #[test]
    fn web_search_calls_are_priced_per_thousand() {
        let mut tracker = CostTracker::new();
        tracker.record_web_search_call();
        tracker.record_web_search_call();
        let pricing = PricingTable {
            usd_per_1m_tokens: None,
            web_search_usd_per_1k_calls: Some(10.0),
        };
        let summary = tracker.summary(&pricing);
        assert_eq!(summary.totals.web_search_calls, 2);
        assert!((summary.totals.tool_cost_usd.unwrap() - 0.02).abs() < 1e-12);
        assert!(summary.priced);
    }

    #[test]
    fn unpriced_web_search_is_reported_missing() {
        let mut tracker = CostTracker::new();
        tracker.record_web_search_call();
        let pricing = PricingTable {
            usd_per_1m_tokens: Some(HashMap::new()),
            web_search_usd_per_1k_calls: None,
        };
        let summary = tracker.summary(&pricing);
        assert!(!summary.priced);
        assert_eq!(summary.missing_pricing_for, vec!["tool:web_search"]);
    }
}
