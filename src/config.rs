//! Environment-backed configuration.
//!
//! The configuration surface is deliberately small: model identifiers,
//! reasoning effort, the step ceiling, progress verbosity, and the price
//! table used for cost estimation. Anything invalid is fatal at startup.

use std::collections::HashMap;

use serde::Deserialize;

use crate::llm::ReasoningEffort;

/// USD per 1M tokens for one model.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ModelPrice {
    pub input: f64,
    pub output: f64,
    #[serde(default)]
    pub cached_input: Option<f64>,
}

/// Price table covering models and the web-search per-call fee.
#[derive(Debug, Clone, Default)]
pub struct PricingTable {
    /// USD per 1M tokens by model id. `None` means no model pricing at all.
    pub usd_per_1m_tokens: Option<HashMap<String, ModelPrice>>,
    /// USD per 1K web_search tool calls.
    pub web_search_usd_per_1k_calls: Option<f64>,
}

/// Model identifiers by role.
#[derive(Debug, Clone)]
pub struct Models {
    /// Primary drafting/repair model.
    pub thinking: String,
    /// Cost-efficient model for extraction, search, summaries, and polish.
    pub cheap: String,
}

/// Per-run configuration.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub api_key: String,
    pub models: Models,
    pub reasoning_effort: ReasoningEffort,
    pub max_steps: u32,
    pub verbosity: u8,
    /// Pretty-print progress instead of JSONL.
    pub pretty: bool,
    pub jsonl: bool,
    pub pricing: PricingTable,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("OPENAI_API_KEY is required")]
    MissingApiKey,
    #[error("invalid {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

fn default_pricing() -> HashMap<String, ModelPrice> {
    // Keep in sync with the provider's published per-1M-token rates;
    // override with HARNESS_PRICING_USD_PER_1M_TOKENS_JSON.
    HashMap::from([
        (
            "gpt-5.2".to_string(),
            ModelPrice { input: 1.75, output: 14.0, cached_input: Some(0.175) },
        ),
        (
            "gpt-5-mini".to_string(),
            ModelPrice { input: 0.25, output: 2.0, cached_input: Some(0.025) },
        ),
    ])
}

impl HarnessConfig {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_key = lookup("OPENAI_API_KEY")
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)?;

        let models = Models {
            thinking: lookup("HARNESS_MODEL_THINKING").unwrap_or_else(|| "gpt-5.2".to_string()),
            cheap: lookup("HARNESS_MODEL_CHEAP").unwrap_or_else(|| "gpt-5-mini".to_string()),
        };

        let reasoning_effort = match lookup("HARNESS_REASONING_EFFORT") {
            Some(raw) => raw.parse().map_err(|reason| ConfigError::Invalid {
                name: "HARNESS_REASONING_EFFORT",
                reason,
            })?,
            None => ReasoningEffort::High,
        };

        let max_steps = match lookup("HARNESS_MAX_STEPS") {
            Some(raw) => raw.trim().parse::<u32>().ok().filter(|n| *n > 0).ok_or(
                ConfigError::Invalid {
                    name: "HARNESS_MAX_STEPS",
                    reason: format!("expected a positive integer, got {raw:?}"),
                },
            )?,
            None => 20,
        };

        let verbosity = lookup("HARNESS_VERBOSITY")
            .and_then(|raw| raw.trim().parse::<u8>().ok())
            .filter(|v| *v <= 3)
            .unwrap_or(0);

        let jsonl = lookup("HARNESS_JSONL")
            .map(|raw| raw == "1" || raw.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let usd_per_1m_tokens = match lookup("HARNESS_PRICING_USD_PER_1M_TOKENS_JSON") {
            Some(raw) if !raw.trim().is_empty() => {
                let parsed: HashMap<String, ModelPrice> =
                    serde_json::from_str(raw.trim()).map_err(|e| ConfigError::Invalid {
                        name: "HARNESS_PRICING_USD_PER_1M_TOKENS_JSON",
                        reason: e.to_string(),
                    })?;
                Some(parsed)
            }
            _ => Some(default_pricing()),
        };

        let web_search_usd_per_1k_calls = match lookup("HARNESS_WEB_SEARCH_USD_PER_1K_CALLS") {
            Some(raw) if !raw.trim().is_empty() => {
                let n: f64 = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                    name: "HARNESS_WEB_SEARCH_USD_PER_1K_CALLS",
                    reason: format!("expected a non-negative number, got {raw:?}"),
                })?;
                if n < 0.0 {
                    return Err(ConfigError::Invalid {
                        name: "HARNESS_WEB_SEARCH_USD_PER_1K_CALLS",
                        reason: "must be non-negative".to_string(),
                    });
                }
                Some(n)
            }
            _ => Some(10.0),
        };

        Ok(Self {
            api_key,
            models,
            reasoning_effort,
            max_steps,
            verbosity,
            pretty: !jsonl,
            jsonl,
            pricing: PricingTable {
                usd_per_1m_tokens,
                web_search_usd_per_1k_calls,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |name| {
            pairs
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn minimal_env_uses_defaults() {
        let cfg = HarnessConfig::from_lookup(env(&[("OPENAI_API_KEY", "sk-test")])).unwrap();
        assert_eq!(cfg.models.thinking, "gpt-5.2");
        assert_eq!(cfg.models.cheap, "gpt-5-mini");
        assert_eq!(cfg.max_steps, 20);
        assert_eq!(cfg.reasoning_effort, ReasoningEffort::High);
        assert_eq!(cfg.pricing.web_search_usd_per_1k_calls, Some(10.0));
        let table = cfg.pricing.usd_per_1m_tokens.unwrap();
        assert!(table.contains_key("gpt-5.2"));
        assert!(table.contains_key("gpt-5-mini"));
    }

    #[test]
    fn missing_api_key_is_fatal() {
        assert!(matches!(
            HarnessConfig::from_lookup(env(&[])),
            Err(ConfigError::MissingApiKey)
        ));
    }

    #[test]
    fn pricing_override_parses_json() {
        let cfg = HarnessConfig::from_lookup(env(&[
            ("OPENAI_API_KEY", "sk-test"),
            (
                "HARNESS_PRICING_USD_PER_1M_TOKENS_JSON",
                r#"{"my-model":{"input":1.0,"output":2.0}}"#,
            ),
            ("HARNESS_MAX_STEPS", "7"),
        ]))
        .unwrap();
        assert_eq!(cfg.max_steps, 7);
        let table = cfg.pricing.usd_per_1m_tokens.unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table["my-model"].output, 2.0);
        assert!(table["my-model"].cached_input.is_none());
    }

    #[test]
    fn invalid_max_steps_is_rejected() {
        let result = HarnessConfig::from_lookup(env(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("HARNESS_MAX_STEPS", "0"),
        ]));
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }
}
