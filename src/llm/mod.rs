//! Inference service boundary.
//!
//! This module provides a trait-based abstraction over the inference
//! backend, with the OpenAI Responses API as the primary implementation.
//! The orchestrator only ever sees [`TextRequest`]/[`TextResponse`]; token
//! usage fields may be absent or zero and the core must tolerate that.

mod error;
mod openai;

pub use error::{classify_http_status, LlmError, LlmErrorKind, RetryConfig};
pub use openai::OpenAiClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Reasoning effort level forwarded to models that support it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

impl std::str::FromStr for ReasoningEffort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(ReasoningEffort::Low),
            "medium" => Ok(ReasoningEffort::Medium),
            "high" => Ok(ReasoningEffort::High),
            other => Err(format!("unknown reasoning effort: {other}")),
        }
    }
}

/// A single text-in/text-out request to the inference service.
#[derive(Debug, Clone)]
pub struct TextRequest {
    pub model: String,
    pub input: String,
    /// Sampling temperature (0 = deterministic). Silently dropped for
    /// models that reject it.
    pub temperature: Option<f64>,
    pub reasoning_effort: Option<ReasoningEffort>,
    /// Enable the provider-hosted web search tool and source collection.
    pub web_search: bool,
}

impl TextRequest {
    pub fn new(model: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            input: input.into(),
            temperature: None,
            reasoning_effort: None,
            web_search: false,
        }
    }

    pub fn temperature(mut self, t: f64) -> Self {
        self.temperature = Some(t);
        self
    }

    pub fn reasoning(mut self, effort: ReasoningEffort) -> Self {
        self.reasoning_effort = Some(effort);
        self
    }

    pub fn with_web_search(mut self) -> Self {
        self.web_search = true;
        self
    }
}

/// Token counts nested under `input_tokens_details`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct InputTokenDetails {
    #[serde(default)]
    pub cached_tokens: u64,
}

/// Token counts nested under `output_tokens_details`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct OutputTokenDetails {
    #[serde(default)]
    pub reasoning_tokens: u64,
}

/// Usage block as reported by the provider. Every field is optional on the
/// wire; absent counts default to zero.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub input_tokens_details: InputTokenDetails,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub output_tokens_details: OutputTokenDetails,
    #[serde(default)]
    pub total_tokens: Option<u64>,
}

impl Usage {
    /// Total tokens, falling back to `input + output` when the provider
    /// does not report a separate total.
    pub fn total(&self) -> u64 {
        self.total_tokens
            .unwrap_or(self.input_tokens + self.output_tokens)
    }

    pub fn cached_input(&self) -> u64 {
        self.input_tokens_details.cached_tokens
    }

    pub fn reasoning(&self) -> u64 {
        self.output_tokens_details.reasoning_tokens
    }
}

/// A source surfaced by the hosted web-search tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSource {
    pub url: Option<String>,
    pub title: Option<String>,
    pub snippet: Option<String>,
}

/// Response from a text request.
#[derive(Debug, Clone)]
pub struct TextResponse {
    pub id: String,
    pub text: String,
    pub usage: Option<Usage>,
    /// Populated only when the request enabled web search.
    pub web_sources: Vec<WebSource>,
}

/// Trait for inference clients.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a single text request and await its completion.
    async fn respond(&self, request: &TextRequest) -> Result<TextResponse, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_total_falls_back_to_input_plus_output() {
        let usage = Usage {
            input_tokens: 100,
            output_tokens: 40,
            ..Default::default()
        };
        assert_eq!(usage.total(), 140);

        let reported = Usage {
            input_tokens: 100,
            output_tokens: 40,
            total_tokens: Some(150),
            ..Default::default()
        };
        assert_eq!(reported.total(), 150);
    }

    #[test]
    fn usage_tolerates_sparse_wire_payloads() {
        let usage: Usage = serde_json::from_str("{}").unwrap();
        assert_eq!(usage.total(), 0);
        assert_eq!(usage.cached_input(), 0);

        let usage: Usage = serde_json::from_str(
            r#"{"input_tokens": 7, "input_tokens_details": {"cached_tokens": 3}}"#,
        )
        .unwrap();
        assert_eq!(usage.input_tokens, 7);
        assert_eq!(usage.cached_input(), 3);
        assert_eq!(usage.total(), 7);
    }
}
