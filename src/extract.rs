//! Structured extraction with a single self-repair retry.
//!
//! One low-temperature request to the cost-efficient model asks for JSON
//! only. If the output does not deserialize into the expected type, one
//! repair request re-submits the bad output; a second failure is
//! `ExtractionFailed`. There is no third attempt, which bounds both cost
//! and latency. Typed deserialization doubles as the schema-validation
//! layer: a payload of the wrong shape is treated the same as unparseable
//! JSON.

use std::sync::Mutex;

use serde::de::DeserializeOwned;

use crate::config::HarnessConfig;
use crate::cost::CostTracker;
use crate::error::HarnessError;
use crate::llm::{LlmClient, TextRequest, Usage};

fn record(cost: &Mutex<CostTracker>, model: &str, usage: Option<&Usage>) {
    let mut guard = cost.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    guard.record(model, usage);
}

fn parse<T: DeserializeOwned>(text: &str) -> Option<T> {
    serde_json::from_str(text.trim()).ok()
}

/// Extract a `T` from the model given an instruction and input text.
pub async fn extract_json<T: DeserializeOwned>(
    client: &dyn LlmClient,
    cfg: &HarnessConfig,
    cost: &Mutex<CostTracker>,
    instruction: &str,
    input: &str,
) -> Result<T, HarnessError> {
    let base = format!(
        "You are a JSON extractor.\n\
         Return JSON only. No prose, no markdown, no code fences.\n\
         If the input is ambiguous, choose the most reasonable interpretation and proceed.\n\
         \n\
         Instruction:\n{instruction}\n\
         \n\
         Input:\n{input}"
    );

    let first = client
        .respond(&TextRequest::new(&cfg.models.cheap, base).temperature(0.0))
        .await?;
    record(cost, &cfg.models.cheap, first.usage.as_ref());
    if let Some(value) = parse::<T>(&first.text) {
        return Ok(value);
    }

    tracing::warn!("structured extraction returned invalid JSON, attempting one repair");
    let repair = format!(
        "Fix the following into valid JSON that satisfies the instruction.\n\
         Return JSON only. No prose, no markdown, no code fences.\n\
         \n\
         Instruction:\n{instruction}\n\
         \n\
         Bad JSON:\n{}",
        first.text
    );

    let second = client
        .respond(&TextRequest::new(&cfg.models.cheap, repair).temperature(0.0))
        .await?;
    record(cost, &cfg.models.cheap, second.usage.as_ref());
    parse::<T>(&second.text).ok_or(HarnessError::ExtractionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Models, PricingTable};
    use crate::llm::{LlmError, ReasoningEffort, TextResponse};
    use async_trait::async_trait;
    use serde::Deserialize;
    use std::collections::VecDeque;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Shape {
        name: String,
        #[serde(default)]
        count: u32,
    }

    struct QueueClient {
        responses: Mutex<VecDeque<String>>,
        calls: Mutex<u32>,
    }

    impl QueueClient {
        fn new(responses: &[&str]) -> Self {
            Self {
                responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
                calls: Mutex::new(0),
            }
        }

        fn call_count(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl LlmClient for QueueClient {
        async fn respond(&self, _request: &TextRequest) -> Result<TextResponse, LlmError> {
            *self.calls.lock().unwrap() += 1;
            let text = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_default();
            Ok(TextResponse { id: "r".into(), text, usage: None, web_sources: vec![] })
        }
    }

    fn test_config() -> HarnessConfig {
        HarnessConfig {
            api_key: "sk-test".into(),
            models: Models { thinking: "thinking-model".into(), cheap: "cheap-model".into() },
            reasoning_effort: ReasoningEffort::Low,
            max_steps: 20,
            verbosity: 0,
            pretty: false,
            jsonl: true,
            pricing: PricingTable::default(),
        }
    }

    #[tokio::test]
    async fn valid_json_parses_on_first_attempt() {
        let client = QueueClient::new(&[r#"{"name": "a", "count": 2}"#]);
        let cost = Mutex::new(CostTracker::new());
        let shape: Shape = extract_json(&client, &test_config(), &cost, "inst", "in")
            .await
            .unwrap();
        assert_eq!(shape, Shape { name: "a".into(), count: 2 });
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn single_malformed_response_is_repaired() {
        let client = QueueClient::new(&["not json at all", r#"{"name": "fixed"}"#]);
        let cost = Mutex::new(CostTracker::new());
        let shape: Shape = extract_json(&client, &test_config(), &cost, "inst", "in")
            .await
            .unwrap();
        assert_eq!(shape.name, "fixed");
        assert_eq!(client.call_count(), 2);
    }

    #[tokio::test]
    async fn two_malformed_responses_fail_without_a_third_attempt() {
        let client = QueueClient::new(&["garbage", "still garbage", r#"{"name": "late"}"#]);
        let cost = Mutex::new(CostTracker::new());
        let result: Result<Shape, _> =
            extract_json(&client, &test_config(), &cost, "inst", "in").await;
        assert!(matches!(result, Err(HarnessError::ExtractionFailed)));
        assert_eq!(client.call_count(), 2);
    }

    #[tokio::test]
    async fn wrong_shape_counts_as_parse_failure() {
        // Valid JSON but missing the required field: repaired, then accepted.
        let client = QueueClient::new(&[r#"{"count": 1}"#, r#"{"name": "ok"}"#]);
        let cost = Mutex::new(CostTracker::new());
        let shape: Shape = extract_json(&client, &test_config(), &cost, "inst", "in")
            .await
            .unwrap();
        assert_eq!(shape.name, "ok");
        assert_eq!(client.call_count(), 2);
    }
}
