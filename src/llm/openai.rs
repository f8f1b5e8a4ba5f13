//! OpenAI Responses API client with automatic retry for transient errors.

use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::error::{classify_http_status, LlmError, LlmErrorKind, RetryConfig};
use super::{LlmClient, ReasoningEffort, TextRequest, TextResponse, Usage, WebSource};

const OPENAI_RESPONSES_URL: &str = "https://api.openai.com/v1/responses";

/// Some model families reject the `temperature` parameter outright.
fn supports_temperature(model: &str, effort: Option<ReasoningEffort>) -> bool {
    let m = model.to_ascii_lowercase();
    if m.starts_with("gpt-5.2") || m.starts_with("gpt-5.1") {
        return effort.is_none();
    }
    if m.starts_with("gpt-5") {
        return false;
    }
    true
}

/// Client for the OpenAI Responses API.
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
    retry_config: RetryConfig,
}

impl OpenAiClient {
    /// Create a new client with default retry configuration.
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: OPENAI_RESPONSES_URL.to_string(),
            retry_config: RetryConfig::default(),
        }
    }

    /// Create a new client with custom retry configuration.
    pub fn with_retry_config(api_key: String, retry_config: RetryConfig) -> Self {
        Self {
            retry_config,
            ..Self::new(api_key)
        }
    }

    /// Point the client at a different endpoint (proxies, test servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build_body(request: &TextRequest) -> serde_json::Value {
        let mut body = json!({
            "model": request.model,
            "input": request.input,
        });
        if let Some(t) = request.temperature {
            if supports_temperature(&request.model, request.reasoning_effort) {
                body["temperature"] = json!(t);
            }
        }
        if let Some(effort) = request.reasoning_effort {
            body["reasoning"] = json!({ "effort": effort });
        }
        if request.web_search {
            body["tools"] = json!([{ "type": "web_search" }]);
            body["include"] = json!(["web_search_call.action.sources"]);
        }
        body
    }

    fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<std::time::Duration> {
        headers
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok().map(std::time::Duration::from_secs))
    }

    fn create_error(
        status: reqwest::StatusCode,
        body: &str,
        retry_after: Option<std::time::Duration>,
    ) -> LlmError {
        let status_code = status.as_u16();
        match classify_http_status(status_code) {
            LlmErrorKind::RateLimited => LlmError::rate_limited(body.to_string(), retry_after),
            LlmErrorKind::ClientError => LlmError::client_error(status_code, body.to_string()),
            _ => LlmError::server_error(status_code, body.to_string()),
        }
    }

    async fn execute_request(&self, body: &serde_json::Value) -> Result<TextResponse, LlmError> {
        let response = match self
            .client
            .post(&self.base_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                return if e.is_timeout() {
                    Err(LlmError::network_error(format!("Request timeout: {e}")))
                } else if e.is_connect() {
                    Err(LlmError::network_error(format!("Connection failed: {e}")))
                } else {
                    Err(LlmError::network_error(format!("Request failed: {e}")))
                };
            }
        };

        let status = response.status();
        let retry_after = Self::parse_retry_after(response.headers());
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(Self::create_error(status, &text, retry_after));
        }

        let parsed: ApiResponse = serde_json::from_str(&text).map_err(|e| {
            LlmError::parse_error(format!("Failed to parse response: {e}, body: {text}"))
        })?;

        Ok(parsed.into_text_response())
    }

    async fn execute_with_retry(
        &self,
        body: &serde_json::Value,
    ) -> Result<TextResponse, LlmError> {
        let start = Instant::now();
        let mut attempt = 0;

        loop {
            match self.execute_request(body).await {
                Ok(response) => {
                    if attempt > 0 {
                        tracing::info!(
                            "Request succeeded after {} retries (total time: {:?})",
                            attempt,
                            start.elapsed()
                        );
                    }
                    return Ok(response);
                }
                Err(error) => {
                    let should_retry = self.retry_config.should_retry(&error)
                        && attempt < self.retry_config.max_retries;

                    if !should_retry {
                        tracing::error!("Request failed (non-retryable or exhausted): {error}");
                        return Err(error);
                    }

                    let delay = error.suggested_delay(attempt);
                    let remaining = self
                        .retry_config
                        .max_retry_duration
                        .saturating_sub(start.elapsed());
                    let actual_delay = delay.min(remaining);
                    if actual_delay.is_zero() {
                        tracing::warn!(
                            "Retry attempt {} failed, no time remaining: {error}",
                            attempt + 1
                        );
                        return Err(error);
                    }

                    tracing::warn!(
                        "Retry attempt {} failed with {}, retrying in {:?}: {}",
                        attempt + 1,
                        error.kind,
                        actual_delay,
                        error.message
                    );
                    tokio::time::sleep(actual_delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn respond(&self, request: &TextRequest) -> Result<TextResponse, LlmError> {
        tracing::debug!("Sending request to OpenAI: model={}", request.model);
        let body = Self::build_body(request);
        self.execute_with_retry(&body).await
    }
}

/// Responses API wire format (the subset this crate reads).
#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    output: Vec<OutputItem>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    content: Vec<ContentItem>,
    #[serde(default)]
    action: Option<SearchAction>,
}

#[derive(Debug, Deserialize)]
struct ContentItem {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct SearchAction {
    #[serde(default)]
    sources: Vec<ApiSource>,
}

#[derive(Debug, Deserialize, Serialize)]
struct ApiSource {
    url: Option<String>,
    title: Option<String>,
    snippet: Option<String>,
}

impl ApiResponse {
    fn into_text_response(self) -> TextResponse {
        let mut text = String::new();
        let mut web_sources = Vec::new();

        for item in self.output {
            match item.kind.as_str() {
                "message" => {
                    for part in item.content {
                        if part.kind == "output_text" {
                            text.push_str(&part.text);
                        }
                    }
                }
                "web_search_call" => {
                    if let Some(action) = item.action {
                        for s in action.sources {
                            if s.url.is_none() {
                                continue;
                            }
                            web_sources.push(WebSource {
                                url: s.url,
                                title: s.title,
                                snippet: s.snippet,
                            });
                        }
                    }
                }
                // Reasoning items and anything else are not surfaced.
                _ => {}
            }
        }

        TextResponse {
            id: self.id,
            text,
            usage: self.usage,
            web_sources,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temperature_support_by_model_family() {
        assert!(!supports_temperature("gpt-5.2", Some(ReasoningEffort::High)));
        assert!(supports_temperature("gpt-5.2", None));
        assert!(!supports_temperature("gpt-5-mini", None));
        assert!(supports_temperature("gpt-4o", Some(ReasoningEffort::Low)));
    }

    #[test]
    fn body_omits_temperature_for_models_that_reject_it() {
        let req = TextRequest::new("gpt-5-mini", "hello").temperature(0.0);
        let body = OpenAiClient::build_body(&req);
        assert!(body.get("temperature").is_none());

        let req = TextRequest::new("gpt-4o", "hello").temperature(0.0);
        let body = OpenAiClient::build_body(&req);
        assert_eq!(body["temperature"], 0.0);
    }

    #[test]
    fn body_enables_hosted_web_search() {
        let req = TextRequest::new("gpt-5-mini", "q").with_web_search();
        let body = OpenAiClient::build_body(&req);
        assert_eq!(body["tools"][0]["type"], "web_search");
        assert_eq!(body["include"][0], "web_search_call.action.sources");
    }

    #[test]
    fn wire_response_collects_text_and_sources() {
        let raw = serde_json::json!({
            "id": "resp_1",
            "output": [
                {
                    "type": "web_search_call",
                    "action": { "sources": [
                        { "url": "https://example.com", "title": "Example", "snippet": "snip" },
                        { "title": "no url, skipped" }
                    ]}
                },
                {
                    "type": "message",
                    "content": [
                        { "type": "output_text", "text": "Hello " },
                        { "type": "output_text", "text": "world" }
                    ]
                }
            ],
            "usage": { "input_tokens": 10, "output_tokens": 5 }
        });
        let parsed: ApiResponse = serde_json::from_value(raw).unwrap();
        let resp = parsed.into_text_response();
        assert_eq!(resp.text, "Hello world");
        assert_eq!(resp.web_sources.len(), 1);
        assert_eq!(resp.web_sources[0].url.as_deref(), Some("https://example.com"));
        assert_eq!(resp.usage.unwrap().total(), 15);
    }
}
