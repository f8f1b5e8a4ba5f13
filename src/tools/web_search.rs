//! Web evidence retrieval via the provider-hosted search tool.

use std::sync::Mutex;

use crate::config::HarnessConfig;
use crate::cost::CostTracker;
use crate::llm::{LlmClient, LlmError, ReasoningEffort, TextRequest};
use crate::types::EvidenceItem;

pub const DEFAULT_TOP_K: usize = 8;

#[derive(Debug, Clone)]
pub struct WebSearchResult {
    pub evidence: Vec<EvidenceItem>,
    pub summary: String,
}

/// Run one web search and mint evidence items from the returned sources,
/// capped at `top_k` (default 8). Records the tool call and token usage.
pub async fn web_search(
    client: &dyn LlmClient,
    cfg: &HarnessConfig,
    cost: &Mutex<CostTracker>,
    query: &str,
    top_k: Option<usize>,
) -> Result<WebSearchResult, LlmError> {
    {
        let mut guard = cost.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.record_web_search_call();
    }

    let request = TextRequest::new(
        &cfg.models.cheap,
        format!("Search the web for: {query}\nReturn a short, high-signal summary in plain text."),
    )
    .reasoning(ReasoningEffort::Low)
    .with_web_search();

    let response = client.respond(&request).await?;
    {
        let mut guard = cost.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.record(&cfg.models.cheap, response.usage.as_ref());
    }

    let fetched_at = chrono::Utc::now().to_rfc3339();
    let evidence = response
        .web_sources
        .into_iter()
        .take(top_k.unwrap_or(DEFAULT_TOP_K))
        .map(|source| EvidenceItem {
            id: format!("web_{}", uuid::Uuid::new_v4().simple()),
            url: source.url,
            title: source.title,
            snippet: source.snippet,
            fetched_at: fetched_at.clone(),
        })
        .collect();

    Ok(WebSearchResult { evidence, summary: response.text.trim().to_string() })
}

/// Best-effort one-sentence summary of a tool result for the progress log.
/// Failure degrades to a fallback string and never propagates.
pub async fn summarize_for_progress(
    client: &dyn LlmClient,
    cfg: &HarnessConfig,
    title: &str,
    raw: &str,
) -> String {
    let prompt = format!(
        "Summarize the following tool output in 1-2 sentences for a progress log.\n\
         Be concrete: include counts, key outcomes, and any errors.\n\
         \n\
         Title: {title}\n\
         \n\
         {raw}"
    );
    let request = TextRequest::new(&cfg.models.cheap, prompt).temperature(0.0);
    match client.respond(&request).await {
        Ok(response) => {
            let text = response.text.trim().to_string();
            if text.is_empty() {
                "No notable output.".to_string()
            } else {
                text
            }
        }
        Err(e) => {
            tracing::warn!("progress summarization failed: {e}");
            "No notable output.".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Models, PricingTable};
    use crate::llm::{TextResponse, Usage, WebSource};
    use async_trait::async_trait;

    struct SourcesClient {
        sources: usize,
        fail: bool,
    }

    #[async_trait]
    impl LlmClient for SourcesClient {
        async fn respond(&self, request: &TextRequest) -> Result<TextResponse, LlmError> {
            if self.fail {
                return Err(LlmError::network_error("offline".into()));
            }
            let web_sources = (0..self.sources)
                .map(|i| WebSource {
                    url: Some(format!("https://example.com/{i}")),
                    title: Some(format!("Result {i}")),
                    snippet: None,
                })
                .collect();
            Ok(TextResponse {
                id: "r".into(),
                text: if request.web_search { "summary".into() } else { String::new() },
                usage: Some(Usage { input_tokens: 5, output_tokens: 5, ..Default::default() }),
                web_sources,
            })
        }
    }

    fn test_config() -> HarnessConfig {
        HarnessConfig {
            api_key: "sk-test".into(),
            models: Models { thinking: "t".into(), cheap: "c".into() },
            reasoning_effort: ReasoningEffort::Low,
            max_steps: 20,
            verbosity: 0,
            pretty: false,
            jsonl: true,
            pricing: PricingTable::default(),
        }
    }

    #[tokio::test]
    async fn evidence_is_capped_at_top_k() {
        let client = SourcesClient { sources: 12, fail: false };
        let cost = Mutex::new(CostTracker::new());
        let result = web_search(&client, &test_config(), &cost, "query", None)
            .await
            .unwrap();
        assert_eq!(result.evidence.len(), DEFAULT_TOP_K);
        assert_eq!(result.summary, "summary");

        let result = web_search(&client, &test_config(), &cost, "query", Some(3))
            .await
            .unwrap();
        assert_eq!(result.evidence.len(), 3);

        // Two searches, each recorded.
        let summary = cost.lock().unwrap().summary(&PricingTable::default());
        assert_eq!(summary.totals.web_search_calls, 2);
        assert_eq!(summary.totals.total_tokens, 20);
    }

    #[tokio::test]
    async fn evidence_ids_are_unique() {
        let client = SourcesClient { sources: 5, fail: false };
        let cost = Mutex::new(CostTracker::new());
        let result = web_search(&client, &test_config(), &cost, "query", None)
            .await
            .unwrap();
        let mut ids: Vec<_> = result.evidence.iter().map(|e| e.id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 5);
    }

    #[tokio::test]
    async fn summarization_failure_degrades_to_fallback() {
        let client = SourcesClient { sources: 0, fail: true };
        let learned = summarize_for_progress(&client, &test_config(), "python", "raw").await;
        assert_eq!(learned, "No notable output.");

        let client = SourcesClient { sources: 0, fail: false };
        let learned = summarize_for_progress(&client, &test_config(), "python", "raw").await;
        assert_eq!(learned, "No notable output.");
    }
}
