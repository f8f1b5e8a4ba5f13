//! Data model shared across pipeline stages.
//!
//! Everything the inference service returns is deserialized leniently:
//! optional collections default to empty so a structurally valid but sparse
//! payload still parses, while a missing required field (for example
//! `TaskSpec::recipe`) fails deserialization and surfaces as an extraction
//! failure.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// How much is riding on the answer. Drives candidate count and the
/// verification threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stakes {
    Low,
    Medium,
    High,
}

impl Stakes {
    /// Minimum acceptable review score before verification is forced.
    pub fn verification_threshold(&self) -> f64 {
        match self {
            Stakes::Low => 6.5,
            Stakes::Medium => 7.5,
            Stakes::High => 8.0,
        }
    }
}

impl fmt::Display for Stakes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stakes::Low => "low",
            Stakes::Medium => "medium",
            Stakes::High => "high",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Factual,
    Coding,
    Math,
    Writing,
    Planning,
    Research,
    Other,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TaskType::Factual => "factual",
            TaskType::Coding => "coding",
            TaskType::Math => "math",
            TaskType::Writing => "writing",
            TaskType::Planning => "planning",
            TaskType::Research => "research",
            TaskType::Other => "other",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Freeform,
    Json,
    Markdown,
    Code,
    Table,
    Other,
}

/// Execution recipe selected by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recipe {
    Direct,
    BestOfN,
    PlanExecuteVerify,
    RagCited,
}

impl fmt::Display for Recipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Recipe::Direct => "direct",
            Recipe::BestOfN => "best_of_n",
            Recipe::PlanExecuteVerify => "plan_execute_verify",
            Recipe::RagCited => "rag_cited",
        })
    }
}

/// Tool names the router may request. `None` is the literal "none" entry
/// the router emits when no tools are needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    WebSearch,
    Python,
    None,
}

/// Classification of the incoming request. Produced once per run by the
/// router and immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub task_type: TaskType,
    pub stakes: Stakes,
    #[serde(default)]
    pub tools_needed: Vec<ToolName>,
    pub output_format: OutputFormat,
    pub recipe: Recipe,
    #[serde(default)]
    pub clarification_needed: bool,
    #[serde(default)]
    pub clarification_questions: Vec<String>,
}

impl TaskSpec {
    /// Recipes that run the planner and executor.
    pub fn needs_tool_orchestration(&self) -> bool {
        matches!(self.recipe, Recipe::RagCited | Recipe::PlanExecuteVerify)
    }

    pub fn needs_web_search(&self) -> bool {
        self.tools_needed.contains(&ToolName::WebSearch)
    }

    /// Number of candidates to draft: best-of-N scales with stakes, every
    /// other recipe drafts one.
    pub fn candidate_count(&self) -> usize {
        if self.recipe != Recipe::BestOfN {
            return 1;
        }
        match self.stakes {
            Stakes::Low => 2,
            Stakes::Medium => 4,
            Stakes::High => 6,
        }
    }
}

/// One piece of retrieved web evidence. Immutable once created; ids are
/// unique within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    pub fetched_at: String,
}

/// Everything a stage needs to see: rules, the request, accumulated
/// evidence, and named artifacts. Grows monotonically across the run.
#[derive(Debug, Clone, Serialize)]
pub struct ContextPack {
    pub system_rules: String,
    pub user_rules: String,
    pub conversation_summary: String,
    pub retrieved_evidence: Vec<EvidenceItem>,
    pub artifacts: serde_json::Map<String, serde_json::Value>,
}

impl ContextPack {
    pub fn push_evidence(&mut self, more: Vec<EvidenceItem>) {
        self.retrieved_evidence.extend(more);
    }

    pub fn insert_artifact(&mut self, name: impl Into<String>, value: serde_json::Value) {
        self.artifacts.insert(name.into(), value);
    }

    /// Render evidence as a numbered block for prompts; `[E1]`, `[E2]`, ...
    /// match the citation markers candidates are asked to use.
    pub fn evidence_block(&self) -> String {
        if self.retrieved_evidence.is_empty() {
            return "No web evidence retrieved.".to_string();
        }
        self.retrieved_evidence
            .iter()
            .enumerate()
            .map(|(idx, e)| {
                let label = e
                    .title
                    .as_deref()
                    .or(e.url.as_deref())
                    .unwrap_or("untitled");
                let mut bits = vec![format!("[E{}] {}", idx + 1, label)];
                if let Some(url) = &e.url {
                    bits.push(format!("URL: {url}"));
                }
                if let Some(snippet) = &e.snippet {
                    bits.push(format!("Snippet: {snippet}"));
                }
                bits.join("\n")
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// A tool invocation requested by a plan step. The tool name is kept as a
/// raw string: model output is not guaranteed, and unrecognized names must
/// be skippable rather than a parse failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanToolCall {
    pub tool: String,
    #[serde(default)]
    pub input: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub step_id: String,
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub tool_call: Option<PlanToolCall>,
    #[serde(default)]
    pub expected_artifact: String,
    #[serde(default)]
    pub stop_condition: String,
}

impl PlanStep {
    /// Key under which this step's result is recorded; falls back to the
    /// step id when no artifact name was declared.
    pub fn artifact_key(&self) -> &str {
        if self.expected_artifact.is_empty() {
            &self.step_id
        } else {
            &self.expected_artifact
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub plan: Vec<PlanStep>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub risks: Vec<String>,
}

/// A draft answer. Repair and polish replace the text but keep identity.
#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub id: String,
    pub draft_text: String,
    /// Snapshot of the evidence accumulated at generation time.
    pub citations: Vec<EvidenceItem>,
}

/// Follow-up tool invocation a critic may request (currently web_search
/// only; the tool name stays a string for the same reason as plan steps).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequest {
    pub tool: String,
    #[serde(default)]
    pub input: ToolRequestInput,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolRequestInput {
    #[serde(default)]
    pub query: String,
    #[serde(default, rename = "topK", alias = "top_k")]
    pub top_k: Option<u32>,
}

/// Critic output: weighted quality dimensions plus issue lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    #[serde(default)]
    pub overall_score: f64,
    #[serde(default)]
    pub subscores: BTreeMap<String, f64>,
    #[serde(default)]
    pub major_issues: Vec<String>,
    #[serde(default)]
    pub minor_issues: Vec<String>,
    #[serde(default)]
    pub recommended_repairs: Vec<String>,
    #[serde(default)]
    pub verification_targets: Vec<String>,
    #[serde(default)]
    pub tool_requests: Vec<ToolRequest>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimStatus {
    Supported,
    Unsupported,
    Unclear,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifiedClaim {
    pub claim: String,
    pub status: ClaimStatus,
    #[serde(default)]
    pub evidence_ref: Option<String>,
}

/// Verifier output: per-claim status against retrieved evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verification {
    #[serde(default)]
    pub verified: Vec<VerifiedClaim>,
    #[serde(default)]
    pub required_edits: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_count_scales_with_stakes_for_best_of_n() {
        let mut spec: TaskSpec = serde_json::from_value(serde_json::json!({
            "task_type": "factual",
            "stakes": "low",
            "tools_needed": ["none"],
            "output_format": "freeform",
            "recipe": "best_of_n",
            "clarification_needed": false,
            "clarification_questions": []
        }))
        .unwrap();
        assert_eq!(spec.candidate_count(), 2);
        spec.stakes = Stakes::Medium;
        assert_eq!(spec.candidate_count(), 4);
        spec.stakes = Stakes::High;
        assert_eq!(spec.candidate_count(), 6);
        spec.recipe = Recipe::Direct;
        assert_eq!(spec.candidate_count(), 1);
    }

    #[test]
    fn task_spec_missing_recipe_fails_to_parse() {
        let result: Result<TaskSpec, _> = serde_json::from_value(serde_json::json!({
            "task_type": "factual",
            "stakes": "low",
            "output_format": "freeform"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn plan_step_artifact_key_falls_back_to_step_id() {
        let step: PlanStep = serde_json::from_value(serde_json::json!({
            "step_id": "S1",
            "goal": "look something up"
        }))
        .unwrap();
        assert_eq!(step.artifact_key(), "S1");
        assert!(step.tool_call.is_none());

        let step: PlanStep = serde_json::from_value(serde_json::json!({
            "step_id": "S2",
            "goal": "fetch",
            "expected_artifact": "news",
            "tool_call": {"tool": "web_search", "input": {"query": "latest"}}
        }))
        .unwrap();
        assert_eq!(step.artifact_key(), "news");
    }

    #[test]
    fn sparse_review_parses_with_defaults() {
        let review: Review = serde_json::from_str(r#"{"overall_score": 7.0}"#).unwrap();
        assert_eq!(review.overall_score, 7.0);
        assert!(review.subscores.is_empty());
        assert!(review.tool_requests.is_empty());
    }

    #[test]
    fn evidence_block_numbers_items_in_order() {
        let ctx = ContextPack {
            system_rules: String::new(),
            user_rules: String::new(),
            conversation_summary: String::new(),
            retrieved_evidence: vec![
                EvidenceItem {
                    id: "a".into(),
                    url: Some("https://one.example".into()),
                    title: Some("One".into()),
                    snippet: Some("first".into()),
                    fetched_at: "2026-01-01T00:00:00Z".into(),
                },
                EvidenceItem {
                    id: "b".into(),
                    url: None,
                    title: None,
                    snippet: None,
                    fetched_at: "2026-01-01T00:00:00Z".into(),
                },
            ],
            artifacts: serde_json::Map::new(),
        };
        let block = ctx.evidence_block();
        assert!(block.starts_with("[E1] One"));
        assert!(block.contains("[E2] untitled"));
        assert!(block.contains("Snippet: first"));
    }

    #[test]
    fn verification_thresholds_by_stakes() {
        assert_eq!(Stakes::Low.verification_threshold(), 6.5);
        assert_eq!(Stakes::Medium.verification_threshold(), 7.5);
        assert_eq!(Stakes::High.verification_threshold(), 8.0);
    }
}
