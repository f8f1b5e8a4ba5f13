//! Progress reporting: an append-only stream of lifecycle events.
//!
//! The orchestrator's correctness never depends on whether anything
//! observes this stream; sinks may render it pretty-printed, one JSON
//! record per line, or discard it.

use std::io::Write;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use serde::Serialize;

use crate::cost::CostSummary;

/// Running cost snapshot attached to every event.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CostSoFar {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    pub priced: bool,
    pub partially_priced: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_pricing_for: Vec<String>,
}

impl From<&CostSummary> for CostSoFar {
    fn from(summary: &CostSummary) -> Self {
        Self {
            cost_usd: summary.totals.cost_usd,
            priced: summary.priced,
            partially_priced: summary.partially_priced,
            missing_pricing_for: summary.missing_pricing_for.clone(),
        }
    }
}

/// Token totals reported at run end.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RunUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RunUsageDetails {
    pub cached_input_tokens: u64,
    pub reasoning_tokens: u64,
    pub web_search_calls: u64,
}

/// The closed set of lifecycle events a run emits, in order.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    RunStart {
        input: String,
        completed_steps: u32,
        estimated_total_steps: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        cost: Option<CostSoFar>,
    },
    StepStart {
        step_id: String,
        title: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
        completed_steps: u32,
        estimated_total_steps: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        cost: Option<CostSoFar>,
    },
    StepEnd {
        step_id: String,
        title: String,
        learned: String,
        completed_steps: u32,
        estimated_total_steps: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        cost: Option<CostSoFar>,
    },
    StepDetail {
        step_id: String,
        title: String,
        /// Verbosity level (1..=3) this line belongs to.
        level: u8,
        message: String,
        completed_steps: u32,
        estimated_total_steps: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        cost: Option<CostSoFar>,
    },
    BudgetUpdate {
        remaining_steps: u32,
        completed_steps: u32,
        estimated_total_steps: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        cost: Option<CostSoFar>,
    },
    RunEnd {
        final_answer_chars: usize,
        completed_steps: u32,
        estimated_total_steps: u32,
        usage: RunUsage,
        usage_details: RunUsageDetails,
        #[serde(skip_serializing_if = "Option::is_none")]
        cost_usd: Option<f64>,
        priced: bool,
        partially_priced: bool,
        missing_pricing_for: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        cost: Option<CostSoFar>,
    },
}

impl ProgressEvent {
    pub fn completed_steps(&self) -> u32 {
        match self {
            ProgressEvent::RunStart { completed_steps, .. }
            | ProgressEvent::StepStart { completed_steps, .. }
            | ProgressEvent::StepEnd { completed_steps, .. }
            | ProgressEvent::StepDetail { completed_steps, .. }
            | ProgressEvent::BudgetUpdate { completed_steps, .. }
            | ProgressEvent::RunEnd { completed_steps, .. } => *completed_steps,
        }
    }

    pub fn estimated_total_steps(&self) -> u32 {
        match self {
            ProgressEvent::RunStart { estimated_total_steps, .. }
            | ProgressEvent::StepStart { estimated_total_steps, .. }
            | ProgressEvent::StepEnd { estimated_total_steps, .. }
            | ProgressEvent::StepDetail { estimated_total_steps, .. }
            | ProgressEvent::BudgetUpdate { estimated_total_steps, .. }
            | ProgressEvent::RunEnd { estimated_total_steps, .. } => *estimated_total_steps,
        }
    }

    pub fn set_cost(&mut self, snapshot: CostSoFar) {
        match self {
            ProgressEvent::RunStart { cost, .. }
            | ProgressEvent::StepStart { cost, .. }
            | ProgressEvent::StepEnd { cost, .. }
            | ProgressEvent::StepDetail { cost, .. }
            | ProgressEvent::BudgetUpdate { cost, .. }
            | ProgressEvent::RunEnd { cost, .. } => *cost = Some(snapshot),
        }
    }

    pub fn cost(&self) -> Option<&CostSoFar> {
        match self {
            ProgressEvent::RunStart { cost, .. }
            | ProgressEvent::StepStart { cost, .. }
            | ProgressEvent::StepEnd { cost, .. }
            | ProgressEvent::StepDetail { cost, .. }
            | ProgressEvent::BudgetUpdate { cost, .. }
            | ProgressEvent::RunEnd { cost, .. } => cost.as_ref(),
        }
    }
}

/// Sink for the ordered event stream.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Sink that discards everything.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _event: ProgressEvent) {}
}

fn truncate(s: &str, max_chars: usize) -> String {
    let t = s.trim();
    if t.chars().count() <= max_chars {
        return t.to_string();
    }
    let keep = max_chars.saturating_sub(14);
    let cut: String = t.chars().take(keep).collect();
    format!("{} ...(truncated)", cut.trim_end())
}

fn format_elapsed(secs: u64) -> String {
    let s = secs % 60;
    let m = (secs / 60) % 60;
    let h = secs / 3600;
    if h > 0 {
        format!("{h}h{m:02}m{s:02}s")
    } else if m > 0 {
        format!("{m}m{s:02}s")
    } else {
        format!("{s}s")
    }
}

fn format_usd_label(cost_usd: f64) -> String {
    if !cost_usd.is_finite() || cost_usd < 0.0 {
        return String::new();
    }
    if cost_usd > 0.0 && cost_usd < 0.01 {
        return "$<0.01".to_string();
    }
    format!("${cost_usd:.2}")
}

/// Raw completion percentage for one event, before monotonic clamping.
fn raw_percent(event: &ProgressEvent) -> u32 {
    match event {
        ProgressEvent::RunStart { .. } => 0,
        ProgressEvent::RunEnd { .. } => 100,
        _ => {
            let estimated = event.estimated_total_steps().max(1);
            let pct = (event.completed_steps() as f64 / estimated as f64 * 100.0).round() as u32;
            pct.min(100)
        }
    }
}

/// Console renderer: pretty lines to stderr, or one JSON record per line
/// to stdout. The displayed percentage never goes backwards, even when the
/// total-step estimate is revised upward mid-run.
pub struct ConsoleSink {
    pretty: bool,
    jsonl: bool,
    verbosity: u8,
    start: Instant,
    last_pct: AtomicU32,
}

impl ConsoleSink {
    pub fn new(pretty: bool, jsonl: bool, verbosity: u8) -> Self {
        Self {
            pretty,
            jsonl,
            verbosity,
            start: Instant::now(),
            last_pct: AtomicU32::new(0),
        }
    }

    fn next_percent(&self, event: &ProgressEvent) -> u32 {
        let pct = raw_percent(event).max(self.last_pct.load(Ordering::Relaxed));
        self.last_pct.store(pct, Ordering::Relaxed);
        pct
    }
}

#[derive(Serialize)]
struct JsonLine<'a> {
    #[serde(flatten)]
    event: &'a ProgressEvent,
    elapsed_ms: u128,
}

impl ProgressSink for ConsoleSink {
    fn emit(&self, event: ProgressEvent) {
        let elapsed = self.start.elapsed();
        if self.jsonl || !self.pretty {
            let line = JsonLine { event: &event, elapsed_ms: elapsed.as_millis() };
            if let Ok(json) = serde_json::to_string(&line) {
                let mut stdout = std::io::stdout().lock();
                let _ = writeln!(stdout, "{json}");
            }
            return;
        }

        let pct = self.next_percent(&event);
        let cost_label = event
            .cost()
            .and_then(|c| c.cost_usd)
            .map(format_usd_label)
            .filter(|s| !s.is_empty())
            .map(|s| format!("[{s}]"))
            .unwrap_or_default();
        let prefix = format!(
            "[{pct:>3}%][{:>8}]{cost_label}",
            format_elapsed(elapsed.as_secs())
        );

        match event {
            ProgressEvent::RunStart { input, .. } => {
                eprintln!("{prefix} starting: {input}");
            }
            ProgressEvent::StepStart { step_id, title, detail, .. } => {
                let id = if self.verbosity >= 2 { format!(" [{step_id}]") } else { String::new() };
                let detail = detail.map(|d| format!(" ({d})")).unwrap_or_default();
                eprintln!("{prefix} -> {title}{id}{detail}");
            }
            ProgressEvent::StepEnd { step_id, title, learned, .. } => {
                let id = if self.verbosity >= 2 { format!(" [{step_id}]") } else { String::new() };
                eprintln!("{prefix} <- {title}{id}: {learned}");
            }
            ProgressEvent::StepDetail { title, level, message, .. } => {
                if self.verbosity < level {
                    return;
                }
                let max = match self.verbosity {
                    1 => 400,
                    2 => 1400,
                    _ => 4500,
                };
                let msg = truncate(&message, max);
                if msg.is_empty() {
                    return;
                }
                eprintln!("{prefix}    {title} [v{level}]: {msg}");
            }
            ProgressEvent::BudgetUpdate { remaining_steps, .. } => {
                eprintln!("{prefix} budget: {remaining_steps} steps remaining");
            }
            ProgressEvent::RunEnd {
                final_answer_chars,
                usage,
                usage_details,
                cost_usd,
                priced,
                partially_priced,
                missing_pricing_for,
                ..
            } => {
                let tokens = format!(
                    ", tokens={} (in={}, out={}), cached_in={}, reasoning={}, web_search_calls={}",
                    usage.total_tokens,
                    usage.input_tokens,
                    usage.output_tokens,
                    usage_details.cached_input_tokens,
                    usage_details.reasoning_tokens,
                    usage_details.web_search_calls,
                );
                let cost = match (priced, partially_priced, cost_usd) {
                    (true, _, Some(c)) => format!(", cost=${c:.4}"),
                    (false, true, Some(c)) => {
                        format!(", cost~${c:.4} (partial; missing {})", missing_pricing_for.join(", "))
                    }
                    _ => ", cost=unpriced".to_string(),
                };
                eprintln!("{prefix} done ({final_answer_chars} chars{tokens}{cost})");
            }
        }
    }
}
