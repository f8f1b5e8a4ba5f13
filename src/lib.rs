//! # Quorum
//!
//! An answer-production harness that spends a bounded step budget on
//! routing, tool use, multi-candidate drafting, critique, verification,
//! and polish to produce one high-quality answer.
//!
//! ```text
//!   user input
//!       │
//!       ▼
//!   ┌────────┐   ┌─────────┐   ┌──────────┐
//!   │ ROUTE  │──▶│ PLAN +  │──▶│ GENERATE │──▶ SELECT ──▶ VERIFY ──▶ POLISH
//!   └────────┘   │ EXECUTE │   │ CRITIQUE │              REPAIR
//!                └─────────┘   │   x N    │
//!                 (optional)   └──────────┘
//! ```
//!
//! Every stage registers against a hard step budget before doing work, and
//! every inference call is tallied into a per-model cost ledger. Progress
//! is an append-only event stream consumed by pluggable sinks.
//!
//! ## Modules
//! - `harness`: the run state machine and candidate selection
//! - `llm`: provider client, retry policy, and the `LlmClient` seam
//! - `tools`: web search and sandboxed python execution
//! - `budget` / `cost`: step accounting and token/cost accounting
//! - `progress`: event stream, console and JSONL rendering

pub mod budget;
pub mod config;
pub mod cost;
pub mod error;
pub mod extract;
pub mod harness;
pub mod llm;
pub mod progress;
pub mod prompts;
pub mod tools;
pub mod types;

pub use config::HarnessConfig;
pub use error::HarnessError;
pub use harness::{run, RunArgs, RunOutcome};
