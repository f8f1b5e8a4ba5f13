//! The two tool capabilities available to plans: web evidence retrieval
//! and sandboxed python execution.
//!
//! Tool failures are data, not errors: a failed python run is recorded
//! with its exit code and stderr, and an empty search result is an empty
//! evidence list. Downstream critique/verification reacts to both.

mod python;
mod web_search;

pub use python::{run_python_sandboxed, PythonResult, DEFAULT_TIMEOUT_MS};
pub use web_search::{summarize_for_progress, web_search, WebSearchResult};
