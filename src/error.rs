//! Run-level error taxonomy.
//!
//! Tool failures and summarization failures are absorbed locally and
//! represented as data (see the `tools` module); everything here is fatal to
//! the run and propagates to the caller.

use crate::llm::LlmError;

/// Errors that abort a run.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// A stage attempted to consume a step beyond the configured maximum.
    /// Carries the label of the offending stage for diagnosis.
    #[error("step budget exceeded ({max}). Last step: {label}")]
    BudgetExceeded { label: String, max: u32 },

    /// Two structured-extraction attempts both failed to parse.
    #[error("failed to extract valid JSON from model output")]
    ExtractionFailed,

    /// Cancellation signal observed at a checkpoint. Distinguished from
    /// other failures so callers can treat it as a user-initiated stop.
    #[error("run aborted by cancellation signal")]
    Aborted,

    /// Transport-level failure talking to the inference service.
    #[error(transparent)]
    Llm(#[from] LlmError),
}

impl HarnessError {
    /// Whether this error represents a user-initiated stop.
    pub fn is_aborted(&self) -> bool {
        matches!(self, HarnessError::Aborted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_cancellation_counts_as_aborted() {
        assert!(HarnessError::Aborted.is_aborted());
        assert!(!HarnessError::ExtractionFailed.is_aborted());
        let budget = HarnessError::BudgetExceeded { label: "polish:C1".into(), max: 4 };
        assert!(!budget.is_aborted());
    }
}
