//! Step budget: a monotonically-incrementing counter with a fixed ceiling.
//!
//! Every unit of orchestration work registers against the budget *before*
//! performing its externally-visible work, so accounting reflects real
//! cost-incurring operations rather than bookkeeping.

use crate::error::HarnessError;

/// Point-in-time view of the budget. A pure read; never mutates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetSnapshot {
    pub used: u32,
    pub remaining: u32,
    pub max: u32,
}

/// Per-run step counter with a hard ceiling.
#[derive(Debug)]
pub struct StepBudget {
    used: u32,
    max: u32,
}

impl StepBudget {
    pub fn new(max_steps: u32) -> Self {
        Self { used: 0, max: max_steps }
    }

    /// Register one unit of work under `label`. Fails once the ceiling is
    /// crossed; the label identifies the offending stage.
    pub fn consume(&mut self, label: &str) -> Result<(), HarnessError> {
        self.used += 1;
        if self.used > self.max {
            return Err(HarnessError::BudgetExceeded {
                label: label.to_string(),
                max: self.max,
            });
        }
        Ok(())
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        BudgetSnapshot {
            used: self.used,
            remaining: self.max.saturating_sub(self.used),
            max: self.max,
        }
    }
}
