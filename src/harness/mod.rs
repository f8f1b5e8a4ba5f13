//! The orchestration engine.
//!
//! A run walks a fixed stage order with conditional skips:
//!
//! ```text
//! ROUTE
//!   -> [PLAN + EXECUTE        if the recipe needs tools]
//!   -> [BOOTSTRAP_SEARCH      if web_search is needed, no evidence yet, budget >= 2]
//!   -> GENERATE + CRITIQUE    x N (N from stakes and recipe)
//!   -> SELECT
//!   -> [EXTRA_SEARCH          if the critic asked for it and budget >= 3]
//!   -> [VERIFY + REPAIR       if stakes are high or the score is below threshold]
//!   -> POLISH
//!   -> END
//! ```
//!
//! Every transition checks the cancellation signal and registers against
//! the step budget before doing cost-incurring work. Step accounting,
//! cost accounting, and progress reporting live on the per-run context
//! rather than being threaded through stage signatures.

mod runner;
mod select;

pub use runner::{run, RunArgs, RunOutcome};
pub use select::{select_best, weighted_score};
