//! The agent loop for contextloop.
//!
//! Each turn follows the same cycle:
//!
//! 1. **Measure** the conversation against the model's context budget
//! 2. **Compress** old history into a summary if the budget is running low
//! 3. **Send** the conversation and tool schemas to the model
//! 4. **If tool calls**: validate, confine and execute them, append the
//!    results, go back to step 1
//! 5. **If text**: that is the answer
//!
//! The loop stops at the answer, on cancellation, or on a fatal error
//! (model unavailable, context overflow, iteration ceiling).

pub mod budget;
pub mod compression;
pub mod dispatcher;
pub mod loop_runner;
pub mod settings;

#[cfg(test)]
mod test_helpers;

pub use budget::{BudgetReport, HeuristicEstimator, TokenEstimator, remaining_budget};
pub use compression::{
    CompressionOutcome, CompressionPolicy, CompressionReport, CompressionTrigger,
    ModelSummarizer, Summarizer, TruncatingSummarizer,
};
pub use dispatcher::ToolDispatcher;
pub use loop_runner::{AgentLoop, LoopFailure, LoopOutcome, LoopState};
pub use settings::{AgentSettings, RetryPolicy, SettingsError};
