//! Context budget estimation.
//!
//! Exact tokenization is model-specific and usually unknown here, so the
//! default estimator uses a character heuristic: `chars_per_token` from the
//! model profile, rounded up, plus a fixed per-message overhead for role
//! names and wire-format delimiters. When a message carries an exact count
//! (reported by the provider) that count wins.

use contextloop_core::message::{Conversation, Message};
use contextloop_core::model::ModelProfile;
use serde::Serialize;

/// Tokens charged per message for role and framing.
pub const MESSAGE_OVERHEAD: usize = 4;

/// Approximate token cost of messages for a given model.
///
/// Implementations must be deterministic for a profile and must never
/// return less for a longer message sequence.
pub trait TokenEstimator: Send + Sync {
    fn estimate_message(&self, message: &Message, profile: &ModelProfile) -> usize;

    fn estimate(&self, messages: &[Message], profile: &ModelProfile) -> usize {
        messages
            .iter()
            .map(|m| self.estimate_message(m, profile))
            .sum()
    }
}

/// Character-count heuristic.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicEstimator;

impl HeuristicEstimator {
    /// `ceil(chars / chars_per_token)`; empty text costs nothing.
    pub fn estimate_text(text: &str, chars_per_token: f32) -> usize {
        if text.is_empty() {
            return 0;
        }
        let chars = text.chars().count() as f64;
        let per_token = f64::from(chars_per_token).max(0.1);
        (chars / per_token).ceil() as usize
    }
}

impl TokenEstimator for HeuristicEstimator {
    fn estimate_message(&self, message: &Message, profile: &ModelProfile) -> usize {
        if let Some(exact) = message.estimated_tokens {
            return MESSAGE_OVERHEAD + exact;
        }

        let content = Self::estimate_text(&message.content, profile.chars_per_token);
        let calls: usize = message
            .tool_calls
            .iter()
            .map(|call| {
                let args = call.arguments.to_string();
                Self::estimate_text(&call.name, profile.chars_per_token)
                    + Self::estimate_text(&args, profile.chars_per_token)
            })
            .sum();
        MESSAGE_OVERHEAD + content + calls
    }
}

/// `context_limit - reserved_output - estimate`. Negative means overflow.
pub fn remaining_budget(
    estimator: &dyn TokenEstimator,
    conversation: &Conversation,
    profile: &ModelProfile,
) -> i64 {
    profile.usable_budget() - estimator.estimate(conversation.messages(), profile) as i64
}

/// Snapshot of context usage, shown after each answer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BudgetReport {
    pub estimate: usize,
    pub usable: i64,
    pub remaining: i64,
    pub utilization_pct: f64,
}

impl BudgetReport {
    pub fn measure(
        estimator: &dyn TokenEstimator,
        conversation: &Conversation,
        profile: &ModelProfile,
    ) -> Self {
        let estimate = estimator.estimate(conversation.messages(), profile);
        let usable = profile.usable_budget();
        let utilization_pct = if usable > 0 {
            estimate as f64 * 100.0 / usable as f64
        } else {
            100.0
        };
        Self {
            estimate,
            usable,
            remaining: usable - estimate as i64,
            utilization_pct,
        }
    }
}

impl std::fmt::Display for BudgetReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "context: ~{} / {} tokens ({:.1}%), {} remaining",
            self.estimate, self.usable, self.utilization_pct, self.remaining
        )
    }
}
