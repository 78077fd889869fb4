//! Context compression: fold old history into a summary when the remaining
//! budget drops under the low watermark.
//!
//! Watermarks are fractions of the model's `context_limit`, measured against
//! the *remaining* budget. Compression starts when
//! `remaining < low_watermark * context_limit` and must end with
//! `remaining >= high_watermark * context_limit`, or the loop stops with a
//! context overflow.
//!
//! What gets folded:
//! - leading system prompts stay pinned at the front
//! - summaries from earlier passes are never summarized again
//! - the last `protected_exchanges` exchanges stay verbatim, and so does the
//!   latest user message
//! - a tool call and its results are folded together or not at all
//!
//! An exchange is a user message with the first reply to it, or a later
//! assistant step with its tool results, so one long agentic turn can shed
//! its finished steps. A single pass folds runs oldest first until the
//! target is met.

use async_trait::async_trait;
use contextloop_core::client::ModelClient;
use contextloop_core::error::{LoopError, ProviderError};
use contextloop_core::message::{Conversation, Message, Role};
use contextloop_core::model::ModelProfile;
use serde::Serialize;
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::budget::TokenEstimator;

const SUMMARY_PROMPT: &str = "You compress conversation history for an assistant with a limited \
context window. Summarize the transcript below. Keep facts, decisions, file names, tool \
results and open tasks the assistant will need later. Drop pleasantries and repetition. \
Reply with the summary only.";

/// Watermarks and limits for compression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressionPolicy {
    pub low_watermark: f32,
    pub high_watermark: f32,
    pub protected_exchanges: usize,
    pub summary_max_tokens: usize,
}

impl Default for CompressionPolicy {
    fn default() -> Self {
        Self {
            low_watermark: 0.2,
            high_watermark: 0.5,
            protected_exchanges: 2,
            summary_max_tokens: 1024,
        }
    }
}

impl CompressionPolicy {
    /// Remaining budget under which compression starts.
    pub fn trigger_remaining(&self, profile: &ModelProfile) -> i64 {
        fraction_of(self.low_watermark, profile.context_limit)
    }

    /// Remaining budget a compression pass has to restore.
    pub fn target_remaining(&self, profile: &ModelProfile) -> i64 {
        fraction_of(self.high_watermark, profile.context_limit)
    }

    /// Character cap on a summary body.
    pub fn summary_max_chars(&self, profile: &ModelProfile) -> usize {
        (self.summary_max_tokens as f64 * f64::from(profile.chars_per_token)).floor() as usize
    }
}

fn fraction_of(fraction: f32, limit: usize) -> i64 {
    (f64::from(fraction) * limit as f64).round() as i64
}

/// Turns a run of messages into summary text.
#[async_trait]
pub trait Summarizer: Send + Sync {
    fn name(&self) -> &str;

    /// Summarize `run` in at most `max_tokens` tokens.
    async fn summarize(
        &self,
        run: &[Message],
        max_tokens: usize,
        profile: &ModelProfile,
    ) -> Result<String, ProviderError>;
}

/// Asks the model itself for a summary, in a separate call with no tools.
pub struct ModelSummarizer {
    client: Arc<dyn ModelClient>,
}

impl ModelSummarizer {
    pub fn new(client: Arc<dyn ModelClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Summarizer for ModelSummarizer {
    fn name(&self) -> &str {
        "model"
    }

    async fn summarize(
        &self,
        run: &[Message],
        max_tokens: usize,
        profile: &ModelProfile,
    ) -> Result<String, ProviderError> {
        // The reply budget doubles as the summary bound
        let mut bounded = profile.clone();
        bounded.reserved_output = max_tokens;

        // Leave room for the instructions and the reply
        let input_tokens = bounded.usable_budget() - 128;
        let input_chars = (input_tokens.max(0) as f64 * f64::from(profile.chars_per_token)) as usize;
        let transcript = clip_chars(&render_transcript(run), input_chars);

        let request = [Message::system(SUMMARY_PROMPT), Message::user(transcript)];
        let reply = self.client.send(&request, &[], &bounded).await?;

        let text = reply.content.unwrap_or_default().trim().to_string();
        if text.is_empty() {
            return Err(ProviderError::InvalidResponse(
                "model returned an empty summary".into(),
            ));
        }
        Ok(text)
    }
}

/// Deterministic fallback: keeps the head of every message, sharing the
/// character allowance evenly.
#[derive(Debug, Clone, Copy, Default)]
pub struct TruncatingSummarizer;

impl TruncatingSummarizer {
    const MIN_EXCERPT: usize = 40;

    pub fn summarize_now(run: &[Message], max_chars: usize) -> String {
        if run.is_empty() {
            return String::new();
        }
        let header = format!("{} earlier messages, abbreviated:", run.len());
        let per_message = (max_chars.saturating_sub(header.len()) / run.len()).max(Self::MIN_EXCERPT);

        let mut out = header;
        for message in run {
            out.push('\n');
            out.push_str(&clip_chars(&render_message(message), per_message));
        }
        clip_chars(&out, max_chars)
    }
}

#[async_trait]
impl Summarizer for TruncatingSummarizer {
    fn name(&self) -> &str {
        "truncating"
    }

    async fn summarize(
        &self,
        run: &[Message],
        max_tokens: usize,
        profile: &ModelProfile,
    ) -> Result<String, ProviderError> {
        let max_chars = (max_tokens as f64 * f64::from(profile.chars_per_token)) as usize;
        Ok(Self::summarize_now(run, max_chars))
    }
}

fn render_message(message: &Message) -> String {
    let mut line = match message.role {
        Role::Tool => format!(
            "tool[{}]: {}",
            message.tool_call_id.as_deref().unwrap_or("?"),
            message.content
        ),
        role => format!("{role}: {}", message.content),
    };
    for call in &message.tool_calls {
        line.push_str(&format!(" <called {}({})>", call.name, call.arguments));
    }
    line
}

fn render_transcript(run: &[Message]) -> String {
    run.iter().map(render_message).collect::<Vec<_>>().join("\n")
}

/// Cut `text` to at most `max_chars` characters, marking the cut.
fn clip_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    const MARK: &str = "...";
    let keep = max_chars.saturating_sub(MARK.len());
    let mut out: String = text.chars().take(keep).collect();
    if max_chars >= MARK.len() {
        out.push_str(MARK);
    }
    out
}

/// The oldest run of raw messages that may be folded, if any.
///
/// Skips pinned system prompts, summaries and the latest user message,
/// stops before the protected tail, and shrinks until no tool exchange
/// straddles the boundary.
pub fn foldable_range(
    conversation: &Conversation,
    protected_exchanges: usize,
) -> Option<Range<usize>> {
    let messages = conversation.messages();
    let pinned = messages
        .iter()
        .take_while(|m| m.role == Role::System && !m.is_summary())
        .count();

    let exchanges = conversation.exchange_starts();
    let keep = protected_exchanges.min(exchanges.len());
    let boundary = if keep == 0 {
        messages.len()
    } else {
        exchanges[exchanges.len() - keep]
    };

    let latest_user = messages.iter().rposition(|m| m.role == Role::User);
    let foldable = |i: usize| !messages[i].is_summary() && Some(i) != latest_user;

    let mut start = pinned;
    while start < boundary {
        if !foldable(start) {
            start += 1;
            continue;
        }
        let mut end = start;
        while end < boundary && foldable(end) {
            end += 1;
        }
        while end > start && conversation.check_range(&(start..end)).is_err() {
            end -= 1;
        }
        if end > start {
            return Some(start..end);
        }
        start += 1;
    }
    None
}

/// Details of one compression pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompressionReport {
    pub tokens_before: usize,
    pub tokens_after: usize,
    pub messages_folded: usize,
    pub summarizer: String,
    pub remaining_after: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompressionOutcome {
    NotNeeded,
    Compressed(CompressionReport),
}

/// Checks the budget before each model call and compresses when needed.
pub struct CompressionTrigger {
    policy: CompressionPolicy,
    estimator: Arc<dyn TokenEstimator>,
    summarizer: Arc<dyn Summarizer>,
}

impl CompressionTrigger {
    pub fn new(
        policy: CompressionPolicy,
        estimator: Arc<dyn TokenEstimator>,
        summarizer: Arc<dyn Summarizer>,
    ) -> Self {
        Self {
            policy,
            estimator,
            summarizer,
        }
    }

    pub fn policy(&self) -> &CompressionPolicy {
        &self.policy
    }

    fn remaining(&self, conversation: &Conversation, profile: &ModelProfile) -> (usize, i64) {
        let estimate = self.estimator.estimate(conversation.messages(), profile);
        (estimate, profile.usable_budget() - estimate as i64)
    }

    pub fn needs_compression(&self, conversation: &Conversation, profile: &ModelProfile) -> bool {
        self.remaining(conversation, profile).1 < self.policy.trigger_remaining(profile)
    }

    /// Compress `conversation` if it crossed the low watermark.
    ///
    /// On success the conversation has at least the high-watermark budget
    /// left. On overflow it is left untouched.
    pub async fn apply(
        &self,
        conversation: &mut Conversation,
        profile: &ModelProfile,
    ) -> Result<CompressionOutcome, LoopError> {
        let (estimate, remaining) = self.remaining(conversation, profile);
        let trigger = self.policy.trigger_remaining(profile);
        if remaining >= trigger {
            return Ok(CompressionOutcome::NotNeeded);
        }

        debug!(estimate, remaining, trigger, "Remaining budget under low watermark");
        self.compress(conversation, profile, false)
            .await
            .map(CompressionOutcome::Compressed)
    }

    /// Compress regardless of the low watermark, folding at least one run.
    ///
    /// For when the endpoint rejects a request as too long even though the
    /// estimate said it fits.
    pub async fn force(
        &self,
        conversation: &mut Conversation,
        profile: &ModelProfile,
    ) -> Result<CompressionReport, LoopError> {
        self.compress(conversation, profile, true).await
    }

    async fn compress(
        &self,
        conversation: &mut Conversation,
        profile: &ModelProfile,
        forced: bool,
    ) -> Result<CompressionReport, LoopError> {
        let target = self.policy.target_remaining(profile);
        let overflow = |estimate: usize| LoopError::ContextOverflow {
            estimate,
            target: profile.usable_budget() - target,
        };

        let (tokens_before, remaining_before) = self.remaining(conversation, profile);
        let (mut tokens_after, mut remaining_after) = (tokens_before, remaining_before);
        let mut candidate = conversation.clone();
        let mut folded = 0;
        let mut summarizers: Vec<String> = Vec::new();

        while remaining_after < target || (forced && folded == 0) {
            let Some(range) = foldable_range(&candidate, self.policy.protected_exchanges) else {
                warn!(
                    tokens_before,
                    tokens_after, remaining_after, target, "Nothing left to fold"
                );
                return Err(overflow(tokens_after));
            };

            let count = range.len();
            let (summary, name) = self
                .summarize_run(&candidate.messages()[range.clone()], profile)
                .await;
            candidate.replace_range(range, summary)?;

            folded += count;
            if !summarizers.contains(&name) {
                summarizers.push(name);
            }
            (tokens_after, remaining_after) = self.remaining(&candidate, profile);
            debug!(folded = count, tokens_after, remaining_after, "Folded a run");
        }

        *conversation = candidate;
        let summarizer = summarizers.join("+");
        info!(
            tokens_before,
            tokens_after,
            messages_folded = folded,
            summarizer = %summarizer,
            forced,
            "Context compressed"
        );

        Ok(CompressionReport {
            tokens_before,
            tokens_after,
            messages_folded: folded,
            summarizer,
            remaining_after,
        })
    }

    /// One summary message for `run`, and the name of the summarizer that
    /// wrote it.
    async fn summarize_run(&self, run: &[Message], profile: &ModelProfile) -> (Message, String) {
        let max_chars = self.policy.summary_max_chars(profile);
        let (text, name) = match self
            .summarizer
            .summarize(run, self.policy.summary_max_tokens, profile)
            .await
        {
            Ok(text) => (text, self.summarizer.name().to_string()),
            Err(e) => {
                warn!(
                    summarizer = self.summarizer.name(),
                    error = %e,
                    "Summarizer failed, falling back to truncation"
                );
                (
                    TruncatingSummarizer::summarize_now(run, max_chars),
                    TruncatingSummarizer.name().to_string(),
                )
            }
        };

        let mut summary = Message::summary(clip_chars(&text, max_chars));
        summary
            .metadata
            .insert("messages_folded".into(), serde_json::json!(run.len()));
        summary
            .metadata
            .insert("summarizer".into(), serde_json::json!(name));
        (summary, name)
    }
}
