//! The agent loop state machine.
//!
//! ```text
//!            +--------------------------------------------+
//!            v                                            |
//!   AWAITING_MODEL --tool calls--> DISPATCHING_TOOLS --> APPENDING_RESULTS
//!        |
//!        +--text--> DONE
//!
//!   any state --cancel--> CANCELLED
//!   any state --fatal---> FAILED
//! ```
//!
//! Before every model call the compression trigger checks the budget. Model
//! calls are retried with bounded exponential backoff when the failure is in
//! transport. If the endpoint rejects the request as too long, history is
//! compressed regardless of the watermark and the request is sent once more.
//! Tool failures never end the loop, they are handed back to the model as
//! error results.

use chrono::Utc;
use contextloop_core::client::{ModelClient, ModelReply};
use contextloop_core::error::{LoopError, ProviderError, ToolError};
use contextloop_core::event::{DomainEvent, EventBus};
use contextloop_core::message::{Conversation, Message, Role, ToolCall};
use contextloop_core::tool::{ToolRegistry, ToolResult, ToolSchema};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::budget::{BudgetReport, HeuristicEstimator, TokenEstimator};
use crate::compression::{
    CompressionOutcome, CompressionReport, CompressionTrigger, ModelSummarizer, Summarizer,
};
use crate::dispatcher::ToolDispatcher;
use crate::settings::AgentSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoopState {
    AwaitingModel,
    DispatchingTools,
    AppendingResults,
    Done,
    Failed,
    Cancelled,
}

impl LoopState {
    pub fn is_terminal(self) -> bool {
        matches!(self, LoopState::Done | LoopState::Failed | LoopState::Cancelled)
    }
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LoopState::AwaitingModel => "AWAITING_MODEL",
            LoopState::DispatchingTools => "DISPATCHING_TOOLS",
            LoopState::AppendingResults => "APPENDING_RESULTS",
            LoopState::Done => "DONE",
            LoopState::Failed => "FAILED",
            LoopState::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// A fatal loop error together with where it happened.
#[derive(Debug, thiserror::Error)]
#[error("{cause} (state: {last_state}, last operation: {last_operation})")]
pub struct LoopFailure {
    pub cause: LoopError,
    pub last_state: LoopState,
    pub last_operation: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoopOutcome {
    /// The model produced a final answer.
    Answered { text: String, iterations: u32 },
    /// The cancel token fired; `during` is the state that observed it.
    Cancelled { during: LoopState },
}

/// Work carried between states.
enum Phase {
    AwaitingModel,
    Dispatching(Vec<ToolCall>),
    Appending(Vec<ToolResult>),
}

impl Phase {
    fn state(&self) -> LoopState {
        match self {
            Phase::AwaitingModel => LoopState::AwaitingModel,
            Phase::Dispatching(_) => LoopState::DispatchingTools,
            Phase::Appending(_) => LoopState::AppendingResults,
        }
    }
}

enum ModelCallError {
    Cancelled,
    Failed(LoopError),
}

/// The core agent loop: one conversation, one model, one tool set.
pub struct AgentLoop {
    client: Arc<dyn ModelClient>,
    dispatcher: ToolDispatcher,
    schemas: Vec<ToolSchema>,
    estimator: Arc<dyn TokenEstimator>,
    summarizer: Arc<dyn Summarizer>,
    compressor: CompressionTrigger,
    settings: AgentSettings,
    conversation: Conversation,
    state: LoopState,
    last_operation: String,
    cancel: CancellationToken,
    event_bus: Arc<EventBus>,
}

impl AgentLoop {
    /// Create a loop over a fresh conversation.
    ///
    /// Summaries come from the same client unless a summarizer is set.
    pub fn new(
        client: Arc<dyn ModelClient>,
        registry: Arc<ToolRegistry>,
        settings: AgentSettings,
    ) -> Self {
        let event_bus = Arc::new(EventBus::default());
        let estimator: Arc<dyn TokenEstimator> = Arc::new(HeuristicEstimator);
        let summarizer: Arc<dyn Summarizer> = Arc::new(ModelSummarizer::new(client.clone()));
        let schemas = registry.schemas();
        let dispatcher = ToolDispatcher::new(registry, settings.workspace.clone())
            .with_timeout(settings.tool_timeout)
            .with_max_concurrency(settings.max_concurrent_tools)
            .with_event_bus(event_bus.clone());
        let compressor =
            CompressionTrigger::new(settings.compression, estimator.clone(), summarizer.clone());

        Self {
            client,
            dispatcher,
            schemas,
            estimator,
            summarizer,
            compressor,
            settings,
            conversation: Conversation::new(),
            state: LoopState::AwaitingModel,
            last_operation: String::from("idle"),
            cancel: CancellationToken::new(),
            event_bus,
        }
    }

    /// Continue an existing conversation.
    pub fn with_conversation(mut self, conversation: Conversation) -> Self {
        self.conversation = conversation;
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.dispatcher = self.dispatcher.with_event_bus(event_bus.clone());
        self.event_bus = event_bus;
        self
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.estimator = estimator;
        self.rebuild_compressor();
        self
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = summarizer;
        self.rebuild_compressor();
        self
    }

    fn rebuild_compressor(&mut self) {
        self.compressor = CompressionTrigger::new(
            self.settings.compression,
            self.estimator.clone(),
            self.summarizer.clone(),
        );
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn into_conversation(self) -> Conversation {
        self.conversation
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    /// A handle that cancels the current run.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Install a fresh cancel token after a cancelled run and return it.
    pub fn reset_cancellation(&mut self) -> CancellationToken {
        self.cancel = CancellationToken::new();
        self.cancel.clone()
    }

    pub fn budget(&self) -> BudgetReport {
        BudgetReport::measure(
            self.estimator.as_ref(),
            &self.conversation,
            &self.settings.profile,
        )
    }

    /// Append a user message and run until an answer, a cancel or a failure.
    pub async fn submit(&mut self, text: impl Into<String>) -> Result<LoopOutcome, LoopFailure> {
        self.ensure_system_prompt();
        self.close_unanswered_calls()?;
        self.last_operation = "append user message".into();
        self.append(Message::user(text))?;
        self.run().await
    }

    /// Run the loop on the conversation as it stands.
    pub async fn run(&mut self) -> Result<LoopOutcome, LoopFailure> {
        self.ensure_system_prompt();
        self.close_unanswered_calls()?;

        let mut phase = Phase::AwaitingModel;
        let mut iterations: u32 = 0;

        loop {
            self.transition(phase.state());

            if self.cancel.is_cancelled() {
                return Ok(self.cancelled());
            }

            phase = match phase {
                Phase::AwaitingModel => {
                    if iterations >= self.settings.max_iterations {
                        warn!(
                            conversation_id = %self.conversation.id,
                            max = self.settings.max_iterations,
                            "Max iterations reached"
                        );
                        return Err(self.fail(LoopError::MaxIterationsExceeded {
                            limit: self.settings.max_iterations,
                        }));
                    }
                    iterations += 1;

                    if let Err(e) = self.compress().await {
                        return Err(self.fail(e));
                    }

                    debug!(
                        conversation_id = %self.conversation.id,
                        iteration = iterations,
                        "Calling model"
                    );
                    let reply = match self.call_model().await {
                        Ok(reply) => reply,
                        Err(ModelCallError::Cancelled) => return Ok(self.cancelled()),
                        Err(ModelCallError::Failed(e)) => return Err(self.fail(e)),
                    };

                    if reply.has_tool_calls() {
                        let calls = reply.tool_calls.clone();
                        debug!(
                            count = calls.len(),
                            iteration = iterations,
                            "Model requested tool calls"
                        );
                        self.last_operation = "append assistant tool calls".into();
                        self.append(reply.into_message())?;
                        Phase::Dispatching(calls)
                    } else {
                        let text = reply.content.clone().unwrap_or_default();
                        self.last_operation = "append final answer".into();
                        self.append(reply.into_message())?;
                        self.transition(LoopState::Done);

                        let budget = self.budget();
                        info!(
                            conversation_id = %self.conversation.id,
                            iterations,
                            estimate = budget.estimate,
                            remaining = budget.remaining,
                            "Agent loop complete"
                        );
                        return Ok(LoopOutcome::Answered { text, iterations });
                    }
                }
                Phase::Dispatching(calls) => {
                    self.last_operation = format!("dispatch {} tool call(s)", calls.len());
                    Phase::Appending(self.dispatcher.dispatch(&calls).await)
                }
                Phase::Appending(results) => {
                    self.last_operation = format!("append {} tool result(s)", results.len());
                    for result in &results {
                        self.append(result.to_message())?;
                    }
                    Phase::AwaitingModel
                }
            };
        }
    }

    fn cancelled(&mut self) -> LoopOutcome {
        let during = self.state;
        info!(
            conversation_id = %self.conversation.id,
            state = %during,
            "Loop cancelled"
        );
        self.transition(LoopState::Cancelled);
        LoopOutcome::Cancelled { during }
    }

    async fn compress(&mut self) -> Result<(), LoopError> {
        self.last_operation = "context compression".into();
        let outcome = self
            .compressor
            .apply(&mut self.conversation, &self.settings.profile)
            .await?;

        if let CompressionOutcome::Compressed(report) = outcome {
            self.publish_compression(report);
        }
        Ok(())
    }

    /// Compress after the endpoint said the context does not fit.
    async fn force_compress(&mut self) -> Result<(), LoopError> {
        self.last_operation = "forced context compression".into();
        let report = self
            .compressor
            .force(&mut self.conversation, &self.settings.profile)
            .await?;
        self.publish_compression(report);
        Ok(())
    }

    fn publish_compression(&self, report: CompressionReport) {
        self.event_bus.publish(DomainEvent::ContextCompressed {
            conversation_id: self.conversation.id.to_string(),
            tokens_before: report.tokens_before,
            tokens_after: report.tokens_after,
            messages_folded: report.messages_folded,
            summarizer: report.summarizer,
            timestamp: Utc::now(),
        });
    }

    async fn call_model(&mut self) -> Result<ModelReply, ModelCallError> {
        let retry = self.settings.retry;
        let model = self.settings.profile.model_id.clone();
        let mut attempt: u32 = 0;
        let mut shrunk = false;

        loop {
            attempt += 1;
            self.last_operation = format!("model call to {model} (attempt {attempt})");
            if self.cancel.is_cancelled() {
                return Err(ModelCallError::Cancelled);
            }

            let result = self
                .client
                .send(self.conversation.messages(), &self.schemas, &self.settings.profile)
                .await;

            self.event_bus.publish(DomainEvent::ModelCalled {
                conversation_id: self.conversation.id.to_string(),
                model: model.clone(),
                attempt,
                success: result.is_ok(),
                tool_calls: result.as_ref().map_or(0, |r| r.tool_calls.len()),
                timestamp: Utc::now(),
            });

            let last_error = match result {
                Ok(reply) => return Ok(reply),
                Err(e) => e,
            };

            if let ProviderError::ContextLengthExceeded(detail) = &last_error {
                if shrunk {
                    error!(
                        model = %model,
                        detail = %detail,
                        "Context still too long after compression"
                    );
                    let budget = self.budget();
                    let target = self.compressor.policy().target_remaining(&self.settings.profile);
                    return Err(ModelCallError::Failed(LoopError::ContextOverflow {
                        estimate: budget.estimate,
                        target: budget.usable - target,
                    }));
                }
                warn!(
                    model = %model,
                    detail = %detail,
                    "Endpoint rejected the context as too long, compressing"
                );
                shrunk = true;
                self.force_compress().await.map_err(ModelCallError::Failed)?;
                continue;
            }

            if !last_error.is_retryable() || attempt >= retry.max_attempts {
                error!(
                    model = %model,
                    attempt,
                    error = %last_error,
                    "Model call failed, giving up"
                );
                return Err(ModelCallError::Failed(LoopError::ModelUnavailable {
                    attempts: attempt,
                    last_error,
                }));
            }

            let delay = retry.delay_after(attempt);
            warn!(
                model = %model,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %last_error,
                "Model call failed, retrying"
            );

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(ModelCallError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Prepend the configured system prompt unless one is already present.
    fn ensure_system_prompt(&mut self) {
        let Some(prompt) = &self.settings.system_prompt else {
            return;
        };
        let has_prompt = self
            .conversation
            .messages()
            .iter()
            .any(|m| m.role == Role::System && !m.is_summary());
        if !has_prompt {
            self.conversation.prepend_system(prompt.clone());
        }
    }

    /// Answer tool calls left open by an interrupted run, so the history
    /// stays well-formed. The calls are not executed again.
    fn close_unanswered_calls(&mut self) -> Result<(), LoopFailure> {
        let messages = self.conversation.messages();
        let Some(origin) = messages.iter().rposition(|m| m.role == Role::Assistant) else {
            return Ok(());
        };
        if messages[origin + 1..].iter().any(|m| m.role != Role::Tool) {
            return Ok(());
        }

        let answered: HashSet<&str> = messages[origin + 1..]
            .iter()
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();
        let open: Vec<ToolCall> = messages[origin]
            .tool_calls
            .iter()
            .filter(|c| !answered.contains(c.id.as_str()))
            .cloned()
            .collect();
        if open.is_empty() {
            return Ok(());
        }

        warn!(count = open.len(), "Closing tool calls left open by an interrupted run");
        self.last_operation = "close interrupted tool calls".into();
        for call in &open {
            let error =
                ToolError::execution(&call.name, "interrupted before the result was recorded");
            self.append(ToolResult::failed(call, error, 0).to_message())?;
        }
        Ok(())
    }

    fn append(&mut self, message: Message) -> Result<(), LoopFailure> {
        let pushed = self.conversation.push(message);
        pushed.map_err(|e| self.fail(e.into()))
    }

    fn transition(&mut self, to: LoopState) {
        if self.state == to {
            return;
        }
        debug!(from = %self.state, to = %to, "State transition");
        self.event_bus.publish(DomainEvent::StateChanged {
            conversation_id: self.conversation.id.to_string(),
            from: self.state.to_string(),
            to: to.to_string(),
            timestamp: Utc::now(),
        });
        self.state = to;
    }

    fn fail(&mut self, cause: LoopError) -> LoopFailure {
        let last_state = self.state;
        error!(
            conversation_id = %self.conversation.id,
            state = %last_state,
            operation = %self.last_operation,
            error = %cause,
            "Agent loop failed"
        );
        self.event_bus.publish(DomainEvent::ErrorOccurred {
            context: format!("{last_state}: {}", self.last_operation),
            error_message: cause.to_string(),
            timestamp: Utc::now(),
        });
        self.transition(LoopState::Failed);
        LoopFailure {
            cause,
            last_state,
            last_operation: self.last_operation.clone(),
        }
    }
}
