//! Tool dispatch: validate, confine, execute and collect results.
//!
//! A batch of calls from one model reply runs concurrently, except that an
//! exclusive tool never overlaps with anything else. Results always come back
//! in the order the model issued the calls, whatever order they finish in.
//!
//! Per call, in order:
//! 1. the tool must be registered
//! 2. arguments must match the parameter schema
//! 3. every declared path argument must stay inside the workspace
//! 4. the handler runs on its own task under a timeout
//!
//! A failure at any step becomes an error result for that call only.

use chrono::Utc;
use contextloop_core::error::ToolError;
use contextloop_core::event::{DomainEvent, EventBus};
use contextloop_core::message::ToolCall;
use contextloop_core::tool::{ToolDefinition, ToolRegistry, ToolResult};
use contextloop_security::Workspace;
use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    workspace: Workspace,
    timeout: Duration,
    max_concurrency: usize,
    event_bus: Option<Arc<EventBus>>,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>, workspace: Workspace) -> Self {
        Self {
            registry,
            workspace,
            timeout: Duration::from_secs(60),
            max_concurrency: 8,
            event_bus: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Execute `calls`, returning one result per call in call order.
    pub async fn dispatch(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(calls.len());
        let mut batch: Vec<&ToolCall> = Vec::new();

        for call in calls {
            if self.is_exclusive(call) {
                results.extend(self.run_batch(std::mem::take(&mut batch)).await);
                results.push(self.execute(call).await);
            } else {
                batch.push(call);
            }
        }
        results.extend(self.run_batch(batch).await);
        results
    }

    fn is_exclusive(&self, call: &ToolCall) -> bool {
        self.registry
            .lookup(&call.name)
            .is_ok_and(|definition| definition.exclusive)
    }

    async fn run_batch(&self, batch: Vec<&ToolCall>) -> Vec<ToolResult> {
        if batch.is_empty() {
            return Vec::new();
        }
        // `buffered` keeps output order equal to input order
        futures::stream::iter(batch.into_iter().map(|call| self.execute(call)))
            .buffered(self.max_concurrency)
            .collect()
            .await
    }

    /// Run one call through lookup, validation, confinement and the handler.
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        let started = Instant::now();
        let outcome = self.try_execute(call).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(payload) => ToolResult::ok(call, payload, duration_ms),
            Err(error) => {
                warn!(
                    tool = %call.name,
                    call_id = %call.id,
                    kind = error.kind(),
                    error = %error,
                    "Tool call failed"
                );
                ToolResult::failed(call, error, duration_ms)
            }
        };

        if let Some(bus) = &self.event_bus {
            bus.publish(DomainEvent::ToolExecuted {
                tool_name: call.name.clone(),
                success: result.is_ok(),
                duration_ms,
                timestamp: Utc::now(),
            });
        }
        result
    }

    async fn try_execute(&self, call: &ToolCall) -> Result<serde_json::Value, ToolError> {
        let definition = self.registry.lookup(&call.name)?;

        definition
            .parameter_schema
            .validate(&call.arguments)
            .map_err(|violations| ToolError::SchemaValidation {
                tool: call.name.clone(),
                violations,
            })?;

        self.confine(definition, &call.arguments)?;

        debug!(tool = %call.name, call_id = %call.id, "Executing tool");

        let handler = Arc::clone(&definition.handler);
        let arguments = call.arguments.clone();
        let root = self.workspace.root().to_path_buf();
        let mut task = tokio::spawn(async move { handler.execute(arguments, &root).await });

        match tokio::time::timeout(self.timeout, &mut task).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_error)) => Err(ToolError::execution(
                &call.name,
                if join_error.is_panic() {
                    "handler panicked".to_string()
                } else {
                    join_error.to_string()
                },
            )),
            Err(_) => {
                task.abort();
                Err(ToolError::Timeout {
                    tool: call.name.clone(),
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Check every declared path argument against the workspace.
    fn confine(
        &self,
        definition: &ToolDefinition,
        arguments: &serde_json::Value,
    ) -> Result<(), ToolError> {
        for key in &definition.path_arguments {
            let paths: Vec<&str> = match arguments.get(key) {
                Some(serde_json::Value::String(path)) => vec![path.as_str()],
                Some(serde_json::Value::Array(items)) => {
                    items.iter().filter_map(|v| v.as_str()).collect()
                }
                _ => continue,
            };
            for path in paths {
                self.workspace
                    .resolve(path)
                    .map_err(|e| ToolError::WorkspaceAccess {
                        tool: definition.name.clone(),
                        reason: e.to_string(),
                    })?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{PanicTool, PathEchoTool, SleepTool, SumTool, call};
    use contextloop_core::tool::ToolStatus;
    use std::sync::Mutex;

    struct Fixture {
        _dir: tempfile::TempDir,
        dispatcher: ToolDispatcher,
        sum: Arc<SumTool>,
        path_echo: Arc<PathEchoTool>,
        finished: Arc<Mutex<Vec<String>>>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let sum = Arc::new(SumTool::default());
        let path_echo = Arc::new(PathEchoTool::default());
        let finished = Arc::new(Mutex::new(Vec::new()));

        let mut registry = ToolRegistry::new();
        registry.register_tool(sum.clone()).unwrap();
        registry.register_tool(path_echo.clone()).unwrap();
        registry.register_tool(Arc::new(PanicTool)).unwrap();
        for exclusive in [false, true] {
            registry
                .register_tool(Arc::new(SleepTool {
                    finished: finished.clone(),
                    exclusive,
                    cancel_on_start: None,
                }))
                .unwrap();
        }

        let workspace = Workspace::new(dir.path()).unwrap();
        let dispatcher = ToolDispatcher::new(Arc::new(registry), workspace)
            .with_timeout(Duration::from_secs(5));
        Fixture {
            _dir: dir,
            dispatcher,
            sum,
            path_echo,
            finished,
        }
    }

    fn sleep_call(id: &str, label: &str, delay_ms: u64) -> ToolCall {
        call(id, "sleep", serde_json::json!({"label": label, "delay_ms": delay_ms}))
    }

    #[tokio::test]
    async fn successful_call() {
        let f = fixture();
        let results = f
            .dispatcher
            .dispatch(&[call("c1", "compute_sum", serde_json::json!({"a": 2, "b": 2}))])
            .await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, ToolStatus::Ok);
        assert_eq!(results[0].tool_call_id, "c1");
        assert_eq!(results[0].content(), "4");
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error_result() {
        let f = fixture();
        let results = f
            .dispatcher
            .dispatch(&[call("c1", "launch_rockets", serde_json::json!({}))])
            .await;
        assert!(matches!(
            results[0].error,
            Some(ToolError::UnknownTool { ref name }) if name == "launch_rockets"
        ));
        assert!(results[0].content().contains("UnknownToolError"));
    }

    #[tokio::test]
    async fn schema_violation_never_reaches_handler() {
        let f = fixture();
        let bad = [
            serde_json::json!({"a": 2}),
            serde_json::json!({"a": "two", "b": 2}),
            serde_json::json!("not an object"),
        ];
        for (i, args) in bad.into_iter().enumerate() {
            let results = f
                .dispatcher
                .dispatch(&[call(&format!("c{i}"), "compute_sum", args)])
                .await;
            let Some(ToolError::SchemaValidation { violations, .. }) = &results[0].error else {
                panic!("expected schema error, got {:?}", results[0]);
            };
            assert!(!violations.is_empty());
        }
        assert_eq!(f.sum.invocations(), 0);
    }

    #[tokio::test]
    async fn paths_outside_workspace_are_rejected() {
        let f = fixture();
        let outside = [
            serde_json::json!({"path": "../escape.txt"}),
            serde_json::json!({"path": "nested/../../escape.txt"}),
            serde_json::json!({"path": "/etc/passwd"}),
            serde_json::json!({"paths": ["fine.txt", "../../escape.txt"]}),
        ];
        for (i, args) in outside.into_iter().enumerate() {
            let results = f
                .dispatcher
                .dispatch(&[call(&format!("p{i}"), "echo_path", args)])
                .await;
            assert!(
                matches!(results[0].error, Some(ToolError::WorkspaceAccess { .. })),
                "expected workspace error, got {:?}",
                results[0]
            );
        }
        assert_eq!(f.path_echo.invocations.load(std::sync::atomic::Ordering::SeqCst), 0);

        let results = f
            .dispatcher
            .dispatch(&[call("ok", "echo_path", serde_json::json!({"path": "notes/today.md"}))])
            .await;
        assert!(results[0].is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn results_keep_call_order_under_staggered_delays() {
        let f = fixture();
        let calls = [
            sleep_call("c1", "slow", 300),
            sleep_call("c2", "fast", 10),
            sleep_call("c3", "medium", 100),
        ];

        let started = tokio::time::Instant::now();
        let results = f.dispatcher.dispatch(&calls).await;

        let ids: Vec<_> = results.iter().map(|r| r.tool_call_id.as_str()).collect();
        assert_eq!(ids, ["c1", "c2", "c3"]);
        assert_eq!(results[0].content(), "slow");

        // Finished in delay order, so they ran concurrently
        assert_eq!(*f.finished.lock().unwrap(), ["fast", "medium", "slow"]);
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn exclusive_call_runs_alone() {
        let f = fixture();
        let calls = [
            sleep_call("c1", "before", 50),
            call(
                "c2",
                "sleep_exclusive",
                serde_json::json!({"label": "exclusive", "delay_ms": 10}),
            ),
            sleep_call("c3", "after", 1),
        ];

        let results = f.dispatcher.dispatch(&calls).await;
        let ids: Vec<_> = results.iter().map(|r| r.tool_call_id.as_str()).collect();
        assert_eq!(ids, ["c1", "c2", "c3"]);

        // The short calls would have overtaken "before" if they overlapped
        assert_eq!(*f.finished.lock().unwrap(), ["before", "exclusive", "after"]);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_limit_serializes_when_one() {
        let mut f = fixture();
        f.dispatcher = f.dispatcher.with_max_concurrency(1);
        let calls = [sleep_call("c1", "slow", 300), sleep_call("c2", "fast", 10)];

        f.dispatcher.dispatch(&calls).await;
        assert_eq!(*f.finished.lock().unwrap(), ["slow", "fast"]);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handler_times_out() {
        let mut f = fixture();
        f.dispatcher = f.dispatcher.with_timeout(Duration::from_millis(100));

        let results = f
            .dispatcher
            .dispatch(&[sleep_call("c1", "never", 10_000), sleep_call("c2", "quick", 5)])
            .await;
        assert!(matches!(
            results[0].error,
            Some(ToolError::Timeout { timeout_ms: 100, .. })
        ));
        assert!(results[1].is_ok());
        assert!(results[0].content().contains("ToolExecutionError"));
    }

    #[tokio::test]
    async fn panicking_handler_becomes_execution_error() {
        let f = fixture();
        let results = f
            .dispatcher
            .dispatch(&[
                call("c1", "explode", serde_json::json!({})),
                call("c2", "compute_sum", serde_json::json!({"a": 1, "b": 1})),
            ])
            .await;
        assert!(matches!(results[0].error, Some(ToolError::Execution { .. })));
        assert_eq!(results[1].content(), "2");
    }

    #[tokio::test]
    async fn publishes_tool_events() {
        let f = fixture();
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let dispatcher = f.dispatcher.with_event_bus(bus);

        dispatcher
            .dispatch(&[call("c1", "compute_sum", serde_json::json!({"a": 1, "b": 2}))])
            .await;

        let event = rx.try_recv().unwrap();
        match event.as_ref() {
            DomainEvent::ToolExecuted {
                tool_name, success, ..
            } => {
                assert_eq!(tool_name, "compute_sum");
                assert!(success);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
