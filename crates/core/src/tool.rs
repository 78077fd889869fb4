//! Tool contract: definitions, schemas, handlers and the registry.
//!
//! Tools are what give the agent the ability to act in the world. The model
//! names a tool by string with loosely typed JSON arguments; the registry
//! binds each name to a typed handler behind the uniform [`Tool`] interface,
//! and the argument schema is checked at the boundary before any handler
//! code runs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::{RegistryError, ToolError};
use crate::message::Message;

pub use crate::message::ToolCall;

/// The tool description sent to the model so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// A compiled argument schema.
///
/// Opaque to the registry; the dispatcher only asks it to `validate`.
#[derive(Clone)]
pub struct ParameterSchema {
    raw: serde_json::Value,
    validator: Arc<jsonschema::Validator>,
}

impl ParameterSchema {
    /// Compile a JSON Schema document.
    pub fn compile(raw: serde_json::Value) -> Result<Self, String> {
        let validator = jsonschema::validator_for(&raw).map_err(|e| e.to_string())?;
        Ok(Self {
            raw,
            validator: Arc::new(validator),
        })
    }

    /// Check `arguments`, returning every violation found.
    pub fn validate(&self, arguments: &serde_json::Value) -> Result<(), Vec<String>> {
        let violations: Vec<String> = self
            .validator
            .iter_errors(arguments)
            .map(|e| e.to_string())
            .collect();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }

    pub fn as_json(&self) -> &serde_json::Value {
        &self.raw
    }
}

impl std::fmt::Debug for ParameterSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ParameterSchema").field(&self.raw).finish()
    }
}

/// The handler capability each concrete tool implements.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "read_file").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Arguments that name filesystem paths. The dispatcher confines each
    /// of them to the workspace root before `execute` runs.
    fn path_arguments(&self) -> &[&str] {
        &[]
    }

    /// Whether calls to this tool must not overlap with sibling calls.
    fn exclusive(&self) -> bool {
        false
    }

    /// Execute the tool. Arguments have already passed schema validation.
    async fn execute(
        &self,
        arguments: serde_json::Value,
        workspace_root: &Path,
    ) -> Result<serde_json::Value, ToolError>;
}

/// A registered tool: name, schema and handler, immutable once built.
#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameter_schema: ParameterSchema,
    pub path_arguments: Vec<String>,
    pub exclusive: bool,
    pub handler: Arc<dyn Tool>,
}

impl ToolDefinition {
    /// Build a definition from a tool, compiling its parameter schema.
    pub fn from_tool(tool: Arc<dyn Tool>) -> Result<Self, RegistryError> {
        let name = tool.name().to_string();
        let parameter_schema = ParameterSchema::compile(tool.parameters_schema())
            .map_err(|reason| RegistryError::InvalidSchema {
                tool: name.clone(),
                reason,
            })?;
        Ok(Self {
            description: tool.description().to_string(),
            path_arguments: tool.path_arguments().iter().map(|s| s.to_string()).collect(),
            exclusive: tool.exclusive(),
            parameter_schema,
            handler: tool,
            name,
        })
    }

    pub fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameter_schema.as_json().clone(),
        }
    }
}

impl std::fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("path_arguments", &self.path_arguments)
            .field("exclusive", &self.exclusive)
            .finish()
    }
}

/// Outcome classification of one tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Ok,
    Error,
}

/// The result of one tool call. Exactly one per call, success or failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub tool_call_id: String,

    pub tool_name: String,

    pub status: ToolStatus,

    /// Handler output (when `status == Ok`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,

    /// Failure detail (when `status == Error`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,

    pub duration_ms: u64,
}

impl ToolResult {
    pub fn ok(call: &ToolCall, payload: serde_json::Value, duration_ms: u64) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            status: ToolStatus::Ok,
            payload: Some(payload),
            error: None,
            duration_ms,
        }
    }

    pub fn failed(call: &ToolCall, error: ToolError, duration_ms: u64) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            status: ToolStatus::Error,
            payload: None,
            error: Some(error),
            duration_ms,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ToolStatus::Ok
    }

    /// Render the text the model sees for this result.
    pub fn content(&self) -> String {
        match (&self.payload, &self.error) {
            (_, Some(error)) => serde_json::json!({
                "error": error.kind(),
                "detail": error.to_string(),
            })
            .to_string(),
            (Some(serde_json::Value::String(text)), None) => text.clone(),
            (Some(value), None) => value.to_string(),
            (None, None) => String::new(),
        }
    }

    /// Fold this result into a `tool` message.
    pub fn to_message(&self) -> Message {
        Message::tool_result(&self.tool_call_id, self.content())
    }
}

/// A registry of available tools.
///
/// The agent loop uses this to:
/// 1. Get tool schemas to send to the model
/// 2. Look up definitions when the model requests a call
#[derive(Default)]
pub struct ToolRegistry {
    order: Vec<String>,
    tools: HashMap<String, ToolDefinition>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition. Fails if the name is already taken.
    pub fn register(&mut self, definition: ToolDefinition) -> Result<(), RegistryError> {
        if self.tools.contains_key(&definition.name) {
            return Err(RegistryError::DuplicateTool(definition.name));
        }
        self.order.push(definition.name.clone());
        self.tools.insert(definition.name.clone(), definition);
        Ok(())
    }

    /// Compile and register a tool.
    pub fn register_tool(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        self.register(ToolDefinition::from_tool(tool)?)
    }

    /// Get a tool definition by name.
    pub fn lookup(&self, name: &str) -> Result<&ToolDefinition, ToolError> {
        self.tools.get(name).ok_or_else(|| ToolError::UnknownTool {
            name: name.to_string(),
        })
    }

    /// All schemas, in registration order (for sending to the model).
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(ToolDefinition::schema)
            .collect()
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str { "echo" }
        fn description(&self) -> &str { "Echoes back the input" }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            })
        }
        async fn execute(
            &self,
            arguments: serde_json::Value,
            _workspace_root: &Path,
        ) -> Result<serde_json::Value, ToolError> {
            Ok(arguments["text"].clone())
        }
    }

    struct BrokenSchemaTool;

    #[async_trait]
    impl Tool for BrokenSchemaTool {
        fn name(&self) -> &str { "broken" }
        fn description(&self) -> &str { "Schema does not compile" }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({ "type": 12 })
        }
        async fn execute(
            &self,
            _arguments: serde_json::Value,
            _workspace_root: &Path,
        ) -> Result<serde_json::Value, ToolError> {
            Ok(serde_json::Value::Null)
        }
    }

    #[test]
    fn registry_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register_tool(Arc::new(EchoTool)).unwrap();
        assert!(registry.lookup("echo").is_ok());
        assert!(matches!(
            registry.lookup("nonexistent"),
            Err(ToolError::UnknownTool { .. })
        ));
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut registry = ToolRegistry::new();
        registry.register_tool(Arc::new(EchoTool)).unwrap();
        let err = registry.register_tool(Arc::new(EchoTool)).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateTool("echo".into()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn invalid_schema_rejected_at_registration() {
        let mut registry = ToolRegistry::new();
        assert!(matches!(
            registry.register_tool(Arc::new(BrokenSchemaTool)),
            Err(RegistryError::InvalidSchema { .. })
        ));
    }

    #[test]
    fn registry_schemas() {
        let mut registry = ToolRegistry::new();
        registry.register_tool(Arc::new(EchoTool)).unwrap();
        let schemas = registry.schemas();
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0].name, "echo");
        assert_eq!(schemas[0].parameters["required"], serde_json::json!(["text"]));
    }

    #[test]
    fn schema_reports_violations() {
        let def = ToolDefinition::from_tool(Arc::new(EchoTool)).unwrap();
        assert!(def.parameter_schema.validate(&serde_json::json!({"text": "hi"})).is_ok());

        let violations = def
            .parameter_schema
            .validate(&serde_json::json!({"text": 5}))
            .unwrap_err();
        assert_eq!(violations.len(), 1);

        assert!(def.parameter_schema.validate(&serde_json::json!({})).is_err());
    }

    #[test]
    fn result_content_rendering() {
        let call = ToolCall::new("c1", "compute_sum", serde_json::json!({"a": 2, "b": 2}));

        let ok = ToolResult::ok(&call, serde_json::json!(4), 1);
        assert_eq!(ok.content(), "4");
        assert_eq!(ok.to_message().tool_call_id.as_deref(), Some("c1"));

        let text = ToolResult::ok(&call, serde_json::json!("plain"), 1);
        assert_eq!(text.content(), "plain");

        let failed = ToolResult::failed(
            &call,
            ToolError::UnknownTool { name: "compute_sum".into() },
            0,
        );
        let body: serde_json::Value = serde_json::from_str(&failed.content()).unwrap();
        assert_eq!(body["error"], "UnknownToolError");
        assert!(!failed.is_ok());
    }
}
