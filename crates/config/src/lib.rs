//! Configuration loading, validation, and management for contextloop.
//!
//! Loads configuration from `~/.contextloop/config.toml` with environment
//! variable overrides. Validates all settings at startup; the agent core only
//! ever sees the already-parsed model profile and workspace root.

use contextloop_core::model::{
    DEFAULT_CHARS_PER_TOKEN, ModelProfile, ModelProfileRegistry, parse_context_limit,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.contextloop/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Which entry of `models` the agent talks to
    #[serde(default = "default_active_model")]
    pub active_model: String,

    /// Workspace the file tools are confined to
    #[serde(default)]
    pub workspace: WorkspaceConfig,

    /// Context window management
    #[serde(default)]
    pub context: ContextConfig,

    /// Agent loop limits
    #[serde(default)]
    pub agent: AgentConfig,

    /// Model profile table
    #[serde(default = "default_models")]
    pub models: Vec<ModelConfig>,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Per-tool credentials (free-form key/value maps)
    #[serde(default)]
    pub tools: HashMap<String, HashMap<String, String>>,
}

fn default_active_model() -> String {
    "gpt-4o-mini".into()
}

fn default_models() -> Vec<ModelConfig> {
    vec![
        ModelConfig {
            id: "gpt-4o-mini".into(),
            provider: default_model_provider(),
            context_limit: ContextLimit::Tokens(128_000),
            reserved_output: 4_096,
            chars_per_token: None,
            temperature: None,
        },
        ModelConfig {
            id: "gpt-4o".into(),
            provider: default_model_provider(),
            context_limit: ContextLimit::Tokens(128_000),
            reserved_output: 4_096,
            chars_per_token: None,
            temperature: None,
        },
    ]
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Tool credentials: names and keys only
        let tools: HashMap<&str, Vec<&str>> = self
            .tools
            .iter()
            .map(|(tool, creds)| (tool.as_str(), creds.keys().map(|k| k.as_str()).collect()))
            .collect();
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("active_model", &self.active_model)
            .field("workspace", &self.workspace)
            .field("context", &self.context)
            .field("agent", &self.agent)
            .field("models", &self.models)
            .field("providers", &self.providers)
            .field("tools", &tools)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .finish()
    }
}

/// A context limit written either as a token count or a size label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextLimit {
    Tokens(usize),
    /// `"32K"`, `"128K"`, `"1M"`, `"1.5M"`; bare numbers are thousands
    Label(String),
}

impl ContextLimit {
    pub fn tokens(&self) -> usize {
        match self {
            ContextLimit::Tokens(n) => *n,
            ContextLimit::Label(label) => parse_context_limit(label),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub id: String,

    #[serde(default = "default_model_provider")]
    pub provider: String,

    pub context_limit: ContextLimit,

    #[serde(default = "default_reserved_output")]
    pub reserved_output: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chars_per_token: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

fn default_model_provider() -> String {
    "openai".into()
}
fn default_reserved_output() -> usize {
    4_096
}

impl ModelConfig {
    pub fn to_profile(&self) -> ModelProfile {
        let mut profile = ModelProfile::new(
            self.id.clone(),
            self.context_limit.tokens(),
            self.reserved_output,
        )
        .with_provider(self.provider.clone())
        .with_chars_per_token(self.chars_per_token.unwrap_or(DEFAULT_CHARS_PER_TOKEN));
        if let Some(temperature) = self.temperature {
            profile.temperature = temperature;
        }
        profile
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default = "default_workspace_root")]
    pub root: PathBuf,
}

fn default_workspace_root() -> PathBuf {
    AppConfig::config_dir().join("workspace")
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: default_workspace_root(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Compress when remaining budget drops below this fraction of the limit
    #[serde(default = "default_low_watermark")]
    pub low_watermark: f32,

    /// Compression must restore at least this fraction
    #[serde(default = "default_high_watermark")]
    pub high_watermark: f32,

    /// Most recent exchanges (a user message or one assistant step with its
    /// tool results) never folded into a summary
    #[serde(default = "default_protected_exchanges", alias = "protected_turns")]
    pub protected_exchanges: usize,

    #[serde(default = "default_summary_max_tokens")]
    pub summary_max_tokens: usize,
}

fn default_low_watermark() -> f32 {
    0.20
}
fn default_high_watermark() -> f32 {
    0.50
}
fn default_protected_exchanges() -> usize {
    2
}
fn default_summary_max_tokens() -> usize {
    1_024
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            low_watermark: default_low_watermark(),
            high_watermark: default_high_watermark(),
            protected_exchanges: default_protected_exchanges(),
            summary_max_tokens: default_summary_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    #[serde(default = "default_max_model_attempts")]
    pub max_model_attempts: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    #[serde(default = "default_max_concurrent_tools")]
    pub max_concurrent_tools: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

fn default_max_iterations() -> u32 {
    25
}
fn default_max_model_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    500
}
fn default_backoff_max_ms() -> u64 {
    8_000
}
fn default_tool_timeout_secs() -> u64 {
    60
}
fn default_max_concurrent_tools() -> usize {
    8
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_model_attempts: default_max_model_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            tool_timeout_secs: default_tool_timeout_secs(),
            max_concurrent_tools: default_max_concurrent_tools(),
            system_prompt: None,
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

impl AppConfig {
    /// Load configuration from the default path (~/.contextloop/config.toml).
    ///
    /// Environment variables override the file:
    /// - `CONTEXTLOOP_API_KEY` (highest priority), `OPENAI_API_KEY`, `OPENROUTER_API_KEY`
    /// - `CONTEXTLOOP_MODEL`
    /// - `CONTEXTLOOP_WORKSPACE`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::read_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::read_from(path)?;
        config.validate()?;
        Ok(config)
    }

    fn read_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("CONTEXTLOOP_API_KEY")
            .or_else(|| lookup("OPENAI_API_KEY"))
            .or_else(|| lookup("OPENROUTER_API_KEY"))
        {
            self.api_key = Some(key);
        }

        if let Some(model) = lookup("CONTEXTLOOP_MODEL") {
            self.active_model = model;
        }

        if let Some(root) = lookup("CONTEXTLOOP_WORKSPACE") {
            self.workspace.root = PathBuf::from(root);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".contextloop")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ctx = &self.context;
        if !(0.0 < ctx.low_watermark
            && ctx.low_watermark < ctx.high_watermark
            && ctx.high_watermark < 1.0)
        {
            return Err(ConfigError::ValidationError(format!(
                "watermarks must satisfy 0 < low < high < 1 (got low={}, high={})",
                ctx.low_watermark, ctx.high_watermark
            )));
        }

        for model in &self.models {
            if model.reserved_output >= model.context_limit.tokens() {
                return Err(ConfigError::ValidationError(format!(
                    "model '{}': reserved_output must be smaller than context_limit",
                    model.id
                )));
            }
            if let Some(cpt) = model.chars_per_token
                && cpt <= 0.0
            {
                return Err(ConfigError::ValidationError(format!(
                    "model '{}': chars_per_token must be > 0",
                    model.id
                )));
            }
        }

        self.active_profile()?;

        let agent = &self.agent;
        if agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError("agent.max_iterations must be >= 1".into()));
        }
        if agent.max_model_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_model_attempts must be >= 1".into(),
            ));
        }
        if agent.tool_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "agent.tool_timeout_secs must be >= 1".into(),
            ));
        }
        if agent.max_concurrent_tools == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_concurrent_tools must be >= 1".into(),
            ));
        }

        Ok(())
    }

    /// Build the model profile registry from the `models` table.
    pub fn profile_registry(&self) -> Result<ModelProfileRegistry, ConfigError> {
        let mut registry = ModelProfileRegistry::new();
        for model in &self.models {
            registry
                .register(model.to_profile())
                .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        }
        Ok(registry)
    }

    /// The profile selected by `active_model`.
    pub fn active_profile(&self) -> Result<ModelProfile, ConfigError> {
        let registry = self.profile_registry()?;
        registry
            .resolve_active(&self.active_model)
            .cloned()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))
    }

    /// Credentials configured for one tool, if any.
    pub fn tool_credentials(&self, tool: &str) -> Option<&HashMap<String, String>> {
        self.tools.get(tool)
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some() || self.providers.values().any(|p| p.api_key.is_some())
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            active_model: default_active_model(),
            workspace: WorkspaceConfig::default(),
            context: ContextConfig::default(),
            agent: AgentConfig::default(),
            models: default_models(),
            providers: HashMap::new(),
            tools: HashMap::new(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.active_model, "gpt-4o-mini");
        assert_eq!(config.agent.max_iterations, 25);
        assert_eq!(config.context.protected_exchanges, 2);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.active_model, config.active_model);
        assert_eq!(parsed.models.len(), config.models.len());
        assert_eq!(parsed.agent.backoff_max_ms, 8_000);
    }

    #[test]
    fn inverted_watermarks_rejected() {
        let mut config = AppConfig::default();
        config.context.low_watermark = 0.6;
        config.context.high_watermark = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_active_model_rejected() {
        let config = AppConfig {
            active_model: "gpt-9".into(),
            ..AppConfig::default()
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("gpt-9"));
        assert!(err.contains("gpt-4o-mini"));
    }

    #[test]
    fn protected_turns_key_still_accepted() {
        let config: AppConfig = toml::from_str("[context]\nprotected_turns = 3\n").unwrap();
        assert_eq!(config.context.protected_exchanges, 3);
    }

    #[test]
    fn zero_iterations_rejected() {
        let mut config = AppConfig::default();
        config.agent.max_iterations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        let config = result.unwrap();
        assert_eq!(config.active_model, "gpt-4o-mini");
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("gpt-4o-mini"));
        assert!(toml_str.contains("low_watermark"));
    }

    #[test]
    fn models_table_accepts_labels_and_counts() {
        let toml_str = r#"
active_model = "deepseek-chat"

[[models]]
id = "deepseek-chat"
provider = "openrouter"
context_limit = "64K"
reserved_output = 2048
chars_per_token = 3.0

[[models]]
id = "tiny"
context_limit = 8000
reserved_output = 512
temperature = 0.2
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        config.validate().unwrap();

        let active = config.active_profile().unwrap();
        assert_eq!(active.context_limit, 64_000);
        assert_eq!(active.provider, "openrouter");
        assert!((active.chars_per_token - 3.0).abs() < f32::EPSILON);

        let registry = config.profile_registry().unwrap();
        let tiny = registry.get("tiny").unwrap();
        assert_eq!(tiny.context_limit, 8_000);
        assert_eq!(tiny.provider, "openai");
        assert!((tiny.temperature - 0.2).abs() < f32::EPSILON);
    }

    #[test]
    fn reserved_output_must_fit() {
        let toml_str = r#"
active_model = "m"
[[models]]
id = "m"
context_limit = 1000
reserved_output = 1000
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_take_priority() {
        let mut config = AppConfig::default();
        config.apply_env_overrides(|key| match key {
            "OPENAI_API_KEY" => Some("sk-openai".into()),
            "OPENROUTER_API_KEY" => Some("sk-router".into()),
            "CONTEXTLOOP_MODEL" => Some("gpt-4o".into()),
            "CONTEXTLOOP_WORKSPACE" => Some("/srv/ws".into()),
            _ => None,
        });
        assert_eq!(config.api_key.as_deref(), Some("sk-openai"));
        assert_eq!(config.active_model, "gpt-4o");
        assert_eq!(config.workspace.root, PathBuf::from("/srv/ws"));
    }

    #[test]
    fn debug_redacts_secrets() {
        let mut config = AppConfig {
            api_key: Some("sk-secret".into()),
            ..AppConfig::default()
        };
        config.tools.insert(
            "weather".into(),
            HashMap::from([("token".to_string(), "hunter2".to_string())]),
        );
        config.providers.insert(
            "openai".into(),
            ProviderConfig {
                api_key: Some("sk-provider".into()),
                api_url: None,
            },
        );
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(!debug.contains("sk-provider"));
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "active_model = \"gpt-4o\"\n[agent]\nmax_iterations = 5\n",
        )
        .unwrap();
        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.active_model, "gpt-4o");
        assert_eq!(config.agent.max_iterations, 5);
        assert_eq!(config.agent.max_model_attempts, 3);
    }

    #[test]
    fn malformed_file_reports_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "active_model = [").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }
}
