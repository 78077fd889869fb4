//! Runtime settings for the agent loop, derived from `AppConfig`.

use contextloop_config::{AppConfig, ConfigError};
use contextloop_core::model::ModelProfile;
use contextloop_security::{PathValidationError, Workspace};
use std::time::Duration;

use crate::compression::CompressionPolicy;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Workspace(#[from] PathValidationError),
}

/// Bounded exponential backoff for model calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay after the `failed_attempt`-th failure (1-based):
    /// `min(base * 2^(n-1), max)`.
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub profile: ModelProfile,
    pub workspace: Workspace,
    pub compression: CompressionPolicy,
    pub retry: RetryPolicy,
    pub max_iterations: u32,
    pub tool_timeout: Duration,
    pub max_concurrent_tools: usize,
    pub system_prompt: Option<String>,
}

impl AgentSettings {
    /// Defaults around an explicit profile and workspace.
    pub fn new(profile: ModelProfile, workspace: Workspace) -> Self {
        Self {
            profile,
            workspace,
            compression: CompressionPolicy::default(),
            retry: RetryPolicy::default(),
            max_iterations: 25,
            tool_timeout: Duration::from_secs(60),
            max_concurrent_tools: 8,
            system_prompt: None,
        }
    }

    /// Resolve the active profile and open the configured workspace.
    ///
    /// The workspace directory must already exist.
    pub fn from_config(config: &AppConfig) -> Result<Self, SettingsError> {
        let profile = config.active_profile()?;
        let workspace = Workspace::new(&config.workspace.root)?;
        let ctx = &config.context;
        let agent = &config.agent;

        Ok(Self {
            profile,
            workspace,
            compression: CompressionPolicy {
                low_watermark: ctx.low_watermark,
                high_watermark: ctx.high_watermark,
                protected_exchanges: ctx.protected_exchanges,
                summary_max_tokens: ctx.summary_max_tokens,
            },
            retry: RetryPolicy {
                max_attempts: agent.max_model_attempts.max(1),
                base_delay: Duration::from_millis(agent.backoff_base_ms),
                max_delay: Duration::from_millis(agent.backoff_max_ms),
            },
            max_iterations: agent.max_iterations,
            tool_timeout: Duration::from_secs(agent.tool_timeout_secs),
            max_concurrent_tools: agent.max_concurrent_tools.max(1),
            system_prompt: agent.system_prompt.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        let retry = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_000),
        };
        assert_eq!(retry.delay_after(1), Duration::from_millis(100));
        assert_eq!(retry.delay_after(2), Duration::from_millis(200));
        assert_eq!(retry.delay_after(4), Duration::from_millis(800));
        assert_eq!(retry.delay_after(5), Duration::from_millis(1_000));
        assert_eq!(retry.delay_after(40), Duration::from_millis(1_000));
    }

    #[test]
    fn from_config_maps_every_section() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.workspace.root = dir.path().to_path_buf();
        config.context.protected_exchanges = 3;
        config.agent.tool_timeout_secs = 5;
        config.agent.backoff_base_ms = 250;
        config.agent.system_prompt = Some("Be brief.".into());

        let settings = AgentSettings::from_config(&config).unwrap();
        assert_eq!(settings.profile.model_id, "gpt-4o-mini");
        assert_eq!(settings.compression.protected_exchanges, 3);
        assert_eq!(settings.tool_timeout, Duration::from_secs(5));
        assert_eq!(settings.retry.base_delay, Duration::from_millis(250));
        assert_eq!(settings.system_prompt.as_deref(), Some("Be brief."));
        assert_eq!(settings.workspace.root(), dir.path().canonicalize().unwrap());
    }

    #[test]
    fn missing_workspace_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.workspace.root = dir.path().join("does-not-exist");

        let err = AgentSettings::from_config(&config).unwrap_err();
        assert!(matches!(err, SettingsError::Workspace(_)));
    }

    #[test]
    fn unknown_active_model_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.workspace.root = dir.path().to_path_buf();
        config.active_model = "nope".into();

        let err = AgentSettings::from_config(&config).unwrap_err();
        assert!(matches!(err, SettingsError::Config(_)));
    }
}
