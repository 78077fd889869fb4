//! Model profiles: context limits and call parameters per model.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::RegistryError;

/// Fallback when a context-limit label cannot be parsed.
pub const DEFAULT_CONTEXT_LIMIT: usize = 64_000;

/// Average characters per token for mixed CJK/English text.
pub const DEFAULT_CHARS_PER_TOKEN: f32 = 3.5;

/// Limits and call parameters for one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelProfile {
    /// Identifier sent to the endpoint (e.g. "gpt-4o")
    pub model_id: String,

    /// Which configured provider serves this model
    #[serde(default)]
    pub provider: String,

    /// Total context window in tokens
    pub context_limit: usize,

    /// Tokens kept free for the model's reply
    pub reserved_output: usize,

    /// Length heuristic used when exact tokenization is unknown
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: f32,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_chars_per_token() -> f32 {
    DEFAULT_CHARS_PER_TOKEN
}

fn default_temperature() -> f32 {
    0.7
}

impl ModelProfile {
    pub fn new(model_id: impl Into<String>, context_limit: usize, reserved_output: usize) -> Self {
        Self {
            model_id: model_id.into(),
            provider: String::new(),
            context_limit,
            reserved_output,
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
            temperature: default_temperature(),
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    pub fn with_chars_per_token(mut self, chars_per_token: f32) -> Self {
        self.chars_per_token = chars_per_token;
        self
    }

    /// Tokens available for the prompt: `context_limit - reserved_output`.
    pub fn usable_budget(&self) -> i64 {
        self.context_limit as i64 - self.reserved_output as i64
    }
}

/// Parse a context-limit label such as `"128K"`, `"1M"`, `"1.5M"` or `"150"`.
///
/// Bare numbers are thousands of tokens. Unparseable input falls back to
/// [`DEFAULT_CONTEXT_LIMIT`].
pub fn parse_context_limit(label: &str) -> usize {
    let trimmed = label.trim();
    let upper = trimmed.to_ascii_uppercase();

    let (number, multiplier) = if let Some(n) = upper.strip_suffix('K') {
        (n, 1_000.0)
    } else if let Some(n) = upper.strip_suffix('M') {
        (n, 1_000_000.0)
    } else {
        (upper.as_str(), 1_000.0)
    };

    match number.trim().parse::<f64>() {
        Ok(value) if value > 0.0 && value.is_finite() => (value * multiplier) as usize,
        _ => {
            tracing::warn!(label = %label, "Unrecognized context limit, using 64K");
            DEFAULT_CONTEXT_LIMIT
        }
    }
}

/// Known model profiles, keyed by model id, in registration order.
#[derive(Debug, Clone, Default)]
pub struct ModelProfileRegistry {
    order: Vec<String>,
    profiles: HashMap<String, ModelProfile>,
}

impl ModelProfileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a profile. Fails if the id is already present.
    pub fn register(&mut self, profile: ModelProfile) -> Result<(), RegistryError> {
        if self.profiles.contains_key(&profile.model_id) {
            return Err(RegistryError::DuplicateProfile(profile.model_id));
        }
        self.order.push(profile.model_id.clone());
        self.profiles.insert(profile.model_id.clone(), profile);
        Ok(())
    }

    pub fn get(&self, model_id: &str) -> Option<&ModelProfile> {
        self.profiles.get(model_id)
    }

    /// Look up the selected profile, listing known ids on failure.
    pub fn resolve_active(&self, model_id: &str) -> Result<&ModelProfile, RegistryError> {
        self.get(model_id).ok_or_else(|| RegistryError::UnknownProfile {
            id: model_id.to_string(),
            known: self.order.clone(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelProfile> {
        self.order.iter().filter_map(|id| self.profiles.get(id))
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

    #[test]
    fn parse_presets_and_custom_labels() {
        assert_eq!(parse_context_limit("32K"), 32_000);
        assert_eq!(parse_context_limit("128k"), 128_000);
        assert_eq!(parse_context_limit("1M"), 1_000_000);
        assert_eq!(parse_context_limit("1.5M"), 1_500_000);
        assert_eq!(parse_context_limit("150"), 150_000);
    }

    #[test]
    fn parse_garbage_falls_back() {
        assert_eq!(parse_context_limit("lots"), DEFAULT_CONTEXT_LIMIT);
        assert_eq!(parse_context_limit("-5K"), DEFAULT_CONTEXT_LIMIT);
        assert_eq!(parse_context_limit(""), DEFAULT_CONTEXT_LIMIT);
    }

    #[test]
    fn usable_budget_subtracts_reserved_output() {
        let profile = ModelProfile::new("m", 32_000, 4_000);
        assert_eq!(profile.usable_budget(), 28_000);
    }

    #[test]
    fn registry_rejects_duplicates_and_keeps_order() {
        let mut registry = ModelProfileRegistry::new();
        registry.register(ModelProfile::new("b", 8_000, 1_000)).unwrap();
        registry.register(ModelProfile::new("a", 16_000, 1_000)).unwrap();
        assert!(matches!(
            registry.register(ModelProfile::new("a", 1, 0)),
            Err(RegistryError::DuplicateProfile(_))
        ));

        let ids: Vec<_> = registry.iter().map(|p| p.model_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(registry.get("a").unwrap().context_limit, 16_000);
    }

    #[test]
    fn resolve_active_reports_known_ids() {
        let mut registry = ModelProfileRegistry::new();
        registry.register(ModelProfile::new("gpt-4o", 128_000, 4_096)).unwrap();
        match registry.resolve_active("missing") {
            Err(RegistryError::UnknownProfile { known, .. }) => assert_eq!(known, vec!["gpt-4o"]),
            other => panic!("expected UnknownProfile, got {other:?}"),
        }
    }
}
