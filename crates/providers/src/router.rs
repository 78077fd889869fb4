//! Client router: selects the model client for a profile's provider.
//!
//! Handles client creation from configuration and routing a model profile
//! to the right backend.

use std::collections::HashMap;
use std::sync::Arc;

use contextloop_config::AppConfig;
use contextloop_core::client::ModelClient;
use contextloop_core::error::ProviderError;
use contextloop_core::model::ModelProfile;
use tracing::debug;

use crate::openai_compat::OpenAiCompatClient;

/// Routes model calls to the client serving each provider.
#[derive(Default)]
pub struct ClientRouter {
    clients: HashMap<String, Arc<dyn ModelClient>>,
}

impl ClientRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client under a provider name.
    pub fn register(&mut self, name: impl Into<String>, client: Arc<dyn ModelClient>) {
        self.clients.insert(name.into(), client);
    }

    /// Get a specific client by provider name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn ModelClient>> {
        self.clients.get(name).cloned()
    }

    /// The client serving `profile`.
    pub fn client_for(&self, profile: &ModelProfile) -> Result<Arc<dyn ModelClient>, ProviderError> {
        self.get(&profile.provider).ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "No client for provider '{}' (model '{}'); add [providers.{}] api_url",
                profile.provider, profile.model_id, profile.provider
            ))
        })
    }

    /// List all registered provider names.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.clients.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Build one client per configured provider, plus one for every
    /// well-known provider a model entry refers to.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut router = Self::new();

        for (name, provider_config) in &config.providers {
            let api_key = provider_config
                .api_key
                .clone()
                .or_else(|| config.api_key.clone())
                .unwrap_or_default();

            let Some(base_url) = provider_config
                .api_url
                .clone()
                .or_else(|| default_base_url(name))
            else {
                debug!(provider = %name, "Skipping provider without api_url");
                continue;
            };

            router.register(
                name.clone(),
                Arc::new(OpenAiCompatClient::new(name, base_url, api_key)),
            );
        }

        // Models may name a well-known provider without a [providers] entry
        for model in &config.models {
            if router.get(&model.provider).is_some() {
                continue;
            }
            if let Some(base_url) = default_base_url(&model.provider) {
                let api_key = config.api_key.clone().unwrap_or_default();
                router.register(
                    model.provider.clone(),
                    Arc::new(OpenAiCompatClient::new(&model.provider, base_url, api_key)),
                );
            }
        }

        router
    }
}

/// Get the default base URL for well-known providers.
fn default_base_url(provider_name: &str) -> Option<String> {
    let url = match provider_name {
        "openrouter" => "https://openrouter.ai/api/v1",
        "openai" => "https://api.openai.com/v1",
        "ollama" => "http://localhost:11434/v1",
        "deepseek" => "https://api.deepseek.com/v1",
        "groq" => "https://api.groq.com/openai/v1",
        "together" => "https://api.together.xyz/v1",
        "fireworks" => "https://api.fireworks.ai/inference/v1",
        "vllm" => "http://localhost:8000/v1",
        "llamacpp" | "llama.cpp" => "http://localhost:8080/v1",
        _ => return None,
    };
    Some(url.to_string())
}
