//! LLM integration - the opaque model-call collaborator.
//!
//! Supports:
//! - **Anthropic**: Direct API access via rig-core
//! - **OpenAI**: Direct API access via rig-core
//!
//! The engine only sees [`LlmProvider`]; `create_provider` picks a backend
//! and [`ResilientProvider`] adds retry, breaker, and timeout.

pub mod provider;
pub mod resilient;
mod rig_adapter;

pub use provider::{ChatMessage, CompletionRequest, CompletionResponse, LlmProvider, Role};
pub use resilient::ResilientProvider;
pub use rig_adapter::RigAdapter;

use std::sync::Arc;

use rig::client::CompletionClient;
use secrecy::ExposeSecret;

use crate::error::LlmError;

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Anthropic,
    OpenAi,
}

impl LlmBackend {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "anthropic" | "claude" => Some(Self::Anthropic),
            "openai" | "open_ai" => Some(Self::OpenAi),
            _ => None,
        }
    }

    /// Provider label used in logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
        }
    }

    /// Environment variable holding the API key for this backend.
    pub fn key_var(&self) -> &'static str {
        match self {
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Anthropic => "claude-sonnet-4-20250514",
            Self::OpenAi => "gpt-4o",
        }
    }
}

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: secrecy::SecretString,
    pub model: String,
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    use rig::providers::{anthropic, openai};

    let key = config.api_key.expose_secret();
    let provider = match config.backend {
        LlmBackend::Anthropic => {
            let client: rig::client::Client<anthropic::client::AnthropicExt> =
                anthropic::Client::new(key).map_err(|e| client_error(config.backend, e))?;
            adapt(client.completion_model(&config.model), config)
        }
        LlmBackend::OpenAi => {
            let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
                openai::Client::new(key).map_err(|e| client_error(config.backend, e))?;
            adapt(client.completion_model(&config.model), config)
        }
    };
    Ok(provider)
}

fn adapt<M>(model: M, config: &LlmConfig) -> Arc<dyn LlmProvider>
where
    M: rig::completion::CompletionModel + Clone + 'static,
{
    tracing::info!(backend = config.backend.name(), model = %config.model, "LLM provider ready");
    Arc::new(RigAdapter::new(model, &config.model, config.backend.name()))
}

fn client_error(backend: LlmBackend, e: impl std::fmt::Display) -> LlmError {
    LlmError::RequestFailed {
        provider: backend.name().to_string(),
        reason: format!("client setup failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_for(backend: LlmBackend) -> LlmConfig {
        LlmConfig {
            backend,
            api_key: secrecy::SecretString::from("test-key"),
            model: backend.default_model().to_string(),
        }
    }

    #[test]
    fn each_backend_builds_with_its_default_model() {
        for backend in [LlmBackend::Anthropic, LlmBackend::OpenAi] {
            let provider = create_provider(&config_for(backend)).unwrap();
            assert_eq!(provider.model_name(), backend.default_model());
        }
    }

    #[test]
    fn backends_read_distinct_key_vars() {
        assert_eq!(LlmBackend::Anthropic.key_var(), "ANTHROPIC_API_KEY");
        assert_eq!(LlmBackend::OpenAi.key_var(), "OPENAI_API_KEY");
        assert_ne!(
            LlmBackend::Anthropic.default_model(),
            LlmBackend::OpenAi.default_model()
        );
    }

    #[test]
    fn backend_parsing() {
        assert_eq!(LlmBackend::parse("Anthropic"), Some(LlmBackend::Anthropic));
        assert_eq!(LlmBackend::parse("claude"), Some(LlmBackend::Anthropic));
        assert_eq!(LlmBackend::parse(" openai "), Some(LlmBackend::OpenAi));
        assert_eq!(LlmBackend::parse("gemini"), None);
    }
}
