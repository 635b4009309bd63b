//! Bridges rig-core completion models to [`LlmProvider`].

use async_trait::async_trait;
use rig::agent::AgentBuilder;
use rig::completion::{CompletionModel, Prompt, PromptError};

use super::provider::{CompletionRequest, CompletionResponse, LlmProvider};
use crate::error::LlmError;

/// Default output budget; Anthropic requires an explicit one.
const DEFAULT_MAX_TOKENS: u64 = 1024;

/// Wraps a rig `CompletionModel`. A fresh agent is built per request so the
/// preamble can differ between calls.
pub struct RigAdapter<M> {
    model: M,
    model_name: String,
    provider: &'static str,
}

impl<M> RigAdapter<M>
where
    M: CompletionModel + Clone + 'static,
{
    pub fn new(model: M, model_name: &str, provider: &'static str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
            provider,
        }
    }

    fn map_error(&self, err: PromptError) -> LlmError {
        let reason = err.to_string();
        let lowered = reason.to_lowercase();
        if lowered.contains("429") || lowered.contains("rate limit") {
            LlmError::RateLimited {
                provider: self.provider.to_string(),
                retry_after: None,
            }
        } else if lowered.contains("401") || lowered.contains("403") || lowered.contains("api key")
        {
            LlmError::AuthFailed {
                provider: self.provider.to_string(),
            }
        } else {
            LlmError::RequestFailed {
                provider: self.provider.to_string(),
                reason,
            }
        }
    }
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + Clone + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let preamble = request.system_text();
        let prompt = request.prompt_text();

        let mut builder = AgentBuilder::new(self.model.clone())
            .max_tokens(request.max_tokens.map(u64::from).unwrap_or(DEFAULT_MAX_TOKENS));
        if !preamble.is_empty() {
            builder = builder.preamble(&preamble);
        }
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(f64::from(temperature));
        }
        let agent = builder.build();

        let content = agent
            .prompt(prompt.as_str())
            .await
            .map_err(|e| self.map_error(e))?;

        if content.trim().is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: self.provider.to_string(),
                reason: "empty completion".to_string(),
            });
        }

        Ok(CompletionResponse { content })
    }
}
