//! Retry/circuit-breaker decorator for any [`LlmProvider`].

use std::sync::Arc;

use async_trait::async_trait;

use super::provider::{CompletionRequest, CompletionResponse, LlmProvider};
use crate::error::LlmError;
use crate::resilience::Guard;

/// Wraps a provider so every completion goes through a [`Guard`].
///
/// The guard's timeout bounds each attempt; a model call never blocks a
/// turn indefinitely.
pub struct ResilientProvider {
    inner: Arc<dyn LlmProvider>,
    guard: Guard,
}

impl ResilientProvider {
    pub fn new(inner: Arc<dyn LlmProvider>, guard: Guard) -> Self {
        Self { inner, guard }
    }

    pub fn guard(&self) -> &Guard {
        &self.guard
    }
}

#[async_trait]
impl LlmProvider for ResilientProvider {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.guard
            .run(|| self.inner.complete(request.clone()))
            .await
    }
}
