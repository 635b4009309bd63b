//! The audit conversation: a three-phase interview (discovery, pain points,
//! qualification) that ends in a summary report.
//!
//! Each turn merges inbound messages into the session's append-only log,
//! asks the model to extract the current phase's fields, and advances only
//! when every field of that phase is present. Phase progression is decided
//! by the completion gate from collected data alone.

pub mod extract;
pub mod gate;
pub mod orchestrator;
pub mod prompts;
pub mod state;

pub use extract::{PhaseExtractor, PhaseRecord, PhaseResult};
pub use gate::{next_phase, resolve_phase};
pub use orchestrator::{Orchestrator, TurnOutcome};
pub use state::{
    AuditState, ConversationMessage, DiscoveryData, InboundMessage, MessageLog, MessageRole,
    PainPointsData, Phase, QualificationData,
};

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use crate::error::LlmError;
    use crate::llm::{CompletionRequest, CompletionResponse, LlmProvider};

    /// Replays canned completions in order and records every prompt.
    pub struct ScriptedLlm {
        replies: Mutex<VecDeque<String>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        pub fn new<I, S>(replies: I) -> Arc<Self>
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        /// Every call fails.
        pub fn failing() -> Arc<Self> {
            Self::new(Vec::<String>::new())
        }

        pub fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }

        pub fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            self.prompts.lock().unwrap().push(request.prompt_text());
            match self.replies.lock().unwrap().pop_front() {
                Some(content) => Ok(CompletionResponse { content }),
                None => Err(LlmError::RequestFailed {
                    provider: "scripted".into(),
                    reason: "no scripted reply left".into(),
                }),
            }
        }
    }
}
