//! Orchestrator: runs one conversational turn over an `AuditState`.

use std::sync::Arc;

use chrono::Utc;

use crate::error::LlmError;
use crate::llm::LlmProvider;

use super::extract::{PhaseExtractor, PhaseRecord, PhaseResult};
use super::gate::{next_phase, resolve_phase};
use super::prompts::{clarifying_question, phase_opening, summary};
use super::state::{
    AuditState, ConversationMessage, DiscoveryData, InboundMessage, MessageRole, PainPointsData,
    Phase, QualificationData,
};

/// What a turn produced.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// State after the turn. Persist this; the input state is stale.
    pub state: AuditState,
    /// Phase the turn ran in.
    pub phase: Phase,
    /// Set when the turn completed this phase's data.
    pub completed: Option<Phase>,
    /// Assistant messages appended during the turn.
    pub replies: Vec<ConversationMessage>,
}

impl TurnOutcome {
    /// The audit reached `Finish` during this turn.
    pub fn finished_now(&self) -> bool {
        self.completed.is_some() && self.state.current_phase.is_terminal()
    }
}

/// Drives the phase state machine.
///
/// Holds no session state between turns; every call takes and returns the
/// whole `AuditState`.
pub struct Orchestrator {
    extractor: PhaseExtractor,
}

impl Orchestrator {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            extractor: PhaseExtractor::new(llm),
        }
    }

    pub fn model_name(&self) -> &str {
        self.extractor.model_name()
    }

    /// Run one turn.
    ///
    /// 1. Merge inbound messages onto the log.
    /// 2. Resolve the phase from collected data.
    /// 3. On `Finish`, answer with the summary and skip extraction.
    /// 4. With no new human input, ask the phase's opening question.
    /// 5. Otherwise run the phase extractor and either ask for what is
    ///    missing or store the data and move on.
    ///
    /// A failed model call fails the whole turn. Nothing partial is returned.
    pub async fn run_turn(
        &self,
        mut state: AuditState,
        inbound: Vec<InboundMessage>,
    ) -> Result<TurnOutcome, LlmError> {
        let new_human_input = state
            .messages
            .merge_inbound(inbound)
            .iter()
            .any(|m| m.role == MessageRole::Human);

        let phase = resolve_phase(&state);
        state.current_phase = phase;
        let reply_start = state.messages.len();
        let mut completed = None;

        if phase.is_terminal() {
            let text = summary(&state);
            state.messages.append_assistant(text);
        } else if !new_human_input {
            state.messages.append_assistant(phase_opening(phase));
        } else {
            let advanced = match phase {
                Phase::Discovery => self.advance::<DiscoveryData>(&mut state).await?,
                Phase::PainPoints => self.advance::<PainPointsData>(&mut state).await?,
                Phase::Qualification => self.advance::<QualificationData>(&mut state).await?,
                Phase::Finish => false,
            };
            if advanced {
                completed = Some(phase);
            }
        }

        state.updated_at = Some(Utc::now());
        let replies = state.messages.as_slice()[reply_start..].to_vec();

        tracing::debug!(
            phase = %phase,
            next = %state.current_phase,
            replies = replies.len(),
            "Turn complete"
        );

        Ok(TurnOutcome {
            state,
            phase,
            completed,
            replies,
        })
    }

    /// Extract `T` and apply the result. Returns whether the phase completed.
    async fn advance<T: PhaseRecord>(&self, state: &mut AuditState) -> Result<bool, LlmError> {
        match self.extractor.extract::<T>(&state.messages).await? {
            PhaseResult::Incomplete { missing } => {
                state
                    .messages
                    .append_assistant(clarifying_question(T::PHASE, &missing));
                Ok(false)
            }
            PhaseResult::Complete(record) => {
                *T::slot(state) = Some(record);
                let next = next_phase(state);
                if !T::PHASE.can_transition_to(next) {
                    // Later phases were already filled in, so the gate skips ahead.
                    tracing::warn!(from = %T::PHASE, to = %next, "Audit skipped a phase");
                }
                tracing::info!(from = %T::PHASE, to = %next, "Audit phase complete");
                state.current_phase = next;

                state.messages.append_assistant(phase_opening(next));
                if next.is_terminal() {
                    let text = summary(state);
                    state.messages.append_assistant(text);
                }
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::prompts::GREETING;
    use crate::audit::testing::ScriptedLlm;

    fn discovered() -> AuditState {
        let mut state = AuditState::new();
        state.messages.append_assistant(GREETING);
        state
            .messages
            .append(MessageRole::Human, "We're a tech company with 30 people");
        state.discovery_data = Some(DiscoveryData {
            industry: "Technology".into(),
            company_size: "11-50".into(),
        });
        state.current_phase = Phase::PainPoints;
        state
    }

    #[tokio::test]
    async fn fresh_session_gets_one_greeting() {
        let llm = ScriptedLlm::new(Vec::<String>::new());
        let orchestrator = Orchestrator::new(llm.clone());

        let outcome = orchestrator
            .run_turn(AuditState::new(), Vec::new())
            .await
            .unwrap();

        assert_eq!(outcome.state.messages.len(), 1);
        assert_eq!(outcome.replies[0].content, GREETING);
        assert_eq!(outcome.replies[0].role, MessageRole::Assistant);
        assert_eq!(outcome.state.current_phase, Phase::Discovery);
        assert!(outcome.completed.is_none());
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn discovery_answer_moves_to_pain_points() {
        let llm = ScriptedLlm::new([r#"{"industry": "Technology", "companySize": "30"}"#]);
        let orchestrator = Orchestrator::new(llm);
        let start = orchestrator
            .run_turn(AuditState::new(), Vec::new())
            .await
            .unwrap();

        let outcome = orchestrator
            .run_turn(
                start.state,
                vec![InboundMessage::human("Technology, 30 employees")],
            )
            .await
            .unwrap();

        assert_eq!(outcome.completed, Some(Phase::Discovery));
        assert_eq!(outcome.state.current_phase, Phase::PainPoints);
        assert_eq!(
            outcome.state.discovery_data.as_ref().unwrap().company_size,
            "30"
        );
        assert_eq!(outcome.replies.len(), 1);
        assert!(outcome.replies[0].content.contains("pain points"));
        assert_eq!(outcome.state.messages.len(), 3);
    }

    #[tokio::test]
    async fn full_pain_points_moves_to_qualification() {
        let llm = ScriptedLlm::new([
            r#"{"manualTasks": "data entry", "bottlenecks": "approvals", "dataSilos": "CRM and ERP"}"#,
        ]);
        let orchestrator = Orchestrator::new(llm);

        let outcome = orchestrator
            .run_turn(
                discovered(),
                vec![InboundMessage::human(
                    "Data entry eats our week, approvals stall, and CRM never talks to ERP",
                )],
            )
            .await
            .unwrap();

        assert_eq!(outcome.state.current_phase, Phase::Qualification);
        assert_eq!(outcome.completed, Some(Phase::PainPoints));
        let data = outcome.state.pain_points_data.as_ref().unwrap();
        assert_eq!(data.manual_tasks, "data entry");
        assert_eq!(data.bottlenecks, "approvals");
        assert_eq!(data.data_silos, "CRM and ERP");
        assert!(outcome.replies[0].content.contains("budget"));
    }

    #[tokio::test]
    async fn partial_pain_points_stays_and_asks_for_the_rest() {
        let llm = ScriptedLlm::new([r#"{"manualTasks": "data entry"}"#]);
        let orchestrator = Orchestrator::new(llm);

        let outcome = orchestrator
            .run_turn(discovered(), vec![InboundMessage::human("Lots of data entry")])
            .await
            .unwrap();

        assert_eq!(outcome.state.current_phase, Phase::PainPoints);
        assert!(outcome.state.pain_points_data.is_none());
        assert!(outcome.completed.is_none());
        assert_eq!(outcome.replies.len(), 1);
        let reply = &outcome.replies[0].content;
        assert!(reply.contains("where work gets stuck"));
        assert!(reply.contains("where information is trapped"));
    }

    #[tokio::test]
    async fn qualification_finishes_with_summary() {
        let llm = ScriptedLlm::new([r#"{"budget": "$50,000", "timeline": "3 months"}"#]);
        let orchestrator = Orchestrator::new(llm.clone());

        let mut state = discovered();
        state.pain_points_data = Some(PainPointsData {
            manual_tasks: "data entry".into(),
            bottlenecks: "approvals".into(),
            data_silos: "CRM and ERP".into(),
        });
        state.current_phase = Phase::Qualification;

        let outcome = orchestrator
            .run_turn(
                state,
                vec![InboundMessage::human("About $50,000 over 3 months")],
            )
            .await
            .unwrap();

        assert!(outcome.finished_now());
        assert_eq!(outcome.state.current_phase, Phase::Finish);
        let last = &outcome.state.messages.last().unwrap().content;
        assert!(last.contains("Technology"));
        assert!(last.contains("$50,000"));
        assert!(last.contains("3 months"));

        // A finished session answers with the summary and never calls the model again.
        let again = orchestrator
            .run_turn(outcome.state, vec![InboundMessage::human("thanks!")])
            .await
            .unwrap();
        assert_eq!(again.state.current_phase, Phase::Finish);
        assert!(again.replies[0].content.contains("$50,000"));
        assert!(!again.finished_now());
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn unknown_phase_behaves_as_discovery() {
        let llm = ScriptedLlm::new(Vec::<String>::new());
        let orchestrator = Orchestrator::new(llm);
        let state: AuditState = serde_json::from_value(serde_json::json!({
            "messages": [],
            "currentPhase": "invalid_phase"
        }))
        .unwrap();

        let outcome = orchestrator.run_turn(state, Vec::new()).await.unwrap();
        assert_eq!(outcome.state.current_phase, Phase::Discovery);
        assert_eq!(outcome.replies[0].content, GREETING);
    }

    #[tokio::test]
    async fn claimed_phase_without_data_is_resynced() {
        let llm = ScriptedLlm::new([r#"{"industry": null, "companySize": null}"#]);
        let orchestrator = Orchestrator::new(llm);
        let mut state = AuditState::new();
        state.current_phase = Phase::Qualification;

        let outcome = orchestrator
            .run_turn(state, vec![InboundMessage::human("$10k")])
            .await
            .unwrap();
        assert_eq!(outcome.phase, Phase::Discovery);
        assert_eq!(outcome.state.current_phase, Phase::Discovery);
    }

    #[tokio::test]
    async fn stale_discovery_phase_runs_pain_points_extraction() {
        let llm = ScriptedLlm::new([
            r#"{"manualTasks": "invoicing", "bottlenecks": "sign-off", "dataSilos": "billing and CRM"}"#,
        ]);
        let orchestrator = Orchestrator::new(llm.clone());
        let mut state = discovered();
        state.current_phase = Phase::Discovery;

        let outcome = orchestrator
            .run_turn(
                state,
                vec![InboundMessage::human(
                    "Invoicing is manual, sign-off is slow, billing and CRM are separate",
                )],
            )
            .await
            .unwrap();

        assert_eq!(outcome.phase, Phase::PainPoints);
        assert_eq!(outcome.completed, Some(Phase::PainPoints));
        assert_eq!(outcome.state.current_phase, Phase::Qualification);
        assert_eq!(
            outcome.state.pain_points_data.as_ref().unwrap().manual_tasks,
            "invoicing"
        );
        assert_eq!(
            outcome.state.discovery_data.as_ref().unwrap().industry,
            "Technology"
        );
        assert!(llm.prompts()[0].contains("manualTasks"));
    }

    #[tokio::test]
    async fn prefilled_later_phase_is_skipped() {
        let llm = ScriptedLlm::new([r#"{"industry": "Retail", "companySize": "12"}"#]);
        let orchestrator = Orchestrator::new(llm);
        let mut state = AuditState::new();
        state.pain_points_data = Some(PainPointsData {
            manual_tasks: "stock counts".into(),
            bottlenecks: "reordering".into(),
            data_silos: "POS and supplier portal".into(),
        });

        let outcome = orchestrator
            .run_turn(state, vec![InboundMessage::human("Retail shop, 12 staff")])
            .await
            .unwrap();

        assert_eq!(outcome.completed, Some(Phase::Discovery));
        assert_eq!(outcome.state.current_phase, Phase::Qualification);
        assert!(outcome.replies[0].content.contains("budget"));
    }

    #[tokio::test]
    async fn model_failure_fails_the_turn() {
        let llm = ScriptedLlm::failing();
        let orchestrator = Orchestrator::new(llm);

        let result = orchestrator
            .run_turn(discovered(), vec![InboundMessage::human("manual work")])
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn completed_data_is_never_rewritten() {
        let llm = ScriptedLlm::new([
            r#"{"industry": "Farming", "companySize": "2", "manualTasks": "a", "bottlenecks": "b", "dataSilos": "c"}"#,
        ]);
        let orchestrator = Orchestrator::new(llm);

        let outcome = orchestrator
            .run_turn(discovered(), vec![InboundMessage::human("a, b and c")])
            .await
            .unwrap();
        assert_eq!(
            outcome.state.discovery_data.as_ref().unwrap().industry,
            "Technology"
        );
        assert!(outcome.state.pain_points_data.is_some());
    }
}
