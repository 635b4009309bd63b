//! Phase extractors: ask the model for one phase's fields as JSON and decide
//! whether the phase is complete.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::LlmError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};

use super::prompts::{EXTRACTION_SYSTEM, extraction_prompt};
use super::state::{
    AuditState, DiscoveryData, MessageLog, PainPointsData, Phase, QualificationData,
};

/// Outcome of running a phase extractor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseResult<T> {
    /// At least one field is absent or blank. Lists the wire names of those fields.
    Incomplete { missing: Vec<&'static str> },
    Complete(T),
}

/// A record collected by one phase.
pub trait PhaseRecord: Sized + Send {
    const PHASE: Phase;
    /// Wire names of every required field, in display order.
    const FIELDS: &'static [&'static str];

    /// Loosely-typed shape the model fills in.
    type Draft: DeserializeOwned + Default;

    fn from_draft(draft: Self::Draft) -> PhaseResult<Self>;

    /// Where this record lives on the session state.
    fn slot(state: &mut AuditState) -> &mut Option<Self>;
}

/// Values models use when they mean "not mentioned".
const PLACEHOLDERS: &[&str] = &["null", "none", "n/a", "na", "unknown", "not mentioned", "not provided"];

/// Accept strings, numbers, booleans, or string arrays and reduce them to trimmed text.
fn lenient_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    let text = match value {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        _ => return Ok(None),
    };
    let text = text.trim();
    if text.is_empty() || PLACEHOLDERS.contains(&text.to_lowercase().as_str()) {
        return Ok(None);
    }
    Ok(Some(text.to_string()))
}

fn require(value: Option<String>, field: &'static str, missing: &mut Vec<&'static str>) -> String {
    match value {
        Some(v) => v,
        None => {
            missing.push(field);
            String::new()
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiscoveryDraft {
    #[serde(deserialize_with = "lenient_text")]
    industry: Option<String>,
    #[serde(deserialize_with = "lenient_text", alias = "company_size", alias = "employees")]
    company_size: Option<String>,
}

impl PhaseRecord for DiscoveryData {
    const PHASE: Phase = Phase::Discovery;
    const FIELDS: &'static [&'static str] = &["industry", "companySize"];
    type Draft = DiscoveryDraft;

    fn from_draft(draft: DiscoveryDraft) -> PhaseResult<Self> {
        let mut missing = Vec::new();
        let industry = require(draft.industry, "industry", &mut missing);
        let company_size = require(draft.company_size, "companySize", &mut missing);
        if !missing.is_empty() {
            return PhaseResult::Incomplete { missing };
        }
        PhaseResult::Complete(Self {
            industry,
            company_size,
        })
    }

    fn slot(state: &mut AuditState) -> &mut Option<Self> {
        &mut state.discovery_data
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PainPointsDraft {
    #[serde(deserialize_with = "lenient_text", alias = "manual_tasks")]
    manual_tasks: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    bottlenecks: Option<String>,
    #[serde(deserialize_with = "lenient_text", alias = "data_silos")]
    data_silos: Option<String>,
}

impl PhaseRecord for PainPointsData {
    const PHASE: Phase = Phase::PainPoints;
    const FIELDS: &'static [&'static str] = &["manualTasks", "bottlenecks", "dataSilos"];
    type Draft = PainPointsDraft;

    fn from_draft(draft: PainPointsDraft) -> PhaseResult<Self> {
        let mut missing = Vec::new();
        let manual_tasks = require(draft.manual_tasks, "manualTasks", &mut missing);
        let bottlenecks = require(draft.bottlenecks, "bottlenecks", &mut missing);
        let data_silos = require(draft.data_silos, "dataSilos", &mut missing);
        if !missing.is_empty() {
            return PhaseResult::Incomplete { missing };
        }
        PhaseResult::Complete(Self {
            manual_tasks,
            bottlenecks,
            data_silos,
        })
    }

    fn slot(state: &mut AuditState) -> &mut Option<Self> {
        &mut state.pain_points_data
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QualificationDraft {
    #[serde(deserialize_with = "lenient_text")]
    budget: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    timeline: Option<String>,
}

impl PhaseRecord for QualificationData {
    const PHASE: Phase = Phase::Qualification;
    const FIELDS: &'static [&'static str] = &["budget", "timeline"];
    type Draft = QualificationDraft;

    fn from_draft(draft: QualificationDraft) -> PhaseResult<Self> {
        let mut missing = Vec::new();
        let budget = require(draft.budget, "budget", &mut missing);
        let timeline = require(draft.timeline, "timeline", &mut missing);
        if !missing.is_empty() {
            return PhaseResult::Incomplete { missing };
        }
        PhaseResult::Complete(Self { budget, timeline })
    }

    fn slot(state: &mut AuditState) -> &mut Option<Self> {
        &mut state.qualification_data
    }
}

/// Parse the first JSON object in a model reply, ignoring code fences or prose around it.
pub fn parse_json_object<D: DeserializeOwned>(raw: &str) -> Result<D, serde_json::Error> {
    let trimmed = raw.trim();
    let body = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if end > start => &trimmed[start..=end],
        _ => trimmed,
    };
    serde_json::from_str(body)
}

/// Runs phase extraction against the model.
pub struct PhaseExtractor {
    llm: Arc<dyn LlmProvider>,
    max_tokens: u32,
}

impl PhaseExtractor {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            llm,
            max_tokens: 512,
        }
    }

    pub fn model_name(&self) -> &str {
        self.llm.model_name()
    }

    /// Extract `T`'s fields from the transcript.
    ///
    /// A reply that is not valid JSON counts as incomplete with every field
    /// missing. Only a failed model call is an error.
    pub async fn extract<T: PhaseRecord>(
        &self,
        messages: &MessageLog,
    ) -> Result<PhaseResult<T>, LlmError> {
        let prompt = extraction_prompt(T::PHASE, &messages.transcript());
        let request = CompletionRequest::new(vec![
            ChatMessage::system(EXTRACTION_SYSTEM),
            ChatMessage::user(prompt),
        ])
        .with_max_tokens(self.max_tokens)
        .with_temperature(0.0);

        let response = self.llm.complete(request).await?;

        match parse_json_object::<T::Draft>(&response.content) {
            Ok(draft) => {
                let result = T::from_draft(draft);
                if let PhaseResult::Incomplete { missing } = &result {
                    tracing::debug!(phase = %T::PHASE, ?missing, "Extraction incomplete");
                }
                Ok(result)
            }
            Err(e) => {
                tracing::warn!(
                    phase = %T::PHASE,
                    error = %e,
                    raw = %response.content,
                    "Failed to parse extraction JSON"
                );
                Ok(PhaseResult::Incomplete {
                    missing: T::FIELDS.to_vec(),
                })
            }
        }
    }
}
