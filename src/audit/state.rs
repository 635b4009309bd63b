//! Audit state machine types: phases, the append-only message log, and the
//! per-session `AuditState` persisted in the cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

/// The phases of the audit conversation.
///
/// Progresses linearly: Discovery → PainPoints → Qualification → Finish.
/// The derived ordering follows that sequence.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum Phase {
    #[default]
    Discovery,
    PainPoints,
    Qualification,
    Finish,
}

impl Phase {
    /// Strict parse of the wire name.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "discovery" => Some(Self::Discovery),
            "pain_points" => Some(Self::PainPoints),
            "qualification" => Some(Self::Qualification),
            "finish" => Some(Self::Finish),
            _ => None,
        }
    }

    /// Check if a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, target),
            (Discovery, PainPoints) | (PainPoints, Qualification) | (Qualification, Finish)
        )
    }

    /// Whether this phase is terminal (the audit is done).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finish)
    }
}

/// Lenient parse used when reading stored or client-supplied phases.
///
/// Unknown values fall back to `Discovery` instead of failing the request.
/// `company_profile` is the name older start requests used for discovery.
impl From<String> for Phase {
    fn from(value: String) -> Self {
        match value.as_str() {
            "company_profile" => Self::Discovery,
            "finished" => Self::Finish,
            other => Self::parse(other).unwrap_or_else(|| {
                tracing::debug!(phase = other, "Unrecognized phase, treating as discovery");
                Self::Discovery
            }),
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Discovery => "discovery",
            Self::PainPoints => "pain_points",
            Self::Qualification => "qualification",
            Self::Finish => "finish",
        };
        write!(f, "{s}")
    }
}

/// Author of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    #[serde(alias = "user")]
    Human,
    #[serde(alias = "ai")]
    Assistant,
}

/// A message as sent by a client, before it has a position in the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(rename = "type", alias = "role")]
    pub role: MessageRole,
    pub content: String,
}

impl InboundMessage {
    pub fn human(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Human,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// A logged message. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMessage {
    #[serde(rename = "type", alias = "role")]
    pub role: MessageRole,
    pub content: String,
    /// Zero-based position in the session log.
    #[serde(default)]
    pub position: usize,
}

impl ConversationMessage {
    fn same_text(&self, inbound: &InboundMessage) -> bool {
        self.role == inbound.role && self.content == inbound.content
    }
}

/// Append-only, order-significant message log for one session.
///
/// There is no way to edit or remove an entry once appended. Positions are
/// reassigned on load so a tampered blob cannot reorder history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "Vec<ConversationMessage>")]
pub struct MessageLog {
    entries: Vec<ConversationMessage>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one message and return it.
    pub fn append(&mut self, role: MessageRole, content: impl Into<String>) -> &ConversationMessage {
        let position = self.entries.len();
        self.entries.push(ConversationMessage {
            role,
            content: content.into(),
            position,
        });
        &self.entries[position]
    }

    pub fn append_assistant(&mut self, content: impl Into<String>) -> &ConversationMessage {
        self.append(MessageRole::Assistant, content)
    }

    /// Merge a client batch onto the log and return the entries that were added.
    ///
    /// Clients may post only new messages or the whole history. If the batch
    /// starts with the entire current log, only the remainder is appended;
    /// otherwise the whole batch is appended in order.
    pub fn merge_inbound(&mut self, inbound: Vec<InboundMessage>) -> Vec<&ConversationMessage> {
        let echoes_log = !self.entries.is_empty()
            && inbound.len() >= self.entries.len()
            && self
                .entries
                .iter()
                .zip(&inbound)
                .all(|(logged, incoming)| logged.same_text(incoming));
        let skip = if echoes_log { self.entries.len() } else { 0 };

        let start = self.entries.len();
        for message in inbound.into_iter().skip(skip) {
            self.append(message.role, message.content);
        }
        self.entries[start..].iter().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&ConversationMessage> {
        self.entries.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ConversationMessage> {
        self.entries.iter()
    }

    pub fn as_slice(&self) -> &[ConversationMessage] {
        &self.entries
    }

    /// `Human:` / `Assistant:` transcript used in extraction prompts.
    pub fn transcript(&self) -> String {
        self.entries
            .iter()
            .map(|m| {
                let who = match m.role {
                    MessageRole::Human => "Human",
                    MessageRole::Assistant => "Assistant",
                };
                format!("{who}: {}", m.content)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl From<Vec<ConversationMessage>> for MessageLog {
    fn from(entries: Vec<ConversationMessage>) -> Self {
        let mut log = Self::new();
        for entry in entries {
            log.append(entry.role, entry.content);
        }
        log
    }
}

impl Serialize for MessageLog {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.entries.serialize(serializer)
    }
}

impl<'a> IntoIterator for &'a MessageLog {
    type Item = &'a ConversationMessage;
    type IntoIter = std::slice::Iter<'a, ConversationMessage>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

fn filled(value: &str) -> bool {
    !value.trim().is_empty()
}

/// Discovery phase facts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryData {
    pub industry: String,
    pub company_size: String,
}

impl DiscoveryData {
    pub fn is_complete(&self) -> bool {
        filled(&self.industry) && filled(&self.company_size)
    }
}

/// Pain-point phase facts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PainPointsData {
    pub manual_tasks: String,
    pub bottlenecks: String,
    pub data_silos: String,
}

impl PainPointsData {
    pub fn is_complete(&self) -> bool {
        filled(&self.manual_tasks) && filled(&self.bottlenecks) && filled(&self.data_silos)
    }
}

/// Qualification phase facts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualificationData {
    pub budget: String,
    pub timeline: String,
}

impl QualificationData {
    pub fn is_complete(&self) -> bool {
        filled(&self.budget) && filled(&self.timeline)
    }
}

/// Live state of one session, stored under `session:<sessionId>`.
///
/// A phase's data field is only set once that phase's extractor reported a
/// complete record, and is never overwritten afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuditState {
    pub messages: MessageLog,
    pub current_phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discovery_data: Option<DiscoveryData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pain_points_data: Option<PainPointsData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qualification_data: Option<QualificationData>,
    /// Normalized email of the prospect, when the session was started by email.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl AuditState {
    /// Fresh state: empty log, discovery phase.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh state owned by a thread.
    pub fn for_thread(email: &str, thread_id: &str) -> Self {
        Self {
            email: Some(crate::identity::normalize(email)),
            thread_id: Some(thread_id.to_string()),
            ..Self::default()
        }
    }

    pub fn is_finished(&self) -> bool {
        self.current_phase.is_terminal()
    }
}
