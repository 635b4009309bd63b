//! Records stored under an email namespace, plus the per-invocation graph config.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lifecycle of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    Active,
    Completed,
    /// Any value written by something other than this service.
    #[serde(other)]
    Other,
}

impl std::fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Other => "other",
        };
        write!(f, "{s}")
    }
}

/// A durable, email-keyed conversation lineage.
///
/// Only `status` changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadRecord {
    pub thread_id: String,
    pub created_at: DateTime<Utc>,
    pub email: String,
    pub status: ThreadStatus,
    /// Session that holds this thread's live AuditState. Older records may
    /// not have one, in which case the thread id doubles as the session id.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub session_id: String,
}

impl ThreadRecord {
    pub fn session_id(&self) -> &str {
        if self.session_id.is_empty() {
            &self.thread_id
        } else {
            &self.session_id
        }
    }
}

/// Company facts remembered across sessions for one email.
///
/// Each write replaces the previous profile entirely.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_size: Option<String>,
    /// Free-form attributes beyond the known ones.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    /// Set by the store on every write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// How a prospect prefers to be contacted about their audit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditPreferences {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_meeting_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub communication_preference: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Records that carry a write timestamp set by the store.
pub trait Stamped {
    fn stamp(&mut self, at: DateTime<Utc>);
    fn updated_at(&self) -> Option<DateTime<Utc>>;
}

impl Stamped for UserProfile {
    fn stamp(&mut self, at: DateTime<Utc>) {
        self.updated_at = Some(at);
    }
    fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }
}

impl Stamped for AuditPreferences {
    fn stamp(&mut self, at: DateTime<Utc>) {
        self.updated_at = Some(at);
    }
    fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }
}

/// Correlation object for a single invocation. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphConfig {
    pub configurable: Configurable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configurable {
    pub thread_id: String,
    pub user_id: String,
}

/// Thread and user ids pulled out of a graph config.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserContext {
    pub thread_id: String,
    pub user_id: String,
}
