//! Thread identity - resolves "who is this user" across sessions by email.
//!
//! A thread id is `<normalizedEmail>-<creationMillis>`. The timestamp suffix
//! doubles as a recency signal, and uniqueness depends on its resolution:
//! two threads created for the same email in the same millisecond collide.
//!
//! All writes here are last-write-wins with no compare-and-swap. In
//! particular [`ThreadManager::get_or_create_thread`] lists and then creates,
//! so two concurrent first calls for one email can both create a thread.
//! Callers must tolerate more than one thread per email.

pub mod model;

pub use model::{
    AuditPreferences, Configurable, GraphConfig, Stamped, ThreadRecord, ThreadStatus,
    UserContext, UserProfile,
};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{CacheStore, Category, Namespace};
use crate::error::CacheError;
use crate::identity;

/// Build a thread id from an email and a millisecond timestamp.
pub fn generate_thread_id(email: &str, timestamp_ms: i64) -> String {
    format!("{}-{}", identity::normalize(email), timestamp_ms)
}

/// Recover the email part of a thread id.
///
/// Splits on the last hyphen only when what follows is all digits, so
/// emails that contain hyphens parse correctly. Ids without a numeric
/// suffix are returned unchanged.
pub fn extract_email_from_thread_id(thread_id: &str) -> String {
    match thread_id.rsplit_once('-') {
        Some((email, suffix))
            if !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()) =>
        {
            email.to_string()
        }
        _ => thread_id.to_string(),
    }
}

/// Correlation config for one invocation.
pub fn create_graph_config(email: &str, thread_id: &str) -> GraphConfig {
    GraphConfig {
        configurable: Configurable {
            thread_id: thread_id.to_string(),
            user_id: identity::normalize(email),
        },
    }
}

/// Pull thread/user ids out of an arbitrary config value.
///
/// Missing or non-string fields come back as empty strings.
pub fn extract_user_context(config: &Value) -> UserContext {
    let field = |name: &str| {
        config
            .get("configurable")
            .and_then(|c| c.get(name))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    UserContext {
        thread_id: field("thread_id"),
        user_id: field("user_id"),
    }
}

impl From<&GraphConfig> for UserContext {
    fn from(config: &GraphConfig) -> Self {
        Self {
            thread_id: config.configurable.thread_id.clone(),
            user_id: config.configurable.user_id.clone(),
        }
    }
}

/// Result of [`ThreadManager::get_or_create_thread`].
#[derive(Debug, Clone)]
pub struct ResolvedThread {
    pub thread: ThreadRecord,
    pub is_new: bool,
}

impl ResolvedThread {
    pub fn thread_id(&self) -> &str {
        &self.thread.thread_id
    }
}

/// Thread, profile, and preference records keyed by email.
pub struct ThreadManager {
    cache: Arc<dyn CacheStore>,
}

impl ThreadManager {
    pub fn new(cache: Arc<dyn CacheStore>) -> Self {
        Self { cache }
    }

    /// All thread records for an email, skipping any that fail to parse.
    pub async fn list_threads(&self, email: &str) -> Result<Vec<ThreadRecord>, CacheError> {
        let namespace = Namespace::new(email, Category::Threads);
        let raw = self.cache.list_records(&namespace).await?;
        let threads = raw
            .into_iter()
            .filter_map(|(id, value)| match serde_json::from_value::<ThreadRecord>(value) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(thread_id = %id, error = %e, "Skipping unreadable thread record");
                    None
                }
            })
            .collect();
        Ok(threads)
    }

    /// Ids of every thread stored for an email. Empty when there are none.
    pub async fn find_threads_for_email(&self, email: &str) -> Result<Vec<String>, CacheError> {
        Ok(self
            .list_threads(email)
            .await?
            .into_iter()
            .map(|t| t.thread_id)
            .collect())
    }

    /// Create and store a new active thread with its own session id.
    pub async fn create_thread(
        &self,
        email: &str,
        created_at: DateTime<Utc>,
    ) -> Result<ThreadRecord, CacheError> {
        let record = ThreadRecord {
            thread_id: generate_thread_id(email, created_at.timestamp_millis()),
            created_at,
            email: identity::normalize(email),
            status: ThreadStatus::Active,
            session_id: Uuid::new_v4().simple().to_string(),
        };
        self.put_thread(&record).await?;
        info!(thread_id = %record.thread_id, session_id = %record.session_id, "Created thread");
        Ok(record)
    }

    /// Most recent thread for the email, or a new one if none exist.
    ///
    /// Recency is `createdAt`; equal timestamps are broken by the
    /// lexicographically greatest thread id.
    pub async fn get_or_create_thread(&self, email: &str) -> Result<ResolvedThread, CacheError> {
        let existing = self.list_threads(email).await?;
        if let Some(latest) = most_recent(existing) {
            debug!(thread_id = %latest.thread_id, "Resuming existing thread");
            return Ok(ResolvedThread {
                thread: latest,
                is_new: false,
            });
        }
        let thread = self.create_thread(email, Utc::now()).await?;
        Ok(ResolvedThread {
            thread,
            is_new: true,
        })
    }

    /// Update a thread's status. Returns false if the thread does not exist.
    pub async fn set_thread_status(
        &self,
        email: &str,
        thread_id: &str,
        status: ThreadStatus,
    ) -> Result<bool, CacheError> {
        let threads = self.list_threads(email).await?;
        let Some(mut record) = threads.into_iter().find(|t| t.thread_id == thread_id) else {
            return Ok(false);
        };
        if record.status == status {
            return Ok(true);
        }
        record.status = status;
        self.put_thread(&record).await?;
        info!(thread_id = %thread_id, status = %status, "Thread status updated");
        Ok(true)
    }

    pub async fn store_user_profile(
        &self,
        email: &str,
        profile: UserProfile,
    ) -> Result<UserProfile, CacheError> {
        self.store_latest(email, Category::Profile, profile).await
    }

    /// The most recently written profile, or `None`.
    pub async fn get_user_profile(&self, email: &str) -> Result<Option<UserProfile>, CacheError> {
        self.load_latest(email, Category::Profile).await
    }

    pub async fn store_audit_preferences(
        &self,
        email: &str,
        preferences: AuditPreferences,
    ) -> Result<AuditPreferences, CacheError> {
        self.store_latest(email, Category::Preferences, preferences)
            .await
    }

    /// The most recently written preferences, or `None`.
    pub async fn get_audit_preferences(
        &self,
        email: &str,
    ) -> Result<Option<AuditPreferences>, CacheError> {
        self.load_latest(email, Category::Preferences).await
    }

    async fn put_thread(&self, record: &ThreadRecord) -> Result<(), CacheError> {
        let namespace = Namespace::new(&record.email, Category::Threads);
        let value = serde_json::to_value(record)?;
        self.cache
            .put_record(&namespace, &record.thread_id, &value)
            .await
    }

    async fn store_latest<T>(
        &self,
        email: &str,
        category: Category,
        mut record: T,
    ) -> Result<T, CacheError>
    where
        T: Stamped + Serialize,
    {
        let namespace = Namespace::new(email, category);
        record.stamp(Utc::now());
        let index = self.cache.next_sequence(&namespace).await?;
        let value = serde_json::to_value(&record)?;
        self.cache
            .put_record(&namespace, &index.to_string(), &value)
            .await?;
        debug!(owner = %namespace.owner(), category = %category, index, "Stored record");
        Ok(record)
    }

    async fn load_latest<T>(&self, email: &str, category: Category) -> Result<Option<T>, CacheError>
    where
        T: Stamped + DeserializeOwned,
    {
        let namespace = Namespace::new(email, category);
        let raw = self.cache.list_records(&namespace).await?;
        let latest = raw
            .into_iter()
            .filter_map(|(id, value)| match serde_json::from_value::<T>(value) {
                Ok(record) => Some((id.parse::<u64>().unwrap_or(0), record)),
                Err(e) => {
                    warn!(owner = %namespace.owner(), category = %category, id = %id, error = %e, "Skipping unreadable record");
                    None
                }
            })
            .max_by(|(a_idx, a), (b_idx, b)| {
                a_idx
                    .cmp(b_idx)
                    .then_with(|| a.updated_at().cmp(&b.updated_at()))
            })
            .map(|(_, record)| record);
        Ok(latest)
    }
}

fn most_recent(threads: Vec<ThreadRecord>) -> Option<ThreadRecord> {
    threads.into_iter().max_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.thread_id.cmp(&b.thread_id))
    })
}
