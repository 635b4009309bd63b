//! Shared key-value cache - the only cross-request persistence in the engine.
//!
//! Two shapes of data live here:
//! - opaque session blobs under `session:<sessionId>`, with a TTL;
//! - namespaced record collections keyed by `[normalizedEmail, category]`,
//!   where each record has its own id (thread id or write index).
//!
//! Implementations never retry on their own; wrap them in
//! [`ResilientCache`] for that.

pub mod memory;
pub mod resilient;
pub mod upstash;

pub use memory::MemoryCache;
pub use resilient::ResilientCache;
pub use upstash::{UpstashCache, UpstashConfig};

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::CacheError;
use crate::identity;

/// Record categories stored under an email namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Threads,
    Profile,
    Preferences,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Threads => "threads",
            Self::Profile => "profile",
            Self::Preferences => "preferences",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Compound namespace `[normalizedEmail, category]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    owner: String,
    category: Category,
}

impl Namespace {
    /// Build a namespace for `email`. The email is normalized here, so
    /// callers cannot accidentally split one identity across two keys.
    pub fn new(email: &str, category: Category) -> Self {
        Self {
            owner: identity::normalize(email),
            category,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn category(&self) -> Category {
        self.category
    }

    /// Flat key used by backends that need a single string.
    pub fn key(&self) -> String {
        format!("audit:{}:{}", self.owner, self.category)
    }
}

/// Key under which a session's AuditState is stored.
pub fn session_key(session_id: &str) -> String {
    format!("session:{session_id}")
}

/// Async interface to the external cache store.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Short backend name for logs and health output.
    fn backend(&self) -> &'static str;

    /// Fetch a blob. `Ok(None)` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    /// Store a blob, replacing any previous value. `ttl = None` keeps it indefinitely.
    async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Insert or replace one record in a namespace.
    async fn put_record(
        &self,
        namespace: &Namespace,
        id: &str,
        value: &Value,
    ) -> Result<(), CacheError>;

    /// All records in a namespace as `(id, value)` pairs, in no particular order.
    async fn list_records(&self, namespace: &Namespace) -> Result<Vec<(String, Value)>, CacheError>;

    /// Next value of the namespace's monotonically increasing write index.
    async fn next_sequence(&self, namespace: &Namespace) -> Result<u64, CacheError>;
}
