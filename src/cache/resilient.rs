//! Retry/circuit-breaker decorator for any [`CacheStore`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{CacheStore, Namespace};
use crate::error::CacheError;
use crate::resilience::Guard;

/// Wraps a cache store so every call goes through a [`Guard`].
pub struct ResilientCache {
    inner: Arc<dyn CacheStore>,
    guard: Guard,
}

impl ResilientCache {
    pub fn new(inner: Arc<dyn CacheStore>, guard: Guard) -> Self {
        Self { inner, guard }
    }

    pub fn guard(&self) -> &Guard {
        &self.guard
    }
}

#[async_trait]
impl CacheStore for ResilientCache {
    fn backend(&self) -> &'static str {
        self.inner.backend()
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        self.guard.run(|| self.inner.get(key)).await
    }

    async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.guard.run(|| self.inner.set(key, value, ttl)).await
    }

    async fn put_record(
        &self,
        namespace: &Namespace,
        id: &str,
        value: &Value,
    ) -> Result<(), CacheError> {
        self.guard
            .run(|| self.inner.put_record(namespace, id, value))
            .await
    }

    async fn list_records(&self, namespace: &Namespace) -> Result<Vec<(String, Value)>, CacheError> {
        self.guard.run(|| self.inner.list_records(namespace)).await
    }

    async fn next_sequence(&self, namespace: &Namespace) -> Result<u64, CacheError> {
        self.guard.run(|| self.inner.next_sequence(namespace)).await
    }
}
