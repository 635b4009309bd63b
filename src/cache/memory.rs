//! In-process cache store for tests and keyless development.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use super::{CacheStore, Namespace};
use crate::error::CacheError;

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map(|at| at > now).unwrap_or(true)
    }
}

/// `RwLock`-guarded maps with the same semantics as the remote store.
#[derive(Debug, Default)]
pub struct MemoryCache {
    blobs: RwLock<HashMap<String, Entry>>,
    records: RwLock<HashMap<Namespace, HashMap<String, Value>>>,
    sequences: RwLock<HashMap<Namespace, u64>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let now = Instant::now();
        {
            let blobs = self.blobs.read().await;
            match blobs.get(key) {
                Some(entry) if entry.is_live(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }
        // Expired: drop it so the map does not grow without bound.
        debug!(key = key, "Evicting expired cache entry");
        let mut blobs = self.blobs.write().await;
        if blobs.get(key).is_some_and(|e| !e.is_live(now)) {
            blobs.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> Result<(), CacheError> {
        let entry = Entry {
            value: value.clone(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.blobs.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn put_record(
        &self,
        namespace: &Namespace,
        id: &str,
        value: &Value,
    ) -> Result<(), CacheError> {
        self.records
            .write()
            .await
            .entry(namespace.clone())
            .or_default()
            .insert(id.to_string(), value.clone());
        Ok(())
    }

    async fn list_records(&self, namespace: &Namespace) -> Result<Vec<(String, Value)>, CacheError> {
        let records = self.records.read().await;
        Ok(records
            .get(namespace)
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn next_sequence(&self, namespace: &Namespace) -> Result<u64, CacheError> {
        let mut sequences = self.sequences.write().await;
        let seq = sequences.entry(namespace.clone()).or_insert(0);
        *seq += 1;
        Ok(*seq)
    }
}
