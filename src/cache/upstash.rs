//! Upstash Redis over its REST interface.
//!
//! Each command is a POST of a JSON array (`["SET", "k", "v", "EX", "60"]`)
//! to the database URL with a bearer token. Replies are `{"result": ...}` on
//! success and `{"error": "..."}` on failure.
//!
//! Layout:
//! - session blobs: `SET session:<id> <json> EX <ttl>` / `GET`
//! - namespaces: hash at `audit:<email>:<category>`, field = record id
//! - write indices: `INCR audit:<email>:<category>:seq`

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{CacheStore, Namespace};
use crate::error::CacheError;

/// Connection settings for Upstash.
#[derive(Debug, Clone)]
pub struct UpstashConfig {
    pub url: String,
    pub token: SecretString,
}

impl UpstashConfig {
    /// Read `UPSTASH_REDIS_REST_URL` / `UPSTASH_REDIS_REST_TOKEN`.
    /// Returns `None` unless both are set and non-empty.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let url = lookup("UPSTASH_REDIS_REST_URL").filter(|s| !s.trim().is_empty())?;
        let token = lookup("UPSTASH_REDIS_REST_TOKEN").filter(|s| !s.trim().is_empty())?;
        Some(Self {
            url: url.trim().trim_end_matches('/').to_string(),
            token: SecretString::from(token),
        })
    }
}

#[derive(Debug, Deserialize)]
struct Reply {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Cache store backed by Upstash Redis.
pub struct UpstashCache {
    client: reqwest::Client,
    config: UpstashConfig,
}

impl UpstashCache {
    pub fn new(config: UpstashConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    async fn command(&self, args: &[&str]) -> Result<Value, CacheError> {
        debug!(command = args.first().copied().unwrap_or(""), "Upstash command");

        let response = self
            .client
            .post(&self.config.url)
            .bearer_auth(self.config.token.expose_secret())
            .json(args)
            .send()
            .await
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;

        let reply: Option<Reply> = serde_json::from_str(&body).ok();
        if !status.is_success() {
            let message = reply
                .and_then(|r| r.error)
                .unwrap_or_else(|| body.chars().take(200).collect());
            return Err(CacheError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let reply = reply.ok_or_else(|| CacheError::MalformedReply(body.chars().take(200).collect()))?;
        if let Some(error) = reply.error {
            return Err(CacheError::Command(error));
        }
        Ok(reply.result.unwrap_or(Value::Null))
    }
}

/// Stored values are JSON text inside Redis strings.
fn decode_stored(raw: &Value) -> Result<Value, CacheError> {
    match raw {
        Value::String(s) => Ok(serde_json::from_str(s)?),
        other => Err(CacheError::MalformedReply(format!(
            "expected string value, got {other}"
        ))),
    }
}

/// `HGETALL` replies are a flat `[field, value, field, value, ...]` array.
fn decode_hash(raw: Value) -> Result<Vec<(String, Value)>, CacheError> {
    let items = match raw {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items,
        other => {
            return Err(CacheError::MalformedReply(format!(
                "expected array from HGETALL, got {other}"
            )));
        }
    };
    if items.len() % 2 != 0 {
        return Err(CacheError::MalformedReply(
            "odd number of HGETALL elements".to_string(),
        ));
    }
    items
        .chunks(2)
        .map(|pair| {
            let field = pair[0]
                .as_str()
                .ok_or_else(|| CacheError::MalformedReply("non-string hash field".to_string()))?;
            Ok((field.to_string(), decode_stored(&pair[1])?))
        })
        .collect()
}

fn decode_integer(raw: &Value) -> Result<u64, CacheError> {
    match raw {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
    .ok_or_else(|| CacheError::MalformedReply(format!("expected integer, got {raw}")))
}

#[async_trait]
impl CacheStore for UpstashCache {
    fn backend(&self) -> &'static str {
        "upstash"
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        match self.command(&["GET", key]).await? {
            Value::Null => Ok(None),
            raw => decode_stored(&raw).map(Some),
        }
    }

    async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> Result<(), CacheError> {
        let encoded = serde_json::to_string(value)?;
        match ttl {
            Some(ttl) => {
                let secs = ttl.as_secs().max(1).to_string();
                self.command(&["SET", key, &encoded, "EX", &secs]).await?;
            }
            None => {
                self.command(&["SET", key, &encoded]).await?;
            }
        }
        Ok(())
    }

    async fn put_record(
        &self,
        namespace: &Namespace,
        id: &str,
        value: &Value,
    ) -> Result<(), CacheError> {
        let encoded = serde_json::to_string(value)?;
        self.command(&["HSET", &namespace.key(), id, &encoded])
            .await?;
        Ok(())
    }

    async fn list_records(&self, namespace: &Namespace) -> Result<Vec<(String, Value)>, CacheError> {
        let raw = self.command(&["HGETALL", &namespace.key()]).await?;
        decode_hash(raw)
    }

    async fn next_sequence(&self, namespace: &Namespace) -> Result<u64, CacheError> {
        let key = format!("{}:seq", namespace.key());
        let raw = self.command(&["INCR", &key]).await?;
        decode_integer(&raw)
    }
}
