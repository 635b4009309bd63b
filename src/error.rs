//! Error types for the audit engine.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors from the shared key-value cache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    #[error("Cache returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Cache command failed: {0}")]
    Command(String),

    #[error("Malformed cache reply: {0}")]
    MalformedReply(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Circuit breaker {name} is open")]
    CircuitOpen { name: String },

    #[error("Cache call {name} timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },
}

impl CacheError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable(_) | Self::Timeout { .. } => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Command(_)
            | Self::MalformedReply(_)
            | Self::Serialization(_)
            | Self::CircuitOpen { .. } => false,
        }
    }
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Circuit breaker {name} is open")]
    CircuitOpen { name: String },

    #[error("LLM call {name} timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },
}

impl LlmError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RequestFailed { .. } | Self::RateLimited { .. } | Self::Timeout { .. }
        )
    }
}

/// Outbound notification errors.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Notifier {name} failed: {reason}")]
    SendFailed { name: String, reason: String },
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
