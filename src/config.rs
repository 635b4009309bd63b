//! Service configuration, read from environment variables.

use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::cache::UpstashConfig;
use crate::error::ConfigError;
use crate::llm::{LlmBackend, LlmConfig};
use crate::resilience::{BreakerConfig, RetryPolicy};

/// How long a session's state lives in the cache after its last write.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Everything the service needs at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// HTTP listen port (`AUDIT_PORT`).
    pub port: u16,
    pub session_ttl: Duration,
    pub llm: LlmConfig,
    /// `None` means fall back to the in-process cache.
    pub upstash: Option<UpstashConfig>,
    /// Where completion events are POSTed (`AUDIT_WEBHOOK_URL`).
    pub webhook_url: Option<String>,
    pub retry: RetryPolicy,
    pub breaker: BreakerConfig,
    /// Per-attempt deadline for model calls.
    pub llm_timeout: Duration,
    /// Per-attempt deadline for cache calls.
    pub cache_timeout: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let backend = match get("AUDIT_LLM_BACKEND") {
            Some(raw) => LlmBackend::parse(&raw).ok_or_else(|| ConfigError::InvalidValue {
                key: "AUDIT_LLM_BACKEND".into(),
                message: format!("unknown backend {raw:?}, expected anthropic or openai"),
            })?,
            None => LlmBackend::Anthropic,
        };
        let api_key = get(backend.key_var())
            .ok_or_else(|| ConfigError::MissingEnvVar(backend.key_var().to_string()))?;
        let model = get("AUDIT_LLM_MODEL").unwrap_or_else(|| backend.default_model().to_string());

        let retry = RetryPolicy {
            max_retries: parse_or(&get, "AUDIT_RETRY_MAX", 3)?,
            base_delay: Duration::from_millis(parse_or(&get, "AUDIT_RETRY_BASE_MS", 200)?),
            max_delay: Duration::from_millis(parse_or(&get, "AUDIT_RETRY_MAX_DELAY_MS", 5_000)?),
            ..RetryPolicy::default()
        };

        let threshold: u32 = parse_or(&get, "AUDIT_BREAKER_THRESHOLD", 5)?;
        if threshold == 0 {
            return Err(ConfigError::InvalidValue {
                key: "AUDIT_BREAKER_THRESHOLD".into(),
                message: "must be at least 1".into(),
            });
        }
        let breaker = BreakerConfig {
            threshold,
            cooldown: Duration::from_secs(parse_or(&get, "AUDIT_BREAKER_COOLDOWN_SECS", 60)?),
        };

        Ok(Self {
            port: parse_or(&get, "AUDIT_PORT", 8080)?,
            session_ttl: Duration::from_secs(parse_or(
                &get,
                "AUDIT_SESSION_TTL_SECS",
                DEFAULT_SESSION_TTL.as_secs(),
            )?),
            llm: LlmConfig {
                backend,
                api_key: SecretString::from(api_key),
                model,
            },
            upstash: UpstashConfig::from_lookup(&get),
            webhook_url: get("AUDIT_WEBHOOK_URL"),
            retry,
            breaker,
            llm_timeout: Duration::from_secs(parse_or(&get, "AUDIT_LLM_TIMEOUT_SECS", 30)?),
            cache_timeout: Duration::from_secs(parse_or(&get, "AUDIT_CACHE_TIMEOUT_SECS", 5)?),
        })
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?}: {e}"),
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_with_only_an_api_key() {
        let config = AppConfig::from_lookup(lookup(&[("ANTHROPIC_API_KEY", "sk-test")])).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.session_ttl, DEFAULT_SESSION_TTL);
        assert_eq!(config.llm.backend, LlmBackend::Anthropic);
        assert_eq!(config.llm.api_key.expose_secret(), "sk-test");
        assert!(config.upstash.is_none());
        assert!(config.webhook_url.is_none());
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.breaker.threshold, 5);
        assert_eq!(config.breaker.cooldown, Duration::from_secs(60));
    }

    #[test]
    fn missing_key_for_selected_backend() {
        let err = AppConfig::from_lookup(lookup(&[
            ("AUDIT_LLM_BACKEND", "openai"),
            ("ANTHROPIC_API_KEY", "sk-test"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "OPENAI_API_KEY"));
    }

    #[test]
    fn openai_backend_uses_its_own_key_and_default_model() {
        let config = AppConfig::from_lookup(lookup(&[
            ("AUDIT_LLM_BACKEND", "openai"),
            ("OPENAI_API_KEY", "sk-oa"),
        ]))
        .unwrap();
        assert_eq!(config.llm.backend, LlmBackend::OpenAi);
        assert_eq!(config.llm.api_key.expose_secret(), "sk-oa");
        assert_eq!(config.llm.model, LlmBackend::OpenAi.default_model());
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let err = AppConfig::from_lookup(lookup(&[("AUDIT_LLM_BACKEND", "llama")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "AUDIT_LLM_BACKEND"));
    }

    #[test]
    fn bad_number_names_the_variable() {
        let err = AppConfig::from_lookup(lookup(&[
            ("ANTHROPIC_API_KEY", "sk-test"),
            ("AUDIT_PORT", "eighty"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("AUDIT_PORT"));
    }

    #[test]
    fn overrides_and_upstash() {
        let config = AppConfig::from_lookup(lookup(&[
            ("AUDIT_LLM_BACKEND", "openai"),
            ("OPENAI_API_KEY", "sk-oa"),
            ("AUDIT_LLM_MODEL", "gpt-4o-mini"),
            ("AUDIT_PORT", "9000"),
            ("AUDIT_SESSION_TTL_SECS", "60"),
            ("AUDIT_RETRY_MAX", "0"),
            ("AUDIT_BREAKER_THRESHOLD", "2"),
            ("UPSTASH_REDIS_REST_URL", "https://example.upstash.io/"),
            ("UPSTASH_REDIS_REST_TOKEN", "tok"),
            ("AUDIT_WEBHOOK_URL", "https://hooks.example.com/audit"),
        ]))
        .unwrap();
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.port, 9000);
        assert_eq!(config.session_ttl, Duration::from_secs(60));
        assert_eq!(config.retry.max_retries, 0);
        assert_eq!(config.breaker.threshold, 2);
        assert_eq!(
            config.upstash.unwrap().url,
            "https://example.upstash.io"
        );
        assert_eq!(
            config.webhook_url.as_deref(),
            Some("https://hooks.example.com/audit")
        );
    }

    #[test]
    fn zero_breaker_threshold_is_rejected() {
        let err = AppConfig::from_lookup(lookup(&[
            ("ANTHROPIC_API_KEY", "sk-test"),
            ("AUDIT_BREAKER_THRESHOLD", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
