use std::sync::Arc;

use audit_engine::api::{AppState, audit_routes};
use audit_engine::audit::Orchestrator;
use audit_engine::cache::{CacheStore, MemoryCache, ResilientCache, UpstashCache};
use audit_engine::config::AppConfig;
use audit_engine::llm::{ResilientProvider, create_provider};
use audit_engine::notify::{LogNotifier, Notifier, WebhookNotifier};
use audit_engine::resilience::{Guard, RetryPolicy};
use audit_engine::threads::ThreadManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export ANTHROPIC_API_KEY=sk-ant-...");
        std::process::exit(1);
    });

    eprintln!("📋 Audit Engine v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.llm.model);

    // ── Cache ───────────────────────────────────────────────────────────
    let raw_cache: Arc<dyn CacheStore> = match config.upstash.clone() {
        Some(upstash) => {
            eprintln!("   Cache: upstash ({})", upstash.url);
            Arc::new(UpstashCache::new(upstash))
        }
        None => {
            tracing::warn!(
                "UPSTASH_REDIS_REST_URL / UPSTASH_REDIS_REST_TOKEN not set; sessions live in memory only"
            );
            eprintln!("   Cache: in-memory");
            Arc::new(MemoryCache::new())
        }
    };
    let cache: Arc<dyn CacheStore> = Arc::new(ResilientCache::new(
        raw_cache,
        Guard::new(
            "cache",
            config.retry.clone(),
            config.breaker.clone(),
            config.cache_timeout,
        ),
    ));

    // ── LLM ─────────────────────────────────────────────────────────────
    let llm = create_provider(&config.llm)?;
    // At most one retry per model call.
    let llm_retry = RetryPolicy {
        max_retries: config.retry.max_retries.min(1),
        ..config.retry.clone()
    };
    let llm = Arc::new(ResilientProvider::new(
        llm,
        Guard::new("llm", llm_retry, config.breaker.clone(), config.llm_timeout),
    ));

    // ── Notifications ───────────────────────────────────────────────────
    let notifier: Arc<dyn Notifier> = match config.webhook_url.as_deref() {
        Some(url) => {
            eprintln!("   Notifications: webhook");
            Arc::new(WebhookNotifier::new(url))
        }
        None => {
            eprintln!("   Notifications: log only");
            Arc::new(LogNotifier)
        }
    };

    let state = AppState {
        orchestrator: Arc::new(Orchestrator::new(llm)),
        threads: Arc::new(ThreadManager::new(Arc::clone(&cache))),
        cache,
        notifier,
        session_ttl: config.session_ttl,
    };

    let app = audit_routes(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    eprintln!("   API: http://0.0.0.0:{}/audit\n", config.port);
    tracing::info!(port = config.port, "Audit API listening");

    axum::serve(listener, app).await?;
    Ok(())
}
