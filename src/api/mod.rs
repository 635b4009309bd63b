//! HTTP surface: `POST /audit/start`, `POST /audit/chat`, and read-only helpers.

pub mod error;
mod handlers;

pub use error::ApiError;
pub use handlers::{ChatRequest, ChatResponse, StartPayload, StartRequest, StartResponse, StartStatus};

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::audit::{AuditState, Orchestrator};
use crate::cache::{CacheStore, session_key};
use crate::error::CacheError;
use crate::notify::Notifier;
use crate::threads::ThreadManager;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub cache: Arc<dyn CacheStore>,
    pub threads: Arc<ThreadManager>,
    pub notifier: Arc<dyn Notifier>,
    /// Expiry applied to every session write.
    pub session_ttl: Duration,
}

impl AppState {
    /// Load a session's state. An unreadable blob is treated as absent.
    pub async fn load_session(&self, session_id: &str) -> Result<Option<AuditState>, CacheError> {
        let Some(value) = self.cache.get(&session_key(session_id)).await? else {
            return Ok(None);
        };
        match serde_json::from_value::<AuditState>(value) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                tracing::warn!(session_id, error = %e, "Discarding unreadable session state");
                Ok(None)
            }
        }
    }

    /// Overwrite a session's state and refresh its expiry.
    pub async fn save_session(&self, session_id: &str, state: &AuditState) -> Result<(), CacheError> {
        let value = serde_json::to_value(state)?;
        self.cache
            .set(&session_key(session_id), &value, Some(self.session_ttl))
            .await
    }
}

/// Build the router with CORS and request tracing applied.
pub fn audit_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/audit/start", post(handlers::start_audit))
        .route("/audit/chat", post(handlers::chat))
        .route("/audit/session/{id}", get(handlers::get_session))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
