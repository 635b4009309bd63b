//! Route handlers.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use super::{ApiError, AppState};
use crate::audit::prompts::{WELCOME_BACK_COMPLETED, WELCOME_BACK_RESUME};
use crate::audit::{
    AuditState, ConversationMessage, DiscoveryData, InboundMessage, Phase, TurnOutcome,
    resolve_phase,
};
use crate::error::CacheError;
use crate::identity;
use crate::notify::{AuditEvent, notify_best_effort};
use crate::threads::{ResolvedThread, ThreadManager, ThreadStatus, create_graph_config};

// ── Wire types ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    /// Abandon the latest thread and begin a new audit.
    #[serde(default)]
    pub restart: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartStatus {
    New,
    Resumed,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartPayload {
    pub messages: Vec<ConversationMessage>,
    pub current_step: Phase,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub success: bool,
    pub session_id: String,
    pub thread_id: String,
    pub status: StartStatus,
    pub response: StartPayload,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<InboundMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Only used to seed a session that has no stored state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_phase: Option<Phase>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub success: bool,
    pub session_id: String,
    #[serde(flatten)]
    pub state: AuditState,
}

fn bad_json(rejection: JsonRejection) -> ApiError {
    ApiError::BadRequest(format!("Invalid request body: {}", rejection.body_text()))
}

// ── Health ──────────────────────────────────────────────────────────────

pub(super) async fn health(State(app): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "audit-engine",
        "cache": app.cache.backend(),
        "model": app.orchestrator.model_name(),
    }))
}

// ── POST /audit/start ───────────────────────────────────────────────────

/// Resolve the prospect's thread by email and return its opening messages.
///
/// A new thread gets the greeting. An existing one gets a welcome-back
/// message appended to its stored conversation.
pub(super) async fn start_audit(
    State(app): State<AppState>,
    payload: Result<Json<StartRequest>, JsonRejection>,
) -> Result<Json<StartResponse>, ApiError> {
    let Json(request) = payload.map_err(bad_json)?;

    let email = request.email.as_deref().map(str::trim).unwrap_or_default();
    if email.is_empty() {
        return Err(ApiError::BadRequest("Email is required".into()));
    }
    if !identity::is_valid_email(email) {
        return Err(ApiError::BadRequest(
            "Please provide a valid email address".into(),
        ));
    }

    let resolved = if request.restart {
        let thread = app.threads.create_thread(email, Utc::now()).await?;
        ResolvedThread {
            thread,
            is_new: true,
        }
    } else {
        app.threads.get_or_create_thread(email).await?
    };

    let config = create_graph_config(email, resolved.thread_id());
    let span = info_span!(
        "audit_start",
        thread_id = %config.configurable.thread_id,
        user_id = %config.configurable.user_id,
        ip = request.ip_address.as_deref().unwrap_or("-"),
    );

    open_thread(&app, email, resolved).instrument(span).await.map(Json)
}

async fn open_thread(
    app: &AppState,
    email: &str,
    resolved: ResolvedThread,
) -> Result<StartResponse, ApiError> {
    let thread_id = resolved.thread_id().to_string();
    let session_id = resolved.thread.session_id().to_string();

    let existing = if resolved.is_new {
        None
    } else {
        app.load_session(&session_id).await?
    };

    let (state, status) = match existing {
        Some(mut state) => {
            state.current_phase = resolve_phase(&state);
            let finished =
                state.is_finished() || resolved.thread.status == ThreadStatus::Completed;
            let (text, status) = if finished {
                (WELCOME_BACK_COMPLETED, StartStatus::Completed)
            } else {
                (WELCOME_BACK_RESUME, StartStatus::Resumed)
            };
            state.messages.append_assistant(text);
            if state.email.is_none() {
                state.email = Some(identity::normalize(email));
            }
            if state.thread_id.is_none() {
                state.thread_id = Some(thread_id.clone());
            }
            state.updated_at = Some(Utc::now());
            (state, status)
        }
        None => {
            if !resolved.is_new {
                warn!(session_id = %session_id, "Thread has no live session state, starting over");
            }
            let outcome = app
                .orchestrator
                .run_turn(AuditState::for_thread(email, &thread_id), Vec::new())
                .await?;
            (outcome.state, StartStatus::New)
        }
    };

    app.save_session(&session_id, &state).await?;
    info!(session_id = %session_id, status = ?status, phase = %state.current_phase, "Audit opened");

    notify_best_effort(
        app.notifier.as_ref(),
        &AuditEvent::Started {
            session_id: session_id.clone(),
            email: identity::normalize(email),
            thread_id: thread_id.clone(),
            resumed: status != StartStatus::New,
        },
    )
    .await;

    Ok(StartResponse {
        success: true,
        session_id,
        thread_id,
        status,
        response: StartPayload {
            messages: state.messages.as_slice().to_vec(),
            current_step: state.current_phase,
        },
    })
}

// ── POST /audit/chat ────────────────────────────────────────────────────

/// Run one turn for a session, creating the session if it does not exist.
///
/// State is written only after the turn succeeds. Concurrent turns on the
/// same session are last-write-wins.
pub(super) async fn chat(
    State(app): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(request) = payload.map_err(bad_json)?;

    let session_id = request
        .session_id
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

    let state = match app.load_session(&session_id).await? {
        Some(state) => state,
        None => AuditState {
            current_phase: request.current_phase.unwrap_or_default(),
            ..AuditState::new()
        },
    };

    let span = info_span!("audit_chat", session_id = %session_id);
    let outcome = app
        .orchestrator
        .run_turn(state, request.messages)
        .instrument(span)
        .await?;

    app.save_session(&session_id, &outcome.state).await?;
    after_turn(&app, &session_id, &outcome).await;

    Ok(Json(ChatResponse {
        success: true,
        session_id,
        state: outcome.state,
    }))
}

/// Cross-session bookkeeping once a turn has been persisted. Failures are logged only.
async fn after_turn(app: &AppState, session_id: &str, outcome: &TurnOutcome) {
    let state = &outcome.state;

    if outcome.completed == Some(Phase::Discovery) {
        if let (Some(email), Some(discovery)) = (state.email.as_deref(), &state.discovery_data) {
            if let Err(e) = remember_company(&app.threads, email, discovery).await {
                warn!(session_id, error = %e, "Failed to store user profile");
            }
        }
    }

    if !outcome.finished_now() {
        return;
    }

    if let (Some(email), Some(thread_id)) = (state.email.as_deref(), state.thread_id.as_deref()) {
        match app
            .threads
            .set_thread_status(email, thread_id, ThreadStatus::Completed)
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!(thread_id, "Finished session refers to a missing thread"),
            Err(e) => warn!(thread_id, error = %e, "Failed to mark thread completed"),
        }
    }

    notify_best_effort(
        app.notifier.as_ref(),
        &AuditEvent::Completed {
            session_id: session_id.to_string(),
            email: state.email.clone(),
            discovery: state.discovery_data.clone(),
            pain_points: state.pain_points_data.clone(),
            qualification: state.qualification_data.clone(),
        },
    )
    .await;
}

/// Fold discovery facts into the prospect's stored profile.
async fn remember_company(
    threads: &ThreadManager,
    email: &str,
    discovery: &DiscoveryData,
) -> Result<(), CacheError> {
    let mut profile = threads.get_user_profile(email).await?.unwrap_or_default();
    profile.industry = Some(discovery.industry.clone());
    profile.company_size = Some(discovery.company_size.clone());
    threads.store_user_profile(email, profile).await?;
    Ok(())
}

// ── GET /audit/session/{id} ─────────────────────────────────────────────

pub(super) async fn get_session(
    State(app): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<ChatResponse>, ApiError> {
    match app.load_session(&session_id).await? {
        Some(state) => Ok(Json(ChatResponse {
            success: true,
            session_id,
            state,
        })),
        None => Err(ApiError::NotFound("Session not found".into())),
    }
}
