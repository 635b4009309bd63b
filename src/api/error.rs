//! HTTP error mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use crate::error::{CacheError, LlmError};

/// Errors a handler can return.
///
/// Upstream failures never leak their cause to the client; the detail is
/// logged against an error id that is returned instead.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Something went wrong processing your request. Please try again.")]
    Upstream { error_id: Uuid },
}

impl ApiError {
    /// Log `err` under a fresh error id and return the opaque variant.
    pub fn upstream(context: &str, err: impl std::fmt::Display) -> Self {
        let error_id = Uuid::new_v4();
        tracing::error!(error_id = %error_id, error = %err, "{}", context);
        Self::Upstream { error_id }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Upstream { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<CacheError> for ApiError {
    fn from(err: CacheError) -> Self {
        Self::upstream("Cache call failed", err)
    }
}

impl From<LlmError> for ApiError {
    fn from(err: LlmError) -> Self {
        Self::upstream("Model call failed", err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = serde_json::json!({
            "success": false,
            "error": self.to_string(),
        });
        if let Self::Upstream { error_id } = &self {
            body["errorId"] = serde_json::json!(error_id.to_string());
        }
        (self.status(), Json(body)).into_response()
    }
}
