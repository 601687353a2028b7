//! HTTP error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// API-facing errors with their HTTP mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Missing or invalid credentials. No claim details are echoed back.
    #[error("unauthorized")]
    Unauthorized,

    /// Authenticated but not allowed; carries the machine-readable reason.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Rate limited; body is pre-built by the limiter.
    #[error("too many requests")]
    TooManyRequests {
        /// Seconds the client should wait.
        retry_after_secs: u64,
        /// Structured denial body.
        body: serde_json::Value,
    },

    /// Malformed or incomplete request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// State conflict, e.g. an already-decided approval.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Unexpected failure; details stay in the logs.
    #[error("internal error")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "unauthorized"})),
            )
                .into_response(),
            Self::Forbidden(reason) => (
                StatusCode::FORBIDDEN,
                Json(json!({"error": "forbidden", "reason": reason})),
            )
                .into_response(),
            Self::TooManyRequests {
                retry_after_secs,
                body,
            } => {
                let mut response =
                    (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
                if let Ok(value) = retry_after_secs.to_string().parse() {
                    response.headers_mut().insert("retry-after", value);
                }
                response
            }
            Self::BadRequest(reason) => (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "bad_request", "reason": reason})),
            )
                .into_response(),
            Self::NotFound(what) => (
                StatusCode::NOT_FOUND,
                Json(json!({"error": "not_found", "resource": what})),
            )
                .into_response(),
            Self::Conflict(reason) => (
                StatusCode::CONFLICT,
                Json(json!({"error": "conflict", "reason": reason})),
            )
                .into_response(),
            Self::Internal(detail) => {
                tracing::error!(detail, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": "internal"})),
                )
                    .into_response()
            }
        }
    }
}

impl From<legator_approval::ApprovalError> for ApiError {
    fn from(e: legator_approval::ApprovalError) -> Self {
        use legator_approval::ApprovalError as E;
        match e {
            E::ConfirmationRequired => Self::BadRequest("typed confirmation required".into()),
            E::ConfirmationMismatch => Self::Forbidden("typed confirmation mismatch".into()),
            E::ConfirmationExpired => Self::Forbidden("typed confirmation expired".into()),
            E::AlreadyDecided { phase } => Self::Conflict(format!("already decided: {phase}")),
            E::InvalidParams(reason) => Self::BadRequest(reason),
            E::Store(legator_store::StoreError::NotFound { id }) => Self::NotFound(id),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<legator_sched::SchedError> for ApiError {
    fn from(e: legator_sched::SchedError) -> Self {
        use legator_sched::SchedError as E;
        match e {
            E::Denied { reason } => Self::TooManyRequests {
                retry_after_secs: 60,
                body: serde_json::json!({"error": "rate_limited", "reason": reason}),
            },
            E::UnknownAgent { agent } => Self::NotFound(agent),
            E::AgentPaused { agent } => Self::Conflict(format!("agent paused: {agent}")),
            E::Draining => Self::Conflict("scheduler is draining".into()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<legator_store::StoreError> for ApiError {
    fn from(e: legator_store::StoreError) -> Self {
        match e {
            legator_store::StoreError::NotFound { id } => Self::NotFound(id),
            other => Self::Internal(other.to_string()),
        }
    }
}
