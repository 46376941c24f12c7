use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use banter_db::StoreError;

/// HTTP-facing error envelope. Validation and authorization outcomes map
/// to their statuses; infrastructure failures are logged with operation
/// context and surface as opaque 500s.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("caller is not a participant of this chat")]
    NotParticipant,

    #[error("{0}")]
    NotFound(&'static str),

    #[error("{0}")]
    InvalidArgument(&'static str),

    #[error("internal error")]
    Internal,
}

impl ApiError {
    pub fn from_store(op: &str, err: StoreError) -> Self {
        match err {
            StoreError::NotParticipant => Self::NotParticipant,
            StoreError::ChatNotFound => Self::NotFound("Chat not found"),
            StoreError::UserNotFound => Self::NotFound("User not found"),
            StoreError::InvalidArgument(msg) => Self::InvalidArgument(msg),
            err @ (StoreError::Unavailable(_) | StoreError::Sqlite(_)) => {
                error!("{}: storage failure: {}", op, err);
                Self::Internal
            }
        }
    }

    /// Read paths mask authorization failures as absence, so
    /// non-participants cannot probe which chat ids exist.
    pub fn masked(self) -> Self {
        match self {
            Self::NotParticipant => Self::NotFound("Chat not found or you don't have access"),
            other => other,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotParticipant => (
                StatusCode::FORBIDDEN,
                "You are not a participant of this chat",
            ),
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message),
            Self::InvalidArgument(message) => (StatusCode::BAD_REQUEST, message),
            Self::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "An internal error occurred"),
        };
        (status, Json(json!({ "message": message }))).into_response()
    }
}
