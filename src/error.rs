//! Error taxonomy for the messaging subsystem.
//!
//! Connection-level failures (`AuthenticationRequired`, `AuthenticationInvalid`) are terminal for the
//! attempt. `ConversationResolutionFailed` is a send-level failure that leaves nothing persisted.
//! An offline recipient is not an error and has no variant here.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("authentication required")]
    AuthenticationRequired,

    #[error("authentication invalid")]
    AuthenticationInvalid,

    #[error("conversation could not be resolved: {0}")]
    ConversationResolutionFailed(String),

    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    #[error("not found: {0}")]
    NotFound(&'static str),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("migration error: {0}")]
    Migration(#[from] rusqlite_migration::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ChatError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::AuthenticationRequired | Self::AuthenticationInvalid => StatusCode::UNAUTHORIZED,
            Self::ConversationResolutionFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Storage(_) | Self::Migration(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable code used in WebSocket acks and error frames.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AuthenticationRequired => "authentication_required",
            Self::AuthenticationInvalid => "authentication_invalid",
            Self::ConversationResolutionFailed(_) => "conversation_resolution_failed",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Storage(_) | Self::Migration(_) | Self::Internal(_) => "internal",
        }
    }

    /// Message safe to show to a client. Storage details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::Storage(_) | Self::Migration(_) | Self::Internal(_) => {
                "internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = Json(json!({
            "error": self.public_message(),
            "code": self.code(),
        }));
        (status, body).into_response()
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
