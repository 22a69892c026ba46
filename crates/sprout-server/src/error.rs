//! Error types for the Sprout server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

/// Server error type.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Sprout core error.
    #[error("Core error: {0}")]
    Core(#[from] sprout_core::Error),

    /// The session id belongs to another connection.
    #[error("Session {0} is owned by another connection")]
    SessionInUse(sprout_core::SessionId),

    /// Invalid listen address.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Progress backend failure.
    #[error("Progress store error: {0}")]
    Progress(String),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Core(sprout_core::Error::SessionNotFound(_)) => StatusCode::NOT_FOUND,
            Self::SessionInUse(_) => StatusCode::CONFLICT,
            Self::Progress(_) => StatusCode::BAD_REQUEST,
            Self::Json(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
