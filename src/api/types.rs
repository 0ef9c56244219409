//! REST response types.

use axum::http::StatusCode;
use serde::Serialize;

use crate::error::SessionError;
use crate::session::SessionInfo;

/// Generic API error response.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error code (e.g., "SESSION_NOT_FOUND").
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn session_not_found(id: &str) -> Self {
        Self::from_error(&SessionError::NotFound(id.to_string()))
    }

    pub fn from_error(error: &SessionError) -> Self {
        Self::new(error.code(), error.to_string())
    }

    /// HTTP status matching a session error.
    pub fn status_for(error: &SessionError) -> StatusCode {
        match error {
            SessionError::NotFound(_) => StatusCode::NOT_FOUND,
            SessionError::InvalidId(_) | SessionError::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// List sessions response.
#[derive(Debug, Clone, Serialize)]
pub struct ListSessionsResponse {
    /// Total number of sessions.
    pub count: usize,
    pub sessions: Vec<SessionInfo>,
}
