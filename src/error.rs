//! Error types for incognide-sessions.

use thiserror::Error;

use crate::session::SessionState;

/// Main error type for session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The backing binary or service could not be started.
    #[error("failed to start session: {0}")]
    Spawn(String),

    /// The handle was constructed but never became usable.
    #[error("session '{id}' did not become ready after {attempts} attempts")]
    ReadinessTimeout { id: String, attempts: u32 },

    /// No live session with the given ID.
    #[error("session '{0}' not found")]
    NotFound(String),

    /// The underlying process or stream reported an I/O failure.
    #[error("session I/O error: {0}")]
    HandleIo(String),

    /// A non-terminal session already holds the ID.
    #[error("session '{0}' already exists")]
    DuplicateSession(String),

    /// Session ID is malformed.
    #[error("invalid session id '{0}': use 1-128 characters from [A-Za-z0-9._:-]")]
    InvalidId(String),

    /// Request failed validation.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A close is already pending for the session.
    #[error("session '{0}' is already closing")]
    AlreadyClosing(String),

    /// Session is not accepting input in its current state.
    #[error("session '{id}' is not accepting input while {state:?}")]
    NotAccepting { id: String, state: SessionState },

    /// Invalid state transition attempted.
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        from: SessionState,
        to: SessionState,
    },

    /// Session construction was cancelled before it became ready.
    #[error("session '{0}' was cancelled before it became ready")]
    Cancelled(String),

    /// Python backend request failed.
    #[error("backend error: {0}")]
    Backend(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal lock was poisoned.
    #[error("internal lock poisoned")]
    LockPoisoned,
}

impl SessionError {
    /// Stable machine-readable code sent alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Spawn(_) => "SPAWN_FAILED",
            Self::ReadinessTimeout { .. } => "READINESS_TIMEOUT",
            Self::NotFound(_) => "SESSION_NOT_FOUND",
            Self::HandleIo(_) => "HANDLE_IO",
            Self::DuplicateSession(_) => "DUPLICATE_SESSION",
            Self::InvalidId(_) => "INVALID_ID",
            Self::InvalidRequest(_) => "BAD_REQUEST",
            Self::AlreadyClosing(_) => "ALREADY_CLOSING",
            Self::NotAccepting { .. } => "NOT_ACCEPTING",
            Self::InvalidStateTransition { .. } => "INVALID_STATE",
            Self::Cancelled(_) => "CANCELLED",
            Self::Backend(_) => "BACKEND_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::LockPoisoned => "INTERNAL_ERROR",
        }
    }

    /// Whether this indicates a defect rather than an environmental condition.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            Self::LockPoisoned | Self::InvalidStateTransition { .. }
        )
    }
}

/// Convenience Result type for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;
