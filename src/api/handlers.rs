//! REST API handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::error;

use super::types::{ErrorResponse, ListSessionsResponse};
use crate::error::SessionError;
use crate::ipc::RequestRouter;
use crate::session::{SessionId, SessionInfo};
use crate::supervisor::Supervisor;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub router: RequestRouter,
    /// Capacity of each connection's event channel.
    pub event_buffer: usize,
}

impl AppState {
    pub fn new(router: RequestRouter, event_buffer: usize) -> Self {
        Self {
            router,
            event_buffer,
        }
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        self.router.supervisor()
    }
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(e: SessionError) -> ApiError {
    if e.is_internal() {
        error!(error = %e, "internal error");
    }
    (ErrorResponse::status_for(&e), Json(ErrorResponse::from_error(&e)))
}

/// Health check endpoint.
pub async fn health() -> &'static str {
    "OK"
}

/// API information endpoint.
pub async fn api_info() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "incognide-sessions",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

/// List all sessions.
pub async fn list_sessions(
    State(state): State<AppState>,
) -> Result<Json<ListSessionsResponse>, ApiError> {
    let sessions: Vec<SessionInfo> = state
        .supervisor()
        .registry()
        .list()
        .map_err(api_error)?
        .iter()
        .map(|s| s.info())
        .collect();

    Ok(Json(ListSessionsResponse {
        count: sessions.len(),
        sessions,
    }))
}

/// Get one session.
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionInfo>, ApiError> {
    let id = SessionId::parse(id).map_err(api_error)?;
    let session = state
        .supervisor()
        .registry()
        .get(&id)
        .map_err(api_error)?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse::session_not_found(id.as_str())),
            )
        })?;
    Ok(Json(session.info()))
}

/// Evict a session without waiting for the close grace.
pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = SessionId::parse(id).map_err(api_error)?;
    state.supervisor().evict(&id).map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}
