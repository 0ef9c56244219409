//! HTTP and WebSocket transport.
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /api/v1` - API information
//! - `GET /api/v1/sessions` - List all sessions
//! - `GET /api/v1/sessions/{id}` - Get one session
//! - `DELETE /api/v1/sessions/{id}` - Evict a session immediately
//! - `WS /api/v1/ipc` - Session channel; one connection per owner

pub mod handlers;
pub mod router;
pub mod types;
pub mod websocket;

pub use handlers::AppState;
pub use router::{create_router, serve, ServerConfig};
pub use types::{ErrorResponse, ListSessionsResponse};
