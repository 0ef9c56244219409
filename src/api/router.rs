//! API router configuration.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{any, get},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};

use super::handlers::{api_info, delete_session, get_session, health, list_sessions, AppState};
use super::websocket::ipc_handler;

/// Create the API router with all routes configured.
pub fn create_router(state: AppState) -> Router {
    let session_routes = Router::new()
        .route("/", get(list_sessions))
        .route("/{id}", get(get_session).delete(delete_session));

    let api_v1 = Router::new()
        .route("/", get(api_info))
        .route("/ipc", any(ipc_handler))
        .nest("/sessions", session_routes);

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_v1)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    /// Stop on Ctrl-C after in-flight requests finish.
    pub graceful_shutdown: bool,
}

impl ServerConfig {
    pub fn new(addr: SocketAddr, graceful_shutdown: bool) -> Self {
        Self {
            addr,
            graceful_shutdown,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            graceful_shutdown: true,
        }
    }
}

/// Start the API server and tear down every session once it stops.
pub async fn serve(config: ServerConfig, state: AppState) -> crate::Result<()> {
    let supervisor = Arc::clone(state.supervisor());
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    info!(addr = %config.addr, "incognide-sessions listening");

    let server = axum::serve(listener, router);
    let result = if config.graceful_shutdown {
        server.with_graceful_shutdown(shutdown_signal()).await
    } else {
        server.await
    };

    supervisor.shutdown()?;
    result?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
