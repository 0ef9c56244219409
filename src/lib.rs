//! # incognide-sessions
//!
//! Session host for the Incognide IDE. It runs interactive shells on
//! pseudo-terminals, language kernels and proxied backend streams, and
//! streams their output to renderer windows over a WebSocket channel.
//!
//! ## Layout
//!
//! - [`session`]: identifiers, the lifecycle state machine and the registry
//! - [`handle`]: the processes and streams behind sessions
//! - [`supervisor`]: creation, readiness, deferred close and teardown
//! - [`relay`]: per-owner event delivery
//! - [`ipc`] and [`api`]: the request channel and REST diagnostics
//! - [`backend`] and [`workspace`]: the Python service and environment store
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use incognide_sessions::api::{serve, AppState, ServerConfig};
//! use incognide_sessions::backend::BackendClient;
//! use incognide_sessions::handle::DefaultFactory;
//! use incognide_sessions::ipc::RequestRouter;
//! use incognide_sessions::session::SessionRegistry;
//! use incognide_sessions::supervisor::{Supervisor, SupervisorConfig};
//! use incognide_sessions::workspace::EnvironmentStore;
//!
//! #[tokio::main]
//! async fn main() -> incognide_sessions::Result<()> {
//!     incognide_sessions::logging::try_init().ok();
//!
//!     let backend = BackendClient::detect(None, Duration::from_secs(30)).await?;
//!     let store = Arc::new(EnvironmentStore::new("/tmp/workspace-environments.json"));
//!     let factory = DefaultFactory::new(backend.clone(), store, std::env::temp_dir(), "python3");
//!     let supervisor = Supervisor::new(
//!         Arc::new(SessionRegistry::new()),
//!         Arc::new(factory),
//!         SupervisorConfig::default(),
//!     );
//!     let router = RequestRouter::new(Arc::new(supervisor), Some(backend));
//!     serve(ServerConfig::default(), AppState::new(router, 1024)).await
//! }
//! ```

pub mod api;
pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod handle;
pub mod ipc;
pub mod logging;
pub mod relay;
pub mod session;
pub mod supervisor;
pub mod workspace;

// Re-export commonly used types
pub use error::{Result, SessionError};
pub use relay::{EventSink, SessionEvent};
pub use session::{OwnerId, SessionId, SessionKind, SessionState};
