//! Dispatch of channel requests to the supervisor.

use std::sync::Arc;

use tracing::{debug, error};

use super::types::{CreateRequest, Request, Response};
use crate::backend::BackendClient;
use crate::error::SessionError;
use crate::handle::{PtySize, SessionParams};
use crate::relay::EventSink;
use crate::session::{OwnerId, SessionId};
use crate::supervisor::Supervisor;
use crate::Result;

/// Turns requests into supervisor calls and failures into responses.
#[derive(Clone)]
pub struct RequestRouter {
    supervisor: Arc<Supervisor>,
    backend: Option<BackendClient>,
}

impl RequestRouter {
    pub fn new(supervisor: Arc<Supervisor>, backend: Option<BackendClient>) -> Self {
        Self {
            supervisor,
            backend,
        }
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    /// Handle one request from `owner`, whose events go to `sink`.
    pub async fn handle(&self, owner: OwnerId, sink: &EventSink, request: Request) -> Response {
        let name = request.name();
        match self.dispatch(owner, sink, request).await {
            Ok(response) => response,
            Err(e) => {
                if e.is_internal() {
                    error!(request = name, %owner, error = %e, "internal error");
                } else {
                    debug!(request = name, %owner, error = %e, "request failed");
                }
                Response::failure(&e)
            }
        }
    }

    async fn dispatch(&self, owner: OwnerId, sink: &EventSink, request: Request) -> Result<Response> {
        match request {
            Request::Create(create) => self.create(owner, sink, create).await,
            Request::Write { id, data } => {
                let id = SessionId::parse(id)?;
                self.supervisor.write(&id, data.into_bytes())?;
                Ok(Response::session(id))
            }
            Request::Resize { id, cols, rows } => {
                let id = SessionId::parse(id)?;
                if cols == 0 || rows == 0 {
                    return Err(SessionError::InvalidRequest(format!(
                        "terminal size must be non-zero, got {}x{}",
                        cols, rows
                    )));
                }
                self.supervisor.resize(&id, PtySize::new(rows, cols))?;
                Ok(Response::session(id))
            }
            Request::Interrupt { id } => {
                let id = SessionId::parse(id)?;
                self.supervisor.interrupt(&id)?;
                Ok(Response::session(id))
            }
            Request::Close { id } => {
                let id = SessionId::parse(id)?;
                self.supervisor.close(&id)?;
                Ok(Response::session(id))
            }
            Request::List => {
                let sessions = self
                    .supervisor
                    .registry()
                    .list_by_owner(owner)?
                    .iter()
                    .map(|s| s.info())
                    .collect();
                Ok(Response::sessions(sessions))
            }
            Request::Action {
                action,
                args,
                window_id,
            } => {
                if action.is_empty() {
                    return Err(SessionError::InvalidRequest("action name is empty".to_string()));
                }
                let backend = self
                    .backend
                    .as_ref()
                    .ok_or_else(|| SessionError::Backend("no backend configured".to_string()))?;
                let reply = backend.action(&action, &args, window_id.as_deref()).await;
                Ok(Response::backend(reply))
            }
        }
    }

    async fn create(&self, owner: OwnerId, sink: &EventSink, create: CreateRequest) -> Result<Response> {
        let kind = create.params.kind();
        let id = match create.id {
            Some(raw) => SessionId::parse(raw)?,
            None => SessionId::generate(kind),
        };
        validate_params(&create.params)?;
        let created = self
            .supervisor
            .create(id, create.params, owner, sink.clone())
            .await?;
        Ok(Response::created(created))
    }

    /// Release everything `owner` still holds.
    pub fn owner_disconnected(&self, owner: OwnerId) {
        if let Err(e) = self.supervisor.owner_disconnected(owner) {
            error!(%owner, error = %e, "failed to release sessions of disconnected owner");
        }
    }
}

fn validate_params(params: &SessionParams) -> Result<()> {
    match params {
        SessionParams::InteractiveShell(shell) => {
            if shell.cols == Some(0) || shell.rows == Some(0) {
                return Err(SessionError::InvalidRequest(
                    "terminal size must be non-zero".to_string(),
                ));
            }
        }
        SessionParams::ProxiedStream(stream) => {
            if stream.endpoint.is_empty() {
                return Err(SessionError::InvalidRequest("stream endpoint is empty".to_string()));
            }
            if !stream.endpoint.starts_with('/') {
                return Err(SessionError::InvalidRequest(format!(
                    "stream endpoint must start with '/': {}",
                    stream.endpoint
                )));
            }
        }
        SessionParams::InteractiveKernel(_) => {}
    }
    Ok(())
}
