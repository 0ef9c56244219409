//! Session lifecycle supervision.
//!
//! The supervisor claims IDs in the registry, opens handles through the
//! factory, waits for readiness and then gives each handle to its own
//! actor task. All later operations reach the handle through the actor's
//! control channel.

mod actor;
mod deferred;
mod readiness;

pub use deferred::DeferredAction;
pub use readiness::{poll_until_ready, Readiness, ReadinessPolicy, TimeoutAction};

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::handle::{Handle, HandleFactory, PtySize, SessionParams};
use crate::relay::{EventSink, Relay};
use crate::session::{Claim, CloseStep, OwnerId, SessionId, SessionRegistry, SessionState};
use crate::Result;
use actor::SessionActor;

/// Message to a session actor.
#[derive(Debug)]
pub(crate) enum Control {
    Write(Vec<u8>),
    Resize(PtySize),
    Interrupt,
    /// Arm the deferred kill.
    Close,
    /// A reopen reclaimed the session; deliver events to this sink.
    Reattach(EventSink),
    /// The deferred kill fired.
    DrainExpired,
    /// Kill now and report `closed`.
    Evict,
    /// Kill now without emitting events.
    Shutdown,
}

pub(crate) type ControlTx = mpsc::UnboundedSender<Control>;

/// Lifecycle timings.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Delay between a close request and the kill.
    pub close_grace: Duration,
    pub readiness: ReadinessPolicy,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            close_grace: Duration::from_millis(100),
            readiness: ReadinessPolicy::default(),
        }
    }
}

/// Successful result of [`Supervisor::create`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Created {
    pub session_id: SessionId,
    /// True when a draining session was reclaimed instead of started.
    pub reused: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Creates, drives and tears down sessions.
pub struct Supervisor {
    registry: Arc<SessionRegistry>,
    factory: Arc<dyn HandleFactory>,
    config: SupervisorConfig,
}

impl Supervisor {
    pub fn new(
        registry: Arc<SessionRegistry>,
        factory: Arc<dyn HandleFactory>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            registry,
            factory,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Create a session, or reclaim it if it is draining.
    ///
    /// Events for the session go to `sink`.
    pub async fn create(
        &self,
        id: SessionId,
        params: SessionParams,
        owner: OwnerId,
        sink: EventSink,
    ) -> Result<Created> {
        let kind = params.kind();
        let claim = self.registry.claim(&id, kind, owner, Some(sink.clone()))?;
        let (instance, cancel) = match claim {
            Claim::Reopened { instance } => {
                info!(session_id = %id, instance, "session reopened");
                return Ok(Created {
                    session_id: id,
                    reused: true,
                    warning: None,
                });
            }
            Claim::Fresh { instance, cancel } => (instance, cancel),
        };
        debug!(session_id = %id, ?kind, %owner, instance, "starting session");

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SessionError::Cancelled(id.to_string())),
            opened = self.factory.open(&id, &params) => opened,
        };
        let mut handle = match opened {
            Ok(handle) => handle,
            Err(e) => {
                warn!(session_id = %id, error = %e, "session failed to start");
                self.registry
                    .retire(&id, instance, SessionState::Failed, Some(e.to_string()));
                return Err(e);
            }
        };

        let policy = self.config.readiness;
        let readiness = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            readiness = poll_until_ready(&policy, &mut handle, |h| h.probe()) => Some(readiness),
        };
        let warning = match readiness {
            Some(Readiness::Ready { attempts }) => {
                debug!(session_id = %id, attempts, "session ready");
                None
            }
            Some(Readiness::TimedOut { attempts }) if policy.on_timeout == TimeoutAction::Warn => {
                warn!(session_id = %id, attempts, "session not ready, continuing");
                Some(format!(
                    "session '{}' did not report ready after {} attempts; it may still be starting",
                    id, attempts
                ))
            }
            Some(Readiness::TimedOut { attempts }) => {
                let e = SessionError::ReadinessTimeout {
                    id: id.to_string(),
                    attempts,
                };
                return Err(self.abandon(&id, instance, handle, e));
            }
            Some(Readiness::Failed(reason)) => {
                return Err(self.abandon(&id, instance, handle, SessionError::Spawn(reason)));
            }
            None => {
                let e = SessionError::Cancelled(id.to_string());
                return Err(self.abandon(&id, instance, handle, e));
            }
        };

        let Some(events) = handle.take_events() else {
            let e = SessionError::HandleIo("handle events already taken".to_string());
            return Err(self.abandon(&id, instance, handle, e));
        };

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let weak = control_tx.downgrade();
        if let Err(e) = self
            .registry
            .activate(&id, instance, control_tx, handle.pid())
        {
            return Err(self.abandon(&id, instance, handle, e));
        }

        info!(session_id = %id, ?kind, %owner, pid = ?handle.pid(), "session active");

        let actor = SessionActor {
            id: id.clone(),
            instance,
            handle,
            events,
            control: control_rx,
            control_tx: weak,
            relay: Relay::new(id.clone(), sink),
            registry: Arc::clone(&self.registry),
            close_grace: self.config.close_grace,
        };
        tokio::spawn(actor.run());

        Ok(Created {
            session_id: id,
            reused: false,
            warning,
        })
    }

    fn abandon(
        &self,
        id: &SessionId,
        instance: u64,
        mut handle: Box<dyn Handle>,
        e: SessionError,
    ) -> SessionError {
        handle.kill();
        warn!(session_id = %id, error = %e, "session abandoned before activation");
        self.registry
            .retire(id, instance, SessionState::Failed, Some(e.to_string()));
        e
    }

    fn send(&self, id: &SessionId, control: Control) -> Result<()> {
        let (session, tx) = self.registry.control(id)?;
        let tx = tx.ok_or(SessionError::NotAccepting {
            id: id.to_string(),
            state: session.state,
        })?;
        tx.send(control)
            .map_err(|_| SessionError::NotFound(id.to_string()))
    }

    /// Send input to a session.
    pub fn write(&self, id: &SessionId, data: Vec<u8>) -> Result<()> {
        let (session, _) = self.registry.control(id)?;
        if !session.state.accepts_input() {
            return Err(SessionError::NotAccepting {
                id: id.to_string(),
                state: session.state,
            });
        }
        self.send(id, Control::Write(data))?;
        self.registry.touch(id, session.instance);
        Ok(())
    }

    /// Resize a session's terminal.
    pub fn resize(&self, id: &SessionId, size: PtySize) -> Result<()> {
        self.send(id, Control::Resize(size))
    }

    /// Interrupt whatever the session is running.
    pub fn interrupt(&self, id: &SessionId) -> Result<()> {
        self.send(id, Control::Interrupt)
    }

    /// Close a session after the grace delay.
    ///
    /// A session still starting has its construction cancelled instead.
    pub fn close(&self, id: &SessionId) -> Result<()> {
        match self.registry.begin_close(id)? {
            CloseStep::CancelledStart => {
                debug!(session_id = %id, "start cancelled");
            }
            CloseStep::Drain { instance, control } => {
                let scheduled = control.is_some_and(|c| c.send(Control::Close).is_ok());
                if !scheduled && self.registry.finish_drain(id, instance) {
                    warn!(session_id = %id, "closed session without a running actor");
                }
            }
        }
        Ok(())
    }

    /// Close a session immediately, without the grace delay.
    pub fn evict(&self, id: &SessionId) -> Result<()> {
        let evicted = self
            .registry
            .take(id)?
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        evicted.cancel.cancel();
        if let Some(control) = evicted.control {
            let _ = control.send(Control::Evict);
        }
        info!(session_id = %id, "session evicted");
        Ok(())
    }

    /// Tear down every session owned by `owner`. Returns how many there were.
    pub fn owner_disconnected(&self, owner: OwnerId) -> Result<usize> {
        let evicted = self.registry.evict_owner(owner)?;
        let count = evicted.len();
        for entry in evicted {
            entry.release();
        }
        if count > 0 {
            info!(%owner, count, "released sessions of disconnected owner");
        }
        Ok(count)
    }

    /// Tear down every session.
    pub fn shutdown(&self) -> Result<usize> {
        let evicted = self.registry.drain_all()?;
        let count = evicted.len();
        for entry in evicted {
            entry.release();
        }
        info!(count, "supervisor shut down");
        Ok(count)
    }
}

#[cfg(test)]
mod tests;
