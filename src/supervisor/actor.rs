//! Per-session task that owns a handle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{Control, DeferredAction};
use crate::handle::{Handle, HandleEvent};
use crate::relay::Relay;
use crate::session::{SessionId, SessionRegistry, SessionState};

/// Owns a live handle and serialises everything that touches it.
pub(crate) struct SessionActor {
    pub id: SessionId,
    pub instance: u64,
    pub handle: Box<dyn Handle>,
    pub events: mpsc::Receiver<HandleEvent>,
    pub control: mpsc::UnboundedReceiver<Control>,
    pub control_tx: mpsc::WeakUnboundedSender<Control>,
    pub relay: Relay,
    pub registry: Arc<SessionRegistry>,
    pub close_grace: Duration,
}

/// Whether the actor keeps running after a step.
enum Step {
    Continue,
    Stop,
}

impl SessionActor {
    pub(crate) async fn run(mut self) {
        let mut deferred = DeferredAction::new();
        debug!(session_id = %self.id, instance = self.instance, "actor started");

        loop {
            let step = tokio::select! {
                control = self.control.recv() => match control {
                    Some(control) => self.on_control(control, &mut deferred).await,
                    None => {
                        // Every sender is gone, so the registry no longer knows us
                        self.handle.kill();
                        Step::Stop
                    }
                },
                event = self.events.recv() => {
                    self.on_event(event.unwrap_or(HandleEvent::Exit(None))).await
                }
            };
            if let Step::Stop = step {
                break;
            }
        }

        debug!(session_id = %self.id, instance = self.instance, "actor stopped");
    }

    async fn on_control(&mut self, control: Control, deferred: &mut DeferredAction) -> Step {
        match control {
            Control::Write(data) => {
                self.handle.write(&data);
                Step::Continue
            }
            Control::Resize(size) => {
                self.handle.resize(size);
                Step::Continue
            }
            Control::Interrupt => {
                self.handle.interrupt();
                Step::Continue
            }
            Control::Close => {
                let control_tx = self.control_tx.clone();
                deferred.schedule(self.close_grace, async move {
                    if let Some(tx) = control_tx.upgrade() {
                        let _ = tx.send(Control::DrainExpired);
                    }
                });
                debug!(session_id = %self.id, grace = ?self.close_grace, "close scheduled");
                Step::Continue
            }
            Control::Reattach(sink) => {
                if deferred.cancel() {
                    debug!(session_id = %self.id, "pending close cancelled by reopen");
                }
                self.relay.rebind(sink);
                Step::Continue
            }
            Control::DrainExpired => {
                if !self.registry.finish_drain(&self.id, self.instance) {
                    // Reopened before the timer fired
                    return Step::Continue;
                }
                self.handle.kill();
                info!(session_id = %self.id, "session closed");
                let _ = self.relay.closed(None).await;
                Step::Stop
            }
            Control::Evict => {
                self.handle.kill();
                info!(session_id = %self.id, "session evicted");
                let _ = self.relay.closed(None).await;
                Step::Stop
            }
            Control::Shutdown => {
                self.handle.kill();
                debug!(session_id = %self.id, "session torn down with its owner");
                Step::Stop
            }
        }
    }

    async fn on_event(&mut self, event: HandleEvent) -> Step {
        match event {
            HandleEvent::Data(bytes) => {
                self.registry.touch(&self.id, self.instance);
                if self.relay.data(&bytes).await.is_err() {
                    warn!(session_id = %self.id, "owner stopped listening, closing session");
                    self.handle.kill();
                    self.registry
                        .retire(&self.id, self.instance, SessionState::Closed, None);
                    return Step::Stop;
                }
                Step::Continue
            }
            HandleEvent::Exit(code) => {
                self.registry
                    .retire(&self.id, self.instance, SessionState::Closed, None);
                info!(session_id = %self.id, exit_code = ?code, "session exited");
                let _ = self.relay.closed(code).await;
                Step::Stop
            }
            HandleEvent::Error(message) => {
                self.handle.kill();
                self.registry.retire(
                    &self.id,
                    self.instance,
                    SessionState::Failed,
                    Some(message.clone()),
                );
                warn!(session_id = %self.id, error = %message, "session failed");
                let _ = self.relay.error(message).await;
                Step::Stop
            }
        }
    }
}
