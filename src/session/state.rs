//! Session kinds and the lifecycle state machine.

use serde::{Deserialize, Serialize};

/// What backs a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionKind {
    /// A shell attached to a pseudo-terminal.
    InteractiveShell,
    /// A language kernel with plain stdio.
    InteractiveKernel,
    /// A chunked HTTP response relayed from the backend.
    ProxiedStream,
}

impl SessionKind {
    /// Prefix used for generated session IDs.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            SessionKind::InteractiveShell => "term",
            SessionKind::InteractiveKernel => "kernel",
            SessionKind::ProxiedStream => "stream",
        }
    }
}

/// Represents the lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Handle is being constructed; no data has flowed.
    #[default]
    Starting,
    /// Handle is constructed and confirmed live.
    Ready,
    /// Data is flowing.
    Active,
    /// Close requested; teardown is deferred and may be cancelled by a reopen.
    Draining,
    /// Closed normally.
    Closed,
    /// Closed with an error.
    Failed,
}

impl SessionState {
    /// Check if transition to target state is valid.
    ///
    /// Valid transitions:
    /// - Starting -> Ready
    /// - Ready -> Active
    /// - Active -> Draining
    /// - Draining -> Active (reopen)
    /// - Ready | Active | Draining -> Closed
    /// - any non-terminal -> Failed
    pub fn can_transition_to(&self, target: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (*self, target),
            (Starting, Ready)
                | (Ready, Active)
                | (Active, Draining)
                | (Draining, Active)
                | (Ready, Closed)
                | (Active, Closed)
                | (Draining, Closed)
                | (Starting, Failed)
                | (Ready, Failed)
                | (Active, Failed)
                | (Draining, Failed)
        )
    }

    /// Attempt to transition to a new state.
    ///
    /// Returns `Ok(())` if the transition is valid, or an error otherwise.
    pub fn transition_to(&mut self, target: SessionState) -> crate::Result<()> {
        if self.can_transition_to(target) {
            *self = target;
            Ok(())
        } else {
            Err(crate::error::SessionError::InvalidStateTransition {
                from: *self,
                to: target,
            })
        }
    }

    /// Check if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }

    /// Check if the session accepts writes, resizes and interrupts.
    pub fn accepts_input(&self) -> bool {
        matches!(self, SessionState::Ready | SessionState::Active)
    }
}
