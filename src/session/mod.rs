//! Session management module.
//!
//! This module provides types for identifying sessions and their owners,
//! the lifecycle state machine, and the registry that tracks live sessions.

mod id;
mod registry;
mod state;

pub use id::{OwnerId, SessionId, MAX_ID_LEN};
pub use registry::{Claim, Session, SessionInfo, SessionRegistry};
pub use state::{SessionKind, SessionState};

pub(crate) use registry::{CloseStep, Evicted};
