//! Session registry: the single source of truth for live sessions.
//!
//! Every check-and-mutate happens inside one write guard and nothing
//! awaits while the guard is held, so two `create` calls for the same ID
//! always observe each other.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::{OwnerId, SessionId, SessionKind, SessionState};
use crate::error::SessionError;
use crate::relay::EventSink;
use crate::supervisor::{Control, ControlTx};
use crate::Result;

/// Snapshot of a session's metadata.
#[derive(Debug, Clone)]
pub struct Session {
    /// Caller-visible identifier.
    pub id: SessionId,
    /// What backs the session.
    pub kind: SessionKind,
    /// Connection whose event channel receives this session's events.
    pub owner: OwnerId,
    /// Current state.
    pub state: SessionState,
    /// Registry-unique instance number; distinguishes reuses of one ID.
    pub instance: u64,
    /// Process ID of the backing process, if any.
    pub pid: Option<u32>,
    /// Error payload for failed sessions.
    pub error: Option<String>,
    pub created_at: Instant,
    pub last_activity: Instant,
}

impl Session {
    fn new(id: SessionId, kind: SessionKind, owner: OwnerId, instance: u64) -> Self {
        let now = Instant::now();
        Self {
            id,
            kind,
            owner,
            state: SessionState::Starting,
            instance,
            pid: None,
            error: None,
            created_at: now,
            last_activity: now,
        }
    }

    /// Update the last activity timestamp.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Get the idle duration since last activity.
    pub fn idle_duration(&self) -> std::time::Duration {
        self.last_activity.elapsed()
    }

    /// Serializable diagnostic view.
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.id.clone(),
            kind: self.kind,
            owner: self.owner,
            state: self.state,
            pid: self.pid,
            error: self.error.clone(),
            age_seconds: self.created_at.elapsed().as_secs_f64(),
            idle_seconds: self.idle_duration().as_secs_f64(),
        }
    }
}

/// Diagnostic form of a session, as returned by list endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub kind: SessionKind,
    pub owner: OwnerId,
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub age_seconds: f64,
    pub idle_seconds: f64,
}

/// Result of claiming an ID in [`SessionRegistry::create`].
#[derive(Debug)]
pub enum Claim {
    /// No live session held the ID; a `Starting` entry was inserted.
    Fresh {
        instance: u64,
        cancel: CancellationToken,
    },
    /// A draining session of the same kind was moved back to `Active`.
    Reopened { instance: u64 },
}

/// What a close request has to do next.
#[derive(Debug)]
pub(crate) enum CloseStep {
    /// Session was still starting; its construction has been cancelled.
    CancelledStart,
    /// Session moved to `Draining`; the actor must arm its deferred kill.
    Drain {
        instance: u64,
        control: Option<ControlTx>,
    },
}

/// A record removed from the registry whose resources still need releasing.
#[derive(Debug)]
pub(crate) struct Evicted {
    pub session: Session,
    pub control: Option<ControlTx>,
    pub cancel: CancellationToken,
}

impl Evicted {
    /// Stop whatever still backs the evicted session.
    pub(crate) fn release(self) {
        self.cancel.cancel();
        if let Some(control) = self.control {
            // Actor may already be gone; nothing left to stop then
            let _ = control.send(Control::Shutdown);
        }
    }
}

#[derive(Debug)]
struct Record {
    session: Session,
    control: Option<ControlTx>,
    cancel: CancellationToken,
}

impl Record {
    fn evicted(self) -> Evicted {
        Evicted {
            session: self.session,
            control: self.control,
            cancel: self.cancel,
        }
    }
}

/// Thread-safe registry of sessions keyed by ID.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Record>>,
    next_instance: AtomicU64,
}

impl SessionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_instance: AtomicU64::new(1),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<SessionId, Record>>> {
        self.sessions.read().map_err(|_| SessionError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<SessionId, Record>>> {
        self.sessions.write().map_err(|_| SessionError::LockPoisoned)
    }

    /// Claim `id` for a new session of `kind` owned by `owner`.
    ///
    /// Fails with [`SessionError::DuplicateSession`] if a live session holds
    /// the ID, unless that session is draining and of the same kind, in
    /// which case it is reclaimed for `owner`.
    pub fn create(&self, id: &SessionId, kind: SessionKind, owner: OwnerId) -> Result<Claim> {
        self.claim(id, kind, owner, None)
    }

    /// [`create`](Self::create), handing `sink` to the actor of a reclaimed
    /// session before the write guard is released.
    ///
    /// A close that races the reopen therefore always queues behind the
    /// reattach on the actor's control channel.
    pub(crate) fn claim(
        &self,
        id: &SessionId,
        kind: SessionKind,
        owner: OwnerId,
        sink: Option<EventSink>,
    ) -> Result<Claim> {
        let mut sessions = self.write()?;

        if let Some(record) = sessions.get_mut(id) {
            let state = record.session.state;
            if state == SessionState::Draining && record.session.kind == kind {
                if let Some(sink) = sink {
                    let delivered = record
                        .control
                        .as_ref()
                        .is_some_and(|c| c.send(Control::Reattach(sink)).is_ok());
                    if !delivered {
                        error!(session_id = %id, "reclaimed session has no running actor");
                        if let Some(record) = sessions.remove(id) {
                            record.evicted().release();
                        }
                        return Err(SessionError::HandleIo(format!(
                            "session '{}' lost its handle",
                            id
                        )));
                    }
                }
                record.session.state.transition_to(SessionState::Active)?;
                record.session.owner = owner;
                record.session.touch();
                debug!(session_id = %id, %owner, "reclaimed draining session");
                return Ok(Claim::Reopened {
                    instance: record.session.instance,
                });
            }
            if !state.is_terminal() {
                return Err(SessionError::DuplicateSession(id.to_string()));
            }
        }

        let instance = self.next_instance.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        sessions.insert(
            id.clone(),
            Record {
                session: Session::new(id.clone(), kind, owner, instance),
                control: None,
                cancel: cancel.clone(),
            },
        );
        Ok(Claim::Fresh { instance, cancel })
    }

    /// Get a snapshot of the session with the given ID.
    pub fn get(&self, id: &SessionId) -> Result<Option<Session>> {
        Ok(self.read()?.get(id).map(|r| r.session.clone()))
    }

    /// Check if a session exists.
    pub fn contains(&self, id: &SessionId) -> Result<bool> {
        Ok(self.read()?.contains_key(id))
    }

    /// Remove a session regardless of its state, releasing its handle.
    ///
    /// Returns the removed session, or None if it didn't exist.
    pub fn remove(&self, id: &SessionId) -> Result<Option<Session>> {
        let evicted = self.take(id)?;
        if let Some(e) = &evicted {
            if !e.session.state.is_terminal() {
                warn!(
                    session_id = %id,
                    state = ?e.session.state,
                    "removing session that was not terminal"
                );
            }
        }
        Ok(evicted.map(|e| {
            let session = e.session.clone();
            e.release();
            session
        }))
    }

    /// List all sessions owned by `owner`.
    pub fn list_by_owner(&self, owner: OwnerId) -> Result<Vec<Session>> {
        Ok(self
            .read()?
            .values()
            .filter(|r| r.session.owner == owner)
            .map(|r| r.session.clone())
            .collect())
    }

    /// List all sessions.
    pub fn list(&self) -> Result<Vec<Session>> {
        let mut sessions: Vec<Session> =
            self.read()?.values().map(|r| r.session.clone()).collect();
        sessions.sort_by_key(|s| s.instance);
        Ok(sessions)
    }

    /// Get the number of sessions in the registry.
    ///
    /// A poisoned registry counts as empty.
    pub fn count(&self) -> usize {
        match self.read() {
            Ok(sessions) => sessions.len(),
            Err(e) => {
                error!(error = %e, "cannot count sessions");
                0
            }
        }
    }

    // --- Instance-scoped operations used by the supervisor ---

    fn live<'a>(
        sessions: &'a mut HashMap<SessionId, Record>,
        id: &SessionId,
        instance: u64,
    ) -> Result<&'a mut Record> {
        sessions
            .get_mut(id)
            .filter(|r| r.session.instance == instance)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    /// Record activity on a specific instance.
    pub(crate) fn touch(&self, id: &SessionId, instance: u64) {
        if let Ok(mut sessions) = self.write() {
            if let Ok(record) = Self::live(&mut sessions, id, instance) {
                record.session.touch();
            }
        }
    }

    /// Hand a started instance to its actor and move it to `Active`.
    ///
    /// Fails with [`SessionError::Cancelled`] if a close or owner teardown
    /// cancelled the start in the meantime.
    pub(crate) fn activate(
        &self,
        id: &SessionId,
        instance: u64,
        control: ControlTx,
        pid: Option<u32>,
    ) -> Result<()> {
        let mut sessions = self.write()?;
        let record = Self::live(&mut sessions, id, instance)
            .map_err(|_| SessionError::Cancelled(id.to_string()))?;
        if record.cancel.is_cancelled() {
            return Err(SessionError::Cancelled(id.to_string()));
        }
        record.session.state.transition_to(SessionState::Ready)?;
        record.session.state.transition_to(SessionState::Active)?;
        record.session.pid = pid;
        record.session.touch();
        record.control = Some(control);
        Ok(())
    }

    /// Control channel of a live session, if its actor is running.
    pub(crate) fn control(&self, id: &SessionId) -> Result<(Session, Option<ControlTx>)> {
        let sessions = self.read()?;
        let record = sessions
            .get(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        Ok((record.session.clone(), record.control.clone()))
    }

    /// Start closing a session.
    pub(crate) fn begin_close(&self, id: &SessionId) -> Result<CloseStep> {
        let mut sessions = self.write()?;
        let record = sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;

        match record.session.state {
            SessionState::Starting if record.cancel.is_cancelled() => {
                Err(SessionError::AlreadyClosing(id.to_string()))
            }
            SessionState::Starting => {
                record.cancel.cancel();
                Ok(CloseStep::CancelledStart)
            }
            SessionState::Ready | SessionState::Active => {
                record.session.state.transition_to(SessionState::Draining)?;
                record.session.touch();
                Ok(CloseStep::Drain {
                    instance: record.session.instance,
                    control: record.control.clone(),
                })
            }
            SessionState::Draining => Err(SessionError::AlreadyClosing(id.to_string())),
            SessionState::Closed | SessionState::Failed => {
                Err(SessionError::NotFound(id.to_string()))
            }
        }
    }

    /// Complete a drain if nothing reclaimed the session meanwhile.
    ///
    /// Returns true if the instance was still draining and is now closed
    /// and removed.
    pub(crate) fn finish_drain(&self, id: &SessionId, instance: u64) -> bool {
        let Ok(mut sessions) = self.write() else {
            return false;
        };
        let draining = sessions
            .get(id)
            .map(|r| r.session.instance == instance && r.session.state == SessionState::Draining)
            .unwrap_or(false);
        if draining {
            sessions.remove(id);
        }
        draining
    }

    /// Move a specific instance to a terminal state and remove it.
    pub(crate) fn retire(
        &self,
        id: &SessionId,
        instance: u64,
        terminal: SessionState,
        error: Option<String>,
    ) -> Option<Session> {
        debug_assert!(terminal.is_terminal());
        let mut sessions = self.write().ok()?;
        let matches = sessions
            .get(id)
            .map(|r| r.session.instance == instance)
            .unwrap_or(false);
        if !matches {
            return None;
        }
        let mut record = sessions.remove(id)?;
        if let Err(e) = record.session.state.transition_to(terminal) {
            warn!(session_id = %id, error = %e, "forcing terminal state");
            record.session.state = terminal;
        }
        record.session.error = error;
        Some(record.session)
    }

    /// Remove a session and hand back what it holds.
    pub(crate) fn take(&self, id: &SessionId) -> Result<Option<Evicted>> {
        Ok(self.write()?.remove(id).map(Record::evicted))
    }

    /// Remove every session of `owner` in one pass.
    pub(crate) fn evict_owner(&self, owner: OwnerId) -> Result<Vec<Evicted>> {
        let mut sessions = self.write()?;
        let ids: Vec<SessionId> = sessions
            .iter()
            .filter(|(_, r)| r.session.owner == owner)
            .map(|(id, _)| id.clone())
            .collect();
        Ok(ids
            .iter()
            .filter_map(|id| sessions.remove(id))
            .map(|mut r| {
                r.session.state = SessionState::Closed;
                r.evicted()
            })
            .collect())
    }

    /// Remove every session.
    pub(crate) fn drain_all(&self) -> Result<Vec<Evicted>> {
        let mut sessions = self.write()?;
        Ok(sessions
            .drain()
            .map(|(_, mut r)| {
                r.session.state = SessionState::Closed;
                r.evicted()
            })
            .collect())
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
