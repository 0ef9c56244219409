//! Forwarding of handle output to an owner's event channel.
//!
//! Each connection owns one bounded [`EventSink`]. A session's [`Relay`]
//! turns raw handle bytes into tagged text events on that sink. Sending
//! waits for capacity, so a slow consumer slows the producer down instead
//! of growing a queue.

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::trace;

use crate::session::SessionId;

/// Event pushed to the owner of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SessionEvent {
    Data {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        payload: String,
    },
    Closed {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(rename = "exitCode", skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
    },
    Error {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        error: String,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> &SessionId {
        match self {
            SessionEvent::Data { session_id, .. }
            | SessionEvent::Closed { session_id, .. }
            | SessionEvent::Error { session_id, .. } => session_id,
        }
    }

    /// Whether this event ends the session's stream.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionEvent::Data { .. })
    }
}

/// The owner's event receiver is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("event sink closed")]
pub struct SinkClosed;

/// Sending half of an owner's event channel.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<SessionEvent>,
}

impl EventSink {
    /// Create a sink and the receiver its owner drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Send an event, waiting for capacity.
    pub async fn send(&self, event: SessionEvent) -> Result<(), SinkClosed> {
        self.tx.send(event).await.map_err(|_| SinkClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Per-session event relay.
pub struct Relay {
    session_id: SessionId,
    sink: EventSink,
    // Incomplete UTF-8 sequence held back from the previous chunk
    carry: Vec<u8>,
    finished: bool,
}

impl Relay {
    pub fn new(session_id: SessionId, sink: EventSink) -> Self {
        Self {
            session_id,
            sink,
            carry: Vec::new(),
            finished: false,
        }
    }

    /// Point the relay at a new owner's sink.
    pub fn rebind(&mut self, sink: EventSink) {
        self.sink = sink;
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Forward a chunk of output. Ignored after the terminal event.
    pub async fn data(&mut self, bytes: &[u8]) -> Result<(), SinkClosed> {
        if self.finished {
            trace!(session_id = %self.session_id, len = bytes.len(), "dropping data after close");
            return Ok(());
        }
        let payload = self.decode(bytes);
        if payload.is_empty() {
            return Ok(());
        }
        self.sink
            .send(SessionEvent::Data {
                session_id: self.session_id.clone(),
                payload,
            })
            .await
    }

    /// Emit the `closed` event. Only the first terminal event is sent.
    pub async fn closed(&mut self, exit_code: Option<i32>) -> Result<(), SinkClosed> {
        let event = SessionEvent::Closed {
            session_id: self.session_id.clone(),
            exit_code,
        };
        self.finish(event).await
    }

    /// Emit the `error` event. Only the first terminal event is sent.
    pub async fn error(&mut self, error: impl Into<String>) -> Result<(), SinkClosed> {
        let event = SessionEvent::Error {
            session_id: self.session_id.clone(),
            error: error.into(),
        };
        self.finish(event).await
    }

    async fn finish(&mut self, event: SessionEvent) -> Result<(), SinkClosed> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        if !self.carry.is_empty() {
            let rest = String::from_utf8_lossy(&std::mem::take(&mut self.carry)).into_owned();
            self.sink
                .send(SessionEvent::Data {
                    session_id: self.session_id.clone(),
                    payload: rest,
                })
                .await?;
        }
        self.sink.send(event).await
    }

    fn decode(&mut self, bytes: &[u8]) -> String {
        let mut buf = std::mem::take(&mut self.carry);
        buf.extend_from_slice(bytes);

        let mut out = String::with_capacity(buf.len());
        let mut rest = buf.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, tail) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &tail[len..];
                        }
                        None => {
                            // Sequence may complete in the next chunk
                            self.carry = tail.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }
}
