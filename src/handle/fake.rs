//! Scriptable handles for lifecycle tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Handle, HandleEvent, HandleFactory, Probe, PtySize, SessionParams, EVENT_BUFFER};
use crate::error::SessionError;
use crate::session::{SessionId, SessionKind};
use crate::Result;

#[derive(Default)]
pub(crate) struct FakeState {
    pub opens: AtomicUsize,
    pub kills: AtomicUsize,
    pub interrupts: AtomicUsize,
    pub writes: Mutex<Vec<Vec<u8>>>,
    pub resizes: Mutex<Vec<PtySize>>,
    pub feeds: Mutex<HashMap<String, mpsc::Sender<HandleEvent>>>,
    pub never_ready: AtomicBool,
    pub fail_open: Mutex<Option<String>>,
    pub open_delay: Mutex<Option<Duration>>,
}

/// Factory whose handles record what is done to them.
#[derive(Clone, Default)]
pub(crate) struct FakeFactory {
    pub state: Arc<FakeState>,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn never_ready(self) -> Self {
        self.state.never_ready.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing(self, message: &str) -> Self {
        *self.state.fail_open.lock().unwrap() = Some(message.to_string());
        self
    }

    pub fn slow_open(self, delay: Duration) -> Self {
        *self.state.open_delay.lock().unwrap() = Some(delay);
        self
    }

    pub fn opens(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    pub fn kills(&self) -> usize {
        self.state.kills.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state.writes.lock().unwrap().clone()
    }

    /// Sender that injects events into the handle of session `id`.
    pub fn feed(&self, id: &str) -> mpsc::Sender<HandleEvent> {
        self.state
            .feeds
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .expect("no handle opened for session")
    }
}

#[async_trait]
impl HandleFactory for FakeFactory {
    async fn open(&self, id: &SessionId, params: &SessionParams) -> Result<Box<dyn Handle>> {
        let delay = *self.state.open_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = self.state.fail_open.lock().unwrap().clone() {
            return Err(SessionError::Spawn(message));
        }
        self.state.opens.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        self.state
            .feeds
            .lock()
            .unwrap()
            .insert(id.to_string(), tx);

        Ok(Box::new(FakeHandle {
            kind: params.kind(),
            state: Arc::clone(&self.state),
            events: Some(rx),
            alive: true,
        }))
    }
}

struct FakeHandle {
    kind: SessionKind,
    state: Arc<FakeState>,
    events: Option<mpsc::Receiver<HandleEvent>>,
    alive: bool,
}

#[async_trait]
impl Handle for FakeHandle {
    fn kind(&self) -> SessionKind {
        self.kind
    }

    fn pid(&self) -> Option<u32> {
        Some(4242)
    }

    fn is_alive(&self) -> bool {
        self.alive
    }

    fn write(&mut self, data: &[u8]) {
        self.state.writes.lock().unwrap().push(data.to_vec());
    }

    fn resize(&mut self, size: PtySize) {
        self.state.resizes.lock().unwrap().push(size);
    }

    fn interrupt(&mut self) {
        self.state.interrupts.fetch_add(1, Ordering::SeqCst);
    }

    fn kill(&mut self) {
        if self.alive {
            self.alive = false;
            self.state.kills.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn take_events(&mut self) -> Option<mpsc::Receiver<HandleEvent>> {
        self.events.take()
    }

    async fn probe(&mut self) -> Probe {
        if self.state.never_ready.load(Ordering::SeqCst) {
            Probe::Pending
        } else {
            Probe::Ready
        }
    }
}
