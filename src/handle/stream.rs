//! Proxied backend response body.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{Handle, HandleEvent, PtySize, EVENT_BUFFER};
use crate::error::SessionError;
use crate::session::SessionKind;
use crate::Result;

/// A chunked HTTP response being forwarded as data events.
pub struct HttpStream {
    task: JoinHandle<()>,
    events: Option<mpsc::Receiver<HandleEvent>>,
    alive: Arc<AtomicBool>,
}

impl HttpStream {
    /// Send `request` and start forwarding its body.
    ///
    /// Fails with [`SessionError::Spawn`] when the request cannot be sent
    /// or the status is not 2xx.
    pub async fn open(request: reqwest::RequestBuilder) -> Result<Self> {
        let response = request
            .send()
            .await
            .map_err(|e| SessionError::Spawn(format!("Connection error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SessionError::Spawn(format!("HTTP {}: {}", status.as_u16(), text)));
        }

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let alive = Arc::new(AtomicBool::new(true));
        let task_alive = Arc::clone(&alive);
        let mut body = response.bytes_stream();

        let task = tokio::spawn(async move {
            let mut chunks = 0usize;
            let end = loop {
                match body.next().await {
                    Some(Ok(bytes)) => {
                        chunks += 1;
                        if tx.send(HandleEvent::Data(bytes.to_vec())).await.is_err() {
                            debug!(chunks, "stream receiver dropped");
                            task_alive.store(false, Ordering::SeqCst);
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(chunks, "stream read failed: {}", e);
                        break HandleEvent::Error(format!("stream read failed: {}", e));
                    }
                    None => {
                        debug!(chunks, "stream finished");
                        break HandleEvent::Exit(None);
                    }
                }
            };
            task_alive.store(false, Ordering::SeqCst);
            let _ = tx.send(end).await;
        });

        Ok(Self {
            task,
            events: Some(rx),
            alive,
        })
    }
}

#[async_trait]
impl Handle for HttpStream {
    fn kind(&self) -> SessionKind {
        SessionKind::ProxiedStream
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn write(&mut self, _data: &[u8]) {}

    fn resize(&mut self, _size: PtySize) {}

    fn interrupt(&mut self) {}

    fn kill(&mut self) {
        // Dropping the body closes the connection
        self.task.abort();
        self.alive.store(false, Ordering::SeqCst);
    }

    fn take_events(&mut self) -> Option<mpsc::Receiver<HandleEvent>> {
        self.events.take()
    }
}

impl Drop for HttpStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}
