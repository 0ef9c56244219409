//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use incognide_sessions::api::{create_router, AppState};
use incognide_sessions::backend::BackendClient;
use incognide_sessions::handle::DefaultFactory;
use incognide_sessions::ipc::RequestRouter;
use incognide_sessions::session::SessionRegistry;
use incognide_sessions::supervisor::{Supervisor, SupervisorConfig};
use incognide_sessions::workspace::EnvironmentStore;

/// Port nothing listens on.
pub const DEAD_BACKEND: &str = "http://127.0.0.1:9";

const FRAME_TIMEOUT: Duration = Duration::from_secs(10);

/// Build application state with real handles.
pub fn app_state(backend_url: &str, dir: &Path) -> AppState {
    let backend = BackendClient::new(backend_url, Duration::from_secs(5)).unwrap();
    let store = Arc::new(EnvironmentStore::new(dir.join("environments.json")));
    let factory = DefaultFactory::new(
        backend.clone(),
        store,
        dir.join("kernels"),
        "incognide-missing-python",
    );
    let supervisor = Supervisor::new(
        Arc::new(SessionRegistry::new()),
        Arc::new(factory),
        SupervisorConfig::default(),
    );
    AppState::new(RequestRouter::new(Arc::new(supervisor), Some(backend)), 64)
}

/// Serve `state` on an ephemeral port.
pub async fn spawn_server(state: AppState) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, create_router(state)).await.unwrap();
    });
    addr
}

/// A renderer-side connection to the session channel.
pub struct Channel {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    events: VecDeque<Value>,
    next_id: u64,
}

impl Channel {
    pub async fn connect(addr: SocketAddr) -> Self {
        let (ws, _) = connect_async(format!("ws://{}/api/v1/ipc", addr))
            .await
            .unwrap();
        Self {
            ws,
            events: VecDeque::new(),
            next_id: 1,
        }
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.ws.send(Message::text(text.to_string())).await.unwrap();
    }

    pub async fn next_frame(&mut self) -> Value {
        loop {
            let msg = tokio::time::timeout(FRAME_TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("channel closed")
                .unwrap();
            if let Message::Text(text) = msg {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    /// Send a request and wait for its response, queueing events seen meanwhile.
    pub async fn request(&mut self, mut request: Value) -> Value {
        let id = self.next_id;
        self.next_id += 1;
        request["requestId"] = Value::from(id);
        self.send_raw(&request.to_string()).await;
        loop {
            let frame = self.next_frame().await;
            if frame["type"] == "response" && frame["requestId"] == id {
                return frame;
            }
            self.events.push_back(frame);
        }
    }

    /// Next pushed session event.
    pub async fn next_event(&mut self) -> Value {
        if let Some(event) = self.events.pop_front() {
            return event;
        }
        loop {
            let frame = self.next_frame().await;
            if frame["type"] != "response" {
                return frame;
            }
        }
    }

    /// Read events until one matches `done`, returning all data payloads joined.
    pub async fn collect_until(&mut self, done: impl Fn(&Value) -> bool) -> (String, Value) {
        let mut output = String::new();
        loop {
            let event = self.next_event().await;
            if let Some(payload) = event["payload"].as_str() {
                output.push_str(payload);
            }
            if done(&event) {
                return (output, event);
            }
        }
    }

    /// Read data events until their joined payloads contain `needle`.
    pub async fn read_output_until(&mut self, needle: &str) -> String {
        let mut output = String::new();
        while !output.contains(needle) {
            let event = self.next_event().await;
            assert_ne!(event["type"], "closed", "session closed early: {}", output);
            if let Some(payload) = event["payload"].as_str() {
                output.push_str(payload);
            }
        }
        output
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

/// Wait until `cond` holds, polling every 20 ms for up to 5 s.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
