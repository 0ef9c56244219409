//! WebSocket session channel.
//!
//! One connection is one owner. Client frames carry a request plus an
//! optional `requestId` echoed in the reply; session events are pushed on
//! the same socket as they arrive.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::handlers::AppState;
use crate::error::SessionError;
use crate::ipc::{Request, Response};
use crate::relay::{EventSink, SessionEvent};
use crate::session::OwnerId;

/// WebSocket upgrade handler.
pub async fn ipc_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let owner = OwnerId::new();
    let (sink, events) = EventSink::channel(state.event_buffer);
    let (reply_tx, replies) = mpsc::unbounded_channel();
    let (ws_tx, mut ws_rx) = socket.split();
    let writer = tokio::spawn(write_loop(ws_tx, replies, events));
    let mut requests = JoinSet::new();

    info!(%owner, "channel connected");

    while let Some(msg) = ws_rx.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Ping(data)) => {
                let _ = reply_tx.send(Message::Pong(data));
                continue;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(%owner, error = %e, "channel read failed");
                break;
            }
        };

        while requests.try_join_next().is_some() {}

        let (request_id, request) = parse_frame(text.as_str());
        let request = match request {
            Ok(request) => request,
            Err(e) => {
                let _ = reply_tx.send(reply(request_id, &Response::failure(&e)));
                continue;
            }
        };

        // Own task per request so a close can overtake a pending create
        let router = state.router.clone();
        let sink = sink.clone();
        let reply_tx = reply_tx.clone();
        requests.spawn(async move {
            let response = router.handle(owner, &sink, request).await;
            let _ = reply_tx.send(reply(request_id, &response));
        });
    }

    info!(%owner, "channel disconnected");
    writer.abort();
    state.router.owner_disconnected(owner);

    // A create still in flight may register after the first teardown
    if !requests.is_empty() {
        while requests.join_next().await.is_some() {}
        state.router.owner_disconnected(owner);
    }
}

async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut replies: mpsc::UnboundedReceiver<Message>,
    mut events: mpsc::Receiver<SessionEvent>,
) {
    loop {
        let msg = tokio::select! {
            biased;
            Some(msg) = replies.recv() => msg,
            Some(event) = events.recv() => match serde_json::to_string(&event) {
                Ok(json) => Message::Text(json.into()),
                Err(e) => {
                    warn!(session_id = %event.session_id(), error = %e, "failed to encode event");
                    continue;
                }
            },
            else => break,
        };
        if ws_tx.send(msg).await.is_err() {
            break;
        }
    }
}

/// Split a client frame into its `requestId` and the request itself.
fn parse_frame(text: &str) -> (Option<Value>, Result<Request, SessionError>) {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            return (
                None,
                Err(SessionError::InvalidRequest(format!("malformed frame: {}", e))),
            )
        }
    };
    let request_id = value.get("requestId").cloned();
    let request = serde_json::from_value(value)
        .map_err(|e| SessionError::InvalidRequest(e.to_string()));
    (request_id, request)
}

/// Encode a response frame, tagged `response` and carrying `requestId`.
fn reply(request_id: Option<Value>, response: &Response) -> Message {
    let mut frame = match serde_json::to_value(response) {
        Ok(Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    };
    frame.insert("type".to_string(), Value::String("response".to_string()));
    if let Some(id) = request_id {
        frame.insert("requestId".to_string(), id);
    }
    Message::Text(Value::Object(frame).to_string().into())
}
