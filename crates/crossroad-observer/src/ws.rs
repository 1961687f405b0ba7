//! `WebSocket` handler for real-time snapshot streaming.
//!
//! Clients connect to `GET /ws/stream` and receive a JSON-encoded
//! [`OutboundSnapshot`](crossroad_types::OutboundSnapshot) each time
//! the relay publishes one. The handler uses a [`broadcast::Receiver`]
//! so all connected clients see the same stream.
//!
//! If a client falls behind, lagged snapshots are silently skipped and
//! the client resumes from the most recent one. When the relay session
//! ends the client receives one `session_end` text frame followed by a
//! close frame.
//!
//! [`broadcast::Receiver`]: tokio::sync::broadcast::Receiver

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use tracing::{debug, warn};

use crate::state::{AppState, StreamEvent};

/// Upgrade an HTTP request to a `WebSocket` connection and begin
/// streaming snapshots.
///
/// # Route
///
/// `GET /ws/stream`
pub async fn ws_stream(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_ws(socket, state))
}

/// Handle the `WebSocket` lifecycle: subscribe to the broadcast
/// channel and forward each snapshot as a text frame.
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
    debug!("WebSocket client connected");

    let mut rx = state.subscribe();

    loop {
        tokio::select! {
            // Receive a stream event from the relay.
            result = rx.recv() => {
                match result {
                    Ok(StreamEvent::Snapshot(snapshot)) => {
                        let json = match serde_json::to_string(snapshot.as_ref()) {
                            Ok(j) => j,
                            Err(e) => {
                                warn!("Failed to serialize snapshot: {e}");
                                continue;
                            }
                        };
                        let msg: Message = Message::Text(json.into());
                        if socket.send(msg).await.is_err() {
                            debug!("WebSocket client disconnected (send failed)");
                            return;
                        }
                    }
                    Ok(StreamEvent::Ended { reason }) => {
                        send_session_end(&mut socket, &reason).await;
                        return;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        debug!(skipped = n, "WebSocket client lagged, skipping ahead");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        debug!("Broadcast channel closed, shutting down WebSocket");
                        return;
                    }
                }
            }
            // Check if the client sent a close frame or disconnected.
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("WebSocket client disconnected");
                        return;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let pong = Message::Pong(data);
                        if socket.send(pong).await.is_err() {
                            debug!("WebSocket client disconnected (pong failed)");
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        debug!("WebSocket error: {e}");
                        return;
                    }
                    _ => {
                        // Ignore other message types (text, binary from client).
                    }
                }
            }
        }
    }
}

/// Deliver the terminal `session_end` frame and close the socket.
async fn send_session_end(socket: &mut WebSocket, reason: &str) {
    let payload = serde_json::json!({
        "type": "session_end",
        "reason": reason,
    });
    let text = payload.to_string();
    if socket.send(Message::Text(text.into())).await.is_err() {
        debug!("WebSocket client disconnected before session end frame");
        return;
    }
    let _ = socket.send(Message::Close(None)).await;
    debug!(reason, "WebSocket stream closed after session end");
}
