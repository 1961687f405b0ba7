//! Shared application state for the Observer API server.
//!
//! [`AppState`] holds the broadcast channel for snapshot streaming and
//! the latest published snapshot that the REST endpoint serves. The
//! relay loop publishes; the HTTP layer only ever reads.

use std::sync::Arc;

use crossroad_types::OutboundSnapshot;
use tokio::sync::{broadcast, RwLock};

/// Capacity of the broadcast channel for snapshot events.
///
/// If a subscriber falls behind by more than this many messages it will
/// receive a [`broadcast::error::RecvError::Lagged`] and skip to the
/// newest message.
const BROADCAST_CAPACITY: usize = 256;

/// An event pushed to every connected `WebSocket` client.
///
/// Snapshots are shared behind [`Arc`] so fanning out to N clients
/// never clones the payload itself.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A new merged snapshot is available.
    Snapshot(Arc<OutboundSnapshot>),
    /// The relay session ended; clients should expect no further
    /// snapshots and will receive a close frame.
    Ended {
        /// Machine-readable reason, e.g. `simulation_exhausted`.
        reason: String,
    },
}

/// Shared state for the Axum application.
///
/// Wrapped in [`Arc`] and injected via Axum's `State` extractor.
/// The broadcast sender pushes events to all connected `WebSocket`
/// clients; `latest` backs the one-shot REST snapshot endpoint.
#[derive(Clone)]
pub struct AppState {
    /// Broadcast sender for stream events.
    pub tx: broadcast::Sender<StreamEvent>,
    /// The most recently published snapshot, if any.
    pub latest: Arc<RwLock<Option<Arc<OutboundSnapshot>>>>,
}

impl AppState {
    /// Create a new application state with no snapshot yet.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            tx,
            latest: Arc::new(RwLock::new(None)),
        }
    }

    /// Subscribe to the stream event channel.
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.tx.subscribe()
    }

    /// Publish a snapshot to all connected clients and record it as
    /// the latest.
    ///
    /// Returns the number of receivers that received the event.
    /// Returns 0 if no clients are connected (this is not an error).
    pub fn publish_snapshot(&self, snapshot: Arc<OutboundSnapshot>) -> usize {
        // try_write keeps the publisher from ever parking behind REST
        // readers; a missed update is overwritten on the next tick.
        if let Ok(mut latest) = self.latest.try_write() {
            *latest = Some(Arc::clone(&snapshot));
        }
        // send returns Err only when there are zero receivers, which
        // is normal when no WebSocket clients are connected.
        self.tx.send(StreamEvent::Snapshot(snapshot)).unwrap_or(0)
    }

    /// Announce the end of the relay session to all connected clients.
    pub fn publish_ended(&self, reason: &str) -> usize {
        self.tx
            .send(StreamEvent::Ended {
                reason: reason.to_owned(),
            })
            .unwrap_or(0)
    }

    /// The most recently published snapshot, if any.
    pub async fn latest(&self) -> Option<Arc<OutboundSnapshot>> {
        self.latest.read().await.clone()
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
