//! Bridges the relay loop's snapshot emissions into the observer.
//!
//! [`ObserverPublisher`] is the relay-side [`SnapshotSink`]: every
//! snapshot that clears the broadcast gate is handed to the shared
//! [`AppState`], which fans it out to all connected `WebSocket`
//! clients and records it for the REST endpoint.

use std::sync::Arc;

use crossroad_core::runner::SnapshotSink;
use crossroad_observer::AppState;
use crossroad_types::OutboundSnapshot;
use tracing::trace;

/// Pushes emitted snapshots into the observer's fan-out channel.
pub struct ObserverPublisher {
    state: Arc<AppState>,
}

impl ObserverPublisher {
    /// Create a publisher feeding the given observer state.
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }
}

impl SnapshotSink for ObserverPublisher {
    fn on_snapshot(&mut self, snapshot: Arc<OutboundSnapshot>) {
        let receivers = self.state.publish_snapshot(snapshot);
        trace!(receivers, "Snapshot published to observer");
    }
}
