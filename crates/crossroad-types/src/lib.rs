//! Shared type definitions for the Crossroad telemetry relay.
//!
//! This crate is the single source of truth for every shape that
//! crosses a process boundary: the consensus telemetry arriving over
//! UDP, the canonical aggregated consensus view, and the snapshots
//! fanned out to downstream subscribers.
//!
//! # Modules
//!
//! - [`consensus`] -- Consensus phases, links, metrics, and the
//!   aggregated/partial consensus shapes.
//! - [`snapshot`] -- Live simulation state (vehicles, signals) and the
//!   outbound snapshot delivered to subscribers.
//! - [`telemetry`] -- Classification of incoming datagrams into a
//!   closed set of message variants.

pub mod consensus;
pub mod snapshot;
pub mod telemetry;

// Re-export all public types at crate root for convenience.
pub use consensus::{Approach, ConsensusMetrics, ConsensusPhase, ConsensusUpdate, ConsensusView, Link};
pub use snapshot::{OutboundSnapshot, SignalState, TrafficView, VehicleState};
pub use telemetry::{TelemetryMessage, TelemetryParseError};
