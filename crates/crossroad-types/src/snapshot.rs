//! Live simulation state and the outbound subscriber snapshot.
//!
//! An [`OutboundSnapshot`] is the immutable combination of one sample
//! of live traffic state and the aggregated consensus view, stamped
//! with the relay's step counter. It is built at most once per
//! broadcast interval and shared (via `Arc`) across all subscribers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::consensus::{Approach, ConsensusView};

/// One vehicle's position and motion, sampled fresh every step.
///
/// There is no persistent identity beyond the simulation's own id;
/// a vehicle that leaves the network simply stops appearing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleState {
    /// Simulation-assigned vehicle id.
    pub id: String,
    /// X coordinate in network coordinates.
    pub x: f64,
    /// Y coordinate in network coordinates.
    pub y: f64,
    /// Speed in m/s.
    pub speed: f64,
    /// Heading in degrees, 0 = north, clockwise.
    pub angle: f64,
}

/// Per-approach signal characters for one controlled junction.
///
/// Keys serialize as bare compass letters, values as single-character
/// strings (`{"N": "G", "E": "r", ...}`). Approaches missing from the
/// raw signal string default to red at sampling time.
pub type SignalState = BTreeMap<Approach, char>;

/// The live traffic portion of a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrafficView {
    /// All vehicles currently in the network.
    pub vehicles: Vec<VehicleState>,
    /// Signal state of the first discovered controlled junction.
    pub traffic_lights: SignalState,
}

/// One emission to subscribers: live traffic plus the aggregated
/// consensus view, stamped with a monotonically increasing step
/// counter. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundSnapshot {
    /// The relay's step counter at emission time.
    pub step: u64,
    /// Live traffic sample.
    pub traffic: TrafficView,
    /// Aggregated consensus view at emission time.
    pub consensus: ConsensusView,
}
