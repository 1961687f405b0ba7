//! Consensus protocol telemetry shapes.
//!
//! The relay consumes the consensus protocol opaquely: phases, the
//! proposed direction, participating node ids, topology links, and a
//! small metrics block. No protocol logic lives here -- these types
//! only pin down the wire contract and the merge-relevant structure
//! (links are keyed by their endpoint pair).

use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the four compass approaches of a controlled junction.
///
/// Serialized as the bare letter (`"N"`, `"E"`, `"S"`, `"W"`), both as
/// a value and as a JSON map key in [`SignalState`].
///
/// [`SignalState`]: crate::snapshot::SignalState
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Approach {
    /// North approach.
    N,
    /// East approach.
    E,
    /// South approach.
    S,
    /// West approach.
    W,
}

impl Approach {
    /// All approaches in canonical (clockwise from north) order.
    pub const ALL: [Self; 4] = [Self::N, Self::E, Self::S, Self::W];

    /// Parse a compass letter. Returns `None` for anything else,
    /// including the empty string the protocol uses for "no proposal".
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "N" => Some(Self::N),
            "E" => Some(Self::E),
            "S" => Some(Self::S),
            "W" => Some(Self::W),
            _ => None,
        }
    }

    /// The compass letter for this approach.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::N => "N",
            Self::E => "E",
            Self::S => "S",
            Self::W => "W",
        }
    }
}

impl fmt::Display for Approach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The externally-reported stage of the consensus decision cycle.
///
/// The relay only uses the phase to select an actuation policy:
/// `PrePrepare` and `Prepare` are pre-decision ("negotiating") phases,
/// `Commit` and `Reply` are decided phases. Unrecognized phase strings
/// deserialize to [`ConsensusPhase::Unknown`] rather than failing the
/// whole message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusPhase {
    /// No round in progress.
    #[default]
    Idle,
    /// Leader is broadcasting the proposal.
    PrePrepare,
    /// Replicas are voting on the proposal.
    Prepare,
    /// The proposal gathered enough votes and is being committed.
    Commit,
    /// Replicas are acknowledging the committed decision.
    Reply,
    /// A phase name this relay does not know. Treated as a no-op by
    /// the actuation policy.
    #[serde(other)]
    Unknown,
}

impl ConsensusPhase {
    /// Whether the protocol is still negotiating (pre-decision).
    pub const fn is_negotiating(self) -> bool {
        matches!(self, Self::PrePrepare | Self::Prepare)
    }

    /// Whether the protocol has reached a decision.
    pub const fn is_decided(self) -> bool {
        matches!(self, Self::Commit | Self::Reply)
    }
}

/// A directed topology link between two protocol participants.
///
/// The aggregated view holds at most one link per `(from, to)` pair; a
/// later link with the same pair replaces the earlier one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    /// Sending participant id.
    pub from: String,
    /// Receiving participant id.
    pub to: String,
    /// Link strength in `[0, 1]`.
    pub strength: f64,
}

impl Link {
    /// The merge key for this link.
    pub fn key(&self) -> (String, String) {
        (self.from.clone(), self.to.clone())
    }
}

/// Protocol quality metrics, forwarded verbatim to subscribers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsensusMetrics {
    /// Wall-clock latency of the last decision, in milliseconds.
    #[serde(default)]
    pub decision_latency_ms: u64,
    /// Stability score of the current topology in `[0, 1]`.
    #[serde(default)]
    pub topology_stability_score: f64,
    /// Throughput gain over the baseline, in percent.
    #[serde(default)]
    pub throughput_gain_pct: f64,
}

/// The canonical aggregated consensus view, as sent to subscribers.
///
/// This is the serialized projection of the aggregator's state: links
/// are materialized as a list (sorted by key) for the wire. The
/// aggregator itself keeps them keyed to enforce uniqueness.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsensusView {
    /// Current protocol phase.
    pub phase: ConsensusPhase,
    /// Proposed direction: one of `N`/`E`/`S`/`W`, or `""` when no
    /// proposal is active. Kept as an opaque string because the
    /// protocol owns this vocabulary; [`Approach::parse`] is applied
    /// only at the actuation boundary.
    pub proposal_dir: String,
    /// Ids of the participating nodes.
    pub nodes: Vec<String>,
    /// Aggregated topology links, at most one per `(from, to)` pair.
    pub links: Vec<Link>,
    /// Latest protocol metrics.
    pub metrics: ConsensusMetrics,
}

/// A partial consensus update as carried by a telemetry datagram.
///
/// Every field is optional: absent fields leave the aggregated view
/// untouched. `links` is only honored on the dedicated topology-update
/// path, and an empty list there counts as "not provided".
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ConsensusUpdate {
    /// New phase, if provided.
    pub phase: Option<ConsensusPhase>,
    /// New proposal direction, if provided.
    pub proposal_dir: Option<String>,
    /// New participant list, if provided.
    pub nodes: Option<Vec<String>>,
    /// New metrics block, if provided.
    pub metrics: Option<ConsensusMetrics>,
    /// Topology links, if provided.
    pub links: Option<Vec<Link>>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn approach_round_trips_as_bare_letter() {
        let json = serde_json::to_string(&Approach::N).unwrap();
        assert_eq!(json, "\"N\"");
        let back: Approach = serde_json::from_str("\"W\"").unwrap();
        assert_eq!(back, Approach::W);
    }

    #[test]
    fn approach_parse_rejects_empty_and_junk() {
        assert_eq!(Approach::parse("N"), Some(Approach::N));
        assert_eq!(Approach::parse(""), None);
        assert_eq!(Approach::parse("NE"), None);
        assert_eq!(Approach::parse("n"), None);
    }

    #[test]
    fn phase_uses_snake_case_names() {
        let phase: ConsensusPhase = serde_json::from_str("\"pre_prepare\"").unwrap();
        assert_eq!(phase, ConsensusPhase::PrePrepare);
        assert_eq!(
            serde_json::to_string(&ConsensusPhase::Commit).unwrap(),
            "\"commit\""
        );
    }

    #[test]
    fn unknown_phase_does_not_fail_deserialization() {
        let phase: ConsensusPhase = serde_json::from_str("\"view_change_election\"").unwrap();
        assert_eq!(phase, ConsensusPhase::Unknown);
        assert!(!phase.is_negotiating());
        assert!(!phase.is_decided());
    }

    #[test]
    fn partial_update_leaves_absent_fields_none() {
        let update: ConsensusUpdate =
            serde_json::from_str(r#"{"phase": "commit", "proposal_dir": "N"}"#).unwrap();
        assert_eq!(update.phase, Some(ConsensusPhase::Commit));
        assert_eq!(update.proposal_dir.as_deref(), Some("N"));
        assert!(update.nodes.is_none());
        assert!(update.metrics.is_none());
        assert!(update.links.is_none());
    }

    #[test]
    fn metrics_fields_default_when_missing() {
        let metrics: ConsensusMetrics =
            serde_json::from_str(r#"{"decision_latency_ms": 12}"#).unwrap();
        assert_eq!(metrics.decision_latency_ms, 12);
        assert!(metrics.topology_stability_score.abs() < f64::EPSILON);
    }
}
