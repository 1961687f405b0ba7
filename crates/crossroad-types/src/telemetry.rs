//! Classification of incoming telemetry datagrams.
//!
//! Datagrams arrive as JSON with an optional `type` tag and an
//! optional nested `consensus` object. Rather than letting
//! dynamically-shaped JSON flow through the relay, every datagram is
//! validated here into the closed [`TelemetryMessage`] set; anything
//! that does not parse is a [`TelemetryParseError`] and is dropped by
//! the ingest loop without affecting later datagrams.

use serde::Deserialize;

use crate::consensus::ConsensusUpdate;

/// Raw envelope used for the first parsing pass.
#[derive(Debug, Deserialize)]
struct RawTelemetry {
    #[serde(rename = "type")]
    kind: Option<String>,
    consensus: Option<ConsensusUpdate>,
}

/// A classified telemetry datagram.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryMessage {
    /// `type: "topology_update"` -- merge the carried links into the
    /// aggregated link set by `(from, to)` key.
    TopologyUpdate(ConsensusUpdate),
    /// `type: "view_change"` -- accepted, currently a no-op. Reserved
    /// for future handling.
    ViewChange,
    /// Any message carrying a nested `consensus` object and no
    /// dedicated handler: overwrite every provided field except links.
    Consensus(ConsensusUpdate),
    /// A message with a tag this relay does not handle and no usable
    /// consensus payload. Logged at reduced verbosity and ignored;
    /// the original event family (`message`, `state_change`,
    /// `consensus_progress`, `decision_zone`) lands here.
    Other {
        /// The unhandled `type` tag, or `""` when absent.
        kind: String,
    },
}

/// Errors produced while parsing a telemetry datagram.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryParseError {
    /// The payload was not valid JSON or did not match the envelope.
    #[error("malformed telemetry payload: {source}")]
    Json {
        /// The underlying JSON error.
        #[from]
        source: serde_json::Error,
    },

    /// A `topology_update` arrived without a `consensus` object.
    #[error("topology_update without consensus object")]
    MissingConsensus,
}

impl TelemetryMessage {
    /// Parse and classify one datagram payload.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryParseError`] for payloads that are not valid
    /// JSON, do not match the envelope shape, or are structurally
    /// incomplete for their declared type. The caller is expected to
    /// log and drop these.
    pub fn parse(payload: &[u8]) -> Result<Self, TelemetryParseError> {
        let raw: RawTelemetry = serde_json::from_slice(payload)?;
        Self::classify(raw)
    }

    fn classify(raw: RawTelemetry) -> Result<Self, TelemetryParseError> {
        match raw.kind.as_deref() {
            Some("topology_update") => raw
                .consensus
                .map(Self::TopologyUpdate)
                .ok_or(TelemetryParseError::MissingConsensus),
            Some("view_change") => Ok(Self::ViewChange),
            _ => {
                // Untyped or unhandled-typed messages still update the
                // aggregated view when they carry a consensus object.
                if let Some(update) = raw.consensus {
                    Ok(Self::Consensus(update))
                } else {
                    Ok(Self::Other {
                        kind: raw.kind.unwrap_or_default(),
                    })
                }
            }
        }
    }
}
