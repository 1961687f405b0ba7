//! UDP telemetry ingest task.
//!
//! One socket bound to the loopback telemetry port receives the
//! consensus protocol's JSON datagrams. Each datagram is parsed,
//! classified, and applied to the shared aggregator; every successful
//! consensus mutation triggers the signal actuator with the new phase
//! and proposed direction.
//!
//! Malformed or unhandled datagrams are dropped and logged; nothing on
//! this path is allowed to terminate the loop. The task exits only on
//! the shutdown signal.

use std::sync::Arc;

use crossroad_core::actuator::Actuator;
use crossroad_core::aggregator::ConsensusAggregator;
use crossroad_core::session::ControlSession;
use crossroad_types::{ConsensusPhase, TelemetryMessage};
use tokio::net::UdpSocket;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info, warn};

/// Largest telemetry datagram accepted.
const MAX_DATAGRAM: usize = 65_536;

/// `type` tags the protocol is known to emit but the relay does not
/// act on. These are dropped quietly; genuinely unknown tags are
/// logged louder.
const KNOWN_UNUSED_KINDS: &[&str] = &[
    "message",
    "state_change",
    "consensus_progress",
    "decision_zone",
];

/// Bind the telemetry socket on loopback.
///
/// Done eagerly by the caller so a port conflict surfaces as a startup
/// error rather than inside the background task.
///
/// # Errors
///
/// Returns the bind error unchanged.
pub async fn bind_telemetry_socket(port: u16) -> std::io::Result<UdpSocket> {
    let socket = UdpSocket::bind(("127.0.0.1", port)).await?;
    info!(port, "Telemetry socket bound");
    Ok(socket)
}

/// Receive loop: datagram in, aggregator mutation and actuation out.
///
/// Runs until `shutdown` flips or its sender is dropped.
pub async fn run_ingest<S: ControlSession + Send>(
    socket: UdpSocket,
    consensus: Arc<RwLock<ConsensusAggregator>>,
    session: Arc<Mutex<S>>,
    mut actuator: Actuator,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0_u8; MAX_DATAGRAM];

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("Telemetry ingest stopping");
                return;
            }
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((len, _peer)) => {
                        handle_datagram(&buf[..len], &consensus, &session, &mut actuator).await;
                    }
                    Err(e) => {
                        warn!(error = %e, "Telemetry receive failed");
                    }
                }
            }
        }
    }
}

/// Apply one datagram to the shared state.
///
/// Returns the `(phase, proposal_dir)` the actuator was invoked with,
/// or `None` when the datagram did not mutate consensus state.
async fn handle_datagram<S: ControlSession + Send>(
    payload: &[u8],
    consensus: &RwLock<ConsensusAggregator>,
    session: &Mutex<S>,
    actuator: &mut Actuator,
) -> Option<(ConsensusPhase, String)> {
    let message = match TelemetryMessage::parse(payload) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, "Discarding malformed telemetry datagram");
            return None;
        }
    };

    let protocol_state = match message {
        // Topology updates are link-merge only; phase and direction
        // changes travel on the generic consensus path.
        TelemetryMessage::TopologyUpdate(update) => {
            let mut aggregator = consensus.write().await;
            let merged = update
                .links
                .as_deref()
                .map_or(0, |links| aggregator.merge_links(links));
            if merged == 0 {
                debug!("Topology update carried no links, skipping actuation");
                None
            } else {
                Some((aggregator.phase(), aggregator.proposal_dir().to_owned()))
            }
        }
        TelemetryMessage::Consensus(update) => {
            let mut aggregator = consensus.write().await;
            aggregator.apply_update(&update);
            Some((aggregator.phase(), aggregator.proposal_dir().to_owned()))
        }
        TelemetryMessage::ViewChange => {
            debug!("View change noted, no aggregator mutation");
            None
        }
        TelemetryMessage::Other { kind } => {
            if KNOWN_UNUSED_KINDS.contains(&kind.as_str()) {
                debug!(kind, "Ignoring unhandled protocol message");
            } else {
                warn!(kind, "Ignoring unknown telemetry message type");
            }
            None
        }
    };

    if let Some((phase, ref proposal_dir)) = protocol_state {
        let mut session = session.lock().await;
        actuator.apply(&mut *session, phase, proposal_dir);
    }
    protocol_state
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use crossroad_core::config::JunctionLayout;
    use crossroad_core::session::StubControlSession;

    use super::*;

    fn fixture() -> (
        RwLock<ConsensusAggregator>,
        Mutex<StubControlSession>,
        Actuator,
    ) {
        (
            RwLock::new(ConsensusAggregator::new()),
            Mutex::new(StubControlSession::running_for(100, Vec::new())),
            Actuator::new(JunctionLayout::default()),
        )
    }

    #[tokio::test]
    async fn commit_datagram_actuates_the_proposed_direction() {
        let (consensus, session, mut actuator) = fixture();
        let payload = br#"{"type": "consensus_progress",
            "consensus": {"phase": "commit", "proposal_dir": "N"}}"#;

        let applied = handle_datagram(payload, &consensus, &session, &mut actuator).await;
        assert_eq!(applied, Some((ConsensusPhase::Commit, String::from("N"))));

        let session = session.lock().await;
        assert_eq!(
            session.signal_commands,
            vec![(String::from("J0"), String::from("GGGrrrrrrrrr"))]
        );
    }

    #[tokio::test]
    async fn negotiating_phase_blinks_every_position() {
        let (consensus, session, mut actuator) = fixture();
        let payload = br#"{"consensus": {"phase": "prepare"}}"#;

        handle_datagram(payload, &consensus, &session, &mut actuator).await;

        let session = session.lock().await;
        assert_eq!(
            session.signal_commands,
            vec![(String::from("J0"), String::from("yyyyyyyyyyyy"))]
        );
    }

    #[tokio::test]
    async fn malformed_datagram_between_valid_ones_is_dropped() {
        let (consensus, session, mut actuator) = fixture();

        let first = br#"{"type": "topology_update", "consensus": {"links": [
            {"from": "a", "to": "b", "strength": 0.4}]}}"#;
        let garbage = b"\x00\xffnot json";
        let second = br#"{"type": "topology_update", "consensus": {"links": [
            {"from": "a", "to": "b", "strength": 0.9}]}}"#;

        assert!(
            handle_datagram(first, &consensus, &session, &mut actuator)
                .await
                .is_some()
        );
        assert!(
            handle_datagram(garbage, &consensus, &session, &mut actuator)
                .await
                .is_none()
        );
        assert!(
            handle_datagram(second, &consensus, &session, &mut actuator)
                .await
                .is_some()
        );

        let view = consensus.read().await.view();
        assert_eq!(view.links.len(), 1);
        assert!((view.links[0].strength - 0.9).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn topology_update_merges_links_but_never_other_fields() {
        let (consensus, session, mut actuator) = fixture();
        let payload = br#"{"type": "topology_update", "consensus": {
            "phase": "commit", "proposal_dir": "N", "nodes": ["n1"],
            "links": [{"from": "a", "to": "b", "strength": 0.4}]}}"#;

        let applied = handle_datagram(payload, &consensus, &session, &mut actuator).await;
        assert_eq!(applied, Some((ConsensusPhase::Idle, String::new())));

        let view = consensus.read().await.view();
        assert_eq!(view.phase, ConsensusPhase::Idle);
        assert_eq!(view.proposal_dir, "");
        assert!(view.nodes.is_empty());
        assert_eq!(view.links.len(), 1);

        // Idle phase plans nothing, so no signal command either.
        assert!(session.lock().await.signal_commands.is_empty());
    }

    #[tokio::test]
    async fn linkless_topology_update_mutates_nothing_and_skips_actuation() {
        let (consensus, session, mut actuator) = fixture();

        // Establish a decided state so a spurious actuation would be
        // visible as a second identical command.
        let commit = br#"{"consensus": {"phase": "commit", "proposal_dir": "N"}}"#;
        handle_datagram(commit, &consensus, &session, &mut actuator).await;
        assert_eq!(session.lock().await.signal_commands.len(), 1);

        for payload in [
            br#"{"type": "topology_update", "consensus": {"links": []}}"#.as_slice(),
            br#"{"type": "topology_update", "consensus": {}}"#.as_slice(),
        ] {
            assert!(
                handle_datagram(payload, &consensus, &session, &mut actuator)
                    .await
                    .is_none()
            );
        }

        assert_eq!(session.lock().await.signal_commands.len(), 1);
        assert!(consensus.read().await.view().links.is_empty());
    }

    #[tokio::test]
    async fn view_change_and_unused_kinds_do_not_actuate() {
        let (consensus, session, mut actuator) = fixture();

        for payload in [
            br#"{"type": "view_change"}"#.as_slice(),
            br#"{"type": "decision_zone"}"#.as_slice(),
            br#"{"type": "wholly_unknown"}"#.as_slice(),
        ] {
            assert!(
                handle_datagram(payload, &consensus, &session, &mut actuator)
                    .await
                    .is_none()
            );
        }

        assert!(session.lock().await.signal_commands.is_empty());
    }

    #[tokio::test]
    async fn idle_phase_mutates_state_but_issues_no_command() {
        let (consensus, session, mut actuator) = fixture();
        let payload = br#"{"consensus": {"phase": "idle", "nodes": ["n1"]}}"#;

        let applied = handle_datagram(payload, &consensus, &session, &mut actuator).await;
        assert_eq!(applied, Some((ConsensusPhase::Idle, String::new())));

        assert!(session.lock().await.signal_commands.is_empty());
        assert_eq!(consensus.read().await.view().nodes, vec!["n1"]);
    }
}
