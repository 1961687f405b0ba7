//! The stepping/broadcast loop.
//!
//! [`run_relay`] is the sole driver of simulation time for the relay's
//! subscribers: while the simulation reports outstanding activity it
//! advances one step, samples live traffic state unconditionally, and
//! hands a combined snapshot to the [`SnapshotSink`] -- but only when
//! the wall-clock [`BroadcastGate`] allows it, so the network emission
//! rate is strictly decoupled from the stepping rate.
//!
//! Per-tick sampling failures are logged and skipped; a transport
//! failure is the one fatal condition and propagates as
//! [`RunnerError::Session`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossroad_types::{OutboundSnapshot, SignalState, TrafficView};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::aggregator::ConsensusAggregator;
use crate::config::JunctionLayout;
use crate::session::{ControlSession, SessionError};

/// Errors that can occur during the relay run.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The session handle became unusable mid-run.
    #[error("session lost: {source}")]
    Session {
        /// The underlying session error.
        #[from]
        source: SessionError,
    },
}

/// The reason the relay loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEndReason {
    /// The simulation reported no more outstanding activity.
    SimulationExhausted,
}

impl RelayEndReason {
    /// Short machine-readable name, used in the terminal notification
    /// sent to subscribers.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SimulationExhausted => "simulation_exhausted",
        }
    }
}

/// Result of a completed relay run.
#[derive(Debug)]
pub struct RelayResult {
    /// Why the loop ended.
    pub end_reason: RelayEndReason,
    /// Simulation steps driven.
    pub steps: u64,
    /// Snapshots handed to the sink.
    pub snapshots_sent: u64,
}

/// Timing knobs for the relay loop.
#[derive(Debug, Clone, Copy)]
pub struct RelayTiming {
    /// Sleep between simulation steps.
    pub step_length: Duration,
    /// Minimum wall-clock spacing between emitted snapshots.
    pub broadcast_interval: Duration,
}

/// Receiver of emitted snapshots.
///
/// The bridge's implementation pushes into the subscriber fan-out;
/// tests count and inspect. The snapshot is shared, not copied, per
/// emission.
pub trait SnapshotSink: Send {
    /// Called for every snapshot that clears the broadcast gate.
    fn on_snapshot(&mut self, snapshot: Arc<OutboundSnapshot>);
}

/// Wall-clock gate enforcing the minimum spacing between emissions.
///
/// The gate is consulted every tick but only advanced when a send
/// actually happens, so a skipped tick (sampling failure) does not
/// push the next emission out.
#[derive(Debug)]
pub struct BroadcastGate {
    interval: Duration,
    last_sent: Option<Instant>,
}

impl BroadcastGate {
    /// A gate with the given minimum spacing. The first emission is
    /// always allowed.
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: None,
        }
    }

    /// Whether an emission at `now` respects the spacing.
    pub fn ready(&self, now: Instant) -> bool {
        self.last_sent
            .is_none_or(|last| now.saturating_duration_since(last) >= self.interval)
    }

    /// Record that an emission happened at `now`.
    pub fn mark_sent(&mut self, now: Instant) {
        self.last_sent = Some(now);
    }
}

/// Drive the simulation and emit rate-limited snapshots until the
/// simulation runs out of activity.
///
/// The session is shared with the ingest-triggered actuator, so every
/// tick takes the lock once for the step-and-sample sequence and
/// releases it before sleeping.
///
/// # Errors
///
/// Returns [`RunnerError::Session`] when the session handle is lost;
/// every other per-tick failure is logged and skipped.
pub async fn run_relay<S: ControlSession + Send>(
    session: &Mutex<S>,
    consensus: &RwLock<ConsensusAggregator>,
    sink: &mut dyn SnapshotSink,
    timing: RelayTiming,
    layout: &JunctionLayout,
) -> Result<RelayResult, RunnerError> {
    let mut gate = BroadcastGate::new(timing.broadcast_interval);
    let mut step: u64 = 0;
    let mut snapshots_sent: u64 = 0;

    info!(
        step_length_ms = timing.step_length.as_millis() as u64,
        broadcast_interval_ms = timing.broadcast_interval.as_millis() as u64,
        "Relay loop starting"
    );

    loop {
        let traffic = {
            let mut session = session.lock().await;

            if session.min_expected_vehicles()? == 0 {
                info!(step, snapshots_sent, "Simulation exhausted, relay loop ending");
                return Ok(RelayResult {
                    end_reason: RelayEndReason::SimulationExhausted,
                    steps: step,
                    snapshots_sent,
                });
            }

            session.step()?;
            step = step.saturating_add(1);

            // Sampled unconditionally, every tick; the gate only
            // controls construction and emission of the snapshot.
            sample_traffic(&mut *session, layout)?
        };

        let now = Instant::now();
        if gate.ready(now) {
            if let Some(traffic) = traffic {
                let consensus_view = consensus.read().await.view();
                let snapshot = Arc::new(OutboundSnapshot {
                    step,
                    traffic,
                    consensus: consensus_view,
                });
                sink.on_snapshot(snapshot);
                gate.mark_sent(now);
                snapshots_sent = snapshots_sent.saturating_add(1);
            }
        }

        if !timing.step_length.is_zero() {
            tokio::time::sleep(timing.step_length).await;
        }
    }
}

/// Sample all vehicles and the first controlled junction.
///
/// Returns `Ok(None)` when a non-fatal query failure spoils the tick;
/// individual vehicles that vanish mid-enumeration are skipped with a
/// `debug!`.
fn sample_traffic<S: ControlSession>(
    session: &mut S,
    layout: &JunctionLayout,
) -> Result<Option<TrafficView>, RunnerError> {
    let ids = match session.vehicle_ids() {
        Ok(ids) => ids,
        Err(e) if e.is_fatal() => return Err(e.into()),
        Err(e) => {
            warn!(error = %e, "Vehicle enumeration failed, skipping tick");
            return Ok(None);
        }
    };

    let mut vehicles = Vec::with_capacity(ids.len());
    for id in ids {
        match session.vehicle_state(&id) {
            Ok(vehicle) => vehicles.push(vehicle),
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                // Vehicles can leave the network between enumeration
                // and the per-vehicle query.
                debug!(vehicle = %id, error = %e, "Vehicle vanished during sampling");
            }
        }
    }

    let traffic_lights = sample_signals(session, layout)?;

    Ok(Some(TrafficView {
        vehicles,
        traffic_lights,
    }))
}

/// Derive the per-approach signal view from the first controlled
/// junction, defaulting every approach to red when there is none.
fn sample_signals<S: ControlSession>(
    session: &mut S,
    layout: &JunctionLayout,
) -> Result<SignalState, RunnerError> {
    let raw = match session.traffic_light_ids() {
        Ok(ids) => match ids.into_iter().next() {
            Some(tls_id) => match session.signal_state(&tls_id) {
                Ok(raw) => raw,
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    warn!(tls_id = %tls_id, error = %e, "Signal query failed");
                    String::new()
                }
            },
            None => String::new(),
        },
        Err(e) if e.is_fatal() => return Err(e.into()),
        Err(e) => {
            warn!(error = %e, "Junction enumeration failed");
            String::new()
        }
    };

    Ok(crossroad_types::Approach::ALL
        .into_iter()
        .map(|approach| (approach, layout.approach_char(&raw, approach)))
        .collect())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use crossroad_types::{ConsensusPhase, ConsensusUpdate, VehicleState};

    use super::*;
    use crate::session::StubControlSession;

    /// Sink that records every snapshot it receives.
    #[derive(Default)]
    struct RecordingSink {
        snapshots: Vec<Arc<OutboundSnapshot>>,
    }

    impl SnapshotSink for RecordingSink {
        fn on_snapshot(&mut self, snapshot: Arc<OutboundSnapshot>) {
            self.snapshots.push(snapshot);
        }
    }

    fn vehicle(id: &str) -> VehicleState {
        VehicleState {
            id: id.to_owned(),
            x: 1.0,
            y: 2.0,
            speed: 3.0,
            angle: 90.0,
        }
    }

    fn fast_timing() -> RelayTiming {
        RelayTiming {
            step_length: Duration::ZERO,
            broadcast_interval: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn loop_ends_when_simulation_is_exhausted() {
        let session = Mutex::new(StubControlSession::running_for(3, vec![vehicle("v0")]));
        let consensus = RwLock::new(ConsensusAggregator::new());
        let mut sink = RecordingSink::default();

        let result = run_relay(
            &session,
            &consensus,
            &mut sink,
            fast_timing(),
            &JunctionLayout::default(),
        )
        .await
        .unwrap();

        assert_eq!(result.end_reason, RelayEndReason::SimulationExhausted);
        assert_eq!(result.steps, 3);
        assert_eq!(session.lock().await.steps, 3);
    }

    #[tokio::test]
    async fn zero_interval_emits_every_step_with_increasing_counters() {
        let session = Mutex::new(StubControlSession::running_for(4, vec![vehicle("v0")]));
        let consensus = RwLock::new(ConsensusAggregator::new());
        let mut sink = RecordingSink::default();

        let result = run_relay(
            &session,
            &consensus,
            &mut sink,
            fast_timing(),
            &JunctionLayout::default(),
        )
        .await
        .unwrap();

        assert_eq!(result.snapshots_sent, 4);
        let steps: Vec<u64> = sink.snapshots.iter().map(|s| s.step).collect();
        assert_eq!(steps, vec![1, 2, 3, 4]);
        assert_eq!(sink.snapshots[0].traffic.vehicles[0].id, "v0");
    }

    #[tokio::test]
    async fn long_interval_suppresses_intermediate_emissions() {
        let session = Mutex::new(StubControlSession::running_for(5, vec![vehicle("v0")]));
        let consensus = RwLock::new(ConsensusAggregator::new());
        let mut sink = RecordingSink::default();

        let timing = RelayTiming {
            step_length: Duration::ZERO,
            broadcast_interval: Duration::from_secs(3600),
        };
        let result = run_relay(
            &session,
            &consensus,
            &mut sink,
            timing,
            &JunctionLayout::default(),
        )
        .await
        .unwrap();

        // Five steps driven, but only the first tick clears the gate.
        assert_eq!(result.steps, 5);
        assert_eq!(result.snapshots_sent, 1);
    }

    #[tokio::test]
    async fn snapshot_reflects_latest_consensus_view() {
        let session = Mutex::new(StubControlSession::running_for(1, Vec::new()));
        let consensus = RwLock::new(ConsensusAggregator::new());
        consensus.write().await.apply_update(&ConsensusUpdate {
            phase: Some(ConsensusPhase::Commit),
            proposal_dir: Some(String::from("N")),
            ..ConsensusUpdate::default()
        });
        let mut sink = RecordingSink::default();

        run_relay(
            &session,
            &consensus,
            &mut sink,
            fast_timing(),
            &JunctionLayout::default(),
        )
        .await
        .unwrap();

        assert_eq!(sink.snapshots.len(), 1);
        assert_eq!(sink.snapshots[0].consensus.phase, ConsensusPhase::Commit);
        assert_eq!(sink.snapshots[0].consensus.proposal_dir, "N");
    }

    #[tokio::test]
    async fn signal_view_covers_all_four_approaches() {
        let mut stub = StubControlSession::running_for(1, Vec::new());
        stub.signal = String::from("GGGrrrrrrrrr");
        let session = Mutex::new(stub);
        let consensus = RwLock::new(ConsensusAggregator::new());
        let mut sink = RecordingSink::default();

        run_relay(
            &session,
            &consensus,
            &mut sink,
            fast_timing(),
            &JunctionLayout::default(),
        )
        .await
        .unwrap();

        let lights = &sink.snapshots[0].traffic.traffic_lights;
        assert_eq!(lights.get(&crossroad_types::Approach::N), Some(&'G'));
        assert_eq!(lights.get(&crossroad_types::Approach::E), Some(&'r'));
        assert_eq!(lights.get(&crossroad_types::Approach::S), Some(&'r'));
        assert_eq!(lights.get(&crossroad_types::Approach::W), Some(&'r'));
    }

    #[test]
    fn gate_allows_first_emission_and_enforces_spacing() {
        let mut gate = BroadcastGate::new(Duration::from_millis(250));
        let t0 = Instant::now();
        assert!(gate.ready(t0));
        gate.mark_sent(t0);

        assert!(!gate.ready(t0 + Duration::from_millis(100)));
        assert!(!gate.ready(t0 + Duration::from_millis(249)));
        assert!(gate.ready(t0 + Duration::from_millis(250)));
        assert!(gate.ready(t0 + Duration::from_millis(900)));
    }

    #[test]
    fn gate_spacing_is_a_lower_bound_across_a_run() {
        // Simulate a stepping loop much faster than the broadcast
        // interval and check consecutive emissions are never closer
        // than the interval.
        let interval = Duration::from_millis(250);
        let mut gate = BroadcastGate::new(interval);
        let t0 = Instant::now();
        let mut emitted = Vec::new();

        for tick in 0..100_u64 {
            let now = t0 + Duration::from_millis(tick * 10);
            if gate.ready(now) {
                gate.mark_sent(now);
                emitted.push(now);
            }
        }

        assert!(emitted.len() > 1);
        for pair in emitted.windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= interval);
        }
    }
}
