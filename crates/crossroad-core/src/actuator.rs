//! Signal actuation policy and its application.
//!
//! The actuator translates the aggregated `(phase, proposal_dir)` pair
//! into a concrete signal-state command for the controlled junction.
//! The policy itself is a pure function over the [`JunctionLayout`];
//! the [`Actuator`] wrapper owns the side effects: discovering the
//! junction id on first use and issuing the command through the
//! session, logging and skipping any rejection.

use crossroad_types::{Approach, ConsensusPhase};
use tracing::{debug, warn};

use crate::config::JunctionLayout;
use crate::session::ControlSession;

/// Signal character for an approach with right of way.
pub const SIGNAL_GO: char = 'G';
/// Signal character for a stopped approach.
pub const SIGNAL_STOP: char = 'r';
/// Signal character shown on all approaches while the protocol is
/// still negotiating.
pub const SIGNAL_CAUTION: char = 'y';

/// Compute the signal string for a protocol state, or `None` when no
/// command should be issued.
///
/// Policy:
/// - negotiating phases: every position shows caution;
/// - decided phases with a proposal direction that maps into the
///   layout: that direction's positions show go, all others stop;
/// - decided with no (or unmapped) direction, idle, or unknown
///   phases: no command.
pub fn plan_signal(
    phase: ConsensusPhase,
    proposal_dir: &str,
    layout: &JunctionLayout,
) -> Option<String> {
    if phase.is_negotiating() {
        return Some(SIGNAL_CAUTION.to_string().repeat(layout.signal_length));
    }
    if !phase.is_decided() {
        return None;
    }

    let winner = Approach::parse(proposal_dir)?;
    let positions = layout.positions(winner);
    if positions.is_empty() {
        return None;
    }

    let mut state: Vec<char> = vec![SIGNAL_STOP; layout.signal_length];
    for &idx in positions {
        if let Some(slot) = state.get_mut(idx) {
            *slot = SIGNAL_GO;
        }
    }
    Some(state.into_iter().collect())
}

/// Issues planned signal commands into the simulation session.
///
/// The controlled junction id is discovered once, on the first
/// command, and cached. Every failure on this path is logged and
/// skipped for the tick -- actuation is never allowed to take the
/// relay down.
#[derive(Debug, Clone)]
pub struct Actuator {
    layout: JunctionLayout,
    tls_id: Option<String>,
}

impl Actuator {
    /// Create an actuator for the given junction layout.
    pub const fn new(layout: JunctionLayout) -> Self {
        Self {
            layout,
            tls_id: None,
        }
    }

    /// The junction id commands are issued to, once discovered.
    pub fn junction_id(&self) -> Option<&str> {
        self.tls_id.as_deref()
    }

    /// Apply the actuation policy for the given protocol state.
    ///
    /// Returns `true` when a command was issued. Rejections and
    /// missing junctions are logged at `warn!` and skipped; the caller
    /// never sees an error from this path. Fatal transport errors are
    /// also only logged here -- the broadcaster's own next session
    /// call surfaces the loss.
    pub fn apply<S: ControlSession>(
        &mut self,
        session: &mut S,
        phase: ConsensusPhase,
        proposal_dir: &str,
    ) -> bool {
        let Some(state) = plan_signal(phase, proposal_dir, &self.layout) else {
            return false;
        };

        let tls_id = match self.resolve_junction(session) {
            Some(id) => id,
            None => return false,
        };

        match session.set_signal_state(&tls_id, &state) {
            Ok(()) => {
                debug!(tls_id = %tls_id, state = %state, ?phase, "Signal command issued");
                true
            }
            Err(e) => {
                warn!(tls_id = %tls_id, error = %e, "Signal command failed, skipping tick");
                false
            }
        }
    }

    fn resolve_junction<S: ControlSession>(&mut self, session: &mut S) -> Option<String> {
        if let Some(ref id) = self.tls_id {
            return Some(id.clone());
        }
        match session.traffic_light_ids() {
            Ok(ids) => match ids.into_iter().next() {
                Some(id) => {
                    debug!(tls_id = %id, "Discovered controlled junction");
                    self.tls_id = Some(id.clone());
                    Some(id)
                }
                None => {
                    warn!("No controlled junction in the network, skipping actuation");
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, "Junction lookup failed, skipping actuation");
                None
            }
        }
    }
}
