//! The control-session seam between the relay and the simulation.
//!
//! [`ControlSession`] abstracts the narrow slice of the simulation's
//! control surface the relay needs: stepping, vehicle and signal
//! queries, signal commands, and the outstanding-activity check. The
//! production implementation is the TraCI client; tests use
//! [`StubControlSession`].
//!
//! The trait is synchronous by design. Session calls are short
//! request/response exchanges, driven from the async relay loop
//! between its suspension points -- the same shape the rest of the
//! loop already has.

use std::collections::VecDeque;

use crossroad_types::VehicleState;

/// Errors raised by a control session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The underlying transport failed. The session is unusable and
    /// the relay must shut down.
    #[error("session transport error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// The peer answered with something this client cannot decode.
    /// The session is considered unusable.
    #[error("protocol error: {message}")]
    Protocol {
        /// Description of the framing/decoding failure.
        message: String,
    },

    /// The simulation rejected a command (for example an unknown
    /// signal id). The session remains usable.
    #[error("command rejected: {message}")]
    Rejected {
        /// The status description returned by the simulation.
        message: String,
    },

    /// The session has been closed.
    #[error("session closed")]
    Closed,
}

impl SessionError {
    /// Whether this error means the session handle is lost for good.
    ///
    /// Rejected commands are per-tick failures the caller logs and
    /// skips; everything else tears the relay down.
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }
}

/// A live, bidirectional control channel to a running simulation.
///
/// The relay holds exactly one session. The broadcaster drives
/// stepping and sampling; the actuator issues signal commands through
/// the same handle.
pub trait ControlSession {
    /// Advance the simulation by one step.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the session is unusable.
    fn step(&mut self) -> Result<(), SessionError>;

    /// Ids of all vehicles currently in the network.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the query fails.
    fn vehicle_ids(&mut self) -> Result<Vec<String>, SessionError>;

    /// Position and motion of one vehicle.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Rejected`] if the vehicle left the
    /// network between enumeration and this query.
    fn vehicle_state(&mut self, id: &str) -> Result<VehicleState, SessionError>;

    /// Ids of all controlled junctions.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the query fails.
    fn traffic_light_ids(&mut self) -> Result<Vec<String>, SessionError>;

    /// The raw signal-state string of a junction.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Rejected`] for unknown junction ids.
    fn signal_state(&mut self, tls_id: &str) -> Result<String, SessionError>;

    /// Set the raw signal-state string of a junction.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Rejected`] for unknown junction ids or
    /// malformed state strings.
    fn set_signal_state(&mut self, tls_id: &str, state: &str) -> Result<(), SessionError>;

    /// Number of vehicles still in or scheduled to enter the network.
    /// Zero means the simulation has no outstanding activity.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the query fails.
    fn min_expected_vehicles(&mut self) -> Result<u32, SessionError>;

    /// Close the session cleanly. Further calls fail with
    /// [`SessionError::Closed`].
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the close exchange fails; the
    /// handle is considered closed either way.
    fn close(&mut self) -> Result<(), SessionError>;
}

/// A scriptable in-memory session for tests.
///
/// `min_expected` is drained front-to-back on every
/// [`min_expected_vehicles`] call; when exhausted it reports zero, so
/// a script of `[3, 2, 1]` yields exactly three relay steps.
///
/// [`min_expected_vehicles`]: ControlSession::min_expected_vehicles
#[derive(Debug, Default)]
pub struct StubControlSession {
    /// Vehicles reported on every sample.
    pub vehicles: Vec<VehicleState>,
    /// Controlled junction ids.
    pub tls_ids: Vec<String>,
    /// Raw signal string reported for any junction.
    pub signal: String,
    /// Scripted outstanding-activity answers.
    pub min_expected: VecDeque<u32>,
    /// Number of `step` calls so far.
    pub steps: u64,
    /// Every `set_signal_state` call, in order.
    pub signal_commands: Vec<(String, String)>,
    /// When set, every signal command is rejected with this message.
    pub reject_signal_commands: Option<String>,
    closed: bool,
}

impl StubControlSession {
    /// A stub that runs for `steps` relay steps with the given
    /// vehicles and one junction `"J0"` showing all-red.
    pub fn running_for(steps: u32, vehicles: Vec<VehicleState>) -> Self {
        Self {
            vehicles,
            tls_ids: vec![String::from("J0")],
            signal: String::from("rrrrrrrrrrrr"),
            min_expected: (0..steps).map(|i| steps - i).collect(),
            ..Self::default()
        }
    }

    fn check_open(&self) -> Result<(), SessionError> {
        if self.closed {
            Err(SessionError::Closed)
        } else {
            Ok(())
        }
    }
}

impl ControlSession for StubControlSession {
    fn step(&mut self) -> Result<(), SessionError> {
        self.check_open()?;
        self.steps = self.steps.saturating_add(1);
        Ok(())
    }

    fn vehicle_ids(&mut self) -> Result<Vec<String>, SessionError> {
        self.check_open()?;
        Ok(self.vehicles.iter().map(|v| v.id.clone()).collect())
    }

    fn vehicle_state(&mut self, id: &str) -> Result<VehicleState, SessionError> {
        self.check_open()?;
        self.vehicles
            .iter()
            .find(|v| v.id == id)
            .cloned()
            .ok_or_else(|| SessionError::Rejected {
                message: format!("unknown vehicle {id}"),
            })
    }

    fn traffic_light_ids(&mut self) -> Result<Vec<String>, SessionError> {
        self.check_open()?;
        Ok(self.tls_ids.clone())
    }

    fn signal_state(&mut self, tls_id: &str) -> Result<String, SessionError> {
        self.check_open()?;
        if self.tls_ids.iter().any(|t| t == tls_id) {
            Ok(self.signal.clone())
        } else {
            Err(SessionError::Rejected {
                message: format!("unknown traffic light {tls_id}"),
            })
        }
    }

    fn set_signal_state(&mut self, tls_id: &str, state: &str) -> Result<(), SessionError> {
        self.check_open()?;
        if let Some(ref message) = self.reject_signal_commands {
            return Err(SessionError::Rejected {
                message: message.clone(),
            });
        }
        self.signal = state.to_owned();
        self.signal_commands
            .push((tls_id.to_owned(), state.to_owned()));
        Ok(())
    }

    fn min_expected_vehicles(&mut self) -> Result<u32, SessionError> {
        self.check_open()?;
        Ok(self.min_expected.pop_front().unwrap_or(0))
    }

    fn close(&mut self) -> Result<(), SessionError> {
        self.closed = true;
        Ok(())
    }
}
