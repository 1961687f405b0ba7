//! Core relay logic for the Crossroad telemetry bridge.
//!
//! This crate owns everything between the wire surfaces: the merge
//! rules for incoming consensus telemetry, the signal actuation
//! policy, the session and discovery seams, and the broadcaster loop
//! that drives simulation time for the relay's subscribers.
//!
//! # Modules
//!
//! - [`config`] -- Relay configuration from `crossroad-config.yaml`
//!   into strongly-typed structs, including the junction layout table.
//! - [`aggregator`] -- The canonical consensus view and its merge
//!   contract (link union-by-key, empty-means-absent).
//! - [`actuator`] -- Phase/direction to signal-string policy and its
//!   application through a control session.
//! - [`session`] -- The [`ControlSession`] trait the simulation is
//!   driven through, plus a scriptable stub for tests.
//! - [`discovery`] -- Pluggable engine discovery and the attach-retry
//!   loop.
//! - [`runner`] -- The stepping/broadcast loop and its rate gate.
//!
//! [`ControlSession`]: session::ControlSession

pub mod actuator;
pub mod aggregator;
pub mod config;
pub mod discovery;
pub mod runner;
pub mod session;
