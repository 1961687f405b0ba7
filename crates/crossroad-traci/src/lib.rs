//! Minimal TraCI client for the Crossroad bridge.
//!
//! TraCI is the TCP control protocol of the SUMO traffic simulator:
//! length-prefixed binary messages, each carrying one or more
//! commands. This crate implements just the slice the relay needs --
//! the version handshake, the `SetOrder` secondary-client
//! declaration, simulation stepping, vehicle and traffic-light
//! variable retrieval, the signal-state command, and the
//! outstanding-activity query -- and exposes it through the
//! [`ControlSession`] trait from `crossroad-core`.
//!
//! # Modules
//!
//! - [`protocol`] -- Wire constants, the payload encoder/decoder, and
//!   message framing.
//! - [`client`] -- The blocking TCP client implementing
//!   [`ControlSession`].
//!
//! [`ControlSession`]: crossroad_core::session::ControlSession

pub mod client;
pub mod protocol;

pub use client::TraciClient;
