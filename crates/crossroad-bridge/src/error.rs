//! Error types for the relay binary.
//!
//! [`BridgeError`] is the top-level error type that wraps all possible
//! failure modes during bridge startup and relay execution.

/// Top-level error for the relay binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: crossroad_core::config::ConfigError,
    },

    /// A command-line argument was out of range.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the rejected argument.
        message: String,
    },

    /// Observer API server failed to start.
    #[error("observer error: {message}")]
    Observer {
        /// Description of the observer failure.
        message: String,
    },

    /// Telemetry ingest setup failed.
    #[error("ingest error: {message}")]
    Ingest {
        /// Description of the ingest failure.
        message: String,
    },

    /// The control session was lost or misbehaved fatally.
    #[error("session error: {source}")]
    Session {
        /// The underlying session error.
        #[from]
        source: crossroad_core::session::SessionError,
    },

    /// The relay loop failed.
    #[error("runner error: {source}")]
    Runner {
        /// The underlying runner error.
        #[from]
        source: crossroad_core::runner::RunnerError,
    },
}
