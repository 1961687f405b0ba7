//! Observer server startup helper for embedding in the relay binary.
//!
//! Provides [`spawn_observer`] which launches the Observer HTTP +
//! `WebSocket` server on a background Tokio task. The bridge binary
//! calls this during startup so the Observer API runs concurrently
//! with the relay loop.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::server::{ServerConfig, ServerError};
use crate::state::AppState;

/// Errors that can occur when spawning the Observer server.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// The server failed to bind or start.
    #[error("server start error: {0}")]
    Server(#[from] ServerError),
}

/// Spawn the Observer HTTP server on a background Tokio task.
///
/// Binds to `0.0.0.0:{port}` and serves the REST API plus `WebSocket`
/// endpoint for real-time snapshot streaming. Returns a [`JoinHandle`]
/// so the caller can manage the server's lifecycle alongside the
/// relay loop.
///
/// The server runs until the Tokio runtime is shut down or the task
/// is aborted. The caller should hold the returned handle and abort
/// or await it during clean shutdown.
///
/// # Errors
///
/// Returns [`StartupError::Server`] if the bind address cannot be
/// constructed. A bind failure on the port itself surfaces inside the
/// background task and is logged there.
pub async fn spawn_observer(
    port: u16,
    state: Arc<AppState>,
) -> Result<JoinHandle<()>, StartupError> {
    let config = ServerConfig {
        host: String::from("0.0.0.0"),
        port,
    };

    // Catch obvious misconfigurations before spawning the task.
    let addr_str = format!("{}:{}", config.host, config.port);
    let _: std::net::SocketAddr = addr_str.parse().map_err(|e| {
        StartupError::Server(ServerError::Bind(format!("invalid address {addr_str}: {e}")))
    })?;

    let handle = tokio::spawn(async move {
        if let Err(e) = crate::server::start_server(&config, state).await {
            tracing::error!(error = %e, "Observer server exited with error");
        }
    });

    tracing::info!(port, "Observer server spawned on background task");

    Ok(handle)
}
