//! Observer API server for the Crossroad relay.
//!
//! This crate provides an Axum HTTP server that exposes:
//!
//! - **`WebSocket` endpoint** (`/ws/stream`) for real-time snapshot
//!   streaming via [`tokio::sync::broadcast`]
//! - **REST endpoint** (`/api/snapshot`) serving the latest merged
//!   snapshot for one-shot polling
//! - **Minimal HTML status page** (`GET /`) showing the current step,
//!   vehicle count, and consensus phase
//!
//! # Architecture
//!
//! The relay loop publishes [`Arc`](std::sync::Arc)-wrapped snapshots
//! into [`AppState`]; every connected `WebSocket` client receives the
//! same stream through a broadcast channel with automatic lag
//! handling. When the relay session ends, clients receive a single
//! `session_end` frame and a close frame.

pub mod error;
pub mod handlers;
pub mod router;
pub mod server;
pub mod startup;
pub mod state;
pub mod ws;

// Re-export primary types for convenience.
pub use router::build_router;
pub use server::{start_server, ServerConfig, ServerError};
pub use startup::spawn_observer;
pub use state::{AppState, StreamEvent};
