//! REST API endpoint handlers for the Observer server.
//!
//! All handlers read from the latest published snapshot via the shared
//! [`AppState`]. The relay loop is never blocked by HTTP traffic.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/` | Minimal HTML status page |
//! | `GET` | `/api/snapshot` | Latest merged snapshot |

use std::sync::Arc;

use axum::extract::State;
use axum::response::{Html, IntoResponse};
use axum::Json;

use crate::error::ObserverError;
use crate::state::AppState;

/// Serve a minimal HTML page showing server status and API links.
pub async fn index(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (step, vehicles, phase) = match state.latest().await {
        Some(snapshot) => (
            snapshot.step.to_string(),
            snapshot.traffic.vehicles.len().to_string(),
            format!("{:?}", snapshot.consensus.phase),
        ),
        None => (
            String::from("-"),
            String::from("-"),
            String::from("awaiting data"),
        ),
    };

    Html(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <title>Crossroad Observer</title>
    <style>
        body {{
            background: #0d1117;
            color: #c9d1d9;
            font-family: 'Cascadia Code', 'Fira Code', 'Consolas', monospace;
            padding: 2rem;
            max-width: 800px;
            margin: 0 auto;
        }}
        h1 {{ color: #58a6ff; }}
        a {{ color: #58a6ff; }}
        td {{ padding: 0.2rem 1rem 0.2rem 0; }}
    </style>
</head>
<body>
    <h1>Crossroad Observer</h1>
    <table>
        <tr><td>Step</td><td>{step}</td></tr>
        <tr><td>Vehicles</td><td>{vehicles}</td></tr>
        <tr><td>Consensus phase</td><td>{phase}</td></tr>
    </table>
    <p>
        <a href="/api/snapshot">/api/snapshot</a> &middot;
        ws: <code>/ws/stream</code>
    </p>
</body>
</html>"#
    ))
}

/// Return the latest merged snapshot as JSON.
///
/// Responds with `404 Not Found` until the relay has published at
/// least one snapshot.
pub async fn get_snapshot(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ObserverError> {
    match state.latest().await {
        Some(snapshot) => Ok(Json(snapshot.as_ref().clone())),
        None => Err(ObserverError::NotFound(String::from(
            "no snapshot published yet",
        ))),
    }
}
