//! Relay binary for the Crossroad bridge.
//!
//! This is the main entry point that wires together engine discovery,
//! the TraCI control session, UDP telemetry ingest, the snapshot
//! broadcaster, and the observer API server. It attaches to a running
//! traffic simulation as a secondary client and relays merged state to
//! `WebSocket` subscribers until the simulation runs out of activity.
//!
//! # Startup Sequence
//!
//! 1. Initialize structured logging (tracing)
//! 2. Parse the command line
//! 3. Load relay configuration from `crossroad-config.yaml`
//! 4. Start the observer API server
//! 5. Bind the telemetry ingest socket
//! 6. Discover the simulation engine and attach over TraCI
//! 7. Spawn the telemetry ingest task
//! 8. Run the relay loop
//! 9. Shut down in order: ingest, subscribers, control session

mod error;
mod ingest;
mod publisher;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use crossroad_core::actuator::Actuator;
use crossroad_core::aggregator::ConsensusAggregator;
use crossroad_core::config::RelayConfig;
use crossroad_core::discovery::{self, ProcScanDiscovery};
use crossroad_core::runner::{self, RelayTiming};
use crossroad_core::session::ControlSession;
use crossroad_observer::AppState;
use crossroad_traci::TraciClient;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::BridgeError;
use crate::publisher::ObserverPublisher;

/// Relay settings file consulted when `--relay-config` is not given.
const DEFAULT_RELAY_CONFIG: &str = "crossroad-config.yaml";

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(
    name = "crossroad-bridge",
    about = "Telemetry relay and control bridge for a live traffic simulation",
    version
)]
struct Cli {
    /// Scenario configuration file the simulation engine was launched
    /// with; used to pick the right engine when several are running.
    #[arg(long)]
    config: PathBuf,

    /// Observer HTTP/WebSocket port.
    #[arg(long, default_value_t = 8765)]
    port: u16,

    /// Attach to the GUI engine binary instead of the headless one.
    #[arg(long)]
    gui: bool,

    /// Simulation step length in seconds.
    #[arg(long, default_value_t = 0.1)]
    step_length: f64,

    /// Optional YAML file with relay settings (telemetry port,
    /// broadcast interval, junction layout).
    #[arg(long)]
    relay_config: Option<PathBuf>,
}

/// Application entry point for the relay.
///
/// Initializes all subsystems and runs the relay loop. Returns an
/// error code on failure.
///
/// # Errors
///
/// Returns an error if any initialization step or the relay itself
/// fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("crossroad-bridge starting");

    // 2. Parse the command line.
    let cli = Cli::parse();
    let step_length =
        Duration::try_from_secs_f64(cli.step_length).map_err(|e| BridgeError::InvalidArgument {
            message: format!("--step-length {}: {e}", cli.step_length),
        })?;

    // 3. Load relay configuration.
    let config = load_relay_config(cli.relay_config.as_deref())?;
    info!(
        telemetry_port = config.telemetry.port,
        broadcast_interval_ms = config.broadcast.interval_ms,
        discovery_poll_ms = config.discovery.poll_ms,
        signal_length = config.junction.signal_length,
        "Relay configuration loaded"
    );

    // 4. Start the observer API server.
    let app_state = Arc::new(AppState::new());
    let _observer_handle = crossroad_observer::spawn_observer(cli.port, Arc::clone(&app_state))
        .await
        .map_err(|e| BridgeError::Observer {
            message: format!("{e}"),
        })?;
    info!(port = cli.port, "Observer API server started");

    // 5. Bind the telemetry socket eagerly so a port conflict fails
    //    startup instead of the background task.
    let telemetry_socket = ingest::bind_telemetry_socket(config.telemetry.port)
        .await
        .map_err(|e| BridgeError::Ingest {
            message: format!("bind failed on 127.0.0.1:{}: {e}", config.telemetry.port),
        })?;

    // 6. Discover the simulation engine and attach over TraCI.
    let engine_name = if cli.gui { "sumo-gui" } else { "sumo" };
    let scenario = cli.config.display().to_string();
    let mut backend =
        ProcScanDiscovery::new(vec![engine_name.to_owned()]).with_scenario(scenario.as_str());
    let poll_interval = Duration::from_millis(config.discovery.poll_ms);

    info!(engine = engine_name, scenario = %scenario, "Discovering simulation engine");
    let session = discovery::attach(&mut backend, poll_interval, |candidate| {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), candidate.port);
        TraciClient::connect(addr)
    })
    .await;

    let session = Arc::new(Mutex::new(session));
    let consensus = Arc::new(RwLock::new(ConsensusAggregator::new()));

    // 7. Spawn the telemetry ingest task.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let actuator = Actuator::new(config.junction.clone());
    let ingest_handle = tokio::spawn(ingest::run_ingest(
        telemetry_socket,
        Arc::clone(&consensus),
        Arc::clone(&session),
        actuator,
        shutdown_rx,
    ));
    info!(port = config.telemetry.port, "Telemetry ingest started");

    // 8. Run the relay loop on this task.
    let timing = RelayTiming {
        step_length,
        broadcast_interval: Duration::from_millis(config.broadcast.interval_ms),
    };
    let mut sink = ObserverPublisher::new(Arc::clone(&app_state));
    let relay_result = runner::run_relay(&session, &consensus, &mut sink, timing, &config.junction)
        .await;

    // 9. Orderly shutdown: stop ingest, notify subscribers, close the
    //    control session.
    let _ = shutdown_tx.send(true);
    if let Err(e) = ingest_handle.await {
        warn!(error = %e, "Telemetry ingest task did not stop cleanly");
    }

    match relay_result {
        Ok(result) => {
            app_state.publish_ended(result.end_reason.as_str());
            close_session(&session).await;
            info!(
                steps = result.steps,
                snapshots_sent = result.snapshots_sent,
                reason = result.end_reason.as_str(),
                "Relay finished"
            );
            Ok(())
        }
        Err(e) => {
            app_state.publish_ended("session_lost");
            close_session(&session).await;
            Err(BridgeError::from(e).into())
        }
    }
}

/// Close the control session, logging rather than failing shutdown.
async fn close_session<S: ControlSession>(session: &Mutex<S>) {
    if let Err(e) = session.lock().await.close() {
        warn!(error = %e, "Control session close failed");
    }
}

/// Load relay settings from the explicit path, the default file if it
/// exists, or built-in defaults.
fn load_relay_config(path: Option<&Path>) -> Result<RelayConfig, BridgeError> {
    match path {
        Some(path) => {
            info!(path = %path.display(), "Loading relay configuration");
            Ok(RelayConfig::from_file(path)?)
        }
        None => {
            let default_path = Path::new(DEFAULT_RELAY_CONFIG);
            if default_path.exists() {
                info!(path = %default_path.display(), "Loading relay configuration from default path");
                Ok(RelayConfig::from_file(default_path)?)
            } else {
                info!("No relay configuration file found, using defaults");
                Ok(RelayConfig::default())
            }
        }
    }
}
