//! Hiven Client Binary
//!
//! Connects to the Hiven swarm and logs inbound events until interrupted.
//!
//! # Usage
//!
//! ```bash
//! HIVEN_TOKEN=... cargo run --bin hiven-client
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `HIVEN_TOKEN`: User or bot access token
//!
//! ## Optional
//! - `HIVEN_API_URL`: REST base URL (default: <https://api.hiven.io/v1>)
//! - `WS_ENDPOINT`: Swarm URL (default: <wss://swarm.hiven.io/socket>)
//! - `HIVEN_QUEUE_EVENTS`: Run handlers one at a time (default: false)
//! - `HIVEN_LOG_WEBSOCKET`: Trace every frame (default: false)
//! - `HIVEN_METRICS_PORT`: Serve Prometheus metrics on this port
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: hiven-client)
//! - `RUST_LOG`: Log level (default: info)

use std::net::SocketAddr;
use std::sync::Arc;

use hiven_client::infrastructure::telemetry;
use hiven_client::{ClientConfig, ConnectionState, Envelope, HivenClient, init_metrics};
use tokio::signal;

/// Events logged by the binary.
const LOGGED_EVENTS: &[&str] = &[
    "INIT_STATE",
    "HOUSE_JOIN",
    "HOUSE_LEAVE",
    "MESSAGE_CREATE",
    "MESSAGE_DELETE",
    "USER_UPDATE",
    "TYPING_START",
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| "failed to install rustls crypto provider")?;

    load_dotenv();

    let _telemetry_guard = telemetry::init()?;

    tracing::info!("Starting Hiven client");

    if let Some(addr) = metrics_addr() {
        init_metrics(addr)?;
        tracing::info!(%addr, "Metrics endpoint listening");
    }

    let config = ClientConfig::from_env()?;
    let token = config.require_token()?.to_owned();
    log_config(&config);

    let client = HivenClient::new(&config)?;
    for event in LOGGED_EVENTS {
        client.on(event, log_event);
    }
    tokio::spawn(log_state_changes(client.clone()));

    let mut connection = tokio::spawn({
        let client = client.clone();
        async move { client.connect(&token, true).await }
    });

    tokio::select! {
        result = &mut connection => {
            result??;
        }
        result = signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
            client.close(false).await;
            connection.await??;
        }
    }

    tracing::info!("Hiven client stopped");
    Ok(())
}

async fn log_event(envelope: Arc<Envelope>) -> anyhow::Result<()> {
    tracing::info!(
        event = envelope.dispatch_key(),
        payload = %envelope.payload(),
        "Event received"
    );
    Ok(())
}

async fn log_state_changes(client: HivenClient) {
    let mut state = client.subscribe_state();
    while state.changed().await.is_ok() {
        let current = *state.borrow_and_update();
        match current {
            ConnectionState::Open => {
                let user = client.client_user();
                tracing::info!(
                    username = user.as_ref().map_or("unknown", |user| user.username()),
                    "Connected"
                );
            }
            other => tracing::debug!(state = %other, "Connection state changed"),
        }
    }
}

/// Parse `HIVEN_METRICS_PORT`, if set.
fn metrics_addr() -> Option<SocketAddr> {
    let port = std::env::var("HIVEN_METRICS_PORT").ok()?;
    match port.trim().parse::<u16>() {
        Ok(port) => Some(SocketAddr::from(([0, 0, 0, 0], port))),
        Err(e) => {
            tracing::warn!(%port, error = %e, "Ignoring invalid HIVEN_METRICS_PORT");
            None
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &ClientConfig) {
    tracing::info!(
        api = %config.api.base_url,
        swarm = %config.gateway.endpoint,
        dispatch_mode = ?config.gateway.dispatch_mode,
        "Configuration loaded"
    );
    tracing::debug!(
        delay_initial_ms = config.reconnect.delay_initial.as_millis(),
        delay_max_secs = config.reconnect.delay_max.as_secs(),
        max_attempts = config.reconnect.max_attempts,
        "Reconnect policy"
    );
}

fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Load a .env file from the nearest ancestor directory that has one.
fn load_dotenv_from_ancestors() {
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}
