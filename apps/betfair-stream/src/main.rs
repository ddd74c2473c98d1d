//! Betfair Stream Binary
//!
//! Connects to the Exchange Stream API, authenticates, subscribes and keeps
//! the connection alive until shut down.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin betfair-stream
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `BETFAIR_APP_KEY`: Application key
//! - `BETFAIR_SESSION_TOKEN`: Session token from the REST login
//!
//! ## Optional
//! - `BETFAIR_ENV`: LIVE | INTEGRATION (default: LIVE)
//! - `BETFAIR_STREAM_HOST` / `BETFAIR_STREAM_PORT`: Endpoint override
//! - `BETFAIR_STREAM_MARKET_IDS`: Comma separated market ids
//! - `BETFAIR_STREAM_EVENT_TYPE_IDS`: Comma separated event type ids
//! - `BETFAIR_STREAM_SUBSCRIBE_ORDERS`: Subscribe to the order stream (default: false)
//! - `BETFAIR_STREAM_METRICS_PORT`: Prometheus metrics port, 0 disables (default: 9090)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: false)
//! - `RUST_LOG`: Log filter (default: betfair_stream=info)

use std::sync::Arc;
use std::time::Duration;

use betfair_stream::infrastructure::telemetry;
use betfair_stream::{
    ChannelListener, StreamConfig, StreamSession, Supervisor, TelemetryConfig, TlsStreamConnector,
    init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider already installed");
    }

    load_dotenv();

    let config = StreamConfig::from_env()?;

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init_with_config(
        TelemetryConfig::from_env().with_session(config.environment, &config.session),
    );

    tracing::info!("Starting Betfair Stream");
    log_config(&config);

    if config.server.metrics_port != 0 {
        if let Err(e) = init_metrics(config.server.metrics_port) {
            tracing::warn!(error = %e, "Failed to start metrics exporter");
        }
    }

    let shutdown_token = CancellationToken::new();

    let connector = Arc::new(TlsStreamConnector::new()?);
    let (listener, events) = ChannelListener::new();
    let session = Arc::new(StreamSession::new(
        &config.credentials,
        &config.session,
        connector,
        Arc::new(listener),
    ));

    let supervisor = Supervisor::new(
        Arc::clone(&session),
        events,
        &config.supervisor,
        config.subscription.clone(),
        shutdown_token.clone(),
    );
    let mut supervisor_handle = tokio::spawn(supervisor.run());

    tokio::select! {
        () = await_shutdown(shutdown_token.clone()) => {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut supervisor_handle).await {
                Ok(Ok(Err(e))) => tracing::error!(error = %e, "Stream supervisor failed"),
                Ok(Err(e)) => tracing::error!(error = %e, "Stream supervisor panicked"),
                Ok(Ok(Ok(()))) => {}
                Err(_) => {
                    tracing::warn!("Stream supervisor did not stop in time");
                    session.stop();
                }
            }
        }
        joined = &mut supervisor_handle => {
            shutdown_token.cancel();
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "Stream supervisor gave up");
                    return Err(e.into());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    tracing::info!("Betfair Stream stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Log the parsed configuration.
fn log_config(config: &StreamConfig) {
    tracing::info!(
        environment = config.environment.as_str(),
        endpoint = %config.session.endpoint(),
        unique_id = config.session.unique_id,
        description = %config.session.description,
        metrics_port = config.server.metrics_port,
        "Configuration loaded"
    );
    tracing::debug!(
        market_ids = ?config.subscription.market_ids,
        event_type_ids = ?config.subscription.event_type_ids,
        subscribe_orders = config.subscription.subscribe_orders,
        heartbeat_interval_secs = config.supervisor.heartbeat_interval.as_secs(),
        "Subscriptions"
    );
}

/// Load .env file from any ancestor directory.
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

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
