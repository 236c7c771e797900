//! TCP Stream Client Binary
//!
//! Connects one client to a TCP data source and logs everything it receives.
//!
//! # Usage
//!
//! ```bash
//! STREAM_CLIENT_HOST=127.0.0.1 STREAM_CLIENT_PORT=9000 cargo run --bin tcp-stream-client
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `STREAM_CLIENT_HOST`: Remote host
//! - `STREAM_CLIENT_PORT`: Remote port
//!
//! ## Optional
//! - `STREAM_CLIENT_NAME`: Registry name (default: default)
//! - `STREAM_CLIENT_AUTO_RECONNECT`: Reconnect after drops (default: true)
//! - `STREAM_CLIENT_RECONNECT_INTERVAL_MS`: Delay between attempts (default: 5000)
//! - `STREAM_CLIENT_BUFFER_SIZE`: Bytes per read (default: 4096)
//! - `STREAM_CLIENT_CONNECT_TIMEOUT_MS`: Connect bound (default: 5000)
//! - `STREAM_CLIENT_WORKER_MODE`: task | isolated (default: task)
//! - `STREAM_CLIENT_BACKOFF_MULTIPLIER`: Delay growth factor (default: 1.0)
//! - `STREAM_CLIENT_BACKOFF_MAX_MS`: Delay cap (default: 60000)
//! - `STREAM_CLIENT_MAX_RECONNECT_ATTEMPTS`: 0 = unlimited (default: 0)
//! - `STREAM_CLIENT_BACKOFF_JITTER`: Random delay spread, 0.0-1.0 (default: 0.0)
//! - `STREAM_CLIENT_HEALTH_PORT`: Health HTTP port, 0 disables (default: 8083)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: tcp-stream-client)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;

use anyhow::Context;
use tcp_stream_client::infrastructure::telemetry;
use tcp_stream_client::{
    AppConfig, ClientRegistry, HealthServer, HealthServerState, TracingObserver, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let _telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!("Starting TCP stream client");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed");
    }

    let config = AppConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();
    let registry = Arc::new(ClientRegistry::new());

    registry.create_client(config.name.clone(), config.client.clone())?;
    registry.attach_listener(&config.name, Arc::new(TracingObserver::new(config.name.clone())))?;
    registry.start_client(&config.name)?;

    let health_task = (config.health_port != 0).then(|| {
        let state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            Arc::clone(&registry),
        ));
        let server = HealthServer::new(config.health_port, state, shutdown_token.clone());
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        })
    });

    tracing::info!(client = %config.name, "Stream client ready");

    await_shutdown(&shutdown_token).await;

    registry.shutdown_all().await;
    if let Some(task) = health_task {
        let _ = task.await;
    }

    tracing::info!("TCP stream client stopped");
    Ok(())
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        for dir in cwd.ancestors().skip(1) {
            let env_path = dir.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &AppConfig) {
    let client = &config.client;
    tracing::info!(
        client = %config.name,
        address = %client.address(),
        auto_reconnect = client.auto_reconnect,
        reconnect_interval_ms = client.reconnect_interval.as_millis(),
        worker_mode = client.worker_mode.as_str(),
        health_port = config.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        buffer_size = client.buffer_size,
        connect_timeout_ms = client.connect_timeout.as_millis(),
        backoff_multiplier = client.backoff.multiplier,
        backoff_max_ms = client.backoff.max_delay.as_millis(),
        max_reconnect_attempts = client.backoff.max_attempts,
        backoff_jitter = client.backoff.jitter_factor,
        "Connection settings"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: &CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler installation failed");
                std::future::pending::<()>().await;
            }
        }
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
    tracing::info!("Graceful shutdown started");
}
