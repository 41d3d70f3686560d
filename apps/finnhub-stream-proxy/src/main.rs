//! Finnhub Stream Proxy Binary
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin finnhub-stream-proxy
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `FINNHUB_API_KEY`: Finnhub API token
//!
//! ## Optional
//! - `FINNHUB_WS_URL`: upstream endpoint (default: `wss://ws.finnhub.io`)
//! - `STREAM_PROXY_WS_PORT`: downstream WebSocket port (default: 8000)
//! - `STREAM_PROXY_HEALTH_PORT`: health check HTTP port (default: 8082)
//! - `STREAM_PROXY_RECONNECT_*`, `STREAM_PROXY_HEARTBEAT_*`: link tuning
//! - `STREAM_PROXY_*_QUEUE_CAPACITY`: queue bounds
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`
//! - `RUST_LOG`: log filter (default: info)

use std::sync::Arc;

use anyhow::Context;
use finnhub_stream_proxy::infrastructure::finnhub::{HeartbeatConfig, ReconnectConfig};
use finnhub_stream_proxy::infrastructure::relay::publish_link_status;
use finnhub_stream_proxy::{
    ClientDirectory, FanoutRouter, FeedState, HealthServer, HealthServerState, ProxyConfig,
    RelayServer, RelayState, SubscriptionRegistry, SubscriptionService, UpstreamLink,
    UpstreamLinkConfig, WebSocketConnector, init_metrics, init_telemetry,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const LINK_EVENT_CAPACITY: usize = 64;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        anyhow::bail!("failed to install rustls crypto provider");
    }

    load_dotenv();

    let _telemetry_guard = init_telemetry();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Finnhub Stream Proxy");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed");
    }

    let config = ProxyConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown = CancellationToken::new();

    let registry = Arc::new(SubscriptionRegistry::new());
    let feed = Arc::new(FeedState::new());
    let directory = Arc::new(ClientDirectory::new(config.queues.client_capacity));

    let (event_tx, event_rx) = mpsc::channel(LINK_EVENT_CAPACITY);
    let connector = Arc::new(WebSocketConnector::new(
        &config.websocket.url,
        config.credentials.api_key(),
    ));
    let link = UpstreamLink::new(
        UpstreamLinkConfig {
            reconnect: ReconnectConfig::from_websocket_settings(&config.websocket),
            heartbeat: HeartbeatConfig::from_websocket_settings(&config.websocket),
            command_capacity: config.queues.command_capacity,
            inbound_capacity: config.queues.inbound_capacity,
        },
        connector,
        registry.clone(),
        feed.clone(),
        event_tx,
        shutdown.child_token(),
    );

    let subscriptions = SubscriptionService::new(registry.clone(), link.command_sender());
    let router = Arc::new(FanoutRouter::new(
        registry.clone(),
        directory.clone(),
        feed.clone(),
    ));

    tokio::spawn(publish_link_status(event_rx, feed.clone(), router.clone()));
    tokio::spawn(router.run(link.clone(), shutdown.child_token()));
    let link_task = link.start();

    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        feed.clone(),
        directory.clone(),
        registry,
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown.child_token(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    let relay_server = RelayServer::new(
        config.server.ws_port,
        Arc::new(RelayState {
            subscriptions,
            directory,
            feed,
            shutdown: shutdown.child_token(),
        }),
    );
    let relay_task = tokio::spawn(relay_server.run());

    tracing::info!("Stream proxy ready");

    tokio::select! {
        () = await_shutdown_signal() => {}
        result = relay_task => {
            match result {
                Ok(Err(e)) => tracing::error!(error = %e, "Relay server error"),
                Err(e) => tracing::error!(error = %e, "Relay server task failed"),
                Ok(Ok(())) => {}
            }
        }
    }

    shutdown.cancel();
    if let Some(task) = link_task
        && let Err(e) = task.await
    {
        tracing::warn!(error = %e, "Upstream link task failed");
    }

    tracing::info!("Stream proxy stopped");
    Ok(())
}

/// Load .env from the current directory or the nearest ancestor that has one.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let Ok(cwd) = std::env::current_dir() else {
        return;
    };
    if let Some(path) = cwd
        .ancestors()
        .skip(1)
        .map(|dir| dir.join(".env"))
        .find(|path| path.exists())
    {
        let _ = dotenvy::from_path(&path);
    }
}

fn log_config(config: &ProxyConfig) {
    tracing::info!(
        ws_port = config.server.ws_port,
        health_port = config.server.health_port,
        client_queue = config.queues.client_capacity,
        "Configuration loaded"
    );
    tracing::debug!(
        upstream = %config.websocket.url,
        heartbeat_secs = config.websocket.heartbeat_interval.as_secs(),
        reconnect_max_secs = config.websocket.reconnect_delay_max.as_secs(),
        "Upstream settings"
    );
}

/// Wait for SIGINT or SIGTERM.
#[allow(clippy::expect_used)]
async fn await_shutdown_signal() {
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
        () = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
