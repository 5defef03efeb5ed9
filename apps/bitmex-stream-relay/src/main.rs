//! BitMEX Stream Relay Binary
//!
//! Starts the trade fan-out relay.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin bitmex-stream-relay
//! ```
//!
//! # Environment Variables
//!
//! - `BITMEX_ENV`: testnet | mainnet (default: testnet)
//! - `BITMEX_WS_URL`: Realtime WebSocket endpoint override
//! - `BITMEX_REST_URL`: REST base URL override
//! - `RELAY_API_PORT`: Subscription API port (default: 8080)
//! - `RELAY_HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `RELAY_*`: Heartbeat, reconnect and queue tuning
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use bitmex_stream_relay::application::ports::SubscriberRepository;
use bitmex_stream_relay::application::services::{
    FanoutRouter, SubscriptionService, SymbolRegistry,
};
use bitmex_stream_relay::domain::connection::ConnectionRegistry;
use bitmex_stream_relay::domain::subscription::SubscriptionIndex;
use bitmex_stream_relay::domain::symbols::SymbolSet;
use bitmex_stream_relay::infrastructure::api::{ApiServer, ApiState, BearerTokenIdentity};
use bitmex_stream_relay::infrastructure::bitmex::{
    FeedClient, FeedClientConfig, FeedHandle, FeedState, HttpCatalog,
};
use bitmex_stream_relay::infrastructure::health::{HealthServer, HealthServerState};
use bitmex_stream_relay::infrastructure::persistence::InMemorySubscriberRepository;
use bitmex_stream_relay::infrastructure::telemetry;
use bitmex_stream_relay::{RelayConfig, init_metrics};
use tokio::signal;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Upper bound on waiting for the feed's unsubscribe sequence at shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!("Starting BitMEX Stream Relay");

    let _metrics_handle = init_metrics().context("failed to install Prometheus recorder")?;

    let config = RelayConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Shared containers
    let symbols = Arc::new(SymbolSet::new());
    let index = Arc::new(SubscriptionIndex::new());
    let connections = Arc::new(ConnectionRegistry::new());
    let feed_state = Arc::new(FeedState::new());

    // Feed client and its control handle
    let (feed_handle, feed_commands) = FeedHandle::channel();
    let (trades_tx, trades_rx) = mpsc::channel(config.relay.feed_channel_capacity);
    let feed_client = FeedClient::new(
        FeedClientConfig::from_config(&config),
        Arc::clone(&symbols),
        trades_tx,
        Arc::clone(&feed_state),
        shutdown_token.clone(),
    );

    // Services
    let catalog = HttpCatalog::new(config.rest_url(), config.relay.catalog_timeout)
        .context("failed to build catalog client")?;
    let registry = Arc::new(SymbolRegistry::new(
        Arc::clone(&symbols),
        Arc::clone(&index),
        Arc::new(catalog),
        Arc::new(feed_handle),
    ));
    let repository: Arc<dyn SubscriberRepository> =
        Arc::new(InMemorySubscriberRepository::with_auto_provision());
    let subscriptions = Arc::new(SubscriptionService::new(
        Arc::clone(&registry),
        Arc::clone(&index),
        Arc::clone(&repository),
    ));
    let router = FanoutRouter::new(
        Arc::clone(&registry),
        Arc::clone(&index),
        Arc::clone(&connections),
    );

    // Connect upstream; startup fails if the first connection does.
    let (ready_tx, ready_rx) = oneshot::channel();
    let feed_task = tokio::spawn(feed_client.run(feed_commands, ready_tx));

    match tokio::time::timeout(config.relay.startup_timeout, ready_rx).await {
        Ok(Ok(())) => tracing::info!("Upstream feed ready"),
        Ok(Err(_)) => {
            let reason = match feed_task.await {
                Ok(Err(e)) => e.to_string(),
                Ok(Ok(())) => "feed stopped before connecting".to_string(),
                Err(e) => e.to_string(),
            };
            bail!("failed to connect to BitMEX feed: {reason}");
        }
        Err(_) => {
            shutdown_token.cancel();
            bail!(
                "BitMEX feed not ready within {}s",
                config.relay.startup_timeout.as_secs()
            );
        }
    }

    // Initial symbol discovery and subscription replay
    if let Err(e) = registry.refresh().await {
        tracing::warn!(error = %e, "Initial symbol refresh failed; symbols will be discovered on demand");
    }
    if let Err(e) = registry.replay_persisted(repository.as_ref()).await {
        tracing::error!(error = %e, "Failed to restore persisted subscriptions");
    }

    // Dispatcher
    let dispatcher_cancel = shutdown_token.clone();
    let dispatcher = tokio::spawn(async move { router.run(trades_rx, dispatcher_cancel).await });

    // Subscription API
    let api_state = Arc::new(ApiState::new(
        subscriptions,
        Arc::clone(&connections),
        Arc::new(BearerTokenIdentity),
        config.relay.subscriber_queue_capacity,
        shutdown_token.clone(),
    ));
    let api_server = ApiServer::new(config.server.api_port, api_state, shutdown_token.clone());
    tokio::spawn(async move {
        if let Err(e) = api_server.run().await {
            tracing::error!(error = %e, "Subscription API error");
        }
    });

    // Health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&feed_state),
        Arc::clone(&registry),
        Arc::clone(&index),
        Arc::clone(&connections),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    tracing::info!("Stream relay ready");

    await_shutdown(shutdown_token).await;

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, feed_task).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => tracing::error!(error = %e, "Feed client stopped with error"),
        Ok(Err(e)) => tracing::error!(error = %e, "Feed client task failed"),
        Err(_) => tracing::warn!("Feed client did not stop in time"),
    }
    if let Err(e) = dispatcher.await {
        tracing::error!(error = %e, "Dispatcher task failed");
    }

    tracing::info!("Stream relay stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Log the parsed configuration.
fn log_config(config: &RelayConfig) {
    tracing::info!(
        environment = config.environment.as_str(),
        api_port = config.server.api_port,
        health_port = config.server.health_port,
        control_batch_size = config.relay.control_batch_size,
        subscriber_queue_capacity = config.relay.subscriber_queue_capacity,
        "Configuration loaded"
    );
    tracing::debug!(
        ws_url = %config.ws_url(),
        rest_url = %config.rest_url(),
        "BitMEX endpoints"
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

/// Wait for shutdown signal (SIGTERM or SIGINT), then cancel.
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
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

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
