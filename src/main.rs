mod api;
mod channel;
mod config;
mod health;
mod reading;
mod store;

use anyhow::Result;
use std::sync::Arc;
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::{
    api::AppState,
    channel::{pull::HttpQueryClient, push::MqttPushTransport, UpdateChannel},
    config::Config,
    health::StalenessMonitor,
    store::{ReadingStore, UpsertOutcome},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env (ignore error if file absent — env vars may be set externally)
    let _ = dotenvy::dotenv();

    // Initialise tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    // Load config
    let config = Config::from_env()?;
    if config.device_ids.is_empty() {
        warn!("DEVICE_IDS is empty; only push-discovered devices will be monitored");
    }

    // Shared in-memory store of latest readings + history per device
    let store = ReadingStore::new(config.history_capacity);

    // Update channel: MQTT push merged with query-API polling
    let query = HttpQueryClient::new(&config)?;
    let push = MqttPushTransport::connect(&config).await?;
    let mut channel = UpdateChannel::new(
        Arc::new(query),
        Box::new(push),
        config.device_ids.clone(),
        config.poll_interval,
    );

    let monitor = StalenessMonitor::new(
        store.clone(),
        channel.transport_status(),
        config.freshness_window,
        config.health_tick,
        config.device_ids.clone(),
    );

    // Every normalized reading flows through the store's supersede rule; an
    // acceptance triggers an immediate health recomputation.
    {
        let store = store.clone();
        let monitor = monitor.clone();
        channel.on_reading(move |reading| match store.upsert(reading.clone()) {
            Ok(UpsertOutcome::Accepted) => monitor.reading_accepted(&reading.device_id),
            Ok(UpsertOutcome::Outdated) => {
                tracing::debug!(
                    device_id = %reading.device_id,
                    "discarded reading not newer than stored value"
                );
            }
            Err(e) => warn!(device_id = %reading.device_id, error = %e, "rejected reading"),
        });
    }
    channel.on_error(|e| warn!(error = %e, "pull source error"));
    monitor.on_tick(|device_id, health| {
        tracing::trace!(device_id = %device_id, health = ?health, "health recomputed");
    });

    channel.start();
    info!(
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        devices = config.device_ids.len(),
        "update channel started"
    );

    tokio::spawn(monitor.clone().run());

    // Start HTTP server
    let state = AppState { store, monitor };
    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    channel.stop().await;
    info!("update channel stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
