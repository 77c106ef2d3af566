//! Market Stream Binary
//!
//! Subscribes the configured market data streams and serves their health.
//!
//! # Usage
//!
//! ```bash
//! MARKET_STREAM_SUBSCRIPTIONS=BTCUSDT:candle:1m,ETHUSDT:ticker cargo run --bin market-stream
//! ```
//!
//! # Environment Variables
//!
//! - `MARKET_STREAM_WS_URL`: Stream endpoint (default: wss://stream.binance.com:9443/ws)
//! - `MARKET_STREAM_SUBSCRIPTIONS`: Comma-separated `SYMBOL:kind[:interval]` keys
//! - `MARKET_STREAM_HEALTH_PORT`: Health check HTTP port (default: 8083)
//! - `MARKET_STREAM_HEARTBEAT_INTERVAL_SECS`: Staleness check interval (default: 30)
//! - `MARKET_STREAM_STALENESS_THRESHOLD_SECS`: Silence before reconnecting (default: 120)
//! - `MARKET_STREAM_RECONNECT_DELAY_BASE_MS`: First backoff delay (default: 1000)
//! - `MARKET_STREAM_RECONNECT_DELAY_MAX_SECS`: Backoff cap (default: 16)
//! - `MARKET_STREAM_MAX_RECONNECT_ATTEMPTS`: Retry budget, 0 = unlimited (default: 10)
//! - `MARKET_STREAM_RECONNECT_JITTER`: Backoff jitter fraction (default: 0.1)
//! - `MARKET_STREAM_MAX_CONCURRENT_RECONNECTS`: Reconnect limiter, 0 = off (default: 0)
//! - `MARKET_STREAM_CONNECT_TIMEOUT_SECS`: Connect timeout (default: 10)
//! - `MARKET_STREAM_CLOSE_TIMEOUT_SECS`: Close timeout (default: 5)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: market-stream)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;

use anyhow::Context;
use market_stream::infrastructure::telemetry;
use market_stream::{
    ConnectionState, HealthServer, HealthServerState, MarketEvent, MarketStreamConfig,
    MarketStreamManager, StateCallback, SubscriptionKey, SupervisorConfig, UpdateCallback,
    init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Market Stream");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics().context("failed to install Prometheus recorder")?;

    let config = MarketStreamConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();
    let manager = Arc::new(MarketStreamManager::with_websocket(SupervisorConfig::from(
        &config,
    )));

    for key in &config.subscriptions {
        manager
            .subscribe_key(key.clone(), log_updates(key), Some(log_states(key)))
            .await;
    }

    if config.subscriptions.is_empty() {
        tracing::warn!("No subscriptions configured, set MARKET_STREAM_SUBSCRIPTIONS");
    }

    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&manager),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    let health_handle = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    tracing::info!(subscriptions = manager.len(), "Market Stream ready");

    await_shutdown().await;

    shutdown_token.cancel();
    manager.close_all().await;
    if let Err(e) = health_handle.await {
        tracing::error!(error = %e, "Health server task failed");
    }

    tracing::info!("Market Stream stopped");
    Ok(())
}

/// Update callback that logs each event.
fn log_updates(key: &SubscriptionKey) -> UpdateCallback {
    let key = key.to_string();
    Arc::new(move |event| match event {
        MarketEvent::Candle(candle) => tracing::debug!(
            key = %key,
            open_time = %candle.open_time,
            close = %candle.close,
            volume = %candle.volume,
            closed = candle.is_closed,
            "Candle"
        ),
        MarketEvent::Ticker(ticker) => tracing::debug!(
            key = %key,
            last_price = %ticker.last_price,
            change_pct = %ticker.change_pct,
            "Ticker"
        ),
    })
}

/// State callback that logs each transition.
fn log_states(key: &SubscriptionKey) -> StateCallback {
    let key = key.to_string();
    Arc::new(move |state| match state {
        ConnectionState::Failed => tracing::error!(key = %key, "Subscription failed"),
        ConnectionState::Reconnecting => tracing::warn!(key = %key, "Subscription reconnecting"),
        other => tracing::info!(key = %key, state = %other, "Subscription state changed"),
    })
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

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

/// Log the parsed configuration.
fn log_config(config: &MarketStreamConfig) {
    tracing::info!(
        ws_url = %config.ws_url,
        subscriptions = config.subscriptions.len(),
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        heartbeat_interval_secs = config.stream.heartbeat_interval.as_secs(),
        staleness_threshold_secs = config.stream.staleness_threshold.as_secs(),
        max_reconnect_attempts = config.stream.max_reconnect_attempts,
        max_concurrent_reconnects = config.stream.max_concurrent_reconnects,
        "Stream settings"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown() {
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
}
