//! Stockline HTTP server.
//!
//! Wires the `PostgreSQL` record store, the `Redis` counter and lock service,
//! the inventory engine, and the periodic reconciliation sweep behind the
//! stock API.

mod config;

use anyhow::Context;
use config::Config;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use stockline_core::environment::SystemClock;
use stockline_postgres::{PostgresReconciliationLog, PostgresStockRecordStore};
use stockline_redis::{RedisDistributedLock, RedisStockCounter};
use stockline_runtime::metrics::PrometheusMetrics;
use stockline_runtime::{
    InventoryEngine, ReconciliationSweep, RetryPolicy, RetryingCounter, RetryingLock,
    StockBackends, StockHealthProbe,
};
use stockline_web::{AppState, router};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stockline=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Stockline server");

    let config = Config::from_env();
    info!(
        redis_url = %config.redis.url,
        lease_ms = config.stock.lease_ms,
        lock_wait_ms = config.stock.lock_wait_ms,
        "Configuration loaded"
    );

    let metrics = PrometheusMetrics::install().context("Failed to install metrics recorder")?;

    // Durable records and reconciliation markers
    info!("Connecting to record database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.postgres.max_connections)
        .acquire_timeout(Duration::from_secs(config.postgres.connect_timeout))
        .connect(&config.postgres.url)
        .await
        .context("Failed to connect to PostgreSQL")?;
    stockline_postgres::migrate(&pool)
        .await
        .context("Failed to run migrations")?;
    info!("Record database ready");

    // Counter and locks
    info!("Connecting to Redis...");
    let redis = stockline_redis::connect(&config.redis.url)
        .await
        .context("Failed to connect to Redis")?;
    info!("Redis connected");

    let retry = RetryPolicy::default();
    let backends = StockBackends::new(
        Arc::new(PostgresStockRecordStore::new(pool.clone())),
        Arc::new(RetryingLock::new(
            RedisDistributedLock::new(redis.clone()),
            retry.clone(),
        )),
        Arc::new(RetryingCounter::new(
            RedisStockCounter::new(redis, config.counter_ttl()),
            retry,
        )),
        Arc::new(PostgresReconciliationLog::new(pool.clone())),
    );

    let engine = Arc::new(InventoryEngine::new(
        backends.clone(),
        Arc::new(SystemClock),
        config.engine_config(),
    ));
    let health = Arc::new(StockHealthProbe::new(
        backends.clone(),
        config.stock.marker_backlog,
    ));

    // Reconciliation sweep
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let sweep = Arc::new(ReconciliationSweep::new(backends, config.sweep_config()));
    let sweep_handle = sweep.spawn_periodic(shutdown_rx);

    let app = router(AppState::new(engine, health).with_metrics(metrics));

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(%addr, "Server listening");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("HTTP server stopped, stopping reconciliation sweep...");
    let _ = shutdown_tx.send(());
    let grace = Duration::from_secs(config.server.shutdown_timeout);
    if tokio::time::timeout(grace, sweep_handle).await.is_err() {
        warn!(timeout = ?grace, "Reconciliation sweep did not stop in time");
    }

    pool.close().await;
    info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler.
///
/// Listens for SIGTERM and SIGINT (Ctrl+C). If a handler cannot be
/// installed, that signal is simply never observed.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
