//! Receiver service entry point.
//!
//! Wires the consumer side of the pipeline: connection pool, events
//! repository, marketplace gateway with its circuit breaker, snapshot
//! workers, and the ingestion API.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use ordercast_common::{CircuitBreaker, RealClock};
use receiver_api::{AppState, Config};
use receiver_sync::{
    storage::PostgresEventStorage, MarketplaceGateway, SnapshotProcessor, SnapshotWorker,
};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("starting receiver service");

    let config = Config::load()?;
    info!(
        host = %config.host,
        port = config.port,
        marketplace_url = %config.marketplace_url,
        snapshot_workers = config.snapshot_worker_count,
        "configuration loaded"
    );

    let pool = create_database_pool(&config).await?;
    run_migrations(&pool).await?;
    info!("database ready");

    let clock = Arc::new(RealClock::new());
    let events = Arc::new(receiver_core::Repository::new(Arc::new(pool.clone())));

    let circuit = Arc::new(CircuitBreaker::new(config.circuit_config()));
    let gateway = Arc::new(MarketplaceGateway::new(config.gateway_config(), circuit)?);
    let event_storage = Arc::new(PostgresEventStorage::new(events.clone()));
    let processor = Arc::new(SnapshotProcessor::new(
        event_storage,
        gateway,
        config.processor_config(),
        clock.clone(),
    ));

    let cancellation_token = CancellationToken::new();
    let workers = SnapshotWorker::spawn(
        config.snapshot_worker_count,
        processor,
        config.poll_interval(),
        &cancellation_token,
        clock,
    );

    let state = AppState { events };
    let addr = config.server_addr()?;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = receiver_api::start_server(state, addr).await {
            error!(error = %e, "server failed");
        }
    });

    info!(%addr, "receiver service is ready");

    let _ = server_handle.await;
    cancellation_token.cancel();
    for worker in workers {
        let _ = worker.await;
    }

    pool.close().await;
    info!("receiver shutdown complete");
    Ok(())
}

/// Initializes tracing with environment-based configuration.
fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,receiver=debug,tower_http=debug"))
        .expect("invalid RUST_LOG environment variable");

    let fmt_layer = fmt::layer().with_target(true).with_file(true).with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Creates the database connection pool with retry logic.
async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    let mut retries = 0;
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);

    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => {
                sqlx::query("SELECT 1")
                    .fetch_one(&pool)
                    .await
                    .context("failed to verify database connection")?;
                return Ok(pool);
            },
            Err(_e) if retries < MAX_RETRIES => {
                retries += 1;
                info!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    "database connection failed, retrying"
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("failed to create database connection pool after retries");
            },
        }
    }
}

/// Ensures the receiver schema exists.
async fn run_migrations(pool: &sqlx::PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS events (
            id UUID PRIMARY KEY,
            idempotency_key TEXT NOT NULL UNIQUE,
            event_type TEXT NOT NULL,
            order_id TEXT NOT NULL,
            store_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'snapshot_pending',
            retry_count INTEGER NOT NULL DEFAULT 0,
            next_retry_at TIMESTAMPTZ,
            snapshot JSONB,
            received_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            processed_at TIMESTAMPTZ,
            last_error TEXT
        )
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create events table")?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_events_claimable
        ON events(status, next_retry_at)
        WHERE status = 'snapshot_pending'
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create events index")?;

    Ok(())
}
