//! Marketplace service entry point.
//!
//! Wires the producer side of the pipeline by explicit construction:
//! connection pool, repositories, dispatch gateway with its circuit
//! breaker, outbox workers, and the HTTP API. Coordinates graceful
//! startup and shutdown.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use market_api::{AppState, Config};
use market_delivery::{
    storage::PostgresOutboxStorage, DispatchGateway, OutboxProcessor, OutboxWorker,
};
use ordercast_common::{CircuitBreaker, RealClock};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("starting marketplace service");

    let config = Config::load()?;
    info!(
        database_url = %config.database_url_masked(),
        host = %config.host,
        port = config.port,
        outbox_workers = config.outbox_worker_count,
        "configuration loaded"
    );

    let pool = create_database_pool(&config).await?;
    run_migrations(&pool).await?;
    info!("database ready");

    let clock = Arc::new(RealClock::new());
    let storage = Arc::new(market_core::Storage::new(pool.clone()));

    let circuit = Arc::new(CircuitBreaker::new(config.circuit_config()));
    let gateway = Arc::new(DispatchGateway::new(config.dispatch_config(), circuit)?);
    let outbox_storage = Arc::new(PostgresOutboxStorage::new(storage.clone()));
    let processor = Arc::new(OutboxProcessor::new(
        outbox_storage,
        gateway,
        config.processor_config(),
        clock.clone(),
    ));

    let cancellation_token = CancellationToken::new();
    let workers = OutboxWorker::spawn(
        config.outbox_worker_count,
        processor,
        config.poll_interval(),
        &cancellation_token,
        clock.clone(),
    );

    let state = AppState {
        storage,
        clock,
        outbox_max_retries: config.outbox_max_retries,
    };
    let addr = config.server_addr()?;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = market_api::start_server(state, addr).await {
            error!(error = %e, "server failed");
        }
    });

    info!(%addr, "marketplace service is ready");

    // The server resolves its own shutdown signal; workers follow it down.
    let _ = server_handle.await;
    cancellation_token.cancel();
    for worker in workers {
        let _ = worker.await;
    }

    pool.close().await;
    info!("marketplace shutdown complete");
    Ok(())
}

/// Initializes tracing with environment-based configuration.
fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,market=debug,tower_http=debug"))
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

/// Ensures the marketplace schema exists.
async fn run_migrations(pool: &sqlx::PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS orders (
            id UUID PRIMARY KEY,
            store_id TEXT NOT NULL,
            status TEXT NOT NULL,
            total_amount NUMERIC(10, 2) NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create orders table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS order_items (
            id UUID PRIMARY KEY,
            order_id UUID NOT NULL REFERENCES orders(id),
            product_name TEXT NOT NULL,
            quantity INTEGER NOT NULL,
            unit_price NUMERIC(10, 2) NOT NULL,
            discount NUMERIC(10, 2) NOT NULL DEFAULT 0,
            tax NUMERIC(10, 2) NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create order_items table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS outbox_events (
            id UUID PRIMARY KEY,
            aggregate_id UUID NOT NULL,
            aggregate_type TEXT NOT NULL,
            event_type TEXT NOT NULL,
            payload JSONB NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            retry_count INTEGER NOT NULL DEFAULT 0,
            max_retries INTEGER NOT NULL DEFAULT 3,
            next_retry_at TIMESTAMPTZ,
            last_attempt_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            processed_at TIMESTAMPTZ,
            last_error TEXT
        )
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create outbox_events table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS webhooks (
            id UUID PRIMARY KEY,
            store_ids TEXT[] NOT NULL,
            callback_url TEXT NOT NULL,
            token TEXT NOT NULL,
            active BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create webhooks table")?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_outbox_events_claimable
        ON outbox_events(status, next_retry_at)
        WHERE status IN ('pending', 'processing')
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create outbox_events index")?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_order_items_order
        ON order_items(order_id)
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create order_items index")?;

    Ok(())
}
