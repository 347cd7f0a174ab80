// Main entry point for the ingestion service

use anyhow::{Context, Result};
use battlewatch_core::server::{build_kernel, build_workers};
use battlewatch_core::Config;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,battlewatch_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting battle ingestion service");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!("Configuration loaded");

    // Connect to database
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .min_connections(config.pool_min)
        .max_connections(config.effective_pool_max())
        .acquire_timeout(std::time::Duration::from_secs(config.connection_timeout_sec))
        .idle_timeout(std::time::Duration::from_secs(config.idle_timeout_sec))
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connected");

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations complete");

    // Build kernel and start the periodic drivers
    let kernel = build_kernel(config, pool.clone()).context("Failed to build kernel")?;
    let scheduler = battlewatch_core::kernel::scheduled_tasks::start_scheduler(kernel.clone())
        .await
        .context("Failed to start scheduler")?;

    // Run job workers until shutdown
    build_workers(kernel).run_until_shutdown().await?;

    // Stop scheduling, then release the pool
    let mut scheduler = scheduler;
    if let Err(e) = scheduler.shutdown().await {
        tracing::warn!("Scheduler shutdown failed: {}", e);
    }
    pool.close().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
