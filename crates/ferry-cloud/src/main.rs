//! ferry-cloud — HTTP ingestion service. Accepts message batches and writes
//! them to SQLite through a bounded worker pool.

use anyhow::{Context, Result};

use ferry_api::ApiState;
use ferry_core::config::IngestConfig;
use ferry_services::{BatchInserter, ConnectionPool, WorkerPool};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match IngestConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };
    let settings = &config.settings;
    tracing::info!(
        addr = %config.server_addr,
        db = %config.db_path.display(),
        batch_size = settings.batch_size,
        "ferry-cloud starting"
    );

    // ── Store ────────────────────────────────────────────────────────────────
    let pool = ConnectionPool::open(&config.db_path, &settings.pool)
        .with_context(|| format!("failed to open database {}", config.db_path.display()))?;
    pool.ping().context("database ping failed")?;

    let workers = WorkerPool::new(settings.effective_workers(), settings.queue_capacity);
    let inserter = BatchInserter::new(pool, settings.batch_size);
    let state = ApiState::new(inserter, workers.clone());

    // ── Serve until signalled ────────────────────────────────────────────────
    ferry_api::serve(state, &config.server_addr, async {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("shutdown signal received");
    })
    .await
    .with_context(|| format!("failed to serve on {}", config.server_addr))?;

    // Accepted batches are still being written.
    if tokio::time::timeout(settings.shutdown_timeout(), workers.shutdown())
        .await
        .is_err()
    {
        tracing::warn!(
            pending = workers.in_flight(),
            "worker pool did not drain before timeout"
        );
    }

    tracing::info!("ferry-cloud stopped");
    Ok(())
}
