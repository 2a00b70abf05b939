//! Ferry integration test harness.
//!
//! Each test spawns the ingest API in-process on an ephemeral port with a
//! throwaway SQLite database and talks to it over real HTTP. No broker is
//! needed; edge-side tests feed the message buffer directly.
//!
//!   cargo test --test integration

mod ingest;
mod pipeline;

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use ferry_api::ApiState;
use ferry_core::config::PoolSettings;
use ferry_services::{BatchInserter, ConnectionPool, WorkerPool};

// ── Harness ───────────────────────────────────────────────────────────────────

pub const BATCH_SIZE: usize = 10;

pub struct IngestServer {
    pub addr: SocketAddr,
    pub pool: ConnectionPool,
    pub workers: WorkerPool,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<Result<()>>>,
    _dir: tempfile::TempDir,
}

impl IngestServer {
    pub async fn spawn() -> Result<Self> {
        Self::spawn_with(4, 256).await
    }

    pub async fn spawn_with(workers: usize, queue_capacity: usize) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        Self::spawn_on(listener, workers, queue_capacity).await
    }

    pub async fn spawn_on(
        listener: tokio::net::TcpListener,
        workers: usize,
        queue_capacity: usize,
    ) -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let pool = ConnectionPool::open(&dir.path().join("ingest.db"), &PoolSettings::default())?;
        pool.ping()?;

        let workers = WorkerPool::new(workers, queue_capacity);
        let state = ApiState::new(BatchInserter::new(pool.clone(), BATCH_SIZE), workers.clone());

        let addr = listener.local_addr()?;
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(ferry_api::serve_on(listener, state, async {
            stopped.await.ok();
        }));

        Ok(Self {
            addr,
            pool,
            workers,
            stop: Some(stop),
            task: Some(task),
            _dir: dir,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn rows(&self) -> Result<u64> {
        Ok(self.pool.message_count()?)
    }

    /// Poll the table until it holds `expected` rows.
    pub async fn wait_for_rows(&self, expected: u64, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let rows = self.rows()?;
            if rows == expected {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                bail!("expected {expected} rows, found {rows} after {timeout:?}");
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    /// Stop the HTTP server, then drain the worker pool.
    pub async fn stop(mut self) -> Result<()> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            task.await.context("server task panicked")??;
        }
        self.workers.shutdown().await;
        Ok(())
    }
}

pub fn stored(pool: &ConnectionPool) -> Result<Vec<(String, String)>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare("SELECT topic, payload FROM iot_messages ORDER BY id")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

/// The harness itself: server comes up, database answers, shutdown is clean.
#[tokio::test]
async fn test_server_starts_and_stops() {
    let server = IngestServer::spawn().await.unwrap();
    assert_eq!(server.rows().unwrap(), 0);

    let resp = reqwest::get(server.url("/")).await.unwrap();
    assert!(resp.status().is_success());

    server.stop().await.unwrap();
}
