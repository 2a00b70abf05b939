//! Connection pool for the message store.
//!
//! r2d2 over SQLite in WAL mode. Writers are serialized by SQLite itself;
//! the busy timeout makes concurrent chunk transactions wait their turn
//! instead of failing with SQLITE_BUSY.

use std::path::Path;
use std::time::Duration;

use ferry_core::config::PoolSettings;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS iot_messages (
        id      INTEGER PRIMARY KEY AUTOINCREMENT,
        topic   TEXT NOT NULL,
        payload TEXT NOT NULL
    );
";

// Idle connections above the floor are closed after this long.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Bounded, shareable set of store connections. Clones share the pool.
#[derive(Clone)]
pub struct ConnectionPool {
    pool: Pool<SqliteConnectionManager>,
}

impl ConnectionPool {
    /// Open (or create) the database at `path` and make sure the messages
    /// table exists.
    pub fn open(path: &Path, settings: &PoolSettings) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA busy_timeout = 5000;
                ",
            )?;
            Ok(())
        });

        let pool = Pool::builder()
            .max_size(settings.max_open)
            .min_idle(Some(settings.max_idle))
            .max_lifetime(Some(settings.max_lifetime()))
            .idle_timeout(Some(IDLE_TIMEOUT))
            .connection_timeout(settings.connection_timeout())
            .build(manager)?;

        pool.get()?.execute_batch(SCHEMA)?;

        tracing::info!(
            path = %path.display(),
            max_open = settings.max_open,
            max_idle = settings.max_idle,
            max_lifetime_secs = settings.max_lifetime_secs,
            "database pool ready"
        );

        Ok(Self { pool })
    }

    /// Borrow a connection; it returns to the pool on drop. Blocks until
    /// one is free or the acquisition timeout passes.
    pub fn get(&self) -> Result<PooledConnection<SqliteConnectionManager>, StoreError> {
        Ok(self.pool.get()?)
    }

    /// Round-trip a trivial query.
    pub fn ping(&self) -> Result<(), StoreError> {
        let conn = self.get()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        tracing::debug!("database ping ok");
        Ok(())
    }

    pub fn max_open(&self) -> u32 {
        self.pool.max_size()
    }

    /// Rows currently stored.
    pub fn message_count(&self) -> Result<u64, StoreError> {
        let conn = self.get()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM iot_messages", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}
