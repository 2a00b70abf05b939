//! Batch inserter — splits an accepted batch into fixed-size chunks and
//! writes each chunk in its own transaction.
//!
//! Chunks are independent: one failing rolls back only its own rows. There
//! is no ordering guarantee between chunks once they go through the worker
//! pool. A batch with more chunks than the pool has queue slots is packed
//! into one job per slot, each job writing its chunks in turn, so any batch
//! fits an idle pool.

use ferry_core::Message;
use rusqlite::params;

use crate::pool::{ConnectionPool, StoreError};
use crate::worker_pool::{BoxedJob, PoolError, WorkerPool};

pub const INSERT_SQL: &str = "INSERT INTO iot_messages (topic, payload) VALUES (?1, ?2)";

/// Consecutive chunks of at most `size` messages, in input order.
pub fn partition(batch: &[Message], size: usize) -> std::slice::Chunks<'_, Message> {
    batch.chunks(size.max(1))
}

/// Outcome of a sequential insert: chunk indexes that committed and that
/// rolled back, with the rows on each side.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InsertReport {
    pub committed: Vec<usize>,
    pub failed: Vec<usize>,
    pub committed_rows: usize,
    pub failed_rows: usize,
}

#[derive(Clone)]
pub struct BatchInserter {
    pool: ConnectionPool,
    batch_size: usize,
}

impl BatchInserter {
    pub fn new(pool: ConnectionPool, batch_size: usize) -> Self {
        Self {
            pool,
            batch_size: batch_size.max(1),
        }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Insert one chunk atomically. Blocking.
    pub fn insert_chunk(&self, chunk: &[Message]) -> Result<usize, StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(INSERT_SQL)?;
            for msg in chunk {
                stmt.execute(params![msg.topic, msg.payload])?;
            }
        }
        tx.commit()?;
        Ok(chunk.len())
    }

    /// Insert every chunk of `batch` on the calling thread. Blocking.
    pub fn insert(&self, batch: &[Message]) -> InsertReport {
        let mut report = InsertReport::default();
        for (index, chunk) in partition(batch, self.batch_size).enumerate() {
            self.run_chunk(index, chunk, &mut report);
        }
        report
    }

    /// Hand the chunks of `batch` to the worker pool. One job per chunk
    /// while they fit the queue; beyond that, chunks are packed so the job
    /// count equals the queue capacity. Either every job is queued or none
    /// is. Returns the number of chunks queued.
    pub fn dispatch(&self, batch: Vec<Message>, workers: &WorkerPool) -> Result<usize, PoolError> {
        if batch.is_empty() {
            return Ok(0);
        }

        let chunks: Vec<(usize, Vec<Message>)> = partition(&batch, self.batch_size)
            .map(<[Message]>::to_vec)
            .enumerate()
            .collect();
        let chunk_count = chunks.len();
        let per_job = chunk_count.div_ceil(workers.capacity());

        let mut jobs: Vec<BoxedJob> = Vec::new();
        let mut pending = chunks.into_iter().peekable();
        while pending.peek().is_some() {
            let group: Vec<(usize, Vec<Message>)> = pending.by_ref().take(per_job).collect();
            let inserter = self.clone();
            jobs.push(Box::new(move || {
                let mut report = InsertReport::default();
                for (index, chunk) in &group {
                    inserter.run_chunk(*index, chunk, &mut report);
                }
            }));
        }

        let job_count = jobs.len();
        workers.submit_all(jobs)?;
        tracing::debug!(
            messages = batch.len(),
            chunks = chunk_count,
            jobs = job_count,
            "batch queued"
        );
        Ok(chunk_count)
    }

    fn run_chunk(&self, index: usize, chunk: &[Message], report: &mut InsertReport) {
        match self.insert_chunk(chunk) {
            Ok(rows) => {
                tracing::info!(chunk = index, rows, "inserted batch");
                report.committed.push(index);
                report.committed_rows += rows;
            }
            Err(e) => {
                tracing::error!(chunk = index, rows = chunk.len(), error = %e, "batch insert failed, rolled back");
                report.failed.push(index);
                report.failed_rows += chunk.len();
            }
        }
    }
}
