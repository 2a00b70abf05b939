//! Worker pool — fixed number of workers over a bounded job queue.
//!
//! Jobs are blocking closures (database transactions) and run on tokio's
//! blocking thread pool; the worker count caps how many run at once. A job
//! holds its queue slot until it finishes, so `capacity` bounds queued plus
//! running work. `shutdown` closes the queue and waits for all of it.

use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::task::JoinHandle;

pub type BoxedJob = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("worker queue is full")]
    QueueFull,
    #[error("worker pool is shut down")]
    Closed,
}

struct Job {
    work: BoxedJob,
    slot: OwnedSemaphorePermit,
}

#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<Inner>,
}

struct Inner {
    tx: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    slots: Arc<Semaphore>,
    capacity: usize,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `workers` workers. Must be called from within a tokio runtime.
    pub fn new(workers: usize, capacity: usize) -> Self {
        let workers = workers.max(1);
        let capacity = capacity.max(1);

        let (tx, rx) = mpsc::unbounded_channel::<Job>();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let handles = (0..workers)
            .map(|id| tokio::spawn(worker_loop(id, rx.clone())))
            .collect();

        tracing::info!(workers, capacity, "worker pool started");

        Self {
            inner: Arc::new(Inner {
                tx: Mutex::new(Some(tx)),
                slots: Arc::new(Semaphore::new(capacity)),
                capacity,
                workers: Mutex::new(handles),
            }),
        }
    }

    pub fn submit<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit_all(vec![Box::new(job)])
    }

    /// Enqueue every job or none of them.
    pub fn submit_all(&self, jobs: Vec<BoxedJob>) -> Result<(), PoolError> {
        let guard = self.inner.tx.lock().unwrap_or_else(|e| e.into_inner());
        let tx = guard.as_ref().ok_or(PoolError::Closed)?;

        // Reserve first; permits taken so far are released if we bail.
        let mut slots = Vec::with_capacity(jobs.len());
        for _ in 0..jobs.len() {
            match self.inner.slots.clone().try_acquire_owned() {
                Ok(slot) => slots.push(slot),
                Err(TryAcquireError::NoPermits) => return Err(PoolError::QueueFull),
                Err(TryAcquireError::Closed) => return Err(PoolError::Closed),
            }
        }

        for (work, slot) in jobs.into_iter().zip(slots) {
            tx.send(Job { work, slot }).map_err(|_| PoolError::Closed)?;
        }
        Ok(())
    }

    /// Jobs queued or running.
    pub fn in_flight(&self) -> usize {
        self.inner.capacity - self.inner.slots.available_permits()
    }

    /// Jobs that may be queued or running at once.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Stop accepting jobs and wait for everything already accepted.
    pub async fn shutdown(&self) {
        let tx = self
            .inner
            .tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        drop(tx);

        let handles = std::mem::take(
            &mut *self
                .inner
                .workers
                .lock()
                .unwrap_or_else(|e| e.into_inner()),
        );
        let pending = self.in_flight();
        if pending > 0 {
            tracing::info!(pending, "draining worker pool");
        }
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "worker task failed");
            }
        }
        tracing::info!("worker pool stopped");
    }
}

async fn worker_loop(id: usize, rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Job>>>) {
    loop {
        let job = rx.lock().await.recv().await;
        let Some(Job { work, slot }) = job else {
            break;
        };
        if let Err(e) = tokio::task::spawn_blocking(work).await {
            tracing::error!(worker = id, error = %e, "job panicked");
        }
        drop(slot);
    }
    tracing::debug!(worker = id, "worker exiting");
}
