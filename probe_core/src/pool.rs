//! Worker pool for running probes off the caller's task.
//!
//! This module provides a semaphore-based pool that bounds how many
//! probes run at the same time.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::error::{ProbeError, Result};

/// Bounded pool of tokio tasks.
///
/// Submitted work is spawned immediately but only starts once a permit is
/// free, so a saturated pool shows up as queueing delay rather than as a
/// blocked caller.
///
/// # Examples
///
/// ```no_run
/// use probe_core::pool::WorkerPool;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let pool = WorkerPool::new(4);
/// let handle = pool.submit(async { /* run a probe */ }, || {})?;
/// handle.await?;
/// #     Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct WorkerPool {
    /// Semaphore for limiting concurrent work.
    semaphore: Arc<Semaphore>,
    /// Maximum number of tasks running at once.
    pub max_workers: usize,
}

impl WorkerPool {
    /// Creates a new pool.
    ///
    /// # Arguments
    ///
    /// * `max_workers` - Maximum number of tasks running at once
    pub fn new(max_workers: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_workers)),
            max_workers,
        }
    }

    /// Submits work to the pool.
    ///
    /// Returns without waiting for a free worker. Work submitted after
    /// [`close`](Self::close) is rejected with [`ProbeError::PoolClosed`].
    /// Work still queued when the pool closes never runs; `on_rejected` is
    /// called in its place.
    pub fn submit<F, R>(&self, task: F, on_rejected: R) -> Result<JoinHandle<()>>
    where
        F: Future<Output = ()> + Send + 'static,
        R: FnOnce() + Send + 'static,
    {
        if self.semaphore.is_closed() {
            return Err(ProbeError::PoolClosed);
        }

        let semaphore = Arc::clone(&self.semaphore);
        Ok(tokio::spawn(async move {
            match semaphore.acquire_owned().await {
                Ok(_permit) => task.await,
                Err(_) => {
                    tracing::debug!("Worker pool closed before queued work could start");
                    on_rejected();
                }
            }
        }))
    }

    /// Returns the number of idle workers.
    pub fn available_workers(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Stops accepting work. Queued work that has not started is rejected.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }
}
