// src/pipeline/pool.rs

//! Bounded worker pool for diff downloads.
//!
//! Each submitted task holds one semaphore permit for its whole run, so at
//! most `workers` tasks execute at once. `close` stops intake and waits until
//! every permit is back, which is the drain point of a crawl.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::error::{AppError, Result};

/// Bounded pool of concurrent execution slots.
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    workers: usize,
    closed: AtomicBool,
    submitted: AtomicUsize,
}

impl WorkerPool {
    /// Create a pool with `workers` slots, clamped to what a semaphore can hold.
    pub fn new(workers: usize) -> Self {
        let workers = workers.clamp(1, Semaphore::MAX_PERMITS.min(u32::MAX as usize));
        Self {
            permits: Arc::new(Semaphore::new(workers)),
            workers,
            closed: AtomicBool::new(false),
            submitted: AtomicUsize::new(0),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Total number of tasks accepted so far.
    pub fn submitted(&self) -> usize {
        self.submitted.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Schedule a task.
    ///
    /// Waits for a free slot before spawning, so a caller submitting many
    /// tasks is throttled to the pool size.
    pub async fn submit<F, T>(&self, task: F) -> Result<JoinHandle<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_closed() {
            return Err(AppError::PoolClosed);
        }
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| AppError::PoolClosed)?;
        self.submitted.fetch_add(1, Ordering::SeqCst);

        Ok(tokio::spawn(async move {
            let output = task.await;
            drop(permit);
            output
        }))
    }

    /// Stop accepting tasks and wait for the running ones to finish.
    ///
    /// Calling it again is a no-op.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Every accepted task owns a permit until it completes.
        match self.permits.acquire_many(self.workers as u32).await {
            Ok(all) => drop(all),
            Err(_) => log::warn!("Worker pool semaphore closed during drain"),
        }
        self.permits.close();
        log::debug!(
            "Worker pool drained after {} tasks",
            self.submitted.load(Ordering::SeqCst)
        );
    }
}
