//! Run synchronous-driver transactions from async code.
//!
//! Work is dispatched to tokio's blocking threads, at most `workers` at a
//! time. Each unit of work opens its own connection on the worker, so file
//! locking arbitrates between workers exactly as between processes.

use crate::error::{MetadataError, MetadataResult};
use crate::txn::{TxnMode, blocking};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Bounded pool of blocking workers.
#[derive(Clone, Debug)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    workers: usize,
}

impl WorkerPool {
    /// Create a pool running at most `workers` jobs at once (at least one).
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            permits: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `job` on a worker and wait for its result without blocking the runtime.
    ///
    /// Dropping the returned future while it waits for a free worker cancels the
    /// job; once dispatched it runs to completion regardless.
    pub async fn run<T, F>(&self, job: F) -> MetadataResult<T>
    where
        F: FnOnce() -> MetadataResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| MetadataError::Internal("worker pool is closed".to_string()))?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .map_err(|e| MetadataError::Internal(format!("worker task failed: {e}")))?
    }
}

/// A database file reachable through a [`WorkerPool`].
#[derive(Clone, Debug)]
pub struct Offload {
    dsn: PathBuf,
    timeout: Duration,
    pool: WorkerPool,
}

impl Offload {
    pub fn new(dsn: impl Into<PathBuf>, timeout: Duration, pool: WorkerPool) -> Self {
        Self {
            dsn: dsn.into(),
            timeout,
            pool,
        }
    }

    /// Same database and pool, different write lock timeout.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            dsn: self.dsn.clone(),
            timeout,
            pool: self.pool.clone(),
        }
    }

    pub fn dsn(&self) -> &Path {
        &self.dsn
    }

    /// Run `work` in a read-only transaction on a worker.
    pub async fn read_only<T, F>(&self, work: F) -> MetadataResult<T>
    where
        F: FnOnce(&Connection) -> MetadataResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let dsn = self.dsn.clone();
        let timeout = self.timeout;
        self.pool
            .run(move || blocking::read_only(&dsn, timeout, work))
            .await
    }

    /// Run `work` in a read-write transaction on a worker.
    ///
    /// Errors from `work`, including [`MetadataError::LockTimeout`], come back
    /// unchanged after the rollback.
    pub async fn read_write<T, F>(&self, work: F) -> MetadataResult<T>
    where
        F: FnOnce(&Connection) -> MetadataResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let dsn = self.dsn.clone();
        let timeout = self.timeout;
        self.pool
            .run(move || blocking::read_write(&dsn, timeout, work))
            .await
    }

    /// Run `work` on a read-write connection with no transaction open.
    pub async fn connection<T, F>(&self, work: F) -> MetadataResult<T>
    where
        F: FnOnce(&Connection) -> MetadataResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let dsn = self.dsn.clone();
        let timeout = self.timeout;
        self.pool
            .run(move || {
                let conn = blocking::connect(&dsn, timeout, TxnMode::ReadWrite)?;
                work(&conn)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_pool_never_exceeds_worker_count() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            let running = running.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                pool.run(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_derived_adapter_shares_worker_bound() {
        let temp_dir = tempfile::tempdir().unwrap();
        let slow = Offload::new(
            temp_dir.path().join("drive.sqlite"),
            Duration::from_secs(5),
            WorkerPool::new(1),
        );
        let fast = slow.with_timeout(Duration::ZERO);
        assert_eq!(fast.dsn(), slow.dsn());

        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for offload in [slow.clone(), fast.clone(), slow, fast] {
            let running = running.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                offload
                    .connection(move |_conn| {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(20));
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_job_error_propagates_unchanged() {
        let pool = WorkerPool::new(1);
        let err = pool
            .run(|| -> MetadataResult<()> { Err(MetadataError::NotFound("x".to_string())) })
            .await
            .unwrap_err();
        assert!(matches!(err, MetadataError::NotFound(ref id) if id == "x"));
    }

    #[tokio::test]
    async fn test_panicking_job_is_internal_error() {
        let pool = WorkerPool::new(1);
        let err = pool
            .run(|| -> MetadataResult<()> { panic!("worker exploded") })
            .await
            .unwrap_err();
        assert!(matches!(err, MetadataError::Internal(_)));

        // The permit is released even though the job panicked.
        pool.run(|| Ok(())).await.unwrap();
    }

    #[test]
    fn test_zero_workers_rounds_up() {
        assert_eq!(WorkerPool::new(0).workers(), 1);
    }
}
