//! Tree store test utilities.

use canopy_metadata::{BlockingStore, MetadataResult, SqliteStore, TreeStore, WorkerPool};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Lock timeout used by test stores unless a test needs contention.
pub const TEST_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// A database file in a temporary directory removed on drop.
pub struct Sandbox {
    _temp_dir: TempDir,
    pub db_path: PathBuf,
}

impl Sandbox {
    pub fn new() -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("drive.sqlite");
        Self {
            _temp_dir: temp_dir,
            db_path,
        }
    }

    /// Native-driver store on this sandbox's file.
    #[allow(dead_code)]
    pub async fn native(&self) -> MetadataResult<SqliteStore> {
        SqliteStore::new(&self.db_path, TEST_LOCK_TIMEOUT).await
    }

    /// Blocking-driver store on this sandbox's file.
    #[allow(dead_code)]
    pub async fn blocking(&self, workers: usize) -> MetadataResult<BlockingStore> {
        BlockingStore::new(&self.db_path, TEST_LOCK_TIMEOUT, WorkerPool::new(workers)).await
    }
}

/// A test tree store wrapper that cleans up on drop.
#[allow(dead_code)]
pub struct TestMetadata {
    pub store: Arc<dyn TreeStore>,
    pub sandbox: Sandbox,
}

impl TestMetadata {
    /// Store on the native driver.
    pub async fn native() -> MetadataResult<Self> {
        let sandbox = Sandbox::new();
        let store = sandbox.native().await?;
        Ok(Self {
            store: Arc::new(store),
            sandbox,
        })
    }

    /// Store on the blocking driver with a small worker pool.
    pub async fn blocking() -> MetadataResult<Self> {
        let sandbox = Sandbox::new();
        let store = sandbox.blocking(2).await?;
        Ok(Self {
            store: Arc::new(store),
            sandbox,
        })
    }

    pub fn store(&self) -> Arc<dyn TreeStore> {
        self.store.clone()
    }
}

/// Run a test against both driver backends, each on a fresh file.
#[allow(dead_code)]
pub async fn run_store_test_both<F, Fut>(test_fn: F)
where
    F: Fn(Arc<dyn TreeStore>) -> Fut + Clone,
    Fut: std::future::Future<Output = ()>,
{
    let native = TestMetadata::native()
        .await
        .expect("Failed to create native test store");
    test_fn.clone()(native.store()).await;

    let blocking = TestMetadata::blocking()
        .await
        .expect("Failed to create blocking test store");
    test_fn(blocking.store()).await;
}
