//! SQLite mirror of a remote drive tree.
//!
//! This crate provides the persistence side of a drive client:
//! - Scoped read-only and read-write transactions on two drivers
//! - A bounded worker pool for running blocking transactions from async code
//! - Node lookup, path resolution and search over the mirrored tree
//! - Atomic application of change-log batches with the cursor
//! - Consistency diagnostics

pub mod blocking;
pub mod error;
pub mod offload;
pub mod repos;
pub mod schema;
pub mod store;
pub mod txn;

pub use blocking::BlockingStore;
pub use error::{MetadataError, MetadataResult};
pub use offload::{Offload, WorkerPool};
pub use repos::{ChangeRepo, DiagnosticsRepo, NodeRepo};
pub use store::{SqliteStore, TreeStore};
pub use txn::TxnMode;

use canopy_core::config::MetadataConfig;
use std::sync::Arc;

/// Create a tree store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn TreeStore>> {
    config.validate().map_err(MetadataError::Config)?;
    match config {
        MetadataConfig::Native { path, .. } => {
            tracing::info!(path = %path.display(), "opening tree store (native driver)");
            let store = SqliteStore::new(path, config.lock_timeout()).await?;
            Ok(Arc::new(store) as Arc<dyn TreeStore>)
        }
        MetadataConfig::Blocking { path, workers, .. } => {
            tracing::info!(
                path = %path.display(),
                workers,
                "opening tree store (blocking driver)"
            );
            let pool = WorkerPool::new(*workers);
            let store = BlockingStore::new(path.clone(), config.lock_timeout(), pool).await?;
            Ok(Arc::new(store) as Arc<dyn TreeStore>)
        }
    }
}
