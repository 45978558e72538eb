//! Read-only consistency diagnostics.

use crate::error::MetadataResult;
use async_trait::async_trait;
use canopy_core::Node;

#[async_trait]
pub trait DiagnosticsRepo: Send + Sync {
    /// Total size in bytes of all files that are not trashed.
    async fn get_uploaded_size(&self) -> MetadataResult<u64>;

    /// Non-root nodes whose parent does not exist.
    async fn find_orphan_nodes(&self) -> MetadataResult<Vec<Node>>;

    /// Nodes referenced as parent by more than one node.
    async fn find_multiple_parents_nodes(&self) -> MetadataResult<Vec<Node>>;
}
