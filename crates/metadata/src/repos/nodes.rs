//! Node lookup, path resolution and search.

use crate::error::MetadataResult;
use async_trait::async_trait;
use canopy_core::{DrivePath, Node};

/// Read access to the mirrored tree, plus root installation.
///
/// Trashed nodes are ordinary members of the tree here: they are returned by
/// children listings and resolve by name and path like any other node.
#[async_trait]
pub trait NodeRepo: Send + Sync {
    /// Get the root node (the only node without a parent).
    /// Fails with `NotFound` until a root has been set.
    async fn get_root(&self) -> MetadataResult<Node>;

    /// Install or update the root node.
    /// Fails with `InvalidArgument` if the node has a parent and with
    /// `Integrity` if a different root is already installed.
    async fn set_root(&self, node: &Node) -> MetadataResult<()>;

    /// Get a node by ID.
    async fn get_node_by_id(&self, id: &str) -> MetadataResult<Node>;

    /// Resolve an absolute path from the root.
    /// A relative path fails with `InvalidArgument` before any lookup.
    async fn get_node_by_path(&self, path: &str) -> MetadataResult<Node>;

    /// Compose the absolute path of a node by walking its parent chain.
    async fn resolve_path_by_id(&self, id: &str) -> MetadataResult<DrivePath>;

    /// Get the child of `parent_id` called `name`.
    async fn get_child_by_name(&self, name: &str, parent_id: &str) -> MetadataResult<Node>;

    /// List the children of a node, ordered by name.
    /// An unknown parent yields an empty list.
    async fn get_children_by_id(&self, parent_id: &str) -> MetadataResult<Vec<Node>>;

    /// List every trashed node in the tree.
    async fn get_trashed_nodes(&self) -> MetadataResult<Vec<Node>>;

    /// List every node whose name contains a match for `pattern`.
    async fn find_nodes_by_regex(&self, pattern: &str) -> MetadataResult<Vec<Node>>;
}
