//! Tree store trait and the native async implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{ChangeRepo, DiagnosticsRepo, NodeRepo};
use crate::schema::SCHEMA;
use crate::txn::TxnMode;
use crate::txn::native::{self, Transaction};
use async_trait::async_trait;
use canopy_core::{DrivePath, Node};
use regex::Regex;
use sqlx::Connection;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Combined tree store trait.
#[async_trait]
pub trait TreeStore: NodeRepo + ChangeRepo + DiagnosticsRepo + Send + Sync {
    /// Create the schema if missing and switch the file to WAL mode. Idempotent.
    async fn initialize(&self) -> MetadataResult<()>;

    /// Check that the database file can be opened and read.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// Tree store on the native async SQLite driver.
///
/// Holds no connection between calls: every operation opens its own
/// transaction, so any number of stores (and processes) can share the file.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    dsn: PathBuf,
    lock_timeout: Duration,
}

impl SqliteStore {
    /// Open (creating if needed) and initialize the database at `path`.
    pub async fn new(path: impl AsRef<Path>, lock_timeout: Duration) -> MetadataResult<Self> {
        let dsn = path.as_ref().to_path_buf();
        create_parent_dir(&dsn)?;
        let store = Self { dsn, lock_timeout };
        store.initialize().await?;
        Ok(store)
    }

    /// Begin a read-only transaction on the store's file.
    pub async fn read_only(&self) -> MetadataResult<Transaction> {
        Transaction::read_only(&self.dsn, self.lock_timeout).await
    }

    /// Begin a read-write transaction on the store's file.
    pub async fn read_write(&self) -> MetadataResult<Transaction> {
        Transaction::read_write(&self.dsn, self.lock_timeout).await
    }
}

pub(crate) fn create_parent_dir(dsn: &Path) -> MetadataResult<()> {
    if let Some(parent) = dsn.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

async fn create_schema(conn: &mut sqlx::SqliteConnection) -> MetadataResult<()> {
    for &statement in SCHEMA {
        sqlx::query(statement).execute(&mut *conn).await?;
    }
    Ok(())
}

pub(crate) fn node_not_found(id: &str) -> MetadataError {
    MetadataError::NotFound(format!("node {id}"))
}

pub(crate) fn root_not_found() -> MetadataError {
    MetadataError::NotFound("root node is not set".to_string())
}

pub(crate) fn path_not_found(path: &DrivePath) -> MetadataError {
    MetadataError::NotFound(format!("path {path}"))
}

pub(crate) fn child_not_found(name: &str, parent_id: &str) -> MetadataError {
    MetadataError::NotFound(format!("child {name:?} of node {parent_id}"))
}

pub(crate) fn ensure_root(node: &Node) -> MetadataResult<()> {
    match &node.parent_id {
        None => Ok(()),
        Some(parent_id) => Err(MetadataError::InvalidArgument(format!(
            "root node {} has parent {parent_id}",
            node.id
        ))),
    }
}

pub(crate) fn compile_pattern(pattern: &str) -> MetadataResult<Regex> {
    Regex::new(pattern)
        .map_err(|e| MetadataError::InvalidArgument(format!("invalid pattern {pattern:?}: {e}")))
}

/// Names collected while walking from a node up to the root.
pub(crate) struct ParentChain {
    origin: String,
    seen: HashSet<String>,
    names: Vec<String>,
}

impl ParentChain {
    pub(crate) fn new(origin: &str) -> Self {
        Self {
            origin: origin.to_string(),
            seen: HashSet::new(),
            names: Vec::new(),
        }
    }

    /// Record a step onto `id`, failing if the chain loops.
    pub(crate) fn visit(&mut self, id: &str) -> MetadataResult<()> {
        if self.seen.insert(id.to_string()) {
            Ok(())
        } else {
            Err(MetadataError::Integrity(format!(
                "parent chain of node {} loops through {id}",
                self.origin
            )))
        }
    }

    pub(crate) fn push_name(&mut self, name: String) {
        self.names.push(name);
    }

    /// The error for a chain that stops at a missing node.
    pub(crate) fn dangling(&self, missing: &str) -> MetadataError {
        if missing == self.origin {
            node_not_found(missing)
        } else {
            MetadataError::NotFound(format!(
                "ancestor {missing} of node {} (dangling parent chain)",
                self.origin
            ))
        }
    }

    pub(crate) fn into_path(self) -> DrivePath {
        DrivePath::from_components(self.names.into_iter().rev())
    }
}

/// Statements run inside a native transaction.
///
/// Each function takes the transaction's connection and leaves commit or
/// rollback to the caller.
pub mod queries {
    use crate::error::{MetadataError, MetadataResult};
    use crate::schema::*;
    use crate::store::ParentChain;
    use canopy_core::{ChangeAction, DrivePath, Node, PrivateMap};
    use regex::Regex;
    use sqlx::SqliteConnection;

    pub async fn get_metadata(
        conn: &mut SqliteConnection,
        key: &str,
    ) -> MetadataResult<Option<String>> {
        let value = sqlx::query_scalar::<_, String>(SELECT_METADATA)
            .bind(key)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(value)
    }

    pub async fn set_metadata(
        conn: &mut SqliteConnection,
        key: &str,
        value: &str,
    ) -> MetadataResult<()> {
        sqlx::query(UPSERT_METADATA)
            .bind(key)
            .bind(value)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    async fn load_private(conn: &mut SqliteConnection, id: &str) -> MetadataResult<PrivateMap> {
        let rows: Vec<(String, String)> = sqlx::query_as(SELECT_PRIVATE)
            .bind(id)
            .fetch_all(&mut *conn)
            .await?;
        Ok(rows.into_iter().collect())
    }

    async fn hydrate(conn: &mut SqliteConnection, row: NodeRow) -> MetadataResult<Node> {
        let private = load_private(conn, &row.id).await?;
        row.into_node(private)
    }

    async fn hydrate_all(
        conn: &mut SqliteConnection,
        rows: Vec<NodeRow>,
    ) -> MetadataResult<Vec<Node>> {
        let mut nodes = Vec::with_capacity(rows.len());
        for row in rows {
            nodes.push(hydrate(conn, row).await?);
        }
        Ok(nodes)
    }

    async fn root_row(conn: &mut SqliteConnection) -> MetadataResult<Option<NodeRow>> {
        let row = sqlx::query_as::<_, NodeRow>(SELECT_ROOT)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row)
    }

    async fn child_row(
        conn: &mut SqliteConnection,
        parent_id: &str,
        name: &str,
    ) -> MetadataResult<Option<NodeRow>> {
        let rows = sqlx::query_as::<_, NodeRow>(SELECT_CHILD_BY_NAME)
            .bind(parent_id)
            .bind(name)
            .fetch_all(&mut *conn)
            .await?;
        if rows.len() > 1 {
            tracing::warn!(parent_id, name, "duplicate sibling names, using lowest id");
        }
        Ok(rows.into_iter().next())
    }

    pub async fn get_root(conn: &mut SqliteConnection) -> MetadataResult<Option<Node>> {
        match root_row(conn).await? {
            Some(row) => Ok(Some(hydrate(conn, row).await?)),
            None => Ok(None),
        }
    }

    pub async fn get_node_by_id(
        conn: &mut SqliteConnection,
        id: &str,
    ) -> MetadataResult<Option<Node>> {
        let row = sqlx::query_as::<_, NodeRow>(SELECT_NODE_BY_ID)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        match row {
            Some(row) => Ok(Some(hydrate(conn, row).await?)),
            None => Ok(None),
        }
    }

    pub async fn get_child_by_name(
        conn: &mut SqliteConnection,
        name: &str,
        parent_id: &str,
    ) -> MetadataResult<Option<Node>> {
        match child_row(conn, parent_id, name).await? {
            Some(row) => Ok(Some(hydrate(conn, row).await?)),
            None => Ok(None),
        }
    }

    pub async fn get_node_by_path(
        conn: &mut SqliteConnection,
        path: &DrivePath,
    ) -> MetadataResult<Option<Node>> {
        let Some(mut current) = root_row(conn).await? else {
            return Ok(None);
        };
        for name in path.components() {
            match child_row(conn, &current.id, name).await? {
                Some(child) => current = child,
                None => return Ok(None),
            }
        }
        Ok(Some(hydrate(conn, current).await?))
    }

    pub async fn resolve_path_by_id(
        conn: &mut SqliteConnection,
        id: &str,
    ) -> MetadataResult<DrivePath> {
        let mut chain = ParentChain::new(id);
        let mut current = id.to_string();
        loop {
            chain.visit(&current)?;
            let link: Option<(Option<String>, String)> = sqlx::query_as(SELECT_PARENT_LINK)
                .bind(&current)
                .fetch_optional(&mut *conn)
                .await?;
            match link {
                None => return Err(chain.dangling(&current)),
                Some((None, _)) => return Ok(chain.into_path()),
                Some((Some(parent_id), name)) => {
                    chain.push_name(name);
                    current = parent_id;
                }
            }
        }
    }

    pub async fn get_children_by_id(
        conn: &mut SqliteConnection,
        parent_id: &str,
    ) -> MetadataResult<Vec<Node>> {
        let rows = sqlx::query_as::<_, NodeRow>(SELECT_CHILDREN)
            .bind(parent_id)
            .fetch_all(&mut *conn)
            .await?;
        hydrate_all(conn, rows).await
    }

    pub async fn get_trashed_nodes(conn: &mut SqliteConnection) -> MetadataResult<Vec<Node>> {
        let rows = sqlx::query_as::<_, NodeRow>(SELECT_TRASHED)
            .fetch_all(&mut *conn)
            .await?;
        hydrate_all(conn, rows).await
    }

    pub async fn find_nodes_by_regex(
        conn: &mut SqliteConnection,
        pattern: &Regex,
    ) -> MetadataResult<Vec<Node>> {
        let rows = sqlx::query_as::<_, NodeRow>(SELECT_ALL_NODES)
            .fetch_all(&mut *conn)
            .await?;
        let matching = rows
            .into_iter()
            .filter(|row| pattern.is_match(&row.name))
            .collect();
        hydrate_all(conn, matching).await
    }

    /// Insert or fully replace a node and its private attributes.
    pub async fn upsert_node(conn: &mut SqliteConnection, node: &Node) -> MetadataResult<()> {
        let row = NodeRow::from_node(node)?;
        sqlx::query(UPSERT_NODE)
            .bind(&row.id)
            .bind(&row.parent_id)
            .bind(&row.name)
            .bind(row.is_directory)
            .bind(row.is_trashed)
            .bind(row.ctime)
            .bind(row.mtime)
            .bind(&row.mime_type)
            .bind(&row.hash)
            .bind(row.size)
            .bind(row.is_image)
            .bind(row.is_video)
            .bind(row.width)
            .bind(row.height)
            .bind(row.ms_duration)
            .execute(&mut *conn)
            .await?;

        sqlx::query(DELETE_PRIVATE)
            .bind(&node.id)
            .execute(&mut *conn)
            .await?;
        for (key, value) in node.private.iter().flatten() {
            sqlx::query(INSERT_PRIVATE)
                .bind(&node.id)
                .bind(key)
                .bind(value)
                .execute(&mut *conn)
                .await?;
        }
        Ok(())
    }

    /// Remove a node and its private attributes. Children are left in place.
    pub async fn delete_node(conn: &mut SqliteConnection, id: &str) -> MetadataResult<()> {
        sqlx::query(DELETE_PRIVATE)
            .bind(id)
            .execute(&mut *conn)
            .await?;
        let deleted = sqlx::query(DELETE_NODE)
            .bind(id)
            .execute(&mut *conn)
            .await?;
        if deleted.rows_affected() == 0 {
            tracing::debug!(id, "removal of unknown node ignored");
        }
        Ok(())
    }

    /// Apply a batch in order, then record the new cursor.
    pub async fn apply_changes(
        conn: &mut SqliteConnection,
        changes: &[ChangeAction],
        new_cursor: &str,
    ) -> MetadataResult<()> {
        for change in changes {
            match change {
                ChangeAction::Upsert { node } => upsert_node(conn, node).await?,
                ChangeAction::Remove { id } => delete_node(conn, id).await?,
            }
        }
        set_metadata(conn, KEY_CURSOR, new_cursor).await
    }

    pub async fn get_uploaded_size(conn: &mut SqliteConnection) -> MetadataResult<u64> {
        let total: i64 = sqlx::query_scalar(SELECT_UPLOADED_SIZE)
            .fetch_one(&mut *conn)
            .await?;
        u64::try_from(total)
            .map_err(|_| MetadataError::Integrity(format!("negative uploaded size {total}")))
    }

    pub async fn find_orphan_nodes(conn: &mut SqliteConnection) -> MetadataResult<Vec<Node>> {
        let rows = sqlx::query_as::<_, NodeRow>(SELECT_ORPHANS)
            .fetch_all(&mut *conn)
            .await?;
        hydrate_all(conn, rows).await
    }

    pub async fn find_multiple_parents_nodes(
        conn: &mut SqliteConnection,
    ) -> MetadataResult<Vec<Node>> {
        let rows = sqlx::query_as::<_, NodeRow>(SELECT_SHARED_PARENTS)
            .fetch_all(&mut *conn)
            .await?;
        hydrate_all(conn, rows).await
    }
}

#[async_trait]
impl TreeStore for SqliteStore {
    async fn initialize(&self) -> MetadataResult<()> {
        // The journal mode cannot change inside a transaction.
        let mut conn = native::connect(&self.dsn, self.lock_timeout, TxnMode::ReadWrite).await?;
        let journal_mode: String = sqlx::query_scalar("PRAGMA journal_mode = WAL")
            .fetch_one(&mut conn)
            .await?;
        conn.close().await?;
        if !journal_mode.eq_ignore_ascii_case("wal") {
            tracing::warn!(
                dsn = %self.dsn.display(),
                journal_mode,
                "database did not switch to WAL; readers may block behind writers"
            );
        }

        let mut txn = self.read_write().await?;
        let result = create_schema(&mut txn).await;
        txn.complete(result).await?;

        tracing::info!(dsn = %self.dsn.display(), "tree store initialized");
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        let mut txn = self.read_only().await?;
        let result = sqlx::query("SELECT 1")
            .execute(&mut *txn)
            .await
            .map(|_| ())
            .map_err(MetadataError::from);
        txn.complete(result).await
    }
}

// Repository traits for SqliteStore
mod sqlite_impl {
    use super::*;
    use crate::schema::KEY_CURSOR;
    use canopy_core::ChangeAction;

    #[async_trait]
    impl NodeRepo for SqliteStore {
        async fn get_root(&self) -> MetadataResult<Node> {
            let mut txn = self.read_only().await?;
            let result = queries::get_root(&mut txn).await;
            txn.complete(result).await?.ok_or_else(root_not_found)
        }

        async fn set_root(&self, node: &Node) -> MetadataResult<()> {
            ensure_root(node)?;
            let mut txn = self.read_write().await?;
            let result = queries::upsert_node(&mut txn, node).await;
            txn.complete(result).await?;
            tracing::info!(root_id = %node.id, "root node set");
            Ok(())
        }

        async fn get_node_by_id(&self, id: &str) -> MetadataResult<Node> {
            let mut txn = self.read_only().await?;
            let result = queries::get_node_by_id(&mut txn, id).await;
            txn.complete(result).await?.ok_or_else(|| node_not_found(id))
        }

        async fn get_node_by_path(&self, path: &str) -> MetadataResult<Node> {
            let path = DrivePath::parse(path)?;
            let mut txn = self.read_only().await?;
            let result = queries::get_node_by_path(&mut txn, &path).await;
            txn.complete(result)
                .await?
                .ok_or_else(|| path_not_found(&path))
        }

        async fn resolve_path_by_id(&self, id: &str) -> MetadataResult<DrivePath> {
            let mut txn = self.read_only().await?;
            let result = queries::resolve_path_by_id(&mut txn, id).await;
            txn.complete(result).await
        }

        async fn get_child_by_name(&self, name: &str, parent_id: &str) -> MetadataResult<Node> {
            let mut txn = self.read_only().await?;
            let result = queries::get_child_by_name(&mut txn, name, parent_id).await;
            txn.complete(result)
                .await?
                .ok_or_else(|| child_not_found(name, parent_id))
        }

        async fn get_children_by_id(&self, parent_id: &str) -> MetadataResult<Vec<Node>> {
            let mut txn = self.read_only().await?;
            let result = queries::get_children_by_id(&mut txn, parent_id).await;
            txn.complete(result).await
        }

        async fn get_trashed_nodes(&self) -> MetadataResult<Vec<Node>> {
            let mut txn = self.read_only().await?;
            let result = queries::get_trashed_nodes(&mut txn).await;
            txn.complete(result).await
        }

        async fn find_nodes_by_regex(&self, pattern: &str) -> MetadataResult<Vec<Node>> {
            let pattern = compile_pattern(pattern)?;
            let mut txn = self.read_only().await?;
            let result = queries::find_nodes_by_regex(&mut txn, &pattern).await;
            txn.complete(result).await
        }
    }

    #[async_trait]
    impl ChangeRepo for SqliteStore {
        async fn get_current_cursor(&self) -> MetadataResult<String> {
            let mut txn = self.read_only().await?;
            let result = queries::get_metadata(&mut txn, KEY_CURSOR).await;
            Ok(txn.complete(result).await?.unwrap_or_default())
        }

        async fn apply_changes(
            &self,
            changes: &[ChangeAction],
            new_cursor: &str,
        ) -> MetadataResult<()> {
            let mut txn = self.read_write().await?;
            let result = queries::apply_changes(&mut txn, changes, new_cursor).await;
            txn.complete(result).await?;

            let removed = changes
                .iter()
                .filter(|change| matches!(change, ChangeAction::Remove { .. }))
                .count();
            tracing::info!(
                upserted = changes.len() - removed,
                removed,
                cursor = new_cursor,
                "change batch applied"
            );
            Ok(())
        }
    }

    #[async_trait]
    impl DiagnosticsRepo for SqliteStore {
        async fn get_uploaded_size(&self) -> MetadataResult<u64> {
            let mut txn = self.read_only().await?;
            let result = queries::get_uploaded_size(&mut txn).await;
            txn.complete(result).await
        }

        async fn find_orphan_nodes(&self) -> MetadataResult<Vec<Node>> {
            let mut txn = self.read_only().await?;
            let result = queries::find_orphan_nodes(&mut txn).await;
            txn.complete(result).await
        }

        async fn find_multiple_parents_nodes(&self) -> MetadataResult<Vec<Node>> {
            let mut txn = self.read_only().await?;
            let result = queries::find_multiple_parents_nodes(&mut txn).await;
            txn.complete(result).await
        }
    }
}
