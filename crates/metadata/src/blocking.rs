//! Tree store on the synchronous driver, offloaded to worker threads.

use crate::error::MetadataResult;
use crate::offload::{Offload, WorkerPool};
use crate::repos::{ChangeRepo, DiagnosticsRepo, NodeRepo};
use crate::schema::{KEY_CURSOR, SCHEMA};
use crate::store::{
    TreeStore, child_not_found, compile_pattern, create_parent_dir, ensure_root, node_not_found,
    path_not_found, root_not_found,
};
use async_trait::async_trait;
use canopy_core::{ChangeAction, DrivePath, Node};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Tree store on rusqlite. Each operation is one transaction run on a pool worker.
#[derive(Clone, Debug)]
pub struct BlockingStore {
    offload: Offload,
}

impl BlockingStore {
    /// Open (creating if needed) and initialize the database at `path`.
    pub async fn new(
        path: impl Into<PathBuf>,
        lock_timeout: Duration,
        pool: WorkerPool,
    ) -> MetadataResult<Self> {
        let dsn = path.into();
        create_parent_dir(&dsn)?;
        let store = Self {
            offload: Offload::new(dsn, lock_timeout, pool),
        };
        store.initialize().await?;
        Ok(store)
    }

    pub fn dsn(&self) -> &Path {
        self.offload.dsn()
    }
}

/// Statements run inside a blocking transaction.
pub mod queries {
    use crate::error::{MetadataError, MetadataResult};
    use crate::schema::*;
    use crate::store::ParentChain;
    use canopy_core::{ChangeAction, DrivePath, Node, PrivateMap};
    use regex::Regex;
    use rusqlite::{Connection, OptionalExtension, params};

    pub fn get_metadata(conn: &Connection, key: &str) -> MetadataResult<Option<String>> {
        let value = conn
            .query_row(SELECT_METADATA, [key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    pub fn set_metadata(conn: &Connection, key: &str, value: &str) -> MetadataResult<()> {
        conn.execute(UPSERT_METADATA, [key, value])?;
        Ok(())
    }

    fn load_private(conn: &Connection, id: &str) -> MetadataResult<PrivateMap> {
        let mut stmt = conn.prepare_cached(SELECT_PRIVATE)?;
        let pairs = stmt
            .query_map([id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<PrivateMap>>()?;
        Ok(pairs)
    }

    fn hydrate(conn: &Connection, row: NodeRow) -> MetadataResult<Node> {
        let private = load_private(conn, &row.id)?;
        row.into_node(private)
    }

    fn hydrate_all(conn: &Connection, rows: Vec<NodeRow>) -> MetadataResult<Vec<Node>> {
        rows.into_iter().map(|row| hydrate(conn, row)).collect()
    }

    fn rows<P: rusqlite::Params>(
        conn: &Connection,
        sql: &str,
        params: P,
    ) -> MetadataResult<Vec<NodeRow>> {
        let mut stmt = conn.prepare_cached(sql)?;
        let rows = stmt
            .query_map(params, NodeRow::from_rusqlite)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn root_row(conn: &Connection) -> MetadataResult<Option<NodeRow>> {
        let row = conn
            .query_row(SELECT_ROOT, [], NodeRow::from_rusqlite)
            .optional()?;
        Ok(row)
    }

    fn child_row(conn: &Connection, parent_id: &str, name: &str) -> MetadataResult<Option<NodeRow>> {
        let rows = rows(conn, SELECT_CHILD_BY_NAME, [parent_id, name])?;
        if rows.len() > 1 {
            tracing::warn!(parent_id, name, "duplicate sibling names, using lowest id");
        }
        Ok(rows.into_iter().next())
    }

    pub fn get_root(conn: &Connection) -> MetadataResult<Option<Node>> {
        root_row(conn)?.map(|row| hydrate(conn, row)).transpose()
    }

    pub fn get_node_by_id(conn: &Connection, id: &str) -> MetadataResult<Option<Node>> {
        conn.query_row(SELECT_NODE_BY_ID, [id], NodeRow::from_rusqlite)
            .optional()?
            .map(|row| hydrate(conn, row))
            .transpose()
    }

    pub fn get_child_by_name(
        conn: &Connection,
        name: &str,
        parent_id: &str,
    ) -> MetadataResult<Option<Node>> {
        child_row(conn, parent_id, name)?
            .map(|row| hydrate(conn, row))
            .transpose()
    }

    pub fn get_node_by_path(conn: &Connection, path: &DrivePath) -> MetadataResult<Option<Node>> {
        let Some(mut current) = root_row(conn)? else {
            return Ok(None);
        };
        for name in path.components() {
            match child_row(conn, &current.id, name)? {
                Some(child) => current = child,
                None => return Ok(None),
            }
        }
        hydrate(conn, current).map(Some)
    }

    pub fn resolve_path_by_id(conn: &Connection, id: &str) -> MetadataResult<DrivePath> {
        let mut stmt = conn.prepare_cached(SELECT_PARENT_LINK)?;
        let mut chain = ParentChain::new(id);
        let mut current = id.to_string();
        loop {
            chain.visit(&current)?;
            let link: Option<(Option<String>, String)> = stmt
                .query_row([&current], |row| Ok((row.get(0)?, row.get(1)?)))
                .optional()?;
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

    pub fn get_children_by_id(conn: &Connection, parent_id: &str) -> MetadataResult<Vec<Node>> {
        let rows = rows(conn, SELECT_CHILDREN, [parent_id])?;
        hydrate_all(conn, rows)
    }

    pub fn get_trashed_nodes(conn: &Connection) -> MetadataResult<Vec<Node>> {
        let rows = rows(conn, SELECT_TRASHED, [])?;
        hydrate_all(conn, rows)
    }

    pub fn find_nodes_by_regex(conn: &Connection, pattern: &Regex) -> MetadataResult<Vec<Node>> {
        let matching = rows(conn, SELECT_ALL_NODES, [])?
            .into_iter()
            .filter(|row| pattern.is_match(&row.name))
            .collect();
        hydrate_all(conn, matching)
    }

    /// Insert or fully replace a node and its private attributes.
    pub fn upsert_node(conn: &Connection, node: &Node) -> MetadataResult<()> {
        let row = NodeRow::from_node(node)?;
        conn.prepare_cached(UPSERT_NODE)?.execute(params![
            row.id,
            row.parent_id,
            row.name,
            row.is_directory,
            row.is_trashed,
            row.ctime,
            row.mtime,
            row.mime_type,
            row.hash,
            row.size,
            row.is_image,
            row.is_video,
            row.width,
            row.height,
            row.ms_duration,
        ])?;

        conn.prepare_cached(DELETE_PRIVATE)?.execute([&node.id])?;
        let mut insert = conn.prepare_cached(INSERT_PRIVATE)?;
        for (key, value) in node.private.iter().flatten() {
            insert.execute([&node.id, key, value])?;
        }
        Ok(())
    }

    /// Remove a node and its private attributes. Children are left in place.
    pub fn delete_node(conn: &Connection, id: &str) -> MetadataResult<()> {
        conn.prepare_cached(DELETE_PRIVATE)?.execute([id])?;
        let deleted = conn.prepare_cached(DELETE_NODE)?.execute([id])?;
        if deleted == 0 {
            tracing::debug!(id, "removal of unknown node ignored");
        }
        Ok(())
    }

    /// Apply a batch in order, then record the new cursor.
    pub fn apply_changes(
        conn: &Connection,
        changes: &[ChangeAction],
        new_cursor: &str,
    ) -> MetadataResult<()> {
        for change in changes {
            match change {
                ChangeAction::Upsert { node } => upsert_node(conn, node)?,
                ChangeAction::Remove { id } => delete_node(conn, id)?,
            }
        }
        set_metadata(conn, KEY_CURSOR, new_cursor)
    }

    pub fn get_uploaded_size(conn: &Connection) -> MetadataResult<u64> {
        let total: i64 = conn.query_row(SELECT_UPLOADED_SIZE, [], |row| row.get(0))?;
        u64::try_from(total)
            .map_err(|_| MetadataError::Integrity(format!("negative uploaded size {total}")))
    }

    pub fn find_orphan_nodes(conn: &Connection) -> MetadataResult<Vec<Node>> {
        let rows = rows(conn, SELECT_ORPHANS, [])?;
        hydrate_all(conn, rows)
    }

    pub fn find_multiple_parents_nodes(conn: &Connection) -> MetadataResult<Vec<Node>> {
        let rows = rows(conn, SELECT_SHARED_PARENTS, [])?;
        hydrate_all(conn, rows)
    }
}

#[async_trait]
impl TreeStore for BlockingStore {
    async fn initialize(&self) -> MetadataResult<()> {
        // The journal mode cannot change inside a transaction.
        let journal_mode = self
            .offload
            .connection(|conn| {
                let mode: String =
                    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
                Ok(mode)
            })
            .await?;
        if !journal_mode.eq_ignore_ascii_case("wal") {
            tracing::warn!(
                dsn = %self.dsn().display(),
                journal_mode,
                "database did not switch to WAL; readers may block behind writers"
            );
        }

        self.offload
            .read_write(|conn| {
                for &statement in SCHEMA {
                    conn.execute(statement, [])?;
                }
                Ok(())
            })
            .await?;

        tracing::info!(dsn = %self.dsn().display(), "tree store initialized");
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        self.offload
            .read_only(|conn| {
                conn.query_row("SELECT 1", [], |_| Ok(()))?;
                Ok(())
            })
            .await
    }
}

#[async_trait]
impl NodeRepo for BlockingStore {
    async fn get_root(&self) -> MetadataResult<Node> {
        self.offload
            .read_only(queries::get_root)
            .await?
            .ok_or_else(root_not_found)
    }

    async fn set_root(&self, node: &Node) -> MetadataResult<()> {
        ensure_root(node)?;
        let root = node.clone();
        self.offload
            .read_write(move |conn| queries::upsert_node(conn, &root))
            .await?;
        tracing::info!(root_id = %node.id, "root node set");
        Ok(())
    }

    async fn get_node_by_id(&self, id: &str) -> MetadataResult<Node> {
        let key = id.to_string();
        self.offload
            .read_only(move |conn| queries::get_node_by_id(conn, &key))
            .await?
            .ok_or_else(|| node_not_found(id))
    }

    async fn get_node_by_path(&self, path: &str) -> MetadataResult<Node> {
        let path = DrivePath::parse(path)?;
        let lookup = path.clone();
        self.offload
            .read_only(move |conn| queries::get_node_by_path(conn, &lookup))
            .await?
            .ok_or_else(|| path_not_found(&path))
    }

    async fn resolve_path_by_id(&self, id: &str) -> MetadataResult<DrivePath> {
        let id = id.to_string();
        self.offload
            .read_only(move |conn| queries::resolve_path_by_id(conn, &id))
            .await
    }

    async fn get_child_by_name(&self, name: &str, parent_id: &str) -> MetadataResult<Node> {
        let (child, parent) = (name.to_string(), parent_id.to_string());
        self.offload
            .read_only(move |conn| queries::get_child_by_name(conn, &child, &parent))
            .await?
            .ok_or_else(|| child_not_found(name, parent_id))
    }

    async fn get_children_by_id(&self, parent_id: &str) -> MetadataResult<Vec<Node>> {
        let parent_id = parent_id.to_string();
        self.offload
            .read_only(move |conn| queries::get_children_by_id(conn, &parent_id))
            .await
    }

    async fn get_trashed_nodes(&self) -> MetadataResult<Vec<Node>> {
        self.offload.read_only(queries::get_trashed_nodes).await
    }

    async fn find_nodes_by_regex(&self, pattern: &str) -> MetadataResult<Vec<Node>> {
        let pattern = compile_pattern(pattern)?;
        self.offload
            .read_only(move |conn| queries::find_nodes_by_regex(conn, &pattern))
            .await
    }
}

#[async_trait]
impl ChangeRepo for BlockingStore {
    async fn get_current_cursor(&self) -> MetadataResult<String> {
        let cursor = self
            .offload
            .read_only(|conn| queries::get_metadata(conn, KEY_CURSOR))
            .await?;
        Ok(cursor.unwrap_or_default())
    }

    async fn apply_changes(&self, changes: &[ChangeAction], new_cursor: &str) -> MetadataResult<()> {
        let batch = changes.to_vec();
        let cursor = new_cursor.to_string();
        self.offload
            .read_write(move |conn| queries::apply_changes(conn, &batch, &cursor))
            .await?;

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
impl DiagnosticsRepo for BlockingStore {
    async fn get_uploaded_size(&self) -> MetadataResult<u64> {
        self.offload.read_only(queries::get_uploaded_size).await
    }

    async fn find_orphan_nodes(&self) -> MetadataResult<Vec<Node>> {
        self.offload.read_only(queries::find_orphan_nodes).await
    }

    async fn find_multiple_parents_nodes(&self) -> MetadataResult<Vec<Node>> {
        self.offload
            .read_only(queries::find_multiple_parents_nodes)
            .await
    }
}
