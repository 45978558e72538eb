//! Table layout and row mapping for the mirrored drive tree.
//!
//! Statement text is shared by both drivers; only the row decoding differs.

use crate::error::{MetadataError, MetadataResult};
use canopy_core::node::KindFields;
use canopy_core::{Node, PrivateMap};
use sqlx::FromRow;
use time::OffsetDateTime;

/// Metadata key holding the last applied change-log position.
pub const KEY_CURSOR: &str = "cursor";

/// Expands to a `SELECT` of every node column followed by `$tail`.
macro_rules! select_nodes {
    ($tail:literal) => {
        concat!(
            "SELECT id, parent_id, name, is_directory, is_trashed, ctime, mtime, ",
            "mime_type, hash, size, is_image, is_video, width, height, ms_duration ",
            "FROM node ",
            $tail
        )
    };
}

pub(crate) const SELECT_ROOT: &str = select_nodes!("WHERE parent_id IS NULL");
pub(crate) const SELECT_NODE_BY_ID: &str = select_nodes!("WHERE id = ?");
// Two rows are enough to notice a duplicated sibling name.
pub(crate) const SELECT_CHILD_BY_NAME: &str =
    select_nodes!("WHERE parent_id = ? AND name = ? ORDER BY id LIMIT 2");
pub(crate) const SELECT_CHILDREN: &str = select_nodes!("WHERE parent_id = ? ORDER BY name, id");
pub(crate) const SELECT_TRASHED: &str = select_nodes!("WHERE is_trashed = 1 ORDER BY name, id");
pub(crate) const SELECT_ALL_NODES: &str = select_nodes!("ORDER BY name, id");
pub(crate) const SELECT_ORPHANS: &str = select_nodes!(
    "WHERE parent_id IS NOT NULL AND parent_id NOT IN (SELECT id FROM node) ORDER BY id"
);
pub(crate) const SELECT_SHARED_PARENTS: &str = select_nodes!(
    "WHERE id IN (SELECT parent_id FROM node WHERE parent_id IS NOT NULL \
     GROUP BY parent_id HAVING COUNT(*) > 1) ORDER BY id"
);

pub(crate) const SELECT_PARENT_LINK: &str = "SELECT parent_id, name FROM node WHERE id = ?";
pub(crate) const SELECT_PRIVATE: &str =
    "SELECT key, value FROM node_private WHERE id = ? ORDER BY key";
pub(crate) const SELECT_METADATA: &str = "SELECT value FROM metadata WHERE key = ?";
pub(crate) const SELECT_UPLOADED_SIZE: &str =
    "SELECT COALESCE(SUM(size), 0) FROM node WHERE is_trashed = 0 AND is_directory = 0";

// Conflicts on id only. A second root must still trip idx_node_root.
pub(crate) const UPSERT_NODE: &str = r#"
INSERT INTO node (
    id, parent_id, name, is_directory, is_trashed, ctime, mtime,
    mime_type, hash, size, is_image, is_video, width, height, ms_duration
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT(id) DO UPDATE SET
    parent_id = excluded.parent_id,
    name = excluded.name,
    is_directory = excluded.is_directory,
    is_trashed = excluded.is_trashed,
    ctime = excluded.ctime,
    mtime = excluded.mtime,
    mime_type = excluded.mime_type,
    hash = excluded.hash,
    size = excluded.size,
    is_image = excluded.is_image,
    is_video = excluded.is_video,
    width = excluded.width,
    height = excluded.height,
    ms_duration = excluded.ms_duration
"#;
pub(crate) const DELETE_NODE: &str = "DELETE FROM node WHERE id = ?";
pub(crate) const INSERT_PRIVATE: &str =
    "INSERT INTO node_private (id, key, value) VALUES (?, ?, ?)";
pub(crate) const DELETE_PRIVATE: &str = "DELETE FROM node_private WHERE id = ?";
pub(crate) const UPSERT_METADATA: &str = "INSERT INTO metadata (key, value) VALUES (?, ?) \
     ON CONFLICT(key) DO UPDATE SET value = excluded.value";

/// Schema statements, run in order. Each is idempotent.
pub(crate) const SCHEMA: &[&str] = &[
    // Singleton process state (cursor, ...)
    r#"CREATE TABLE IF NOT EXISTS metadata (
        key TEXT PRIMARY KEY NOT NULL,
        value TEXT NOT NULL
    )"#,
    // One row per drive node. Timestamps are unix nanoseconds (UTC).
    r#"CREATE TABLE IF NOT EXISTS node (
        id TEXT PRIMARY KEY NOT NULL,
        parent_id TEXT,
        name TEXT NOT NULL,
        is_directory INTEGER NOT NULL,
        is_trashed INTEGER NOT NULL,
        ctime INTEGER NOT NULL,
        mtime INTEGER NOT NULL,
        mime_type TEXT NOT NULL,
        hash TEXT NOT NULL,
        size INTEGER NOT NULL,
        is_image INTEGER NOT NULL,
        is_video INTEGER NOT NULL,
        width INTEGER NOT NULL,
        height INTEGER NOT NULL,
        ms_duration INTEGER NOT NULL
    )"#,
    // Sibling names are not unique upstream, so this index is not either.
    "CREATE INDEX IF NOT EXISTS idx_node_parent_name ON node(parent_id, name)",
    "CREATE INDEX IF NOT EXISTS idx_node_trashed ON node(is_trashed)",
    // At most one root.
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_node_root ON node((parent_id IS NULL)) \
     WHERE parent_id IS NULL",
    // Client-private attributes, present only for non-empty maps.
    r#"CREATE TABLE IF NOT EXISTS node_private (
        id TEXT NOT NULL,
        key TEXT NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (id, key)
    )"#,
];

/// One `node` table row.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct NodeRow {
    pub id: String,
    pub parent_id: Option<String>,
    pub name: String,
    pub is_directory: bool,
    pub is_trashed: bool,
    pub ctime: i64,
    pub mtime: i64,
    pub mime_type: String,
    pub hash: String,
    pub size: i64,
    pub is_image: bool,
    pub is_video: bool,
    pub width: i64,
    pub height: i64,
    pub ms_duration: i64,
}

impl NodeRow {
    /// Flatten a node for storage.
    ///
    /// An empty private map is rejected: it would be stored as no rows and
    /// read back as `None`.
    pub fn from_node(node: &Node) -> MetadataResult<Self> {
        if node.private.as_ref().is_some_and(|map| map.is_empty()) {
            return Err(MetadataError::InvalidArgument(format!(
                "node {}: empty private map, use None",
                node.id
            )));
        }
        let fields = node.kind.fields();
        let size = i64::try_from(fields.size).map_err(|_| {
            MetadataError::InvalidArgument(format!("node {}: size {} too large", node.id, fields.size))
        })?;
        let ms_duration = i64::try_from(fields.ms_duration).map_err(|_| {
            MetadataError::InvalidArgument(format!(
                "node {}: duration {} too large",
                node.id, fields.ms_duration
            ))
        })?;

        Ok(Self {
            id: node.id.clone(),
            parent_id: node.parent_id.clone(),
            name: node.name.clone(),
            is_directory: fields.is_directory,
            is_trashed: node.is_trashed,
            ctime: encode_time(&node.id, node.ctime)?,
            mtime: encode_time(&node.id, node.mtime)?,
            mime_type: fields.mime_type,
            hash: fields.hash,
            size,
            is_image: fields.is_image,
            is_video: fields.is_video,
            width: i64::from(fields.width),
            height: i64::from(fields.height),
            ms_duration,
        })
    }

    /// Rebuild the node value, validating what the row claims.
    pub fn into_node(self, private: PrivateMap) -> MetadataResult<Node> {
        let corrupt = |what: &str, value: i64| {
            MetadataError::Integrity(format!("node {}: invalid {what} {value}", self.id))
        };
        let size = u64::try_from(self.size).map_err(|_| corrupt("size", self.size))?;
        let width = u32::try_from(self.width).map_err(|_| corrupt("width", self.width))?;
        let height = u32::try_from(self.height).map_err(|_| corrupt("height", self.height))?;
        let ms_duration =
            u64::try_from(self.ms_duration).map_err(|_| corrupt("duration", self.ms_duration))?;
        let ctime = decode_time(&self.id, self.ctime)?;
        let mtime = decode_time(&self.id, self.mtime)?;

        let kind = KindFields {
            is_directory: self.is_directory,
            is_image: self.is_image,
            is_video: self.is_video,
            mime_type: self.mime_type,
            hash: self.hash,
            size,
            width,
            height,
            ms_duration,
        }
        .into_kind(&self.id)?;

        Ok(Node {
            id: self.id,
            parent_id: self.parent_id,
            name: self.name,
            is_trashed: self.is_trashed,
            ctime,
            mtime,
            kind,
            private: None,
        }
        .with_private(private))
    }

    /// Decode a row read through the blocking driver.
    pub fn from_rusqlite(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            parent_id: row.get("parent_id")?,
            name: row.get("name")?,
            is_directory: row.get("is_directory")?,
            is_trashed: row.get("is_trashed")?,
            ctime: row.get("ctime")?,
            mtime: row.get("mtime")?,
            mime_type: row.get("mime_type")?,
            hash: row.get("hash")?,
            size: row.get("size")?,
            is_image: row.get("is_image")?,
            is_video: row.get("is_video")?,
            width: row.get("width")?,
            height: row.get("height")?,
            ms_duration: row.get("ms_duration")?,
        })
    }
}

fn encode_time(id: &str, at: OffsetDateTime) -> MetadataResult<i64> {
    i64::try_from(at.unix_timestamp_nanos()).map_err(|_| {
        MetadataError::InvalidArgument(format!("node {id}: timestamp {at} out of range"))
    })
}

fn decode_time(id: &str, nanos: i64) -> MetadataResult<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(nanos))
        .map_err(|e| MetadataError::Integrity(format!("node {id}: invalid timestamp: {e}")))
}
