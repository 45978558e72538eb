//! Drive node value types and change-log actions.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;

/// Private key/value attributes attached to a node by the client.
pub type PrivateMap = BTreeMap<String, String>;

/// Content attributes shared by every non-directory node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub mime_type: String,
    pub hash: String,
    /// Size in bytes.
    pub size: u64,
}

/// What a node is. Media dimensions only exist on the variants that have them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NodeKind {
    Directory,
    File(FileInfo),
    Image {
        file: FileInfo,
        width: u32,
        height: u32,
    },
    Video {
        file: FileInfo,
        width: u32,
        height: u32,
        ms_duration: u64,
    },
}

/// Flat view of a [`NodeKind`], as stored in a table row.
///
/// Fields that do not apply to a kind are empty or zero.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KindFields {
    pub is_directory: bool,
    pub is_image: bool,
    pub is_video: bool,
    pub mime_type: String,
    pub hash: String,
    pub size: u64,
    pub width: u32,
    pub height: u32,
    pub ms_duration: u64,
}

impl KindFields {
    /// Rebuild the tagged kind, rejecting combinations it cannot represent.
    pub fn into_kind(self, id: &str) -> Result<NodeKind> {
        let invalid = |reason: &str| Error::InvalidNode {
            id: id.to_string(),
            reason: reason.to_string(),
        };

        if self.is_image && self.is_video {
            return Err(invalid("flagged as both image and video"));
        }

        if self.is_directory {
            if self.is_image || self.is_video {
                return Err(invalid("directory flagged as media"));
            }
            if !self.mime_type.is_empty() || !self.hash.is_empty() || self.size != 0 {
                return Err(invalid("directory carries file content attributes"));
            }
            if self.width != 0 || self.height != 0 || self.ms_duration != 0 {
                return Err(invalid("directory carries media dimensions"));
            }
            return Ok(NodeKind::Directory);
        }

        let file = FileInfo {
            mime_type: self.mime_type,
            hash: self.hash,
            size: self.size,
        };

        if self.is_video {
            return Ok(NodeKind::Video {
                file,
                width: self.width,
                height: self.height,
                ms_duration: self.ms_duration,
            });
        }

        if self.ms_duration != 0 {
            return Err(invalid("duration set on a non-video node"));
        }

        if self.is_image {
            return Ok(NodeKind::Image {
                file,
                width: self.width,
                height: self.height,
            });
        }

        if self.width != 0 || self.height != 0 {
            return Err(invalid("dimensions set on a plain file"));
        }

        Ok(NodeKind::File(file))
    }
}

impl NodeKind {
    /// Flatten into the row representation.
    pub fn fields(&self) -> KindFields {
        match self {
            Self::Directory => KindFields {
                is_directory: true,
                ..KindFields::default()
            },
            Self::File(file) => KindFields {
                mime_type: file.mime_type.clone(),
                hash: file.hash.clone(),
                size: file.size,
                ..KindFields::default()
            },
            Self::Image {
                file,
                width,
                height,
            } => KindFields {
                is_image: true,
                mime_type: file.mime_type.clone(),
                hash: file.hash.clone(),
                size: file.size,
                width: *width,
                height: *height,
                ..KindFields::default()
            },
            Self::Video {
                file,
                width,
                height,
                ms_duration,
            } => KindFields {
                is_video: true,
                mime_type: file.mime_type.clone(),
                hash: file.hash.clone(),
                size: file.size,
                width: *width,
                height: *height,
                ms_duration: *ms_duration,
                ..KindFields::default()
            },
        }
    }

    /// Content attributes, if this is not a directory.
    pub fn file(&self) -> Option<&FileInfo> {
        match self {
            Self::Directory => None,
            Self::File(file) | Self::Image { file, .. } | Self::Video { file, .. } => Some(file),
        }
    }
}

/// One entry of the mirrored drive tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    /// `None` only for the root.
    pub parent_id: Option<String>,
    /// Empty for the root.
    pub name: String,
    pub is_trashed: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub ctime: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub mtime: OffsetDateTime,
    #[serde(flatten)]
    pub kind: NodeKind,
    /// Client-private attributes; `None` when there are none.
    #[serde(
        default,
        deserialize_with = "non_empty_private",
        skip_serializing_if = "Option::is_none"
    )]
    pub private: Option<PrivateMap>,
}

/// Reads `"private": {}` as `None`.
fn non_empty_private<'de, D>(deserializer: D) -> std::result::Result<Option<PrivateMap>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let private = Option::<PrivateMap>::deserialize(deserializer)?;
    Ok(private.filter(|map| !map.is_empty()))
}

impl Node {
    /// Create an untrashed node without private attributes.
    pub fn new(
        id: impl Into<String>,
        parent_id: Option<String>,
        name: impl Into<String>,
        kind: NodeKind,
        ctime: OffsetDateTime,
        mtime: OffsetDateTime,
    ) -> Self {
        Self {
            id: id.into(),
            parent_id,
            name: name.into(),
            is_trashed: false,
            ctime,
            mtime,
            kind,
            private: None,
        }
    }

    /// Create an empty root directory.
    pub fn root(id: impl Into<String>, now: OffsetDateTime) -> Self {
        Self::new(id, None, "", NodeKind::Directory, now, now)
    }

    pub fn with_trashed(mut self, is_trashed: bool) -> Self {
        self.is_trashed = is_trashed;
        self
    }

    /// Attach private attributes. An empty map is stored as `None`.
    pub fn with_private(mut self, private: PrivateMap) -> Self {
        self.private = if private.is_empty() {
            None
        } else {
            Some(private)
        };
        self
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn is_directory(&self) -> bool {
        matches!(self.kind, NodeKind::Directory)
    }

    pub fn is_image(&self) -> bool {
        matches!(self.kind, NodeKind::Image { .. })
    }

    pub fn is_video(&self) -> bool {
        matches!(self.kind, NodeKind::Video { .. })
    }

    /// Size in bytes; 0 for directories.
    pub fn size(&self) -> u64 {
        self.kind.file().map_or(0, |file| file.size)
    }

    /// Content hash; empty for directories.
    pub fn hash(&self) -> &str {
        self.kind.file().map_or("", |file| file.hash.as_str())
    }

    pub fn mime_type(&self) -> &str {
        self.kind.file().map_or("", |file| file.mime_type.as_str())
    }
}

/// One entry of a remote change-log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ChangeAction {
    /// Insert the node, or fully replace the stored node with the same id.
    Upsert { node: Node },
    /// Remove the node with this id. Descendants are not touched.
    Remove { id: String },
}

impl ChangeAction {
    pub fn upsert(node: Node) -> Self {
        Self::Upsert { node }
    }

    pub fn remove(id: impl Into<String>) -> Self {
        Self::Remove { id: id.into() }
    }
}
