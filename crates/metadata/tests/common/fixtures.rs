//! Test fixtures for generating drive nodes.

use canopy_core::{FileInfo, Node, NodeKind, PrivateMap};
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use time::OffsetDateTime;

/// Counter for generating unique node ids.
static NODE_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generate a unique node id.
pub fn next_id(prefix: &str) -> String {
    let counter = NODE_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{counter:06}")
}

/// Random lowercase hex string, shaped like a content hash.
#[allow(dead_code)]
pub fn random_hash() -> String {
    let mut rng = rand::thread_rng();
    (0..32).map(|_| format!("{:x}", rng.gen_range(0..16u8))).collect()
}

/// Current time truncated to whole microseconds.
pub fn now() -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    now.replace_nanosecond(now.nanosecond() / 1_000 * 1_000)
        .expect("valid nanosecond")
}

#[allow(dead_code)]
pub fn root_node() -> Node {
    Node::root(next_id("root"), now())
}

#[allow(dead_code)]
pub fn dir_node(parent: &Node, name: &str) -> Node {
    Node::new(
        next_id("dir"),
        Some(parent.id.clone()),
        name,
        NodeKind::Directory,
        now(),
        now(),
    )
}

#[allow(dead_code)]
pub fn file_info(size: u64) -> FileInfo {
    FileInfo {
        mime_type: "application/octet-stream".to_string(),
        hash: random_hash(),
        size,
    }
}

#[allow(dead_code)]
pub fn file_node(parent: &Node, name: &str, size: u64) -> Node {
    Node::new(
        next_id("file"),
        Some(parent.id.clone()),
        name,
        NodeKind::File(file_info(size)),
        now(),
        now(),
    )
}

#[allow(dead_code)]
pub fn image_node(parent: &Node, name: &str) -> Node {
    let mut rng = rand::thread_rng();
    let file = FileInfo {
        mime_type: "image/png".to_string(),
        ..file_info(rng.gen_range(1..1_000_000))
    };
    Node::new(
        next_id("image"),
        Some(parent.id.clone()),
        name,
        NodeKind::Image {
            file,
            width: rng.gen_range(1..4096),
            height: rng.gen_range(1..4096),
        },
        now(),
        now(),
    )
}

#[allow(dead_code)]
pub fn video_node(parent: &Node, name: &str) -> Node {
    let mut rng = rand::thread_rng();
    let file = FileInfo {
        mime_type: "video/mp4".to_string(),
        ..file_info(rng.gen_range(1..10_000_000))
    };
    Node::new(
        next_id("video"),
        Some(parent.id.clone()),
        name,
        NodeKind::Video {
            file,
            width: 1920,
            height: 1080,
            ms_duration: rng.gen_range(1..600_000),
        },
        now(),
        now(),
    )
}

#[allow(dead_code)]
pub fn private(pairs: &[(&str, &str)]) -> PrivateMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
