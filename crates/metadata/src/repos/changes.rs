//! Change-log application and cursor tracking.

use crate::error::MetadataResult;
use async_trait::async_trait;
use canopy_core::ChangeAction;

/// Write side used by the synchronization collaborator.
#[async_trait]
pub trait ChangeRepo: Send + Sync {
    /// Get the last applied change-log position, or `""` if none was applied.
    async fn get_current_cursor(&self) -> MetadataResult<String>;

    /// Apply `changes` in order and move the cursor to `new_cursor`, atomically.
    ///
    /// On failure nothing from the batch is visible and the cursor is unchanged,
    /// so the same batch can be replayed.
    async fn apply_changes(&self, changes: &[ChangeAction], new_cursor: &str)
    -> MetadataResult<()>;
}
