//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Metadata store configuration.
///
/// Both variants address a single SQLite file; they differ in which driver
/// talks to it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// Native async driver (sqlx).
    Native {
        /// Database file path.
        path: PathBuf,
        /// How long a writer waits for the write lock before failing.
        /// 0 fails immediately on contention.
        #[serde(default = "default_lock_timeout_ms")]
        lock_timeout_ms: u64,
    },
    /// Synchronous driver (rusqlite) run on a bounded worker pool.
    Blocking {
        /// Database file path.
        path: PathBuf,
        /// How long a writer waits for the write lock before failing.
        #[serde(default = "default_lock_timeout_ms")]
        lock_timeout_ms: u64,
        /// Maximum number of transactions running on workers at once.
        #[serde(default = "default_workers")]
        workers: usize,
    },
}

fn default_lock_timeout_ms() -> u64 {
    5000
}

fn default_workers() -> usize {
    4
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Native {
            path: PathBuf::from("./data/drive.sqlite"),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl MetadataConfig {
    /// Database file path.
    pub fn path(&self) -> &Path {
        match self {
            Self::Native { path, .. } | Self::Blocking { path, .. } => path,
        }
    }

    /// Replace the database file path, keeping the other settings.
    pub fn with_path(mut self, new_path: impl Into<PathBuf>) -> Self {
        match &mut self {
            Self::Native { path, .. } | Self::Blocking { path, .. } => *path = new_path.into(),
        }
        self
    }

    /// Write lock timeout as a Duration.
    pub fn lock_timeout(&self) -> Duration {
        match self {
            Self::Native {
                lock_timeout_ms, ..
            }
            | Self::Blocking {
                lock_timeout_ms, ..
            } => Duration::from_millis(*lock_timeout_ms),
        }
    }

    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.path().as_os_str().is_empty() {
            return Err("metadata config requires a non-empty 'path'".to_string());
        }
        match self {
            Self::Blocking { workers: 0, .. } => {
                Err("blocking metadata config requires 'workers' >= 1".to_string())
            }
            _ => Ok(()),
        }
    }
}
