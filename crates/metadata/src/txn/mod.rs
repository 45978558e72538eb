//! Scoped transactions over a single SQLite file.
//!
//! Two drivers share one contract: open a connection, begin, run statements,
//! commit on success or roll back on error, release the connection.
//! - [`native`]: sqlx, suspends cooperatively.
//! - [`blocking`]: rusqlite, blocks the calling thread. Use it from async code
//!   through [`crate::offload`].
//!
//! Read-write transactions begin `IMMEDIATE`, so the write lock is taken up
//! front and contention is decided by the busy timeout: a writer waits up to
//! the caller's timeout and then fails with
//! [`MetadataError::LockTimeout`](crate::MetadataError::LockTimeout).
//! The database runs in WAL mode, so readers never wait on each other or on
//! the writer and always see a committed snapshot.

pub mod blocking;
pub mod native;

use std::fmt;

/// Locking mode of a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxnMode {
    ReadOnly,
    ReadWrite,
}

impl TxnMode {
    pub(crate) fn begin_statement(self) -> &'static str {
        match self {
            Self::ReadOnly => "BEGIN DEFERRED",
            Self::ReadWrite => "BEGIN IMMEDIATE",
        }
    }
}

impl fmt::Display for TxnMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadOnly => f.write_str("read-only"),
            Self::ReadWrite => f.write_str("read-write"),
        }
    }
}
