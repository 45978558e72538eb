//! Transactions on the synchronous driver (rusqlite).
//!
//! Every call here blocks the current thread, including the wait for the
//! write lock. Async callers go through [`crate::offload::Offload`].

use super::TxnMode;
use crate::error::MetadataResult;
use rusqlite::{Connection, OpenFlags, TransactionBehavior};
use std::path::Path;
use std::time::Duration;

/// Open a fresh connection to `dsn` for a transaction of the given mode.
pub(crate) fn connect(dsn: &Path, timeout: Duration, mode: TxnMode) -> MetadataResult<Connection> {
    let access = match mode {
        TxnMode::ReadOnly => OpenFlags::SQLITE_OPEN_READ_ONLY,
        TxnMode::ReadWrite => OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
    };
    // sqlx always opens with SQLITE_OPEN_URI; both drivers read `file:` names alike.
    let flags = access | OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI;

    let conn = Connection::open_with_flags(dsn, flags)?;
    conn.busy_timeout(timeout)?;
    if mode == TxnMode::ReadWrite {
        conn.pragma_update(None, "synchronous", "NORMAL")?;
    }
    Ok(conn)
}

/// Run `work` in a read-only transaction on its own connection.
pub fn read_only<T, F>(dsn: &Path, timeout: Duration, work: F) -> MetadataResult<T>
where
    F: FnOnce(&Connection) -> MetadataResult<T>,
{
    run(dsn, timeout, TxnMode::ReadOnly, work)
}

/// Run `work` in a read-write transaction on its own connection.
///
/// Waits up to `timeout` for the write lock. Commits if `work` succeeds;
/// otherwise rolls back before returning its error.
pub fn read_write<T, F>(dsn: &Path, timeout: Duration, work: F) -> MetadataResult<T>
where
    F: FnOnce(&Connection) -> MetadataResult<T>,
{
    run(dsn, timeout, TxnMode::ReadWrite, work)
}

fn run<T, F>(dsn: &Path, timeout: Duration, mode: TxnMode, work: F) -> MetadataResult<T>
where
    F: FnOnce(&Connection) -> MetadataResult<T>,
{
    let mut conn = connect(dsn, timeout, mode)?;
    let behavior = match mode {
        TxnMode::ReadOnly => TransactionBehavior::Deferred,
        TxnMode::ReadWrite => TransactionBehavior::Immediate,
    };
    let txn = conn.transaction_with_behavior(behavior)?;
    tracing::debug!(dsn = %dsn.display(), %mode, "transaction started");

    match work(&*txn) {
        Ok(value) => {
            txn.commit()?;
            tracing::debug!(%mode, "transaction committed");
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = txn.rollback() {
                tracing::warn!(%mode, error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}
