//! Transactions on the native async driver (sqlx).

use super::TxnMode;
use crate::error::{MetadataError, MetadataResult};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteSynchronous};
use sqlx::Connection;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::time::Duration;

/// Open a fresh connection to `dsn` for a transaction of the given mode.
///
/// Read-only connections are opened with `SQLITE_OPEN_READONLY`; read-write
/// connections create the file if needed.
pub(crate) async fn connect(
    dsn: &Path,
    timeout: Duration,
    mode: TxnMode,
) -> MetadataResult<SqliteConnection> {
    let options = SqliteConnectOptions::new()
        .filename(dsn)
        .busy_timeout(timeout);
    let options = match mode {
        TxnMode::ReadOnly => options.read_only(true),
        TxnMode::ReadWrite => options
            .create_if_missing(true)
            .synchronous(SqliteSynchronous::Normal),
    };
    Ok(SqliteConnection::connect_with(&options).await?)
}

/// A live transaction owning its connection.
///
/// Derefs to the connection, so statements run as `query.execute(&mut *txn)`.
/// End it with [`complete`](Self::complete), [`commit`](Self::commit) or
/// [`rollback`](Self::rollback). Dropping it instead closes the connection,
/// which makes SQLite discard the open transaction.
#[derive(Debug)]
pub struct Transaction {
    conn: SqliteConnection,
    mode: TxnMode,
}

impl Transaction {
    /// Begin a read-only transaction. Never waits on other transactions.
    pub async fn read_only(dsn: &Path, timeout: Duration) -> MetadataResult<Self> {
        Self::begin(dsn, timeout, TxnMode::ReadOnly).await
    }

    /// Begin a read-write transaction, waiting up to `timeout` for the write lock.
    pub async fn read_write(dsn: &Path, timeout: Duration) -> MetadataResult<Self> {
        Self::begin(dsn, timeout, TxnMode::ReadWrite).await
    }

    async fn begin(dsn: &Path, timeout: Duration, mode: TxnMode) -> MetadataResult<Self> {
        let mut conn = connect(dsn, timeout, mode).await?;
        sqlx::query(mode.begin_statement())
            .execute(&mut conn)
            .await?;
        tracing::debug!(dsn = %dsn.display(), %mode, "transaction started");
        Ok(Self { conn, mode })
    }

    pub fn mode(&self) -> TxnMode {
        self.mode
    }

    /// Commit and release the connection.
    pub async fn commit(self) -> MetadataResult<()> {
        self.finish("COMMIT").await
    }

    /// Roll back and release the connection.
    pub async fn rollback(self) -> MetadataResult<()> {
        self.finish("ROLLBACK").await
    }

    /// End the transaction according to the outcome of the work done in it.
    ///
    /// `Ok` commits; a failed commit replaces the value with its error.
    /// `Err` rolls back before the error is handed back unchanged.
    pub async fn complete<T>(self, result: MetadataResult<T>) -> MetadataResult<T> {
        match result {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(err) => {
                let mode = self.mode;
                if let Err(rollback_err) = self.rollback().await {
                    tracing::warn!(%mode, error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }

    async fn finish(self, statement: &'static str) -> MetadataResult<()> {
        let Self { mut conn, mode } = self;
        let outcome = sqlx::query(statement).execute(&mut conn).await;
        let closed = conn.close().await;
        outcome?;
        closed.map_err(MetadataError::from)?;
        tracing::debug!(%mode, statement, "transaction finished");
        Ok(())
    }
}

impl Deref for Transaction {
    type Target = SqliteConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for Transaction {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}
