//! Metadata store error types.

use thiserror::Error;

/// SQLite primary result codes the store distinguishes.
/// Extended codes carry the primary code in their low byte.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;
const SQLITE_CONSTRAINT: i32 = 19;

/// Metadata store operation errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("lock timeout: {0}")]
    LockTimeout(String),

    #[error("integrity failure: {0}")]
    Integrity(String),

    #[error("database error: {0}")]
    Database(sqlx::Error),

    #[error("sqlite error: {0}")]
    Sqlite(rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for metadata operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;

/// Map a SQLite result code onto the store's taxonomy, if it has a dedicated variant.
fn classify(code: i32, message: &str) -> Option<MetadataError> {
    match code & 0xff {
        SQLITE_BUSY | SQLITE_LOCKED => Some(MetadataError::LockTimeout(message.to_string())),
        SQLITE_CONSTRAINT => Some(MetadataError::Integrity(message.to_string())),
        _ => None,
    }
}

impl From<sqlx::Error> for MetadataError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            let classified = db
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .and_then(|code| classify(code, db.message()));
            if let Some(classified) = classified {
                return classified;
            }
        }
        MetadataError::Database(err)
    }
}

impl From<rusqlite::Error> for MetadataError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(failure, message) = &err {
            let message = message.clone().unwrap_or_else(|| failure.to_string());
            if let Some(classified) = classify(failure.extended_code, &message) {
                return classified;
            }
        }
        MetadataError::Sqlite(err)
    }
}

impl From<canopy_core::Error> for MetadataError {
    fn from(err: canopy_core::Error) -> Self {
        match err {
            canopy_core::Error::InvalidPath(_) => MetadataError::InvalidArgument(err.to_string()),
            canopy_core::Error::InvalidNode { .. } => MetadataError::Integrity(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::ffi;

    fn sqlite_failure(code: i32) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(ffi::Error::new(code), Some("boom".to_string()))
    }

    #[test]
    fn test_busy_maps_to_lock_timeout() {
        let err: MetadataError = sqlite_failure(ffi::SQLITE_BUSY).into();
        assert!(matches!(err, MetadataError::LockTimeout(ref msg) if msg == "boom"));

        // SQLITE_BUSY_SNAPSHOT
        let err: MetadataError = sqlite_failure(517).into();
        assert!(matches!(err, MetadataError::LockTimeout(_)));
    }

    #[test]
    fn test_constraint_maps_to_integrity() {
        // SQLITE_CONSTRAINT_UNIQUE
        let err: MetadataError = sqlite_failure(2067).into();
        assert!(matches!(err, MetadataError::Integrity(_)));
    }

    #[test]
    fn test_other_codes_stay_driver_errors() {
        let err: MetadataError = sqlite_failure(ffi::SQLITE_CORRUPT).into();
        assert!(matches!(err, MetadataError::Sqlite(_)));

        let err: MetadataError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, MetadataError::Sqlite(_)));

        let err: MetadataError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, MetadataError::Database(_)));
    }

    #[test]
    fn test_core_errors_map_by_kind() {
        let err: MetadataError = canopy_core::Error::InvalidPath("x".to_string()).into();
        assert!(matches!(err, MetadataError::InvalidArgument(_)));

        let err: MetadataError = canopy_core::Error::InvalidNode {
            id: "1".to_string(),
            reason: "bad".to_string(),
        }
        .into();
        assert!(matches!(err, MetadataError::Integrity(_)));
    }
}
