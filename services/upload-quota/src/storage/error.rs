use std::io;

use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    IoError(#[from] io::Error),
    #[error("write conflict on {0}")]
    Conflict(String),
    #[error("reservation id {0} already exists")]
    DuplicateReservation(String),
    #[error("invalid record: {0}")]
    InvalidRecord(String),
    #[error("connection poisoned")]
    ConnectionPoisoned,
}

impl StorageError {
    /// Whether the failed operation left no trace and may simply be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Conflict(_) => true,
            StorageError::DatabaseError(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}
