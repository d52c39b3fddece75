use std::io;

use rusqlite;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),
    #[error("organisation {0} has no provisioned quota")]
    OrganisationNotFound(i64),
    #[error("invalid quota value: {0}")]
    InvalidQuotaValue(String),
    #[error("connection poisoned")]
    ConnectionPoisoned,
    #[error("io error: {0}")]
    IoError(#[from] io::Error),
}

impl StorageError {
    /// True when SQLite gave up waiting for the write lock.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            StorageError::DatabaseError(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::DatabaseBusy
        )
    }
}
