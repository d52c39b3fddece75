use thiserror::Error;

use crate::quota::QuotaError;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error(transparent)]
    Quota(#[from] QuotaError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("failed to persist object bytes: {0}")]
    Persist(anyhow::Error),
    #[error("stored object {0} not found or already deleted")]
    ObjectNotFound(i64),
}

impl From<rusqlite::Error> for AdmissionError {
    fn from(err: rusqlite::Error) -> Self {
        AdmissionError::Storage(StorageError::from(err))
    }
}
