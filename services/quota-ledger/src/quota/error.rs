use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaScope {
    Project,
    Organisation,
}

impl fmt::Display for QuotaScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuotaScope::Project => f.write_str("project"),
            QuotaScope::Organisation => f.write_str("organisation"),
        }
    }
}

#[derive(Debug, Error)]
pub enum QuotaError {
    #[error("storage quota not provisioned for org={org_id}{}", project_suffix(.project_id))]
    NotProvisioned {
        org_id: i64,
        project_id: Option<i64>,
    },
    #[error(
        "{scope} storage quota exceeded for org={org_id} project={project_id}: \
         requested={requested}, remaining={remaining}"
    )]
    Exceeded {
        scope: QuotaScope,
        org_id: i64,
        project_id: i64,
        requested: u64,
        remaining: u64,
    },
    #[error("concurrent update on org={org_id} project={project_id} after {attempts} attempts")]
    ConcurrencyConflict {
        org_id: i64,
        project_id: i64,
        attempts: u32,
    },
    #[error("pessimistic quota reservation must run inside the caller's transaction")]
    TransactionRequired,
    #[error("optimistic quota update must not run inside an open transaction")]
    NestedTransaction,
    #[error("storage error: {0}")]
    StorageError(#[from] StorageError),
}

fn project_suffix(project_id: &Option<i64>) -> String {
    match project_id {
        Some(id) => format!(" project={id}"),
        None => String::new(),
    }
}

impl From<rusqlite::Error> for QuotaError {
    fn from(err: rusqlite::Error) -> Self {
        QuotaError::StorageError(StorageError::from(err))
    }
}

impl QuotaError {
    /// Transient failures may succeed when the same call is repeated.
    pub fn is_transient(&self) -> bool {
        matches!(self, QuotaError::ConcurrencyConflict { .. })
    }
}
