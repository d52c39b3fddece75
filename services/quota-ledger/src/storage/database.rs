use std::fmt;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};

use super::error::StorageError;
use super::ledger;
use super::schema::init_database;
use super::QUOTA_DB_FILENAME;

/// Explicit identity of a project ledger row. Every engine call carries one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuotaKey {
    pub org_id: i64,
    pub project_id: i64,
}

impl QuotaKey {
    pub fn new(org_id: i64, project_id: i64) -> Self {
        Self { org_id, project_id }
    }
}

impl fmt::Display for QuotaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "org={} project={}", self.org_id, self.project_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganisationQuota {
    pub org_id: i64,
    pub max_bytes: u64,
    pub used_bytes: u64,
    pub version: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectQuota {
    pub org_id: i64,
    pub project_id: i64,
    pub max_bytes: u64,
    pub used_bytes: u64,
    pub version: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl ProjectQuota {
    pub fn key(&self) -> QuotaKey {
        QuotaKey::new(self.org_id, self.project_id)
    }
}

/// Owns the ledger database file.
///
/// Administrative calls (provisioning, lookups) share one connection behind a
/// mutex. Request workers and background jobs open their own connections with
/// [`QuotaDatabase::open_connection`] so their transactions do not serialise on
/// the shared handle.
pub struct QuotaDatabase {
    db_path: PathBuf,
    busy_timeout: Duration,
    conn: Mutex<Connection>,
}

impl QuotaDatabase {
    pub fn new(data_dir: PathBuf, busy_timeout: Duration) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&data_dir)?;
        let db_path = data_dir.join(QUOTA_DB_FILENAME);
        let conn = Connection::open(&db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(busy_timeout)?;
        init_database(&conn)?;

        Ok(Self {
            db_path,
            busy_timeout,
            conn: Mutex::new(conn),
        })
    }

    pub fn open_connection(&self) -> Result<Connection, StorageError> {
        let conn = Connection::open(&self.db_path)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }

    fn shared(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::ConnectionPoisoned)
    }

    pub fn upsert_organisation_quota(
        &self,
        org_id: i64,
        max_bytes: u64,
    ) -> Result<OrganisationQuota, StorageError> {
        ensure_storable(max_bytes)?;
        let conn = self.shared()?;
        ledger::upsert_organisation(&conn, org_id, max_bytes)
    }

    /// Fails with [`StorageError::OrganisationNotFound`] when the parent row is missing.
    pub fn upsert_project_quota(
        &self,
        key: QuotaKey,
        max_bytes: u64,
    ) -> Result<ProjectQuota, StorageError> {
        ensure_storable(max_bytes)?;
        let mut conn = self.shared()?;
        // takes the write lock up front; a deferred read cannot be upgraded
        // once another writer has committed
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if ledger::find_organisation(&tx, key.org_id)?.is_none() {
            return Err(StorageError::OrganisationNotFound(key.org_id));
        }
        let project = ledger::upsert_project(&tx, key, max_bytes)?;
        tx.commit()?;
        Ok(project)
    }

    pub fn get_organisation_quota(
        &self,
        org_id: i64,
    ) -> Result<Option<OrganisationQuota>, StorageError> {
        let conn = self.shared()?;
        ledger::find_organisation(&conn, org_id)
    }

    pub fn get_project_quota(&self, key: QuotaKey) -> Result<Option<ProjectQuota>, StorageError> {
        let conn = self.shared()?;
        ledger::find_project(&conn, key)
    }

    pub fn list_organisation_projects(
        &self,
        org_id: i64,
    ) -> Result<Vec<ProjectQuota>, StorageError> {
        let conn = self.shared()?;
        ledger::list_projects_of(&conn, org_id)
    }
}

fn ensure_storable(max_bytes: u64) -> Result<(), StorageError> {
    if max_bytes > i64::MAX as u64 {
        return Err(StorageError::InvalidQuotaValue(format!(
            "max_bytes {max_bytes} does not fit the ledger"
        )));
    }
    Ok(())
}
