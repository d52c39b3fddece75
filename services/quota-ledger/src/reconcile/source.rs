use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::storage::{objects, QuotaDatabase, QuotaKey, StorageError};

/// Read-only view of the authoritative record of stored objects.
pub trait ActiveObjectSource: Send + Sync {
    /// Total size of the objects currently active in the project.
    fn active_bytes(&self, key: QuotaKey) -> Result<u64, StorageError>;
}

/// Reads the `stored_objects` table of the ledger database over its own connection.
pub struct StoredObjectIndex {
    conn: Mutex<Connection>,
}

impl StoredObjectIndex {
    pub fn new(database: &Arc<QuotaDatabase>) -> Result<Self, StorageError> {
        Ok(Self {
            conn: Mutex::new(database.open_connection()?),
        })
    }
}

impl ActiveObjectSource for StoredObjectIndex {
    fn active_bytes(&self, key: QuotaKey) -> Result<u64, StorageError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| StorageError::ConnectionPoisoned)?;
        objects::sum_active_bytes(&conn, key)
    }
}
