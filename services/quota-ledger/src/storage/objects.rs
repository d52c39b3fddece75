//! Records of stored objects. The set of `ACTIVE` rows is the ground truth the
//! reconciliation job measures quota counters against.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::database::QuotaKey;
use super::error::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectStatus {
    Active,
    Deleted,
}

impl ObjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectStatus::Active => "ACTIVE",
            ObjectStatus::Deleted => "DELETED",
        }
    }
}

impl fmt::Display for ObjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(ObjectStatus::Active),
            "DELETED" => Ok(ObjectStatus::Deleted),
            other => Err(StorageError::InvalidQuotaValue(format!(
                "unknown object status {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    pub id: i64,
    pub org_id: i64,
    pub project_id: i64,
    pub object_key: String,
    pub size_bytes: u64,
    pub status: ObjectStatus,
    pub created_at: String,
    pub deleted_at: Option<String>,
}

impl StoredObject {
    pub fn key(&self) -> QuotaKey {
        QuotaKey::new(self.org_id, self.project_id)
    }
}

const OBJECT_COLUMNS: &str =
    "id, org_id, project_id, object_key, size_bytes, status, created_at, deleted_at";

fn object_from_row(row: &Row<'_>) -> rusqlite::Result<StoredObject> {
    let status: String = row.get(5)?;
    let status = status.parse::<ObjectStatus>().map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(err))
    })?;
    Ok(StoredObject {
        id: row.get(0)?,
        org_id: row.get(1)?,
        project_id: row.get(2)?,
        object_key: row.get(3)?,
        size_bytes: row.get::<_, i64>(4)? as u64,
        status,
        created_at: row.get(6)?,
        deleted_at: row.get(7)?,
    })
}

pub fn insert_object(
    conn: &Connection,
    key: QuotaKey,
    object_key: &str,
    size_bytes: u64,
) -> Result<StoredObject, StorageError> {
    let now = Utc::now().to_rfc3339();
    let sql = format!(
        r#"
        INSERT INTO stored_objects (org_id, project_id, object_key, size_bytes, status, created_at)
        VALUES (?1, ?2, ?3, ?4, 'ACTIVE', ?5)
        RETURNING {OBJECT_COLUMNS}
        "#
    );
    let object = conn.query_row(
        &sql,
        params![key.org_id, key.project_id, object_key, size_bytes as i64, now],
        object_from_row,
    )?;
    Ok(object)
}

pub fn find_object(conn: &Connection, id: i64) -> Result<Option<StoredObject>, StorageError> {
    let sql = format!("SELECT {OBJECT_COLUMNS} FROM stored_objects WHERE id = ?1");
    let object = conn
        .query_row(&sql, params![id], object_from_row)
        .optional()?;
    Ok(object)
}

/// Flips an active object to `DELETED`. Returns `None` when no active object
/// with that id exists, so a second delete of the same object is a no-op.
pub fn mark_deleted(conn: &Connection, id: i64) -> Result<Option<StoredObject>, StorageError> {
    let now = Utc::now().to_rfc3339();
    let sql = format!(
        r#"
        UPDATE stored_objects
        SET status = 'DELETED', deleted_at = ?2
        WHERE id = ?1 AND status = 'ACTIVE'
        RETURNING {OBJECT_COLUMNS}
        "#
    );
    let object = conn
        .query_row(&sql, params![id, now], object_from_row)
        .optional()?;
    Ok(object)
}

pub fn sum_active_bytes(conn: &Connection, key: QuotaKey) -> Result<u64, StorageError> {
    let total = conn.query_row(
        r#"
        SELECT COALESCE(SUM(size_bytes), 0)
        FROM stored_objects
        WHERE org_id = ?1 AND project_id = ?2 AND status = 'ACTIVE'
        "#,
        params![key.org_id, key.project_id],
        |row| row.get::<_, i64>(0),
    )?;
    Ok(total as u64)
}
