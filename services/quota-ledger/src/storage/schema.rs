use rusqlite::Connection;

use super::error::StorageError;

pub const ORG_QUOTA_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS org_quota (
    org_id INTEGER PRIMARY KEY,
    max_bytes INTEGER NOT NULL CHECK (max_bytes >= 0),
    used_bytes INTEGER NOT NULL DEFAULT 0 CHECK (used_bytes >= 0),
    version INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

pub const PROJECT_QUOTA_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS project_quota (
    org_id INTEGER NOT NULL REFERENCES org_quota(org_id),
    project_id INTEGER NOT NULL,
    max_bytes INTEGER NOT NULL CHECK (max_bytes >= 0),
    used_bytes INTEGER NOT NULL DEFAULT 0 CHECK (used_bytes >= 0),
    version INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (org_id, project_id)
);
"#;

pub const STORED_OBJECTS_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS stored_objects (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    org_id INTEGER NOT NULL,
    project_id INTEGER NOT NULL,
    object_key TEXT NOT NULL UNIQUE,
    size_bytes INTEGER NOT NULL CHECK (size_bytes >= 0),
    status TEXT NOT NULL DEFAULT 'ACTIVE',
    created_at TEXT NOT NULL,
    deleted_at TEXT
);
"#;

pub const STORED_OBJECTS_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_objects_project_status ON stored_objects(org_id, project_id, status);
"#;

pub fn init_database(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(ORG_QUOTA_TABLE_SCHEMA)?;
    conn.execute_batch(PROJECT_QUOTA_TABLE_SCHEMA)?;
    conn.execute_batch(STORED_OBJECTS_TABLE_SCHEMA)?;
    conn.execute_batch(STORED_OBJECTS_INDEXES)?;
    Ok(())
}
