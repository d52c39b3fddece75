//! Row-level access to the quota ledger.
//!
//! Every function here works on a borrowed [`Connection`] so callers decide the
//! transaction boundary. A `Transaction` derefs to `Connection`, so the same
//! functions serve both autocommit reads and statements inside a caller's unit.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::database::{OrganisationQuota, ProjectQuota, QuotaKey};
use super::error::StorageError;

const ORG_COLUMNS: &str = "org_id, max_bytes, used_bytes, version, created_at, updated_at";
const PROJECT_COLUMNS: &str =
    "org_id, project_id, max_bytes, used_bytes, version, created_at, updated_at";

fn organisation_from_row(row: &Row<'_>) -> rusqlite::Result<OrganisationQuota> {
    Ok(OrganisationQuota {
        org_id: row.get(0)?,
        max_bytes: row.get::<_, i64>(1)? as u64,
        used_bytes: row.get::<_, i64>(2)? as u64,
        version: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<ProjectQuota> {
    Ok(ProjectQuota {
        org_id: row.get(0)?,
        project_id: row.get(1)?,
        max_bytes: row.get::<_, i64>(2)? as u64,
        used_bytes: row.get::<_, i64>(3)? as u64,
        version: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

pub fn find_organisation(
    conn: &Connection,
    org_id: i64,
) -> Result<Option<OrganisationQuota>, StorageError> {
    let sql = format!("SELECT {ORG_COLUMNS} FROM org_quota WHERE org_id = ?1");
    let row = conn
        .query_row(&sql, params![org_id], organisation_from_row)
        .optional()?;
    Ok(row)
}

pub fn find_project(
    conn: &Connection,
    key: QuotaKey,
) -> Result<Option<ProjectQuota>, StorageError> {
    let sql = format!(
        "SELECT {PROJECT_COLUMNS} FROM project_quota WHERE org_id = ?1 AND project_id = ?2"
    );
    let row = conn
        .query_row(&sql, params![key.org_id, key.project_id], project_from_row)
        .optional()?;
    Ok(row)
}

/// Takes the write lock on the project row and returns its current state.
///
/// SQLite has no row locks; a write statement against the row acquires the
/// database write lock, which is then held until the enclosing transaction ends.
pub fn lock_project(
    conn: &Connection,
    key: QuotaKey,
) -> Result<Option<ProjectQuota>, StorageError> {
    let sql = format!(
        "UPDATE project_quota SET version = version \
         WHERE org_id = ?1 AND project_id = ?2 RETURNING {PROJECT_COLUMNS}"
    );
    let row = conn
        .query_row(&sql, params![key.org_id, key.project_id], project_from_row)
        .optional()?;
    Ok(row)
}

pub fn lock_organisation(
    conn: &Connection,
    org_id: i64,
) -> Result<Option<OrganisationQuota>, StorageError> {
    let sql = format!(
        "UPDATE org_quota SET version = version WHERE org_id = ?1 RETURNING {ORG_COLUMNS}"
    );
    let row = conn
        .query_row(&sql, params![org_id], organisation_from_row)
        .optional()?;
    Ok(row)
}

/// Writes `used_bytes` and bumps the row version.
///
/// With `expected_version` set the write only lands if the row still carries
/// that version. Returns whether a row was updated.
pub fn store_project_usage(
    conn: &Connection,
    key: QuotaKey,
    used_bytes: u64,
    expected_version: Option<i64>,
) -> Result<bool, StorageError> {
    let now = Utc::now().to_rfc3339();
    let updated = conn.execute(
        r#"
        UPDATE project_quota
        SET used_bytes = ?3,
            version = version + 1,
            updated_at = ?4
        WHERE org_id = ?1 AND project_id = ?2 AND (?5 IS NULL OR version = ?5)
        "#,
        params![key.org_id, key.project_id, used_bytes as i64, now, expected_version],
    )?;
    Ok(updated == 1)
}

pub fn store_organisation_usage(
    conn: &Connection,
    org_id: i64,
    used_bytes: u64,
    expected_version: Option<i64>,
) -> Result<bool, StorageError> {
    let now = Utc::now().to_rfc3339();
    let updated = conn.execute(
        r#"
        UPDATE org_quota
        SET used_bytes = ?2,
            version = version + 1,
            updated_at = ?3
        WHERE org_id = ?1 AND (?4 IS NULL OR version = ?4)
        "#,
        params![org_id, used_bytes as i64, now, expected_version],
    )?;
    Ok(updated == 1)
}

pub fn upsert_organisation(
    conn: &Connection,
    org_id: i64,
    max_bytes: u64,
) -> Result<OrganisationQuota, StorageError> {
    let now = Utc::now().to_rfc3339();
    let sql = format!(
        r#"
        INSERT INTO org_quota (org_id, max_bytes, used_bytes, version, created_at, updated_at)
        VALUES (?1, ?2, 0, 0, ?3, ?3)
        ON CONFLICT(org_id) DO UPDATE SET
            max_bytes = excluded.max_bytes,
            version = version + 1,
            updated_at = excluded.updated_at
        RETURNING {ORG_COLUMNS}
        "#
    );
    let row = conn.query_row(&sql, params![org_id, max_bytes as i64, now], organisation_from_row)?;
    Ok(row)
}

/// The caller checks that the organisation row exists; the foreign key backs it up.
pub fn upsert_project(
    conn: &Connection,
    key: QuotaKey,
    max_bytes: u64,
) -> Result<ProjectQuota, StorageError> {
    let now = Utc::now().to_rfc3339();
    let sql = format!(
        r#"
        INSERT INTO project_quota
            (org_id, project_id, max_bytes, used_bytes, version, created_at, updated_at)
        VALUES (?1, ?2, ?3, 0, 0, ?4, ?4)
        ON CONFLICT(org_id, project_id) DO UPDATE SET
            max_bytes = excluded.max_bytes,
            version = version + 1,
            updated_at = excluded.updated_at
        RETURNING {PROJECT_COLUMNS}
        "#
    );
    let row = conn.query_row(
        &sql,
        params![key.org_id, key.project_id, max_bytes as i64, now],
        project_from_row,
    )?;
    Ok(row)
}

pub fn list_organisations(conn: &Connection) -> Result<Vec<OrganisationQuota>, StorageError> {
    let sql = format!("SELECT {ORG_COLUMNS} FROM org_quota ORDER BY org_id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], organisation_from_row)?;

    let mut organisations = Vec::new();
    for row in rows {
        organisations.push(row?);
    }
    Ok(organisations)
}

pub fn list_projects(conn: &Connection) -> Result<Vec<ProjectQuota>, StorageError> {
    let sql = format!("SELECT {PROJECT_COLUMNS} FROM project_quota ORDER BY org_id, project_id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], project_from_row)?;

    let mut projects = Vec::new();
    for row in rows {
        projects.push(row?);
    }
    Ok(projects)
}

pub fn list_projects_of(conn: &Connection, org_id: i64) -> Result<Vec<ProjectQuota>, StorageError> {
    let sql = format!(
        "SELECT {PROJECT_COLUMNS} FROM project_quota WHERE org_id = ?1 ORDER BY project_id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![org_id], project_from_row)?;

    let mut projects = Vec::new();
    for row in rows {
        projects.push(row?);
    }
    Ok(projects)
}

pub fn sum_project_usage(conn: &Connection, org_id: i64) -> Result<u64, StorageError> {
    let total = conn.query_row(
        "SELECT COALESCE(SUM(used_bytes), 0) FROM project_quota WHERE org_id = ?1",
        params![org_id],
        |row| row.get::<_, i64>(0),
    )?;
    Ok(total as u64)
}
