use std::sync::Arc;
use std::time::Duration;

use tempfile::{tempdir, TempDir};

use crate::storage::{ledger, QuotaDatabase, QuotaKey};

pub fn temp_database() -> (TempDir, Arc<QuotaDatabase>) {
    let dir = tempdir().expect("failed to create temp dir");
    let db = QuotaDatabase::new(dir.path().to_path_buf(), Duration::from_secs(5))
        .expect("database should open");
    (dir, Arc::new(db))
}

/// Organisation 1 with project 10, each given as `(max_bytes, used_bytes)`.
pub fn provisioned_ledger(
    organisation: (u64, u64),
    project: (u64, u64),
) -> (TempDir, Arc<QuotaDatabase>, QuotaKey) {
    let (dir, db) = temp_database();
    let key = QuotaKey::new(1, 10);
    db.upsert_organisation_quota(key.org_id, organisation.0).unwrap();
    db.upsert_project_quota(key, project.0).unwrap();

    let conn = db.open_connection().unwrap();
    ledger::store_organisation_usage(&conn, key.org_id, organisation.1, None).unwrap();
    ledger::store_project_usage(&conn, key, project.1, None).unwrap();
    (dir, db, key)
}

/// `((project_used, project_max), (org_used, org_max))`
pub fn usage_of(db: &QuotaDatabase, key: QuotaKey) -> ((u64, u64), (u64, u64)) {
    let project = db.get_project_quota(key).unwrap().unwrap();
    let organisation = db.get_organisation_quota(key.org_id).unwrap().unwrap();
    (
        (project.used_bytes, project.max_bytes),
        (organisation.used_bytes, organisation.max_bytes),
    )
}
