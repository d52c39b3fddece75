use std::sync::Arc;
use std::time::Duration;

use storage_quota_ledger::{
    OptimisticStrategy, PessimisticStrategy, QuotaDatabase, QuotaError, QuotaKey, QuotaManager,
    QuotaScope, QuotaStrategy, RetryPolicy,
};
use tempfile::{tempdir, TempDir};

fn manager(strategy: Arc<dyn QuotaStrategy>) -> (TempDir, QuotaManager) {
    let dir = tempdir().expect("failed to create temp dir");
    let database = QuotaDatabase::new(dir.path().to_path_buf(), Duration::from_secs(5))
        .expect("database should open");
    (dir, QuotaManager::with_strategy(Arc::new(database), strategy))
}

fn strategies() -> Vec<Arc<dyn QuotaStrategy>> {
    vec![
        Arc::new(PessimisticStrategy::new()),
        Arc::new(OptimisticStrategy::new(RetryPolicy::default())),
    ]
}

/// Runs one engine call the way the strategy expects to be called.
fn call(
    manager: &QuotaManager,
    reserve: bool,
    key: QuotaKey,
    size: u64,
) -> Result<(), QuotaError> {
    let mut conn = manager.open_connection()?;
    if manager.strategy_kind().joins_caller_transaction() {
        let unit = manager.begin_unit(&mut conn)?;
        if reserve {
            manager.reserve(&unit, key, size)?;
        } else {
            manager.release(&unit, key, size)?;
        }
        unit.commit()?;
    } else if reserve {
        manager.reserve(&conn, key, size)?;
    } else {
        manager.release(&conn, key, size)?;
    }
    Ok(())
}

fn used(manager: &QuotaManager, key: QuotaKey) -> (u64, u64) {
    (
        manager.project_quota(key).unwrap().unwrap().used_bytes,
        manager.organisation_quota(key.org_id).unwrap().unwrap().used_bytes,
    )
}

#[test]
fn reserve_to_the_byte_then_reject_then_release() {
    for strategy in strategies() {
        let (_dir, manager) = manager(strategy);
        let key = QuotaKey::new(1, 1);
        let other = QuotaKey::new(1, 2);
        manager.upsert_organisation_quota(1, 1_000).unwrap();
        manager.upsert_project_quota(key, 500).unwrap();
        manager.upsert_project_quota(other, 900).unwrap();

        // org at 900/1000 via a sibling project, this project at 400/500
        call(&manager, true, other, 500).unwrap();
        call(&manager, true, key, 400).unwrap();
        assert_eq!(used(&manager, key), (400, 900));

        call(&manager, true, key, 100).unwrap();
        assert_eq!(used(&manager, key), (500, 1_000));

        let err = call(&manager, true, key, 1).unwrap_err();
        assert!(matches!(
            err,
            QuotaError::Exceeded {
                scope: QuotaScope::Project,
                remaining: 0,
                requested: 1,
                ..
            }
        ));
        assert_eq!(used(&manager, key), (500, 1_000));

        call(&manager, false, key, 500).unwrap();
        assert_eq!(used(&manager, key), (0, 500));
    }
}

#[test]
fn failed_reservation_leaves_remaining_unchanged() {
    for strategy in strategies() {
        let (_dir, manager) = manager(strategy);
        let key = QuotaKey::new(5, 1);
        manager.upsert_organisation_quota(5, 100).unwrap();
        manager.upsert_project_quota(key, 80).unwrap();
        call(&manager, true, key, 30).unwrap();

        let err = call(&manager, true, key, 51).unwrap_err();
        match err {
            QuotaError::Exceeded { remaining, .. } => assert_eq!(remaining, 50),
            other => panic!("expected quota exceeded, got {other:?}"),
        }
        call(&manager, true, key, 50).unwrap();
        assert_eq!(used(&manager, key), (80, 80));
    }
}

#[test]
fn over_release_stops_at_zero() {
    for strategy in strategies() {
        let (_dir, manager) = manager(strategy);
        let key = QuotaKey::new(2, 2);
        manager.upsert_organisation_quota(2, 100).unwrap();
        manager.upsert_project_quota(key, 100).unwrap();

        call(&manager, true, key, 40).unwrap();
        call(&manager, false, key, 40).unwrap();
        call(&manager, false, key, 40).unwrap();
        call(&manager, false, key, 1).unwrap();
        assert_eq!(used(&manager, key), (0, 0));
    }
}

#[test]
fn unprovisioned_rows_are_configuration_errors() {
    for strategy in strategies() {
        let (_dir, manager) = manager(strategy);
        let err = call(&manager, true, QuotaKey::new(9, 9), 1).unwrap_err();
        assert!(matches!(err, QuotaError::NotProvisioned { org_id: 9, .. }));
        assert!(!err.is_transient());

        // releasing against missing rows is a harmless no-op
        call(&manager, false, QuotaKey::new(9, 9), 1).unwrap();
    }
}
