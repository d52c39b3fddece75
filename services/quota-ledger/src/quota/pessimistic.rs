use rusqlite::Connection;
use tracing::debug;

use crate::storage::{ledger, OrganisationQuota, ProjectQuota, QuotaKey};

use super::error::{QuotaError, QuotaScope};
use super::strategy::{ensure_capacity, ensure_storable, QuotaStrategy, StrategyKind};
use super::usage::{QuotaUsage, UsageSnapshot};

/// Lock-based reservations that join the caller's transaction.
///
/// Nothing is committed here. The increment lives and dies with the caller's
/// transaction, so a rollback after a failed store needs no compensation.
#[derive(Debug, Default, Clone)]
pub struct PessimisticStrategy;

struct LockedRows {
    project: Option<ProjectQuota>,
    organisation: Option<OrganisationQuota>,
}

impl PessimisticStrategy {
    pub fn new() -> Self {
        Self
    }

    /// The only place both rows are locked: project first, then its
    /// organisation. `after_project` runs between the two acquisitions.
    fn lock_rows<F>(
        conn: &Connection,
        key: QuotaKey,
        after_project: F,
    ) -> Result<LockedRows, QuotaError>
    where
        F: FnOnce(Option<&ProjectQuota>) -> Result<(), QuotaError>,
    {
        let project = ledger::lock_project(conn, key)?;
        after_project(project.as_ref())?;
        let organisation = ledger::lock_organisation(conn, key.org_id)?;
        Ok(LockedRows {
            project,
            organisation,
        })
    }
}

fn ensure_in_transaction(conn: &Connection) -> Result<(), QuotaError> {
    if conn.is_autocommit() {
        return Err(QuotaError::TransactionRequired);
    }
    Ok(())
}

impl QuotaStrategy for PessimisticStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Pessimistic
    }

    fn reserve(
        &self,
        conn: &Connection,
        key: QuotaKey,
        size_bytes: u64,
    ) -> Result<UsageSnapshot, QuotaError> {
        ensure_in_transaction(conn)?;
        ensure_storable(size_bytes)?;

        let rows = Self::lock_rows(conn, key, |project| {
            let project = project.ok_or(QuotaError::NotProvisioned {
                org_id: key.org_id,
                project_id: Some(key.project_id),
            })?;
            ensure_capacity(QuotaScope::Project, key, project.into(), size_bytes)
        })?;

        let (Some(project), Some(organisation)) = (rows.project, rows.organisation) else {
            return Err(QuotaError::NotProvisioned {
                org_id: key.org_id,
                project_id: None,
            });
        };
        let org_usage = QuotaUsage::from(&organisation);
        ensure_capacity(QuotaScope::Organisation, key, org_usage, size_bytes)?;

        let project_usage = QuotaUsage::from(&project).incremented(size_bytes);
        let org_usage = org_usage.incremented(size_bytes);
        ledger::store_project_usage(conn, key, project_usage.used_bytes, None)?;
        ledger::store_organisation_usage(conn, key.org_id, org_usage.used_bytes, None)?;

        debug!(
            org_id = key.org_id,
            project_id = key.project_id,
            size_bytes,
            org_used = org_usage.used_bytes,
            org_max = org_usage.max_bytes,
            project_used = project_usage.used_bytes,
            project_max = project_usage.max_bytes,
            "quota reserved"
        );

        Ok(UsageSnapshot {
            project: Some(project_usage),
            organisation: Some(org_usage),
        })
    }

    fn release(
        &self,
        conn: &Connection,
        key: QuotaKey,
        size_bytes: u64,
    ) -> Result<UsageSnapshot, QuotaError> {
        ensure_in_transaction(conn)?;
        ensure_storable(size_bytes)?;

        let rows = Self::lock_rows(conn, key, |_| Ok(()))?;
        let mut snapshot = UsageSnapshot::default();

        if let Some(project) = rows.project {
            let usage = QuotaUsage::from(&project).decremented(size_bytes);
            ledger::store_project_usage(conn, key, usage.used_bytes, None)?;
            snapshot.project = Some(usage);
        }
        if let Some(organisation) = rows.organisation {
            let usage = QuotaUsage::from(&organisation).decremented(size_bytes);
            ledger::store_organisation_usage(conn, key.org_id, usage.used_bytes, None)?;
            snapshot.organisation = Some(usage);
        }

        debug!(
            org_id = key.org_id,
            project_id = key.project_id,
            size_bytes,
            "quota released"
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{provisioned_ledger, usage_of};
    use rusqlite::TransactionBehavior;

    #[test]
    fn test_reserve_outside_transaction_fails_loudly() {
        let (_dir, db, key) = provisioned_ledger((1_000, 0), (500, 0));
        let conn = db.open_connection().unwrap();
        let result = PessimisticStrategy::new().reserve(&conn, key, 10);
        assert!(matches!(result, Err(QuotaError::TransactionRequired)));
        let result = PessimisticStrategy::new().release(&conn, key, 10);
        assert!(matches!(result, Err(QuotaError::TransactionRequired)));
        assert_eq!(usage_of(&db, key), ((0, 500), (0, 1_000)));
    }

    #[test]
    fn test_reserve_release_scenario() {
        let (_dir, db, key) = provisioned_ledger((1_000, 900), (500, 400));
        let strategy = PessimisticStrategy::new();
        let mut conn = db.open_connection().unwrap();

        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .unwrap();
        let snapshot = strategy.reserve(&tx, key, 100).unwrap();
        tx.commit().unwrap();
        assert_eq!(snapshot.project, Some(QuotaUsage::new(500, 500)));
        assert_eq!(snapshot.organisation, Some(QuotaUsage::new(1_000, 1_000)));

        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .unwrap();
        let result = strategy.reserve(&tx, key, 1);
        drop(tx);
        match result {
            Err(QuotaError::Exceeded {
                scope, remaining, ..
            }) => {
                assert_eq!(scope, QuotaScope::Project);
                assert_eq!(remaining, 0);
            }
            other => panic!("expected project quota exceeded, got {other:?}"),
        }
        assert_eq!(usage_of(&db, key), ((500, 500), (1_000, 1_000)));

        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .unwrap();
        strategy.release(&tx, key, 500).unwrap();
        tx.commit().unwrap();
        assert_eq!(usage_of(&db, key), ((0, 500), (500, 1_000)));
    }

    #[test]
    fn test_organisation_scope_is_checked_after_project() {
        let (_dir, db, key) = provisioned_ledger((1_000, 950), (500, 0));
        let mut conn = db.open_connection().unwrap();
        let tx = conn.transaction().unwrap();

        let result = PessimisticStrategy::new().reserve(&tx, key, 51);
        match result {
            Err(QuotaError::Exceeded {
                scope, remaining, ..
            }) => {
                assert_eq!(scope, QuotaScope::Organisation);
                assert_eq!(remaining, 50);
            }
            other => panic!("expected organisation quota exceeded, got {other:?}"),
        }
        PessimisticStrategy::new().reserve(&tx, key, 50).unwrap();
        tx.commit().unwrap();
        assert_eq!(usage_of(&db, key), ((50, 500), (1_000, 1_000)));
    }

    #[test]
    fn test_unprovisioned_project_is_rejected() {
        let (_dir, db, key) = provisioned_ledger((1_000, 0), (500, 0));
        let mut conn = db.open_connection().unwrap();
        let tx = conn.transaction().unwrap();
        let missing = QuotaKey::new(key.org_id, key.project_id + 1);

        let result = PessimisticStrategy::new().reserve(&tx, missing, 1);
        assert!(matches!(
            result,
            Err(QuotaError::NotProvisioned {
                project_id: Some(_),
                ..
            })
        ));
    }

    #[test]
    fn test_rollback_discards_reservation() {
        let (_dir, db, key) = provisioned_ledger((1_000, 0), (500, 0));
        let mut conn = db.open_connection().unwrap();
        {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .unwrap();
            PessimisticStrategy::new().reserve(&tx, key, 300).unwrap();
            // dropped without commit
        }
        assert_eq!(usage_of(&db, key), ((0, 500), (0, 1_000)));
    }

    #[test]
    fn test_release_clamps_and_skips_missing_rows() {
        let (_dir, db, key) = provisioned_ledger((1_000, 30), (500, 20));
        let mut conn = db.open_connection().unwrap();
        let tx = conn.transaction().unwrap();
        let strategy = PessimisticStrategy::new();

        let snapshot = strategy.release(&tx, key, 25).unwrap();
        assert_eq!(snapshot.project, Some(QuotaUsage::new(500, 0)));
        assert_eq!(snapshot.organisation, Some(QuotaUsage::new(1_000, 5)));
        strategy.release(&tx, key, 25).unwrap();

        let unknown = strategy.release(&tx, QuotaKey::new(404, 1), 10).unwrap();
        assert_eq!(unknown, UsageSnapshot::default());
        tx.commit().unwrap();

        assert_eq!(usage_of(&db, key), ((0, 500), (0, 1_000)));
    }
}
