use rusqlite::Connection;
use tracing::{error, info};

use crate::quota::QuotaManager;
use crate::storage::{objects, QuotaKey, StoredObject};

use super::error::AdmissionError;

/// Admits and removes stored objects while keeping the quota counters honest.
///
/// With a strategy that joins the caller's transaction, the reservation, the
/// byte write and the object record form one unit: any failure rolls all of it
/// back. Otherwise the reservation commits first and a later failure is
/// compensated with an explicit release.
#[derive(Clone)]
pub struct ObjectAdmission {
    manager: QuotaManager,
}

impl ObjectAdmission {
    pub fn new(manager: QuotaManager) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &QuotaManager {
        &self.manager
    }

    /// `persist` writes the bytes to the backing store. It runs after the
    /// reservation and before the object record is committed.
    pub fn admit<F>(
        &self,
        conn: &mut Connection,
        key: QuotaKey,
        object_key: &str,
        size_bytes: u64,
        persist: F,
    ) -> Result<StoredObject, AdmissionError>
    where
        F: FnOnce() -> anyhow::Result<()>,
    {
        if self.manager.strategy_kind().joins_caller_transaction() {
            let unit = self.manager.begin_unit(conn)?;
            self.manager.reserve(&unit, key, size_bytes)?;
            persist().map_err(AdmissionError::Persist)?;
            let object = objects::insert_object(&unit, key, object_key, size_bytes)?;
            unit.commit()?;
            info!(%key, object_id = object.id, size_bytes, "object admitted");
            return Ok(object);
        }

        self.manager.reserve(conn, key, size_bytes)?;
        let stored = persist()
            .map_err(AdmissionError::Persist)
            .and_then(|()| Ok(objects::insert_object(conn, key, object_key, size_bytes)?));

        match stored {
            Ok(object) => {
                info!(%key, object_id = object.id, size_bytes, "object admitted");
                Ok(object)
            }
            Err(err) => {
                self.compensate(conn, key, size_bytes);
                Err(err)
            }
        }
    }

    /// Soft-deletes the object and releases its bytes.
    pub fn remove(
        &self,
        conn: &mut Connection,
        object_id: i64,
    ) -> Result<StoredObject, AdmissionError> {
        if self.manager.strategy_kind().joins_caller_transaction() {
            let unit = self.manager.begin_unit(conn)?;
            let object = objects::mark_deleted(&unit, object_id)?
                .ok_or(AdmissionError::ObjectNotFound(object_id))?;
            self.manager.release(&unit, object.key(), object.size_bytes)?;
            unit.commit()?;
            info!(key = %object.key(), object_id, size_bytes = object.size_bytes, "object removed");
            return Ok(object);
        }

        let object = objects::mark_deleted(conn, object_id)?
            .ok_or(AdmissionError::ObjectNotFound(object_id))?;
        // the record is already gone; a failed release leaves drift for reconciliation
        if let Err(err) = self.manager.release(conn, object.key(), object.size_bytes) {
            error!(
                key = %object.key(),
                object_id,
                error = %err,
                "failed to release quota for removed object"
            );
        }
        info!(key = %object.key(), object_id, size_bytes = object.size_bytes, "object removed");
        Ok(object)
    }

    fn compensate(&self, conn: &Connection, key: QuotaKey, size_bytes: u64) {
        match self.manager.release(conn, key, size_bytes) {
            Ok(_) => info!(%key, size_bytes, "released reservation after failed admission"),
            Err(err) => error!(
                %key,
                size_bytes,
                error = %err,
                "compensating release failed; reconciliation will correct the drift"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::quota::{
        OptimisticStrategy, PessimisticStrategy, QuotaError, QuotaStrategy, RetryPolicy,
    };
    use crate::testing::{provisioned_ledger, usage_of};

    fn admission(
        db: &Arc<crate::storage::QuotaDatabase>,
        strategy: Arc<dyn QuotaStrategy>,
    ) -> ObjectAdmission {
        ObjectAdmission::new(QuotaManager::with_strategy(Arc::clone(db), strategy))
    }

    fn optimistic() -> Arc<dyn QuotaStrategy> {
        Arc::new(OptimisticStrategy::new(RetryPolicy {
            base_delay: Duration::from_millis(1),
            ..RetryPolicy::default()
        }))
    }

    #[test]
    fn test_pessimistic_admit_and_remove() {
        let (_dir, db, key) = provisioned_ledger((1_000, 0), (500, 0));
        let admission = admission(&db, Arc::new(PessimisticStrategy::new()));
        let mut conn = db.open_connection().unwrap();

        let object = admission
            .admit(&mut conn, key, "org-1/proj-10/a", 120, || Ok(()))
            .unwrap();
        assert_eq!(usage_of(&db, key), ((120, 500), (120, 1_000)));

        admission.remove(&mut conn, object.id).unwrap();
        assert_eq!(usage_of(&db, key), ((0, 500), (0, 1_000)));
        assert!(matches!(
            admission.remove(&mut conn, object.id),
            Err(AdmissionError::ObjectNotFound(_))
        ));
    }

    #[test]
    fn test_pessimistic_failure_rolls_back_everything() {
        let (_dir, db, key) = provisioned_ledger((1_000, 0), (500, 0));
        let admission = admission(&db, Arc::new(PessimisticStrategy::new()));
        let mut conn = db.open_connection().unwrap();

        let result = admission.admit(&mut conn, key, "k", 100, || anyhow::bail!("disk full"));
        assert!(matches!(result, Err(AdmissionError::Persist(_))));
        assert_eq!(usage_of(&db, key), ((0, 500), (0, 1_000)));
        assert_eq!(objects::sum_active_bytes(&conn, key).unwrap(), 0);

        // duplicate key fails on the record insert, after the reservation
        admission.admit(&mut conn, key, "dup", 10, || Ok(())).unwrap();
        let result = admission.admit(&mut conn, key, "dup", 10, || Ok(()));
        assert!(matches!(result, Err(AdmissionError::Storage(_))));
        assert_eq!(usage_of(&db, key), ((10, 500), (10, 1_000)));
    }

    #[test]
    fn test_optimistic_failure_is_compensated() {
        let (_dir, db, key) = provisioned_ledger((1_000, 0), (500, 0));
        let admission = admission(&db, optimistic());
        let mut conn = db.open_connection().unwrap();

        let result = admission.admit(&mut conn, key, "k", 100, || anyhow::bail!("upstream down"));
        assert!(matches!(result, Err(AdmissionError::Persist(_))));
        assert_eq!(usage_of(&db, key), ((0, 500), (0, 1_000)));

        let object = admission.admit(&mut conn, key, "k", 100, || Ok(())).unwrap();
        assert_eq!(usage_of(&db, key), ((100, 500), (100, 1_000)));
        admission.remove(&mut conn, object.id).unwrap();
        assert_eq!(usage_of(&db, key), ((0, 500), (0, 1_000)));
    }

    #[test]
    fn test_quota_rejection_skips_persist() {
        let (_dir, db, key) = provisioned_ledger((1_000, 0), (500, 490));
        let admission = admission(&db, Arc::new(PessimisticStrategy::new()));
        let mut conn = db.open_connection().unwrap();

        let mut persisted = false;
        let result = admission.admit(&mut conn, key, "big", 11, || {
            persisted = true;
            Ok(())
        });
        assert!(matches!(result, Err(AdmissionError::Quota(QuotaError::Exceeded { .. }))));
        assert!(!persisted);
    }
}
