use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::debug;

use crate::storage::{ledger, QuotaKey, StorageError};

use super::error::{QuotaError, QuotaScope};
use super::retry::RetryPolicy;
use super::strategy::{ensure_capacity, ensure_storable, QuotaStrategy, StrategyKind};
use super::usage::{QuotaUsage, UsageSnapshot};

/// Version-checked reservations that commit on their own.
///
/// Each attempt reads both rows without locking, decides, then writes both in
/// one short transaction guarded by the versions it read. A lost race rolls
/// the attempt back and the whole cycle runs again under the retry policy.
#[derive(Debug, Clone)]
pub struct OptimisticStrategy {
    retry: RetryPolicy,
}

/// Target state for both rows, valid only while the read versions hold.
#[derive(Debug, Clone)]
struct PlannedWrite {
    key: QuotaKey,
    project: Option<(QuotaUsage, i64)>,
    organisation: Option<(QuotaUsage, i64)>,
}

impl OptimisticStrategy {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    fn plan_reserve(
        conn: &Connection,
        key: QuotaKey,
        size_bytes: u64,
    ) -> Result<PlannedWrite, QuotaError> {
        let project = ledger::find_project(conn, key)?.ok_or(QuotaError::NotProvisioned {
            org_id: key.org_id,
            project_id: Some(key.project_id),
        })?;
        let project_usage = QuotaUsage::from(&project);
        ensure_capacity(QuotaScope::Project, key, project_usage, size_bytes)?;

        let organisation =
            ledger::find_organisation(conn, key.org_id)?.ok_or(QuotaError::NotProvisioned {
                org_id: key.org_id,
                project_id: None,
            })?;
        let org_usage = QuotaUsage::from(&organisation);
        ensure_capacity(QuotaScope::Organisation, key, org_usage, size_bytes)?;

        Ok(PlannedWrite {
            key,
            project: Some((project_usage.incremented(size_bytes), project.version)),
            organisation: Some((org_usage.incremented(size_bytes), organisation.version)),
        })
    }

    fn plan_release(
        conn: &Connection,
        key: QuotaKey,
        size_bytes: u64,
    ) -> Result<PlannedWrite, QuotaError> {
        let project = ledger::find_project(conn, key)?
            .map(|row| (QuotaUsage::from(&row).decremented(size_bytes), row.version));
        let organisation = ledger::find_organisation(conn, key.org_id)?
            .map(|row| (QuotaUsage::from(&row).decremented(size_bytes), row.version));

        Ok(PlannedWrite {
            key,
            project,
            organisation,
        })
    }

    /// Writes the plan in one transaction, project row first. Any stale
    /// version aborts the whole write.
    fn apply(
        conn: &Connection,
        plan: &PlannedWrite,
        attempt: u32,
    ) -> Result<UsageSnapshot, QuotaError> {
        let key = plan.key;
        let conflict = || QuotaError::ConcurrencyConflict {
            org_id: key.org_id,
            project_id: key.project_id,
            attempts: attempt,
        };
        let busy_as_conflict = |err: StorageError| {
            if err.is_busy() {
                conflict()
            } else {
                QuotaError::StorageError(err)
            }
        };

        let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
            .map_err(|err| busy_as_conflict(err.into()))?;

        if let Some((usage, version)) = plan.project {
            let stored = ledger::store_project_usage(&tx, key, usage.used_bytes, Some(version))
                .map_err(busy_as_conflict)?;
            if !stored {
                return Err(conflict());
            }
        }
        if let Some((usage, version)) = plan.organisation {
            let stored =
                ledger::store_organisation_usage(&tx, key.org_id, usage.used_bytes, Some(version))
                    .map_err(busy_as_conflict)?;
            if !stored {
                return Err(conflict());
            }
        }

        tx.commit().map_err(|err| busy_as_conflict(err.into()))?;

        Ok(UsageSnapshot {
            project: plan.project.map(|(usage, _)| usage),
            organisation: plan.organisation.map(|(usage, _)| usage),
        })
    }
}

fn ensure_not_in_transaction(conn: &Connection) -> Result<(), QuotaError> {
    if !conn.is_autocommit() {
        return Err(QuotaError::NestedTransaction);
    }
    Ok(())
}

impl QuotaStrategy for OptimisticStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Optimistic
    }

    fn reserve(
        &self,
        conn: &Connection,
        key: QuotaKey,
        size_bytes: u64,
    ) -> Result<UsageSnapshot, QuotaError> {
        ensure_not_in_transaction(conn)?;
        ensure_storable(size_bytes)?;

        let snapshot = self.retry.run(
            |attempt| {
                let plan = Self::plan_reserve(conn, key, size_bytes)?;
                Self::apply(conn, &plan, attempt)
            },
            QuotaError::is_transient,
        )?;

        debug!(
            org_id = key.org_id,
            project_id = key.project_id,
            size_bytes,
            org_used = snapshot.organisation.map(|u| u.used_bytes),
            project_used = snapshot.project.map(|u| u.used_bytes),
            "quota reserved (optimistic)"
        );
        Ok(snapshot)
    }

    fn release(
        &self,
        conn: &Connection,
        key: QuotaKey,
        size_bytes: u64,
    ) -> Result<UsageSnapshot, QuotaError> {
        ensure_not_in_transaction(conn)?;
        ensure_storable(size_bytes)?;

        let snapshot = self.retry.run(
            |attempt| {
                let plan = Self::plan_release(conn, key, size_bytes)?;
                Self::apply(conn, &plan, attempt)
            },
            QuotaError::is_transient,
        )?;

        debug!(
            org_id = key.org_id,
            project_id = key.project_id,
            size_bytes,
            "quota released (optimistic)"
        );
        Ok(snapshot)
    }
}
