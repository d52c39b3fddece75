use std::sync::Arc;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::info;

use crate::config::QuotaServiceConfig;
use crate::storage::{OrganisationQuota, ProjectQuota, QuotaDatabase, QuotaKey, StorageError};

use super::error::QuotaError;
use super::strategy::{build_strategy, QuotaStrategy, StrategyKind};
use super::usage::UsageSnapshot;

/// Entry point for provisioning, lookups and the configured reservation strategy.
#[derive(Clone)]
pub struct QuotaManager {
    database: Arc<QuotaDatabase>,
    strategy: Arc<dyn QuotaStrategy>,
}

impl QuotaManager {
    pub fn new(database: Arc<QuotaDatabase>, config: &QuotaServiceConfig) -> Self {
        let strategy = build_strategy(config.strategy, config.retry_policy());
        Self::with_strategy(database, strategy)
    }

    pub fn with_strategy(database: Arc<QuotaDatabase>, strategy: Arc<dyn QuotaStrategy>) -> Self {
        Self { database, strategy }
    }

    pub fn database(&self) -> &Arc<QuotaDatabase> {
        &self.database
    }

    pub fn strategy_kind(&self) -> StrategyKind {
        self.strategy.kind()
    }

    pub fn open_connection(&self) -> Result<Connection, QuotaError> {
        Ok(self.database.open_connection()?)
    }

    /// Starts a unit of work holding the write lock from its first statement,
    /// which is what a pessimistic reservation expects to join.
    pub fn begin_unit<'c>(&self, conn: &'c mut Connection) -> Result<Transaction<'c>, QuotaError> {
        Ok(conn.transaction_with_behavior(TransactionBehavior::Immediate)?)
    }

    pub fn reserve(
        &self,
        conn: &Connection,
        key: QuotaKey,
        size_bytes: u64,
    ) -> Result<UsageSnapshot, QuotaError> {
        self.strategy.reserve(conn, key, size_bytes)
    }

    pub fn release(
        &self,
        conn: &Connection,
        key: QuotaKey,
        size_bytes: u64,
    ) -> Result<UsageSnapshot, QuotaError> {
        self.strategy.release(conn, key, size_bytes)
    }

    pub fn upsert_organisation_quota(
        &self,
        org_id: i64,
        max_bytes: u64,
    ) -> Result<OrganisationQuota, QuotaError> {
        let organisation = self.database.upsert_organisation_quota(org_id, max_bytes)?;
        info!(
            org_id,
            max_bytes,
            used_bytes = organisation.used_bytes,
            "provisioned organisation quota"
        );
        Ok(organisation)
    }

    pub fn upsert_project_quota(
        &self,
        key: QuotaKey,
        max_bytes: u64,
    ) -> Result<ProjectQuota, QuotaError> {
        let project = self
            .database
            .upsert_project_quota(key, max_bytes)
            .map_err(|err| match err {
                StorageError::OrganisationNotFound(org_id) => QuotaError::NotProvisioned {
                    org_id,
                    project_id: None,
                },
                other => QuotaError::StorageError(other),
            })?;
        info!(
            org_id = key.org_id,
            project_id = key.project_id,
            max_bytes,
            used_bytes = project.used_bytes,
            "provisioned project quota"
        );
        Ok(project)
    }

    pub fn organisation_quota(&self, org_id: i64) -> Result<Option<OrganisationQuota>, QuotaError> {
        Ok(self.database.get_organisation_quota(org_id)?)
    }

    pub fn project_quota(&self, key: QuotaKey) -> Result<Option<ProjectQuota>, QuotaError> {
        Ok(self.database.get_project_quota(key)?)
    }

    pub fn organisation_projects(&self, org_id: i64) -> Result<Vec<ProjectQuota>, QuotaError> {
        Ok(self.database.list_organisation_projects(org_id)?)
    }
}
