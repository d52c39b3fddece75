use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rusqlite::Connection;
use tempfile::TempDir;

pub use storage_quota_ledger;
use storage_quota_ledger::{
    build_strategy, QuotaDatabase, QuotaKey, QuotaManager, RetryPolicy, StrategyKind,
};

/// A provisioned ledger in a throwaway directory, sized so benchmarks never
/// run out of quota.
pub struct LedgerBenchFixture {
    pub manager: QuotaManager,
    pub key: QuotaKey,
    pub temp_dir: TempDir,
}

impl LedgerBenchFixture {
    pub fn new(kind: StrategyKind) -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let database = QuotaDatabase::new(temp_dir.path().to_path_buf(), Duration::from_secs(5))?;
        let strategy = build_strategy(kind, RetryPolicy::default());
        let manager = QuotaManager::with_strategy(Arc::new(database), strategy);

        let key = QuotaKey::new(1, 1);
        manager.upsert_organisation_quota(key.org_id, i64::MAX as u64)?;
        manager.upsert_project_quota(key, i64::MAX as u64)?;

        Ok(Self {
            manager,
            key,
            temp_dir,
        })
    }

    pub fn connection(&self) -> Result<Connection> {
        Ok(self.manager.open_connection()?)
    }

    /// Reserves and immediately releases `size_bytes`, so repeated calls leave
    /// the counters where they started.
    pub fn reserve_release(&self, conn: &mut Connection, size_bytes: u64) -> Result<()> {
        if self.manager.strategy_kind().joins_caller_transaction() {
            let unit = self.manager.begin_unit(conn)?;
            self.manager.reserve(&unit, self.key, size_bytes)?;
            self.manager.release(&unit, self.key, size_bytes)?;
            unit.commit()?;
        } else {
            self.manager.reserve(conn, self.key, size_bytes)?;
            self.manager.release(conn, self.key, size_bytes)?;
        }
        Ok(())
    }
}
