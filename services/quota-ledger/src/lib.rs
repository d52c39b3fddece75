pub mod admission;
pub mod api;
pub mod config;
pub mod quota;
pub mod reconcile;
pub mod storage;

#[cfg(test)]
mod testing;

pub use admission::{AdmissionError, ObjectAdmission};
pub use api::{create_router, ApiState, ErrorResponse};
pub use config::QuotaServiceConfig;
pub use quota::{
    build_strategy, OptimisticStrategy, PessimisticStrategy, QuotaError, QuotaManager,
    QuotaScope, QuotaStrategy, QuotaUsage, RetryPolicy, StrategyKind, UsageSnapshot,
};
pub use reconcile::{ActiveObjectSource, ReconciliationReport, Reconciler, StoredObjectIndex};
pub use storage::{
    ObjectStatus, OrganisationQuota, ProjectQuota, QuotaDatabase, QuotaKey, StorageError,
    StoredObject,
};
