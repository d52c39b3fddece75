pub mod error;
pub mod manager;
pub mod optimistic;
pub mod pessimistic;
pub mod retry;
pub mod strategy;
pub mod usage;

pub use error::{QuotaError, QuotaScope};
pub use manager::QuotaManager;
pub use optimistic::OptimisticStrategy;
pub use pessimistic::PessimisticStrategy;
pub use retry::RetryPolicy;
pub use strategy::{build_strategy, QuotaStrategy, StrategyKind};
pub use usage::{QuotaUsage, UsageSnapshot};
