use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::storage::QuotaKey;

use super::error::{QuotaError, QuotaScope};
use super::optimistic::OptimisticStrategy;
use super::pessimistic::PessimisticStrategy;
use super::retry::RetryPolicy;
use super::usage::{QuotaUsage, UsageSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    #[default]
    Pessimistic,
    Optimistic,
}

impl StrategyKind {
    /// Whether `reserve`/`release` run inside the caller's transaction. When
    /// false the caller must compensate with `release` if its own write fails.
    pub fn joins_caller_transaction(self) -> bool {
        matches!(self, StrategyKind::Pessimistic)
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Pessimistic => f.write_str("pessimistic"),
            StrategyKind::Optimistic => f.write_str("optimistic"),
        }
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pessimistic" | "locking" => Ok(StrategyKind::Pessimistic),
            "optimistic" | "versioned" => Ok(StrategyKind::Optimistic),
            other => Err(format!("unknown quota strategy: {other}")),
        }
    }
}

/// Reserve and release storage bytes against a project and its organisation.
///
/// Identity is always passed in; implementations never read ambient request
/// state. The connection is borrowed from the caller, which is what lets the
/// pessimistic strategy join the caller's transaction.
pub trait QuotaStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    fn reserve(
        &self,
        conn: &Connection,
        key: QuotaKey,
        size_bytes: u64,
    ) -> Result<UsageSnapshot, QuotaError>;

    /// Best-effort decrement, clamped at zero. Missing rows are skipped.
    fn release(
        &self,
        conn: &Connection,
        key: QuotaKey,
        size_bytes: u64,
    ) -> Result<UsageSnapshot, QuotaError>;
}

pub fn build_strategy(kind: StrategyKind, retry: RetryPolicy) -> Arc<dyn QuotaStrategy> {
    match kind {
        StrategyKind::Pessimistic => Arc::new(PessimisticStrategy::new()),
        StrategyKind::Optimistic => Arc::new(OptimisticStrategy::new(retry)),
    }
}

pub(crate) fn ensure_capacity(
    scope: QuotaScope,
    key: QuotaKey,
    usage: QuotaUsage,
    size_bytes: u64,
) -> Result<(), QuotaError> {
    if usage.has_capacity(size_bytes) {
        return Ok(());
    }
    Err(QuotaError::Exceeded {
        scope,
        org_id: key.org_id,
        project_id: key.project_id,
        requested: size_bytes,
        remaining: usage.remaining_bytes(),
    })
}

pub(crate) fn ensure_storable(size_bytes: u64) -> Result<(), QuotaError> {
    if size_bytes > i64::MAX as u64 {
        return Err(QuotaError::StorageError(
            crate::storage::StorageError::InvalidQuotaValue(format!(
                "size {size_bytes} does not fit the ledger"
            )),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_kind_from_str() {
        assert_eq!(
            "pessimistic".parse::<StrategyKind>().unwrap(),
            StrategyKind::Pessimistic
        );
        assert_eq!(
            "Optimistic".parse::<StrategyKind>().unwrap(),
            StrategyKind::Optimistic
        );
        assert!("eventual".parse::<StrategyKind>().is_err());
        assert_eq!(StrategyKind::default(), StrategyKind::Pessimistic);
    }

    #[test]
    fn test_build_strategy_matches_kind() {
        let strategy = build_strategy(StrategyKind::Optimistic, RetryPolicy::default());
        assert_eq!(strategy.kind(), StrategyKind::Optimistic);
        assert!(!strategy.kind().joins_caller_transaction());

        let strategy = build_strategy(StrategyKind::Pessimistic, RetryPolicy::default());
        assert!(strategy.kind().joins_caller_transaction());
    }
}
