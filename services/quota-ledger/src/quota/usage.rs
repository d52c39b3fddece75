use serde::{Deserialize, Serialize};

use crate::storage::{OrganisationQuota, ProjectQuota};

/// Limit and consumption of one ledger row, as seen after an engine call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaUsage {
    pub max_bytes: u64,
    pub used_bytes: u64,
}

impl QuotaUsage {
    pub fn new(max_bytes: u64, used_bytes: u64) -> Self {
        Self {
            max_bytes,
            used_bytes,
        }
    }

    pub fn remaining_bytes(&self) -> u64 {
        self.max_bytes.saturating_sub(self.used_bytes)
    }

    pub fn has_capacity(&self, size_bytes: u64) -> bool {
        self.used_bytes
            .checked_add(size_bytes)
            .is_some_and(|total| total <= self.max_bytes)
    }

    pub(crate) fn incremented(&self, size_bytes: u64) -> Self {
        Self::new(self.max_bytes, self.used_bytes.saturating_add(size_bytes))
    }

    /// Decrements never go below zero.
    pub(crate) fn decremented(&self, size_bytes: u64) -> Self {
        Self::new(self.max_bytes, self.used_bytes.saturating_sub(size_bytes))
    }
}

impl From<&ProjectQuota> for QuotaUsage {
    fn from(row: &ProjectQuota) -> Self {
        Self::new(row.max_bytes, row.used_bytes)
    }
}

impl From<&OrganisationQuota> for QuotaUsage {
    fn from(row: &OrganisationQuota) -> Self {
        Self::new(row.max_bytes, row.used_bytes)
    }
}

/// Both counters after a reserve or release. A release may touch rows that do
/// not exist, hence the options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub project: Option<QuotaUsage>,
    pub organisation: Option<QuotaUsage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_is_inclusive() {
        let usage = QuotaUsage::new(500, 400);
        assert!(usage.has_capacity(100));
        assert!(!usage.has_capacity(101));
        assert_eq!(usage.remaining_bytes(), 100);
        assert_eq!(usage.incremented(100).remaining_bytes(), 0);
    }

    #[test]
    fn test_capacity_check_does_not_overflow() {
        let usage = QuotaUsage::new(u64::MAX, 10);
        assert!(!usage.has_capacity(u64::MAX));
    }

    #[test]
    fn test_decrement_clamps_at_zero() {
        let usage = QuotaUsage::new(500, 40);
        assert_eq!(usage.decremented(100).used_bytes, 0);
        assert_eq!(usage.decremented(15).used_bytes, 25);
    }

    #[test]
    fn test_over_limit_row_has_no_remaining_capacity() {
        // over-limit rows appear after a limit is lowered below current usage
        let usage = QuotaUsage::new(100, 150);
        assert_eq!(usage.remaining_bytes(), 0);
        assert!(!usage.has_capacity(1));
    }
}
