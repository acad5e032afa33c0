//! Unlock constraints for transaction outputs.

use crate::constants::MAX_BLOCK_NUMBER;

/// Minimum chain position `(height, timestamp)` at which locked outputs
/// become spendable.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct EligibleIndex {
    pub height: u32,
    pub timestamp: u64,
}

impl EligibleIndex {
    /// No constraint, satisfied by every index.
    pub const ALWAYS: EligibleIndex = EligibleIndex {
        height: 0,
        timestamp: 0,
    };

    /// Unreachable constraint.
    pub const NEVER: EligibleIndex = EligibleIndex {
        height: u32::MAX,
        timestamp: u64::MAX,
    };

    pub const fn new(height: u32, timestamp: u64) -> Self {
        Self { height, timestamp }
    }

    /// Least permissive index satisfying both constraints.
    pub fn lower_bound(lhs: EligibleIndex, rhs: EligibleIndex) -> EligibleIndex {
        EligibleIndex {
            height: lhs.height.max(rhs.height),
            timestamp: lhs.timestamp.max(rhs.timestamp),
        }
    }

    pub fn is_satisfied_by_index(&self, current: &EligibleIndex) -> bool {
        self.height <= current.height && self.timestamp <= current.timestamp
    }

    /// Interprets a transaction unlock time. Values below `MAX_BLOCK_NUMBER`
    /// lock by height, larger values by timestamp.
    pub fn from_unlock_time(unlock_time: u64) -> Self {
        if unlock_time < u64::from(MAX_BLOCK_NUMBER) {
            EligibleIndex::new(unlock_time as u32, 0)
        } else {
            EligibleIndex::new(0, unlock_time)
        }
    }

    pub fn combine<I>(indices: I) -> EligibleIndex
    where
        I: IntoIterator<Item = EligibleIndex>,
    {
        indices
            .into_iter()
            .fold(EligibleIndex::ALWAYS, EligibleIndex::lower_bound)
    }
}

impl Default for EligibleIndex {
    fn default() -> Self {
        EligibleIndex::ALWAYS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlock_time_boundary() {
        assert_eq!(
            EligibleIndex::from_unlock_time(1_000),
            EligibleIndex::new(1_000, 0)
        );
        let ts = u64::from(MAX_BLOCK_NUMBER);
        assert_eq!(EligibleIndex::from_unlock_time(ts), EligibleIndex::new(0, ts));
    }

    #[test]
    fn combine_of_nothing_is_always() {
        assert_eq!(
            EligibleIndex::combine(std::iter::empty()),
            EligibleIndex::ALWAYS
        );
        let combined = EligibleIndex::combine([
            EligibleIndex::new(10, 0),
            EligibleIndex::new(3, 99),
        ]);
        assert_eq!(combined, EligibleIndex::new(10, 99));
    }

    #[test]
    fn never_rejects_finite_positions() {
        let almost = EligibleIndex::new(u32::MAX - 1, u64::MAX - 1);
        assert!(!EligibleIndex::NEVER.is_satisfied_by_index(&almost));
        assert!(EligibleIndex::ALWAYS.is_satisfied_by_index(&EligibleIndex::ALWAYS));
    }
}
