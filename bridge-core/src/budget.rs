//! Execution budgets
//!
//! Every invocation carries a caller-supplied budget. Work is charged against
//! it as the invocation runs; running out aborts the whole invocation, and the
//! staged state is discarded so nothing it did survives.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Units an invocation may spend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    limit: u64,
    used: u64,
}

impl Budget {
    /// Budget with `limit` units
    pub fn new(limit: u64) -> Self {
        Self { limit, used: 0 }
    }

    /// Units spent so far
    pub fn used(&self) -> u64 {
        self.used
    }

    /// Units still available
    pub fn remaining(&self) -> u64 {
        self.limit - self.used
    }

    /// Fail unless `units` are still available, without spending them
    pub fn ensure(&self, units: u64) -> Result<()> {
        if units > self.remaining() {
            return Err(Error::ResourceExhausted {
                required: units,
                available: self.remaining(),
            });
        }
        Ok(())
    }

    /// Spend `units`
    pub fn charge(&mut self, units: u64) -> Result<()> {
        self.ensure(units)?;
        self.used += units;
        Ok(())
    }
}

/// Price of each unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostSchedule {
    /// Charged once per mutating invocation
    pub invocation_base: u64,

    /// Writing a provision, outbound lock, transaction or watermark
    pub record_write: u64,

    /// One settlement attempt (single claim, batch item or resolution)
    pub claim_attempt: u64,
}

impl Default for CostSchedule {
    fn default() -> Self {
        Self {
            invocation_base: 21_000,
            record_write: 20_000,
            claim_attempt: 50_000,
        }
    }
}

impl CostSchedule {
    /// Budget needed for a batch claim over `max_count` items
    pub fn batch_claim(&self, max_count: usize) -> u64 {
        self.invocation_base
            .saturating_add(self.claim_attempt.saturating_mul(max_count as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_charge_until_exhausted() {
        let mut budget = Budget::new(100);
        budget.charge(60).unwrap();
        assert_eq!(budget.remaining(), 40);

        let err = budget.charge(50).unwrap_err();
        assert!(matches!(
            err,
            Error::ResourceExhausted {
                required: 50,
                available: 40
            }
        ));
        // Failed charge spends nothing
        assert_eq!(budget.used(), 60);
    }

    #[test]
    fn test_ensure_does_not_spend() {
        let budget = Budget::new(10);
        assert!(budget.ensure(10).is_ok());
        assert!(budget.ensure(11).is_err());
        assert_eq!(budget.used(), 0);
    }

    #[test]
    fn test_batch_claim_cost() {
        let costs = CostSchedule::default();
        assert_eq!(costs.batch_claim(0), costs.invocation_base);
        assert_eq!(
            costs.batch_claim(5),
            costs.invocation_base + 5 * costs.claim_attempt
        );
    }
}
