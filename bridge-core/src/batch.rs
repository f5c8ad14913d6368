//! Batch claim processing
//!
//! Walks the candidate queue front to back and attempts up to `max_count`
//! payouts. A sequence whose timelock is still running is skipped without
//! using up an attempt. A rejected payout does not fail the batch: the
//! sequence's failure counter goes up and it is requeued, at the back of the
//! candidate queue or in the failure set once its retries are exhausted.
//!
//! Each sequence is visited at most once per batch, so a sequence requeued by
//! this batch waits for the next one.

use crate::{
    budget::{Budget, CostSchedule},
    ledger::{Requeue, SequenceLedger},
    rail::ValueRail,
    types::{Address, Amount, SeqNo},
    Error, Result,
};
use chrono::{DateTime, Utc};

/// Settled sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedItem {
    /// Sequence
    pub seq: SeqNo,
    /// Paid receiver
    pub receiver: Address,
    /// Paid amount
    pub amount: Amount,
}

/// Rejected payout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedItem {
    /// Sequence
    pub seq: SeqNo,
    /// Rejections so far
    pub failure_count: u32,
    /// Moved to the failure set
    pub unclaimable: bool,
}

/// What one batch did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Payout attempts made
    pub attempts: usize,
    /// Settled sequences, in visiting order
    pub claimed: Vec<ClaimedItem>,
    /// Rejected payouts, in visiting order
    pub failed: Vec<FailedItem>,
    /// Candidates skipped because their timelock is still running
    pub skipped: Vec<SeqNo>,
}

/// Run one batch against the ledger
///
/// The caller must have checked the budget against
/// [`CostSchedule::batch_claim`] already; every attempt is still charged as it
/// happens.
pub fn process_batch<R: ValueRail>(
    ledger: &mut SequenceLedger,
    rail: &mut R,
    budget: &mut Budget,
    costs: &CostSchedule,
    now: DateTime<Utc>,
    max_count: usize,
) -> Result<BatchReport> {
    let mut report = BatchReport::default();
    let queue = ledger.claim_candidates();

    for seq in queue {
        if report.attempts >= max_count {
            break;
        }

        let (receiver, amount, ready) = match ledger.provision_record(seq) {
            Some(record) => (record.receiver, record.amount, record.timelock.elapsed(now)),
            None => continue,
        };
        if !ready {
            report.skipped.push(seq);
            continue;
        }

        budget.charge(costs.claim_attempt)?;
        report.attempts += 1;

        match rail.transfer(ledger.account(), receiver, amount) {
            Ok(()) => {
                ledger.mark_claimed(seq)?;
                tracing::info!(seq, %receiver, %amount, "Batch claim settled");
                report.claimed.push(ClaimedItem {
                    seq,
                    receiver,
                    amount,
                });
            }
            Err(Error::TransferFailed(reason)) => {
                let (failure_count, requeue) = ledger.record_payout_failure(seq)?;
                let unclaimable = requeue == Requeue::Failure;
                tracing::warn!(seq, failure_count, unclaimable, reason = %reason, "Batch claim rejected");
                report.failed.push(FailedItem {
                    seq,
                    failure_count,
                    unclaimable,
                });
            }
            Err(other) => return Err(other),
        }
    }

    tracing::debug!(
        attempts = report.attempts,
        claimed = report.claimed.len(),
        failed = report.failed.len(),
        skipped = report.skipped.len(),
        "Batch finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::ledger::Origins;
    use crate::rail::{ContractBehavior, MemoryRail};
    use chrono::Duration;
    use rust_decimal::Decimal;

    struct Fixture {
        ledger: SequenceLedger,
        rail: MemoryRail,
        operator: Address,
        now: DateTime<Utc>,
    }

    fn fixture() -> Fixture {
        let operator = Address::derive("operator");
        let origins = Origins {
            operator,
            guardian: Address::derive("guardian"),
            judge: Address::derive("judge"),
        };
        let account = Address::derive("bridge");
        let now = Utc::now();
        let mut rail = MemoryRail::new();
        rail.mint(account, Decimal::from(100));
        let params = LedgerConfig {
            transfer_lock_secs: 60,
            max_try_transfer: 2,
            ..LedgerConfig::default()
        };
        Fixture {
            ledger: SequenceLedger::new(origins, account, now, params),
            rail,
            operator,
            now,
        }
    }

    impl Fixture {
        fn provision_at(&mut self, seq: SeqNo, receiver: Address, at: DateTime<Utc>) {
            self.ledger
                .provision(self.operator, at, seq, receiver, receiver, Decimal::ONE)
                .unwrap();
        }

        fn run(&mut self, max_count: usize, now: DateTime<Utc>) -> BatchReport {
            let costs = CostSchedule::default();
            let mut budget = Budget::new(costs.batch_claim(max_count));
            process_batch(&mut self.ledger, &mut self.rail, &mut budget, &costs, now, max_count)
                .unwrap()
        }
    }

    #[test]
    fn test_settles_in_queue_order() {
        let mut f = fixture();
        for seq in [3, 1, 2] {
            f.provision_at(seq, Address::from_low_u64(seq), f.now);
        }
        let later = f.now + Duration::seconds(60);
        let report = f.run(2, later);

        let settled: Vec<SeqNo> = report.claimed.iter().map(|c| c.seq).collect();
        assert_eq!(settled, vec![3, 1]);
        assert_eq!(f.ledger.claim_candidates(), vec![2]);
        assert_eq!(f.rail.balance_of(&Address::from_low_u64(3)), Decimal::ONE);
    }

    #[test]
    fn test_locked_candidates_do_not_use_attempts() {
        let mut f = fixture();
        let late = f.now + Duration::seconds(30);
        f.provision_at(1, Address::from_low_u64(1), late);
        f.provision_at(2, Address::from_low_u64(2), f.now);

        let report = f.run(1, f.now + Duration::seconds(60));
        assert_eq!(report.skipped, vec![1]);
        assert_eq!(report.claimed.len(), 1);
        assert_eq!(report.claimed[0].seq, 2);
        assert_eq!(report.attempts, 1);
    }

    #[test]
    fn test_rejections_requeue_then_fail() {
        let mut f = fixture();
        let bad = Address::from_low_u64(0xbad);
        f.rail.deploy(bad, ContractBehavior::Rejecting);
        f.provision_at(1, bad, f.now);
        f.provision_at(2, Address::from_low_u64(2), f.now);
        let later = f.now + Duration::seconds(60);

        let report = f.run(1, later);
        assert_eq!(
            report.failed,
            vec![FailedItem {
                seq: 1,
                failure_count: 1,
                unclaimable: false
            }]
        );
        assert_eq!(f.ledger.claim_candidates(), vec![2, 1]);

        let report = f.run(5, later);
        assert_eq!(report.claimed.len(), 1);
        assert!(report.failed[0].unclaimable);
        assert!(f.ledger.claim_candidates().is_empty());
        assert_eq!(f.ledger.claim_failures(), vec![1]);
        assert_eq!(f.rail.balance_of(&bad), Decimal::ZERO);
    }

    #[test]
    fn test_attempts_are_charged() {
        let mut f = fixture();
        f.provision_at(1, Address::from_low_u64(1), f.now);
        let costs = CostSchedule::default();
        let mut budget = Budget::new(costs.claim_attempt - 1);

        let err = process_batch(
            &mut f.ledger,
            &mut f.rail,
            &mut budget,
            &costs,
            f.now + Duration::seconds(60),
            1,
        )
        .unwrap_err();
        assert!(matches!(err, Error::ResourceExhausted { .. }));
    }
}
