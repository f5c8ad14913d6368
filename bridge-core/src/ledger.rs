//! Sequence ledger
//!
//! Settlement state of the bridge, keyed by cross-chain sequence number:
//!
//! - **Inbound**: provision records attested by the Operator wallet, each
//!   behind a timelock that the Judge wallet can turn into an indefinite hold.
//! - **Claim queues**: every provisioned, unclaimed, non-held sequence sits in
//!   exactly one of two ordered sets. The candidate set feeds batch settlement;
//!   the failure set collects sequences whose payout kept bouncing and waits
//!   for Guardian intervention.
//! - **Outbound**: locks recorded by `transfer`, numbered 1, 2, 3, ... with no
//!   gaps.
//!
//! Entry points reserved for a wallet take the delivering `origin` and compare
//! it against the stored wallet identities. The ledger never touches budgets
//! or the event log; [`crate::bridge::Bridge`] does that around every call.

use crate::{
    address::validate_destination,
    config::LedgerConfig,
    error::{AuthorizationError, StateError, ValidationError},
    rail::ValueRail,
    types::{Address, Amount, BlockEnv, Role, SeqNo},
    Result,
};
use chrono::{DateTime, Duration, Utc};
use indexmap::IndexSet;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Claim gate of a provision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Timelock {
    /// Claimable from this instant
    Until(DateTime<Utc>),
    /// Frozen by the Judge wallet
    Held,
    /// Hold lifted by the Guardian wallet; claimable immediately
    Released,
}

impl Timelock {
    /// Instant the claim opens; holds report the far future
    pub fn unlocks_at(&self) -> DateTime<Utc> {
        match self {
            Timelock::Until(at) => *at,
            Timelock::Held => DateTime::<Utc>::MAX_UTC,
            Timelock::Released => DateTime::<Utc>::MIN_UTC,
        }
    }

    /// Whether a claim at `now` passes the gate
    pub fn elapsed(&self, now: DateTime<Utc>) -> bool {
        match self {
            Timelock::Until(at) => now >= *at,
            Timelock::Held => false,
            Timelock::Released => true,
        }
    }
}

/// Inbound transfer attested by the Operator wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionRecord {
    /// Sender on the source chain
    pub sender: Address,

    /// Receiver of the payout
    pub receiver: Address,

    /// Amount to pay out
    pub amount: Amount,

    /// Claim gate
    pub timelock: Timelock,

    /// Paid out; terminal
    pub claimed: bool,

    /// Batch payout rejections so far
    pub failure_count: u32,
}

/// Value locked for the destination chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundLock {
    /// Outbound sequence (1-based)
    pub seq: SeqNo,

    /// Block the lock was recorded in
    pub origin_block: u64,

    /// Locking account
    pub sender: Address,

    /// Destination-chain address
    pub destination: String,

    /// Locked amount
    pub amount: Amount,
}

/// Identities the ledger accepts calls from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origins {
    /// Operator wallet
    pub operator: Address,
    /// Guardian wallet
    pub guardian: Address,
    /// Judge wallet
    pub judge: Address,
}

impl Origins {
    fn of(&self, role: Role) -> Address {
        match role {
            Role::Operator => self.operator,
            Role::Guardian => self.guardian,
            Role::Judge => self.judge,
        }
    }
}

/// Outcome of a payout attempt on a queued sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Requeue {
    /// Back of the candidate queue
    Candidate,
    /// Retries exhausted
    Failure,
}

/// Sequence-indexed settlement ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceLedger {
    origins: Origins,
    account: Address,
    genesis: DateTime<Utc>,
    params: LedgerConfig,
    paused: bool,
    provisions: BTreeMap<SeqNo, ProvisionRecord>,
    candidates: IndexSet<SeqNo>,
    failures: IndexSet<SeqNo>,
    outbound: Vec<OutboundLock>,
}

impl SequenceLedger {
    /// Create an empty ledger
    ///
    /// `account` is the bridge's own account on the value rail: transfers
    /// lock value into it and claims pay out of it.
    pub fn new(origins: Origins, account: Address, genesis: DateTime<Utc>, params: LedgerConfig) -> Self {
        Self {
            origins,
            account,
            genesis,
            params,
            paused: false,
            provisions: BTreeMap::new(),
            candidates: IndexSet::new(),
            failures: IndexSet::new(),
            outbound: Vec::new(),
        }
    }

    fn require_origin(&self, action: &'static str, role: Role, origin: Address) -> Result<()> {
        if origin != self.origins.of(role) {
            return Err(AuthorizationError::WrongOrigin {
                action,
                required: role,
                caller: origin,
            }
            .into());
        }
        Ok(())
    }

    fn record(&self, seq: SeqNo) -> Result<&ProvisionRecord> {
        self.provisions
            .get(&seq)
            .ok_or_else(|| StateError::NotProvisioned(seq).into())
    }

    fn record_mut(&mut self, seq: SeqNo) -> Result<&mut ProvisionRecord> {
        self.provisions
            .get_mut(&seq)
            .ok_or_else(|| StateError::NotProvisioned(seq).into())
    }

    fn enqueue(&mut self, seq: SeqNo, failure_count: u32) {
        if failure_count >= self.params.max_try_transfer {
            self.failures.insert(seq);
        } else {
            self.candidates.insert(seq);
        }
    }

    fn dequeue(&mut self, seq: SeqNo) {
        self.candidates.shift_remove(&seq);
        self.failures.shift_remove(&seq);
    }

    // Operator entry points

    /// Record an inbound transfer
    ///
    /// Returns `false` without touching anything when `seq` already has a
    /// live record.
    pub fn provision(
        &mut self,
        origin: Address,
        now: DateTime<Utc>,
        seq: SeqNo,
        sender: Address,
        receiver: Address,
        amount: Amount,
    ) -> Result<bool> {
        self.require_origin("provision", Role::Operator, origin)?;
        if self.paused {
            return Err(StateError::Paused.into());
        }
        if amount <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveAmount.into());
        }
        if receiver.is_zero() {
            return Err(ValidationError::ZeroAddress.into());
        }
        if self.provisions.contains_key(&seq) {
            tracing::debug!(seq, "Sequence already provisioned, ignoring");
            return Ok(false);
        }

        let unlock = offset(now, self.params.transfer_lock_secs);
        self.provisions.insert(
            seq,
            ProvisionRecord {
                sender,
                receiver,
                amount,
                timelock: Timelock::Until(unlock),
                claimed: false,
                failure_count: 0,
            },
        );
        self.candidates.insert(seq);

        tracing::info!(seq, %receiver, %amount, unlock = %unlock, "Sequence provisioned");
        Ok(true)
    }

    // Judge entry points

    /// Freeze a claim until the Guardian releases it
    pub fn hold_claim(&mut self, origin: Address, seq: SeqNo) -> Result<()> {
        self.require_origin("hold_claim", Role::Judge, origin)?;

        let record = self.record_mut(seq)?;
        if record.claimed {
            return Err(StateError::AlreadyClaimed(seq).into());
        }
        if record.timelock == Timelock::Held {
            return Err(StateError::AlreadyHeld(seq).into());
        }
        record.timelock = Timelock::Held;
        self.dequeue(seq);

        tracing::warn!(seq, "Claim held");
        Ok(())
    }

    // Guardian entry points

    /// Lift a hold
    pub fn release_claim(&mut self, origin: Address, seq: SeqNo) -> Result<()> {
        self.require_origin("release_claim", Role::Guardian, origin)?;

        let record = self.record_mut(seq)?;
        if record.timelock != Timelock::Held {
            return Err(StateError::NotHeld(seq).into());
        }
        record.timelock = Timelock::Released;
        let failure_count = record.failure_count;
        self.enqueue(seq, failure_count);

        tracing::info!(seq, "Claim released");
        Ok(())
    }

    /// Delete a provision so a corrected one can take its place
    pub fn remove_provision(&mut self, origin: Address, seq: SeqNo) -> Result<ProvisionRecord> {
        self.require_origin("remove_provision", Role::Guardian, origin)?;

        if self.record(seq)?.claimed {
            return Err(StateError::AlreadyClaimed(seq).into());
        }
        self.dequeue(seq);
        let record = self.record_remove(seq)?;

        tracing::warn!(seq, receiver = %record.receiver, "Provision removed");
        Ok(record)
    }

    fn record_remove(&mut self, seq: SeqNo) -> Result<ProvisionRecord> {
        self.provisions
            .remove(&seq)
            .ok_or_else(|| StateError::NotProvisioned(seq).into())
    }

    /// Redirect a sequence stuck in the failure set and settle it now
    pub fn resolve_unclaimable<R: ValueRail>(
        &mut self,
        origin: Address,
        rail: &mut R,
        seq: SeqNo,
        new_receiver: Address,
    ) -> Result<ProvisionRecord> {
        self.require_origin("resolve_unclaimable", Role::Guardian, origin)?;

        if !self.failures.contains(&seq) {
            return Err(StateError::NotUnclaimable(seq).into());
        }
        if new_receiver.is_zero() {
            return Err(ValidationError::ZeroAddress.into());
        }
        if rail.is_contract(&new_receiver) {
            return Err(ValidationError::ContractReceiver(new_receiver).into());
        }

        let amount = self.record(seq)?.amount;
        rail.transfer(self.account, new_receiver, amount)?;

        let record = self.record_mut(seq)?;
        record.receiver = new_receiver;
        record.claimed = true;
        let settled = record.clone();
        self.failures.shift_remove(&seq);

        tracing::info!(seq, receiver = %new_receiver, %amount, "Unclaimable sequence resolved");
        Ok(settled)
    }

    /// Stop provisioning and outbound transfers
    pub fn pause(&mut self, origin: Address, reason: &str) -> Result<()> {
        self.require_origin("pause_bridge", Role::Guardian, origin)?;
        if self.paused {
            return Err(StateError::Paused.into());
        }
        self.paused = true;
        tracing::warn!(reason, "Bridge paused");
        Ok(())
    }

    /// Undo a pause
    pub fn resume(&mut self, origin: Address, reason: &str) -> Result<()> {
        self.require_origin("resume_bridge", Role::Guardian, origin)?;
        if !self.paused {
            return Err(StateError::NotPaused.into());
        }
        self.paused = false;
        tracing::info!(reason, "Bridge resumed");
        Ok(())
    }

    /// Claim delay for future provisions
    pub fn set_transfer_lock(&mut self, origin: Address, seconds: u64) -> Result<()> {
        self.require_origin("set_transfer_lock", Role::Guardian, origin)?;
        self.params.transfer_lock_secs = seconds;
        Ok(())
    }

    /// Bounds on lockable amounts
    pub fn set_lock_bounds(&mut self, origin: Address, min: Amount, max: Amount) -> Result<()> {
        self.require_origin("set_lock_bounds", Role::Guardian, origin)?;
        if min <= Decimal::ZERO || min > max {
            return Err(ValidationError::InvalidBounds {
                min: min.to_string(),
                max: max.to_string(),
            }
            .into());
        }
        self.params.min_lockable = min;
        self.params.max_lockable = max;
        Ok(())
    }

    /// Retry budget of batch payouts; re-partitions the claim queues
    pub fn set_max_try_transfer(&mut self, origin: Address, count: u32) -> Result<()> {
        self.require_origin("set_max_try_transfer", Role::Guardian, origin)?;
        if count == 0 {
            return Err(ValidationError::InvalidRetryCount.into());
        }
        self.params.max_try_transfer = count;

        let (exhausted, retry): (Vec<SeqNo>, Vec<SeqNo>) = self
            .candidates
            .iter()
            .chain(self.failures.iter())
            .copied()
            .partition(|seq| {
                self.provisions
                    .get(seq)
                    .map_or(false, |record| record.failure_count >= count)
            });
        self.candidates.retain(|seq| !exhausted.contains(seq));
        self.failures.retain(|seq| exhausted.contains(seq));
        for seq in retry {
            self.candidates.insert(seq);
        }
        for seq in exhausted {
            self.failures.insert(seq);
        }

        tracing::info!(count, candidates = self.candidates.len(), failures = self.failures.len(), "Retry budget changed");
        Ok(())
    }

    /// Toggle destination validation on `transfer`
    pub fn set_address_validation(&mut self, origin: Address, enabled: bool) -> Result<()> {
        self.require_origin("set_address_validation", Role::Guardian, origin)?;
        self.params.address_validation = enabled;
        Ok(())
    }

    /// Service period measured from genesis
    pub fn set_service_period(&mut self, origin: Address, seconds: u64) -> Result<()> {
        self.require_origin("set_service_period", Role::Guardian, origin)?;
        self.params.service_period_secs = seconds;
        Ok(())
    }

    /// Send the whole bridge balance to the burn sink
    pub fn burn_bridge_balance<R: ValueRail>(
        &mut self,
        origin: Address,
        rail: &mut R,
        now: DateTime<Utc>,
    ) -> Result<Amount> {
        self.require_origin("burn_bridge_balance", Role::Guardian, origin)?;
        if !self.paused {
            return Err(StateError::NotPaused.into());
        }
        if now < offset(self.genesis, self.params.service_period_secs) {
            return Err(StateError::ServicePeriodActive.into());
        }

        let amount = rail.balance_of(&self.account);
        if amount > Decimal::ZERO {
            rail.transfer(self.account, self.params.burn_sink, amount)?;
        }
        tracing::warn!(%amount, sink = %self.params.burn_sink, "Bridge balance burned");
        Ok(amount)
    }

    // Public entry points

    /// Lock `amount` from `sender` for delivery to `destination`
    pub fn transfer<R: ValueRail>(
        &mut self,
        rail: &mut R,
        env: &BlockEnv,
        sender: Address,
        destination: &str,
        amount: Amount,
    ) -> Result<OutboundLock> {
        if self.paused {
            return Err(StateError::Paused.into());
        }
        if amount < self.params.min_lockable || amount > self.params.max_lockable {
            return Err(ValidationError::AmountOutOfBounds {
                amount: amount.to_string(),
                min: self.params.min_lockable.to_string(),
                max: self.params.max_lockable.to_string(),
            }
            .into());
        }
        if self.params.address_validation {
            validate_destination(destination, &self.params.destination_hrp)?;
        }

        rail.transfer(sender, self.account, amount)?;

        let lock = OutboundLock {
            seq: self.outbound.len() as SeqNo + 1,
            origin_block: env.number,
            sender,
            destination: destination.to_string(),
            amount,
        };
        self.outbound.push(lock.clone());

        tracing::info!(seq = lock.seq, %sender, destination, %amount, "Outbound transfer locked");
        Ok(lock)
    }

    /// Pay out a provisioned sequence whose timelock has elapsed
    pub fn request_claim<R: ValueRail>(
        &mut self,
        rail: &mut R,
        now: DateTime<Utc>,
        seq: SeqNo,
    ) -> Result<ProvisionRecord> {
        let record = self.record(seq)?;
        if record.claimed {
            return Err(StateError::AlreadyClaimed(seq).into());
        }
        if !record.timelock.elapsed(now) {
            return Err(StateError::Timelocked(seq).into());
        }

        rail.transfer(self.account, record.receiver, record.amount)?;
        let settled = self.mark_claimed(seq)?;

        tracing::info!(seq, receiver = %settled.receiver, amount = %settled.amount, "Sequence claimed");
        Ok(settled)
    }

    pub(crate) fn mark_claimed(&mut self, seq: SeqNo) -> Result<ProvisionRecord> {
        let record = self.record_mut(seq)?;
        record.claimed = true;
        let settled = record.clone();
        self.dequeue(seq);
        Ok(settled)
    }

    /// Count a rejected batch payout and requeue the sequence
    pub(crate) fn record_payout_failure(&mut self, seq: SeqNo) -> Result<(u32, Requeue)> {
        let max = self.params.max_try_transfer;
        let record = self.record_mut(seq)?;
        record.failure_count += 1;
        let failure_count = record.failure_count;

        self.candidates.shift_remove(&seq);
        let requeue = if failure_count >= max {
            self.failures.insert(seq);
            Requeue::Failure
        } else {
            self.candidates.insert(seq);
            Requeue::Candidate
        };
        Ok((failure_count, requeue))
    }

    /// Bridge account on the value rail
    pub fn account(&self) -> Address {
        self.account
    }

    // Reads

    /// Paused flag
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Current parameters
    pub fn params(&self) -> &LedgerConfig {
        &self.params
    }

    /// Genesis timestamp
    pub fn genesis(&self) -> DateTime<Utc> {
        self.genesis
    }

    /// A live record exists (claimed records stay provisioned)
    pub fn is_provisioned(&self, seq: SeqNo) -> bool {
        self.provisions.contains_key(&seq)
    }

    /// Last sequence of the contiguous provisioned run starting at `from`,
    /// looking no further than `to` (inclusive)
    pub fn is_provisioned_range(&self, from: SeqNo, to: SeqNo) -> Option<SeqNo> {
        let mut last = None;
        for seq in from..=to {
            if !self.is_provisioned(seq) {
                break;
            }
            last = Some(seq);
        }
        last
    }

    /// Provisioned sequences not yet paid out, held and failed ones included
    pub fn unclaimed_count(&self) -> usize {
        self.provisions.values().filter(|record| !record.claimed).count()
    }

    /// Provision record
    pub fn provision_record(&self, seq: SeqNo) -> Option<&ProvisionRecord> {
        self.provisions.get(&seq)
    }

    /// Instant the claim opens
    pub fn timelock(&self, seq: SeqNo) -> Option<DateTime<Utc>> {
        self.provisions.get(&seq).map(|r| r.timelock.unlocks_at())
    }

    /// Claim candidates in queue order
    pub fn claim_candidates(&self) -> Vec<SeqNo> {
        self.candidates.iter().copied().collect()
    }

    /// Page of the candidate queue
    pub fn claim_candidates_range(&self, start: usize, count: usize) -> Vec<SeqNo> {
        self.candidates.iter().skip(start).take(count).copied().collect()
    }

    /// Sequences whose retries are exhausted
    pub fn claim_failures(&self) -> Vec<SeqNo> {
        self.failures.iter().copied().collect()
    }

    /// Page of the failure set
    pub fn claim_failures_range(&self, start: usize, count: usize) -> Vec<SeqNo> {
        self.failures.iter().skip(start).take(count).copied().collect()
    }

    /// Block an outbound lock was recorded in
    pub fn seq2_block_num(&self, seq: SeqNo) -> Option<u64> {
        self.outbound_lock(seq).map(|lock| lock.origin_block)
    }

    /// Outbound lock by sequence
    pub fn outbound_lock(&self, seq: SeqNo) -> Option<&OutboundLock> {
        seq.checked_sub(1)
            .and_then(|index| self.outbound.get(index as usize))
    }

    /// Every outbound lock
    pub fn all_swap_requests(&self) -> &[OutboundLock] {
        &self.outbound
    }

    /// Page of outbound locks, `start` being a 0-based position
    pub fn swap_requests(&self, start: usize, count: usize) -> &[OutboundLock] {
        let start = start.min(self.outbound.len());
        let end = start.saturating_add(count).min(self.outbound.len());
        &self.outbound[start..end]
    }

    /// Sequence the next outbound lock will get
    pub fn next_outbound_seq(&self) -> SeqNo {
        self.outbound.len() as SeqNo + 1
    }
}

/// `at + seconds`, saturating at the far future
fn offset(at: DateTime<Utc>, seconds: u64) -> DateTime<Utc> {
    let seconds = seconds.min(i64::MAX as u64 / 1_000) as i64;
    at.checked_add_signed(Duration::seconds(seconds))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, ErrorKind};
    use crate::rail::{ContractBehavior, MemoryRail};
    use bech32::ToBase32;

    struct Fixture {
        ledger: SequenceLedger,
        rail: MemoryRail,
        origins: Origins,
        now: DateTime<Utc>,
    }

    fn fixture() -> Fixture {
        let origins = Origins {
            operator: Address::derive("operator"),
            guardian: Address::derive("guardian"),
            judge: Address::derive("judge"),
        };
        let account = Address::derive("bridge");
        let now = Utc::now();
        let mut rail = MemoryRail::new();
        rail.mint(account, Decimal::from(1_000));

        let params = LedgerConfig {
            transfer_lock_secs: 60,
            max_try_transfer: 2,
            ..LedgerConfig::default()
        };
        Fixture {
            ledger: SequenceLedger::new(origins, account, now, params),
            rail,
            origins,
            now,
        }
    }

    fn receiver() -> Address {
        Address::from_low_u64(0x456)
    }

    impl Fixture {
        fn provision(&mut self, seq: SeqNo) {
            let created = self
                .ledger
                .provision(
                    self.origins.operator,
                    self.now,
                    seq,
                    Address::from_low_u64(0x123),
                    receiver(),
                    Decimal::ONE,
                )
                .unwrap();
            assert!(created);
        }

        fn later(&self) -> DateTime<Utc> {
            self.now + Duration::seconds(61)
        }
    }

    #[test]
    fn test_provision_requires_operator() {
        let mut f = fixture();
        let err = f
            .ledger
            .provision(f.origins.guardian, f.now, 1, receiver(), receiver(), Decimal::ONE)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
        assert!(!f.ledger.is_provisioned(1));
    }

    #[test]
    fn test_provision_is_idempotent() {
        let mut f = fixture();
        f.provision(1);
        let created = f
            .ledger
            .provision(
                f.origins.operator,
                f.now,
                1,
                Address::from_low_u64(9),
                Address::from_low_u64(9),
                Decimal::from(5),
            )
            .unwrap();
        assert!(!created);
        assert_eq!(f.ledger.provision_record(1).unwrap().receiver, receiver());
        assert_eq!(f.ledger.claim_candidates(), vec![1]);
    }

    #[test]
    fn test_provision_validation() {
        let mut f = fixture();
        let operator = f.origins.operator;
        assert!(f
            .ledger
            .provision(operator, f.now, 1, receiver(), receiver(), Decimal::ZERO)
            .is_err());
        assert!(f
            .ledger
            .provision(operator, f.now, 1, receiver(), Address::ZERO, Decimal::ONE)
            .is_err());

        f.ledger.pause(f.origins.guardian, "incident").unwrap();
        let err = f
            .ledger
            .provision(operator, f.now, 1, receiver(), receiver(), Decimal::ONE)
            .unwrap_err();
        assert!(matches!(err, Error::State(StateError::Paused)));
    }

    #[test]
    fn test_claim_respects_timelock() {
        let mut f = fixture();
        f.provision(1);

        let err = f.ledger.request_claim(&mut f.rail, f.now, 1).unwrap_err();
        assert!(matches!(err, Error::State(StateError::Timelocked(1))));

        let later = f.later();
        f.ledger.request_claim(&mut f.rail, later, 1).unwrap();
        assert_eq!(f.rail.balance_of(&receiver()), Decimal::ONE);
        assert!(f.ledger.is_provisioned(1));
        assert!(f.ledger.claim_candidates().is_empty());

        let err = f.ledger.request_claim(&mut f.rail, later, 1).unwrap_err();
        assert!(matches!(err, Error::State(StateError::AlreadyClaimed(1))));
    }

    #[test]
    fn test_rejected_claim_changes_nothing() {
        let mut f = fixture();
        f.rail.deploy(receiver(), ContractBehavior::Rejecting);
        f.provision(1);
        let later = f.later();

        let err = f.ledger.request_claim(&mut f.rail, later, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExternalTransferFailure);
        let record = f.ledger.provision_record(1).unwrap();
        assert!(!record.claimed);
        assert_eq!(record.failure_count, 0);
    }

    #[test]
    fn test_hold_and_release() {
        let mut f = fixture();
        f.provision(1);

        assert!(f.ledger.hold_claim(f.origins.guardian, 1).is_err());
        f.ledger.hold_claim(f.origins.judge, 1).unwrap();
        assert_eq!(f.ledger.timelock(1), Some(DateTime::<Utc>::MAX_UTC));
        assert!(f.ledger.claim_candidates().is_empty());

        let far_future = f.now + Duration::days(365 * 100);
        let err = f.ledger.request_claim(&mut f.rail, far_future, 1).unwrap_err();
        assert!(matches!(err, Error::State(StateError::Timelocked(1))));

        assert!(f.ledger.release_claim(f.origins.judge, 1).is_err());
        f.ledger.release_claim(f.origins.guardian, 1).unwrap();
        assert_eq!(f.ledger.claim_candidates(), vec![1]);

        // Released claims are open immediately
        f.ledger.request_claim(&mut f.rail, f.now, 1).unwrap();
    }

    #[test]
    fn test_release_requires_hold() {
        let mut f = fixture();
        f.provision(1);
        let err = f.ledger.release_claim(f.origins.guardian, 1).unwrap_err();
        assert!(matches!(err, Error::State(StateError::NotHeld(1))));
    }

    #[test]
    fn test_remove_then_reprovision() {
        let mut f = fixture();
        f.provision(7);
        f.ledger.remove_provision(f.origins.guardian, 7).unwrap();
        assert!(!f.ledger.is_provisioned(7));
        assert!(f.ledger.claim_candidates().is_empty());

        f.provision(7);
        assert!(f.ledger.is_provisioned(7));
    }

    #[test]
    fn test_payout_failures_move_to_failure_set() {
        let mut f = fixture();
        f.provision(1);
        f.provision(2);

        let (count, requeue) = f.ledger.record_payout_failure(1).unwrap();
        assert_eq!((count, requeue), (1, Requeue::Candidate));
        assert_eq!(f.ledger.claim_candidates(), vec![2, 1]);

        let (count, requeue) = f.ledger.record_payout_failure(1).unwrap();
        assert_eq!((count, requeue), (2, Requeue::Failure));
        assert_eq!(f.ledger.claim_candidates(), vec![2]);
        assert_eq!(f.ledger.claim_failures(), vec![1]);

        // Raising the retry budget moves it back
        f.ledger.set_max_try_transfer(f.origins.guardian, 3).unwrap();
        assert_eq!(f.ledger.claim_candidates(), vec![2, 1]);
        assert!(f.ledger.claim_failures().is_empty());

        f.ledger.set_max_try_transfer(f.origins.guardian, 1).unwrap();
        assert_eq!(f.ledger.claim_candidates(), vec![2]);
        assert_eq!(f.ledger.claim_failures(), vec![1]);
    }

    #[test]
    fn test_resolve_unclaimable() {
        let mut f = fixture();
        f.rail.deploy(receiver(), ContractBehavior::Rejecting);
        f.provision(1);
        f.ledger.record_payout_failure(1).unwrap();
        f.ledger.record_payout_failure(1).unwrap();

        let contract = Address::from_low_u64(0xc0de);
        f.rail.deploy(contract, ContractBehavior::Accepting);
        let err = f
            .ledger
            .resolve_unclaimable(f.origins.guardian, &mut f.rail, 1, contract)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::ContractReceiver(_))
        ));

        let fallback = Address::from_low_u64(0x789);
        f.ledger
            .resolve_unclaimable(f.origins.guardian, &mut f.rail, 1, fallback)
            .unwrap();
        assert_eq!(f.rail.balance_of(&fallback), Decimal::ONE);
        assert!(f.ledger.claim_failures().is_empty());
        assert!(f.ledger.provision_record(1).unwrap().claimed);

        let err = f
            .ledger
            .resolve_unclaimable(f.origins.guardian, &mut f.rail, 1, fallback)
            .unwrap_err();
        assert!(matches!(err, Error::State(StateError::NotUnclaimable(1))));
    }

    #[test]
    fn test_transfer_assigns_sequences() {
        let mut f = fixture();
        let sender = Address::from_low_u64(0xabc);
        f.rail.mint(sender, Decimal::from(10));
        let destination =
            bech32::encode("link", [1u8; 20].to_base32(), bech32::Variant::Bech32).unwrap();
        let env = BlockEnv::new(42, f.now);

        let first = f
            .ledger
            .transfer(&mut f.rail, &env, sender, &destination, Decimal::ONE)
            .unwrap();
        let second = f
            .ledger
            .transfer(&mut f.rail, &env.advanced(1, Duration::seconds(12)), sender, &destination, Decimal::ONE)
            .unwrap();

        assert_eq!((first.seq, second.seq), (1, 2));
        assert_eq!(f.ledger.seq2_block_num(1), Some(42));
        assert_eq!(f.ledger.seq2_block_num(2), Some(43));
        assert_eq!(f.ledger.seq2_block_num(3), None);
        assert_eq!(f.ledger.swap_requests(1, 10).len(), 1);
        assert_eq!(f.rail.balance_of(&sender), Decimal::from(8));
    }

    #[test]
    fn test_transfer_rejections() {
        let mut f = fixture();
        let sender = Address::from_low_u64(0xabc);
        f.rail.mint(sender, Decimal::from(10));
        let env = BlockEnv::new(1, f.now);

        let err = f
            .ledger
            .transfer(&mut f.rail, &env, sender, "link1invalid", Decimal::ONE)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::InvalidDestination(_))
        ));

        f.ledger.set_address_validation(f.origins.guardian, false).unwrap();
        let err = f
            .ledger
            .transfer(&mut f.rail, &env, sender, "anything", Decimal::new(1, 3))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::AmountOutOfBounds { .. })
        ));

        f.ledger.pause(f.origins.guardian, "maintenance").unwrap();
        let err = f
            .ledger
            .transfer(&mut f.rail, &env, sender, "anything", Decimal::ONE)
            .unwrap_err();
        assert!(matches!(err, Error::State(StateError::Paused)));
        assert!(f.ledger.all_swap_requests().is_empty());
    }

    #[test]
    fn test_provisioned_range() {
        let mut f = fixture();
        for seq in [1, 2, 3, 5] {
            f.provision(seq);
        }
        assert_eq!(f.ledger.is_provisioned_range(1, 10), Some(3));
        assert_eq!(f.ledger.is_provisioned_range(1, 2), Some(2));
        assert_eq!(f.ledger.is_provisioned_range(4, 10), None);
        assert_eq!(f.ledger.is_provisioned_range(5, 10), Some(5));
    }

    #[test]
    fn test_burn_requires_pause_and_service_period() {
        let mut f = fixture();
        let guardian = f.origins.guardian;
        let after = f.now + Duration::seconds(f.ledger.params().service_period_secs as i64);

        let err = f.ledger.burn_bridge_balance(guardian, &mut f.rail, after).unwrap_err();
        assert!(matches!(err, Error::State(StateError::NotPaused)));

        f.ledger.pause(guardian, "sunset").unwrap();
        let err = f.ledger.burn_bridge_balance(guardian, &mut f.rail, f.now).unwrap_err();
        assert!(matches!(err, Error::State(StateError::ServicePeriodActive)));

        let burned = f.ledger.burn_bridge_balance(guardian, &mut f.rail, after).unwrap();
        assert_eq!(burned, Decimal::from(1_000));
        assert_eq!(f.rail.balance_of(&f.ledger.account()), Decimal::ZERO);
        assert_eq!(
            f.rail.balance_of(&f.ledger.params().burn_sink),
            Decimal::from(1_000)
        );
    }
}
