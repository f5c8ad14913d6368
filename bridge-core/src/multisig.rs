//! Threshold multisig wallet
//!
//! One wallet type serves all three trust roles. A role differs only in
//! configuration: its member set, its threshold, the payloads it may submit
//! ([`TargetPolicy`]) and the identity of its governor.
//!
//! # Quorum
//!
//! Confirmations are recorded per transaction, but quorum is always counted
//! against the *current* member set. A member removed after confirming keeps
//! its recorded confirmation; it simply stops counting toward execution.
//!
//! # Execution
//!
//! The wallet decides *when* a transaction is ready; delivering the payload is
//! the caller's job (see [`crate::bridge::Bridge`]), which also rolls back the
//! confirmation if delivery fails.

use crate::{
    call::{Payload, Target},
    error::{AuthorizationError, StateError, ValidationError},
    types::{Address, Role, TxId},
    Result,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Which payloads a wallet may submit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetPolicy {
    /// Only `Provision`
    ProvisionOnly,
    /// Only `HoldClaim`
    HoldOnly,
    /// Anything; the receiving component still checks the origin
    Any,
}

impl TargetPolicy {
    /// Default policy of a role
    pub fn for_role(role: Role) -> Self {
        match role {
            Role::Operator => TargetPolicy::ProvisionOnly,
            Role::Judge => TargetPolicy::HoldOnly,
            Role::Guardian => TargetPolicy::Any,
        }
    }

    /// Check a payload against the policy
    pub fn allows(&self, payload: &Payload) -> bool {
        match self {
            TargetPolicy::ProvisionOnly => matches!(payload, Payload::Provision { .. }),
            TargetPolicy::HoldOnly => matches!(payload, Payload::HoldClaim { .. }),
            TargetPolicy::Any => true,
        }
    }
}

/// Wallet transaction record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction id
    pub id: TxId,

    /// Receiving component
    pub target: Target,

    /// Delivered payload
    pub payload: Payload,

    /// Member that created the record
    pub submitter: Address,

    /// Set once the payload has been delivered
    pub executed: bool,

    /// Members that confirmed (recorded, not filtered by membership)
    pub confirmers: BTreeSet<Address>,
}

/// What `submit` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    /// Transaction the submission landed on
    pub tx_id: TxId,

    /// A new record was created
    pub created: bool,

    /// The caller's confirmation was newly registered
    pub confirmed: bool,

    /// Quorum reached; the payload must be delivered now
    pub ready: bool,
}

/// Membership change applied by an admin payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MembershipChange {
    /// Member added
    Added(Address),
    /// Member removed
    Removed(Address),
    /// Member replaced
    Replaced {
        /// Previous member
        old: Address,
        /// New member
        new: Address,
    },
    /// Threshold changed
    Threshold(usize),
}

/// N-of-M threshold wallet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultisigWallet {
    role: Role,
    address: Address,
    governor: Address,
    policy: TargetPolicy,
    members: Vec<Address>,
    threshold: usize,
    transactions: Vec<Transaction>,
    unique_index: BTreeMap<u64, TxId>,
}

impl MultisigWallet {
    /// Create a wallet
    ///
    /// `address` is the wallet's own identity (the origin of everything it
    /// executes); `governor` is the only origin allowed to change membership.
    pub fn new(
        role: Role,
        address: Address,
        governor: Address,
        members: Vec<Address>,
        threshold: usize,
    ) -> Result<Self> {
        let mut seen = BTreeSet::new();
        for member in &members {
            if member.is_zero() {
                return Err(ValidationError::ZeroAddress.into());
            }
            if !seen.insert(*member) {
                return Err(ValidationError::DuplicateMember(*member).into());
            }
        }
        check_threshold(threshold, members.len())?;

        Ok(Self {
            role,
            address,
            governor,
            policy: TargetPolicy::for_role(role),
            members,
            threshold,
            transactions: Vec::new(),
            unique_index: BTreeMap::new(),
        })
    }

    /// Override the target policy
    pub fn with_policy(mut self, policy: TargetPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Wallet role
    pub fn role(&self) -> Role {
        self.role
    }

    /// Wallet identity
    pub fn address(&self) -> Address {
        self.address
    }

    /// Identity allowed to change membership
    pub fn governor(&self) -> Address {
        self.governor
    }

    /// Target policy
    pub fn policy(&self) -> TargetPolicy {
        self.policy
    }

    /// Current members in insertion order
    pub fn members(&self) -> &[Address] {
        &self.members
    }

    /// Current threshold
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Membership check
    pub fn is_member(&self, account: &Address) -> bool {
        self.members.contains(account)
    }

    /// Reject non-members
    pub fn require_member(&self, caller: &Address) -> Result<()> {
        if !self.is_member(caller) {
            return Err(AuthorizationError::NotMember {
                role: self.role,
                caller: *caller,
            }
            .into());
        }
        Ok(())
    }

    /// Submit a transaction, confirming it on the caller's behalf
    pub fn submit(
        &mut self,
        caller: Address,
        target: Target,
        payload: Payload,
        unique_index: Option<u64>,
    ) -> Result<Submission> {
        self.require_member(&caller)?;

        if !self.policy.allows(&payload) {
            return Err(AuthorizationError::TargetNotAllowed {
                role: self.role,
                action: payload.name(),
            }
            .into());
        }
        if !payload.fits(target) {
            return Err(ValidationError::UnsupportedTarget {
                action: payload.name(),
                target: target.to_string(),
            }
            .into());
        }

        if let Some(existing) = unique_index.and_then(|index| self.unique_index.get(&index).copied()) {
            return self.resubmit(caller, existing, target, &payload);
        }

        let tx_id = TxId(self.transactions.len() as u64);
        let mut confirmers = BTreeSet::new();
        confirmers.insert(caller);
        self.transactions.push(Transaction {
            id: tx_id,
            target,
            payload,
            submitter: caller,
            executed: false,
            confirmers,
        });
        if let Some(index) = unique_index {
            self.unique_index.insert(index, tx_id);
        }

        tracing::debug!(role = %self.role, tx_id = %tx_id, submitter = %caller, "Transaction submitted");

        Ok(Submission {
            tx_id,
            created: true,
            confirmed: true,
            ready: self.is_ready(tx_id),
        })
    }

    /// Submission that hit an already-mapped unique index
    fn resubmit(
        &mut self,
        caller: Address,
        tx_id: TxId,
        target: Target,
        payload: &Payload,
    ) -> Result<Submission> {
        let tx = self.tx(tx_id)?;
        if tx.target != target || tx.payload != *payload {
            return Err(ValidationError::PayloadMismatch(tx_id).into());
        }

        let mut submission = Submission {
            tx_id,
            created: false,
            confirmed: false,
            ready: false,
        };
        if tx.executed || tx.confirmers.contains(&caller) {
            return Ok(submission);
        }

        self.tx_mut(tx_id)?.confirmers.insert(caller);
        submission.confirmed = true;
        submission.ready = self.is_ready(tx_id);
        Ok(submission)
    }

    /// Confirm a pending transaction; returns whether quorum is now reached
    pub fn confirm(&mut self, caller: Address, tx_id: TxId, payload_echo: &Payload) -> Result<bool> {
        self.require_member(&caller)?;

        let tx = self.tx(tx_id)?;
        if tx.executed {
            return Err(StateError::AlreadyExecuted(tx_id).into());
        }
        if tx.confirmers.contains(&caller) {
            return Err(StateError::AlreadyConfirmed {
                tx_id,
                member: caller,
            }
            .into());
        }
        if tx.payload != *payload_echo {
            return Err(ValidationError::PayloadMismatch(tx_id).into());
        }

        self.tx_mut(tx_id)?.confirmers.insert(caller);
        Ok(self.is_ready(tx_id))
    }

    /// Withdraw the caller's confirmation
    pub fn revoke(&mut self, caller: Address, tx_id: TxId) -> Result<()> {
        self.require_member(&caller)?;

        let tx = self.tx_mut(tx_id)?;
        if tx.executed {
            return Err(StateError::AlreadyExecuted(tx_id).into());
        }
        if !tx.confirmers.remove(&caller) {
            return Err(StateError::NotConfirmed {
                tx_id,
                member: caller,
            }
            .into());
        }
        Ok(())
    }

    /// Mark a transaction delivered
    pub fn mark_executed(&mut self, tx_id: TxId) -> Result<()> {
        let tx = self.tx_mut(tx_id)?;
        if tx.executed {
            return Err(StateError::AlreadyExecuted(tx_id).into());
        }
        tx.executed = true;
        Ok(())
    }

    /// Pending and confirmed by enough current members
    pub fn is_ready(&self, tx_id: TxId) -> bool {
        match self.transaction(tx_id) {
            Some(tx) => !tx.executed && self.live_confirmations(tx) >= self.threshold,
            None => false,
        }
    }

    fn live_confirmations(&self, tx: &Transaction) -> usize {
        tx.confirmers.iter().filter(|c| self.is_member(c)).count()
    }

    /// Apply a membership payload delivered by `origin`
    pub fn apply_admin(&mut self, origin: Address, payload: &Payload) -> Result<MembershipChange> {
        if origin != self.governor {
            return Err(AuthorizationError::NotGovernor {
                role: self.role,
                governor: self.governor,
                caller: origin,
            }
            .into());
        }

        let change = match payload {
            Payload::AddMember { member } => {
                self.check_new_member(member)?;
                self.members.push(*member);
                MembershipChange::Added(*member)
            }
            Payload::RemoveMember { member } => {
                let position = self.position(member)?;
                check_threshold(self.threshold, self.members.len() - 1)?;
                self.members.remove(position);
                MembershipChange::Removed(*member)
            }
            Payload::ReplaceMember { old, new } => {
                let position = self.position(old)?;
                self.check_new_member(new)?;
                self.members[position] = *new;
                MembershipChange::Replaced { old: *old, new: *new }
            }
            Payload::ChangeThreshold { threshold } => {
                check_threshold(*threshold, self.members.len())?;
                self.threshold = *threshold;
                MembershipChange::Threshold(*threshold)
            }
            other => {
                return Err(ValidationError::UnsupportedTarget {
                    action: other.name(),
                    target: Target::Wallet(self.role).to_string(),
                }
                .into())
            }
        };

        tracing::info!(role = %self.role, change = ?change, "Wallet membership changed");
        Ok(change)
    }

    fn check_new_member(&self, member: &Address) -> Result<()> {
        if member.is_zero() {
            return Err(ValidationError::ZeroAddress.into());
        }
        if self.is_member(member) {
            return Err(ValidationError::DuplicateMember(*member).into());
        }
        Ok(())
    }

    fn position(&self, member: &Address) -> Result<usize> {
        self.members
            .iter()
            .position(|m| m == member)
            .ok_or_else(|| ValidationError::UnknownMember(*member).into())
    }

    // Reads

    /// Look up a transaction
    pub fn transaction(&self, tx_id: TxId) -> Option<&Transaction> {
        self.transactions.get(tx_id.0 as usize)
    }

    fn tx(&self, tx_id: TxId) -> Result<&Transaction> {
        self.transaction(tx_id)
            .ok_or_else(|| StateError::UnknownTransaction(tx_id).into())
    }

    fn tx_mut(&mut self, tx_id: TxId) -> Result<&mut Transaction> {
        self.transactions
            .get_mut(tx_id.0 as usize)
            .ok_or_else(|| StateError::UnknownTransaction(tx_id).into())
    }

    /// Transaction mapped to a unique index
    pub fn tx_for_unique_index(&self, index: u64) -> Option<TxId> {
        self.unique_index.get(&index).copied()
    }

    /// Recorded confirmations, including members removed since
    pub fn confirmation_count(&self, tx_id: TxId) -> usize {
        self.transaction(tx_id).map_or(0, |tx| tx.confirmers.len())
    }

    /// Confirmations from current members
    pub fn live_confirmation_count(&self, tx_id: TxId) -> usize {
        self.transaction(tx_id)
            .map_or(0, |tx| self.live_confirmations(tx))
    }

    /// Recorded confirmers
    pub fn confirmers(&self, tx_id: TxId) -> Vec<Address> {
        self.transaction(tx_id)
            .map(|tx| tx.confirmers.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Total transactions ever submitted
    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    /// Transactions waiting for quorum
    pub fn pending_count(&self) -> usize {
        self.transactions.iter().filter(|tx| !tx.executed).count()
    }

    /// Delivered transactions
    pub fn executed_count(&self) -> usize {
        self.transactions.iter().filter(|tx| tx.executed).count()
    }

    /// Page of pending transaction ids
    pub fn pending_ids(&self, offset: usize, limit: usize) -> Vec<TxId> {
        self.ids_where(false, offset, limit)
    }

    /// Page of executed transaction ids
    pub fn executed_ids(&self, offset: usize, limit: usize) -> Vec<TxId> {
        self.ids_where(true, offset, limit)
    }

    fn ids_where(&self, executed: bool, offset: usize, limit: usize) -> Vec<TxId> {
        self.transactions
            .iter()
            .filter(|tx| tx.executed == executed)
            .skip(offset)
            .take(limit)
            .map(|tx| tx.id)
            .collect()
    }
}

fn check_threshold(threshold: usize, members: usize) -> Result<()> {
    if threshold == 0 || threshold > members {
        return Err(ValidationError::InvalidThreshold { threshold, members }.into());
    }
    Ok(())
}
