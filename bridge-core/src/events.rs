//! Bridge event log
//!
//! Every committed invocation appends the events it produced, tagged with a
//! gap-free index and the block it ran in. Aborted invocations leave no
//! trace in the log.

use crate::{
    call::{Payload, Target},
    multisig::MembershipChange,
    types::{Address, Amount, Role, SeqNo, TxId},
};
use serde::{Deserialize, Serialize};

/// Something that happened inside the bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BridgeEvent {
    /// New wallet transaction
    Submitted {
        /// Wallet
        role: Role,
        /// Transaction
        tx_id: TxId,
        /// Submitting member
        submitter: Address,
        /// Receiving component
        target: Target,
        /// Payload name
        action: String,
    },

    /// Member confirmed a transaction
    Confirmed {
        /// Wallet
        role: Role,
        /// Transaction
        tx_id: TxId,
        /// Confirming member
        member: Address,
    },

    /// Member withdrew a confirmation
    Revoked {
        /// Wallet
        role: Role,
        /// Transaction
        tx_id: TxId,
        /// Revoking member
        member: Address,
    },

    /// Wallet transaction delivered
    Executed {
        /// Wallet
        role: Role,
        /// Transaction
        tx_id: TxId,
    },

    /// Inbound transfer recorded
    Provisioned {
        /// Sequence
        seq: SeqNo,
        /// Receiver
        receiver: Address,
        /// Amount
        amount: Amount,
    },

    /// Provisioned funds paid out
    Claimed {
        /// Sequence
        seq: SeqNo,
        /// Paid receiver
        receiver: Address,
        /// Amount
        amount: Amount,
    },

    /// Batch payout rejected by the receiver
    ClaimFailed {
        /// Sequence
        seq: SeqNo,
        /// Rejections so far
        failure_count: u32,
        /// Moved to the failure set
        unclaimable: bool,
    },

    /// Judge froze a claim
    ClaimHeld {
        /// Sequence
        seq: SeqNo,
    },

    /// Guardian lifted a hold
    ClaimReleased {
        /// Sequence
        seq: SeqNo,
    },

    /// Guardian deleted a provision
    ProvisionRemoved {
        /// Sequence
        seq: SeqNo,
    },

    /// Failure-set entry redirected and settled
    UnclaimableResolved {
        /// Sequence
        seq: SeqNo,
        /// New receiver
        receiver: Address,
    },

    /// Bridge paused
    Paused {
        /// Reason given by the Guardian
        reason: String,
    },

    /// Bridge resumed
    Resumed {
        /// Reason given by the Guardian
        reason: String,
    },

    /// Value locked for the destination chain
    OutboundLocked {
        /// Outbound sequence
        seq: SeqNo,
        /// Locking account
        sender: Address,
        /// Destination-chain address
        destination: String,
        /// Locked amount
        amount: Amount,
    },

    /// Ledger parameter changed
    ConfigChanged {
        /// Setter payload
        change: Payload,
    },

    /// Wallet membership changed
    MembershipChanged {
        /// Wallet
        role: Role,
        /// Applied change
        change: MembershipChange,
    },

    /// Operator watermark advanced
    WatermarkAdvanced {
        /// Operator member
        member: Address,
        /// New watermark
        next_seq: SeqNo,
    },

    /// Bridge balance sent to the burn sink
    BalanceBurned {
        /// Sink account
        sink: Address,
        /// Burned amount
        amount: Amount,
    },
}

/// Committed event with its position in the log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Gap-free index, starting at 0
    pub index: u64,

    /// Block the invocation ran in
    pub block: u64,

    /// The event
    pub event: BridgeEvent,
}
