//! Error types for the bridge
//!
//! Domain failures carry a machine-checkable reason so callers can branch on
//! the exact rejection without parsing messages. Every domain error aborts the
//! invocation that raised it with zero effect on committed state.

use crate::types::{Address, Role, SeqNo, TxId};
use thiserror::Error;

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Bridge errors
#[derive(Error, Debug)]
pub enum Error {
    /// Caller is not allowed to perform the action
    #[error("Unauthorized: {0}")]
    Authorization(#[from] AuthorizationError),

    /// Action is not valid in the current lifecycle phase
    #[error("Invalid state: {0}")]
    State(#[from] StateError),

    /// Malformed or out-of-bounds input
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Execution budget too small for the requested work
    #[error("Execution budget exhausted: required {required}, available {available}")]
    ResourceExhausted {
        /// Units the invocation needed
        required: u64,
        /// Units left in the budget
        available: u64,
    },

    /// Recipient rejected the funds
    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse error category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Non-member caller or wrong originating role
    Authorization,
    /// Wrong lifecycle phase
    State,
    /// Malformed input
    Validation,
    /// Budget exhausted
    ResourceExhaustion,
    /// Recipient rejected funds
    ExternalTransferFailure,
    /// Storage, serialization, IO, configuration or actor failures
    Infrastructure,
}

impl Error {
    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Authorization(_) => ErrorKind::Authorization,
            Error::State(_) => ErrorKind::State,
            Error::Validation(_) => ErrorKind::Validation,
            Error::ResourceExhausted { .. } => ErrorKind::ResourceExhaustion,
            Error::TransferFailed(_) => ErrorKind::ExternalTransferFailure,
            Error::Storage(_)
            | Error::Serialization(_)
            | Error::Concurrency(_)
            | Error::Config(_)
            | Error::Io(_) => ErrorKind::Infrastructure,
        }
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

/// Why a caller was refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationError {
    /// Caller is not a current member of the wallet
    #[error("{caller} is not a member of the {role} wallet")]
    NotMember {
        /// Wallet role
        role: Role,
        /// Rejected caller
        caller: Address,
    },

    /// The wallet's target policy does not allow this payload
    #[error("{role} wallet may not target {action}")]
    TargetNotAllowed {
        /// Wallet role
        role: Role,
        /// Payload name
        action: &'static str,
    },

    /// Ledger entry point called by something other than the required role
    #[error("{action} requires the {required} wallet, called by {caller}")]
    WrongOrigin {
        /// Entry point
        action: &'static str,
        /// Role that must originate the call
        required: Role,
        /// Actual origin
        caller: Address,
    },

    /// Wallet admin call not originating from the wallet's governor
    #[error("{role} wallet is governed by {governor}, called by {caller}")]
    NotGovernor {
        /// Governed wallet
        role: Role,
        /// Designated governor
        governor: Address,
        /// Actual origin
        caller: Address,
    },
}

/// Wrong lifecycle phase
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// No transaction with this id
    #[error("transaction {0} does not exist")]
    UnknownTransaction(TxId),

    /// Transaction already executed
    #[error("transaction {0} already executed")]
    AlreadyExecuted(TxId),

    /// Transaction lacks enough live confirmations to execute
    #[error("transaction {0} has not reached its threshold")]
    NotReady(TxId),

    /// Caller already confirmed the transaction
    #[error("transaction {tx_id} already confirmed by {member}")]
    AlreadyConfirmed {
        /// Transaction id
        tx_id: TxId,
        /// Confirming member
        member: Address,
    },

    /// Caller has no confirmation to revoke
    #[error("transaction {tx_id} not confirmed by {member}")]
    NotConfirmed {
        /// Transaction id
        tx_id: TxId,
        /// Revoking member
        member: Address,
    },

    /// Bridge is paused
    #[error("bridge is paused")]
    Paused,

    /// Bridge is not paused
    #[error("bridge is not paused")]
    NotPaused,

    /// No live provision for the sequence
    #[error("sequence {0} is not provisioned")]
    NotProvisioned(SeqNo),

    /// Sequence already claimed
    #[error("sequence {0} already claimed")]
    AlreadyClaimed(SeqNo),

    /// Timelock has not elapsed yet (includes held claims)
    #[error("sequence {0} is still timelocked")]
    Timelocked(SeqNo),

    /// Sequence is already on hold
    #[error("sequence {0} is already held")]
    AlreadyHeld(SeqNo),

    /// Sequence is not on hold
    #[error("sequence {0} is not held")]
    NotHeld(SeqNo),

    /// Sequence is not in the claim failure set
    #[error("sequence {0} is not in the claim failure set")]
    NotUnclaimable(SeqNo),

    /// Service period has not elapsed yet
    #[error("service period has not elapsed")]
    ServicePeriodActive,
}

/// Malformed or out-of-bounds input
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Zero address where a real one is required
    #[error("zero address is not allowed")]
    ZeroAddress,

    /// Member already in the wallet
    #[error("{0} is already a member")]
    DuplicateMember(Address),

    /// Member not in the wallet
    #[error("{0} is not a member")]
    UnknownMember(Address),

    /// Threshold outside `[1, members]`
    #[error("threshold {threshold} outside [1, {members}]")]
    InvalidThreshold {
        /// Requested threshold
        threshold: usize,
        /// Member count it must not exceed
        members: usize,
    },

    /// Confirmation payload differs from the stored one
    #[error("payload does not match transaction {0}")]
    PayloadMismatch(TxId),

    /// Payload cannot be delivered to the chosen target
    #[error("{action} cannot be sent to {target}")]
    UnsupportedTarget {
        /// Payload name
        action: &'static str,
        /// Target description
        target: String,
    },

    /// Amount outside the configured bounds
    #[error("amount {amount} outside [{min}, {max}]")]
    AmountOutOfBounds {
        /// Attempted amount
        amount: String,
        /// Lower bound
        min: String,
        /// Upper bound
        max: String,
    },

    /// Value attached to a call that does not accept it
    #[error("call does not accept attached value")]
    UnexpectedValue,

    /// Amount must be positive
    #[error("amount must be positive")]
    NonPositiveAmount,

    /// Lockable bounds are inconsistent
    #[error("invalid lock bounds: min {min}, max {max}")]
    InvalidBounds {
        /// Lower bound
        min: String,
        /// Upper bound
        max: String,
    },

    /// Retry count must be at least one
    #[error("max retry count must be at least 1")]
    InvalidRetryCount,

    /// Destination fails its checksum or prefix check
    #[error("invalid destination address {0}")]
    InvalidDestination(String),

    /// Receiver is a contract account
    #[error("receiver {0} is a contract")]
    ContractReceiver(Address),

    /// Watermark must move forward
    #[error("watermark {requested} does not advance past {current}")]
    WatermarkNotAdvanced {
        /// Current watermark
        current: SeqNo,
        /// Requested watermark
        requested: SeqNo,
    },

    /// Text could not be parsed as an address
    #[error("malformed address: {0}")]
    MalformedAddress(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_mapping() {
        let err: Error = StateError::Paused.into();
        assert_eq!(err.kind(), ErrorKind::State);

        let err: Error = ValidationError::ZeroAddress.into();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = Error::ResourceExhausted {
            required: 10,
            available: 5,
        };
        assert_eq!(err.kind(), ErrorKind::ResourceExhaustion);
        assert!(err.to_string().contains("required 10"));

        let err = Error::TransferFailed("rejected".to_string());
        assert_eq!(err.kind(), ErrorKind::ExternalTransferFailure);
    }
}
