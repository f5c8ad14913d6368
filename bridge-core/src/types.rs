//! Core types for the bridge
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Memory safety (no unsafe code)
//! - Exact arithmetic (Decimal for value)

use crate::budget::Budget;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use crate::address::Address;

/// Cross-chain sequence number (outbound locks and inbound provisions)
pub type SeqNo = u64;

/// Amount of value moved across the bridge
pub type Amount = Decimal;

/// Transaction identifier inside one wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxId(pub u64);

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Trust role of a threshold wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    /// Attests inbound transfers (provisioning)
    Operator,
    /// Governs every component and runs fraud recovery
    Guardian,
    /// Vetoes individual claims
    Judge,
}

impl Role {
    /// All roles, in wallet order
    pub const ALL: [Role; 3] = [Role::Operator, Role::Guardian, Role::Judge];

    /// Lowercase role label
    pub fn label(&self) -> &'static str {
        match self {
            Role::Operator => "operator",
            Role::Guardian => "guardian",
            Role::Judge => "judge",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Block context the host chain supplies to every invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEnv {
    /// Current block number
    pub number: u64,

    /// Current block timestamp
    pub timestamp: DateTime<Utc>,
}

impl BlockEnv {
    /// Create block context
    pub fn new(number: u64, timestamp: DateTime<Utc>) -> Self {
        Self { number, timestamp }
    }

    /// Context after `blocks` blocks spanning `elapsed` time
    pub fn advanced(&self, blocks: u64, elapsed: Duration) -> Self {
        Self {
            number: self.number + blocks,
            timestamp: self.timestamp + elapsed,
        }
    }
}

/// One call into the bridge: who calls, with how much value and budget
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Calling account
    pub caller: Address,

    /// Value attached to the call (only `transfer` accepts value)
    pub value: Amount,

    /// Execution budget for this call
    pub budget: Budget,
}

impl Invocation {
    /// Call with no attached value
    pub fn new(caller: Address, budget: Budget) -> Self {
        Self {
            caller,
            value: Decimal::ZERO,
            budget,
        }
    }

    /// Attach value to the call
    pub fn with_value(mut self, value: Amount) -> Self {
        self.value = value;
        self
    }
}
