//! Wallet transaction payloads
//!
//! A wallet transaction names a target component and a payload. Executing the
//! transaction delivers the payload to the target with the wallet's own
//! address as the origin; the target then checks that origin.

use crate::address::keccak256;
use crate::types::{Address, Amount, Role, SeqNo};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Component a wallet transaction is delivered to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Target {
    /// The sequence ledger
    Ledger,
    /// Membership administration of one of the wallets
    Wallet(Role),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Ledger => write!(f, "ledger"),
            Target::Wallet(role) => write!(f, "{} wallet", role),
        }
    }
}

/// Action carried by a wallet transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// Record an inbound transfer
    Provision {
        /// Sequence number assigned by the source chain
        seq: SeqNo,
        /// Sender on the source chain
        sender: Address,
        /// Receiver on this chain
        receiver: Address,
        /// Amount to release
        amount: Amount,
    },

    /// Freeze a claim indefinitely
    HoldClaim {
        /// Sequence to hold
        seq: SeqNo,
    },

    /// Lift a hold
    ReleaseClaim {
        /// Sequence to release
        seq: SeqNo,
    },

    /// Delete a provision outright
    RemoveProvision {
        /// Sequence to remove
        seq: SeqNo,
    },

    /// Redirect and settle a sequence stuck in the failure set
    ResolveUnclaimable {
        /// Stuck sequence
        seq: SeqNo,
        /// Replacement receiver (must not be a contract)
        new_receiver: Address,
    },

    /// Stop provisioning and outbound transfers
    PauseBridge {
        /// Operator-facing reason
        reason: String,
    },

    /// Undo a pause
    ResumeBridge {
        /// Operator-facing reason
        reason: String,
    },

    /// Change the claim delay applied to new provisions
    SetTransferLock {
        /// Delay in seconds
        seconds: u64,
    },

    /// Change the lockable amount bounds
    SetLockBounds {
        /// Lower bound (inclusive)
        min: Amount,
        /// Upper bound (inclusive)
        max: Amount,
    },

    /// Change how many batch payout rejections a sequence survives
    SetMaxTryTransfer {
        /// Attempts before a sequence moves to the failure set
        count: u32,
    },

    /// Toggle destination checksum validation
    SetAddressValidation {
        /// Validation on/off
        enabled: bool,
    },

    /// Change the service period measured from genesis
    SetServicePeriod {
        /// Period in seconds
        seconds: u64,
    },

    /// Send the whole bridge balance to the burn sink
    BurnBridgeBalance,

    /// Add a wallet member
    AddMember {
        /// New member
        member: Address,
    },

    /// Remove a wallet member
    RemoveMember {
        /// Member to remove
        member: Address,
    },

    /// Swap one member for another
    ReplaceMember {
        /// Current member
        old: Address,
        /// Replacement
        new: Address,
    },

    /// Change the confirmation threshold
    ChangeThreshold {
        /// New threshold
        threshold: usize,
    },
}

impl Payload {
    /// Stable payload name
    pub fn name(&self) -> &'static str {
        match self {
            Payload::Provision { .. } => "provision",
            Payload::HoldClaim { .. } => "hold_claim",
            Payload::ReleaseClaim { .. } => "release_claim",
            Payload::RemoveProvision { .. } => "remove_provision",
            Payload::ResolveUnclaimable { .. } => "resolve_unclaimable",
            Payload::PauseBridge { .. } => "pause_bridge",
            Payload::ResumeBridge { .. } => "resume_bridge",
            Payload::SetTransferLock { .. } => "set_transfer_lock",
            Payload::SetLockBounds { .. } => "set_lock_bounds",
            Payload::SetMaxTryTransfer { .. } => "set_max_try_transfer",
            Payload::SetAddressValidation { .. } => "set_address_validation",
            Payload::SetServicePeriod { .. } => "set_service_period",
            Payload::BurnBridgeBalance => "burn_bridge_balance",
            Payload::AddMember { .. } => "add_member",
            Payload::RemoveMember { .. } => "remove_member",
            Payload::ReplaceMember { .. } => "replace_member",
            Payload::ChangeThreshold { .. } => "change_threshold",
        }
    }

    /// Membership administration payloads are delivered to wallets, all
    /// others to the ledger
    pub fn is_wallet_admin(&self) -> bool {
        matches!(
            self,
            Payload::AddMember { .. }
                | Payload::RemoveMember { .. }
                | Payload::ReplaceMember { .. }
                | Payload::ChangeThreshold { .. }
        )
    }

    /// Whether `target` can receive this payload
    pub fn fits(&self, target: Target) -> bool {
        match target {
            Target::Ledger => !self.is_wallet_admin(),
            Target::Wallet(_) => self.is_wallet_admin(),
        }
    }

    /// Inbound sequence this payload provisions
    pub fn provision_seq(&self) -> Option<SeqNo> {
        match self {
            Payload::Provision { seq, .. } => Some(*seq),
            _ => None,
        }
    }

    /// Deduplication index clients can pass to `submit`, derived from the
    /// payload contents so identical requests map to one transaction
    pub fn unique_index(&self) -> u64 {
        let encoded = bincode::serialize(self).unwrap_or_default();
        let hash = keccak256(&encoded);
        let mut head = [0u8; 8];
        head.copy_from_slice(&hash[..8]);
        u64::from_be_bytes(head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn provision(amount: i64) -> Payload {
        Payload::Provision {
            seq: 7,
            sender: Address::from_low_u64(0x123),
            receiver: Address::from_low_u64(0x456),
            amount: Decimal::from(amount),
        }
    }

    #[test]
    fn test_target_fit() {
        assert!(provision(1).fits(Target::Ledger));
        assert!(!provision(1).fits(Target::Wallet(Role::Operator)));

        let admin = Payload::ChangeThreshold { threshold: 2 };
        assert!(admin.fits(Target::Wallet(Role::Judge)));
        assert!(!admin.fits(Target::Ledger));
    }

    #[test]
    fn test_unique_index_tracks_contents() {
        assert_eq!(provision(1).unique_index(), provision(1).unique_index());
        assert_ne!(provision(1).unique_index(), provision(2).unique_index());
    }

    #[test]
    fn test_provision_seq() {
        assert_eq!(provision(1).provision_seq(), Some(7));
        assert_eq!(Payload::HoldClaim { seq: 7 }.provision_seq(), None);
    }
}
