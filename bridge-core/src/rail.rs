//! Value rail
//!
//! The bridge never holds balances itself. Locked value, payouts and burns all
//! move through a [`ValueRail`], which also answers whether an account is a
//! contract. Production hosts plug in the chain's native transfer primitive;
//! [`MemoryRail`] keeps everything in memory for tests and the standalone node.

use crate::{
    types::{Address, Amount},
    Error, Result,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Native value transfers on the host chain
pub trait ValueRail: Clone + fmt::Debug {
    /// Balance of an account
    fn balance_of(&self, account: &Address) -> Amount;

    /// Move `amount` from `from` to `to`
    ///
    /// A recipient refusing the funds, or a sender without enough balance,
    /// yields [`Error::TransferFailed`] and leaves both balances untouched.
    fn transfer(&mut self, from: Address, to: Address, amount: Amount) -> Result<()>;

    /// Whether the account holds code
    fn is_contract(&self, account: &Address) -> bool;
}

/// How a contract account reacts to incoming value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractBehavior {
    /// Accepts every payment
    Accepting,
    /// Reverts every payment
    Rejecting,
}

/// In-memory rail
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryRail {
    balances: BTreeMap<Address, Amount>,
    contracts: BTreeMap<Address, ContractBehavior>,
}

impl MemoryRail {
    /// Empty rail
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit an account out of thin air (genesis funding, tests)
    pub fn mint(&mut self, account: Address, amount: Amount) {
        *self.balances.entry(account).or_insert(Decimal::ZERO) += amount;
    }

    /// Mark an account as a contract
    pub fn deploy(&mut self, account: Address, behavior: ContractBehavior) {
        self.contracts.insert(account, behavior);
    }

    /// Remove contract status
    pub fn destroy(&mut self, account: &Address) {
        self.contracts.remove(account);
    }

    /// Sum of all balances
    pub fn total_supply(&self) -> Amount {
        self.balances.values().copied().sum()
    }
}

impl ValueRail for MemoryRail {
    fn balance_of(&self, account: &Address) -> Amount {
        self.balances.get(account).copied().unwrap_or(Decimal::ZERO)
    }

    fn transfer(&mut self, from: Address, to: Address, amount: Amount) -> Result<()> {
        if amount < Decimal::ZERO {
            return Err(Error::TransferFailed(format!("negative amount {}", amount)));
        }
        if self.contracts.get(&to) == Some(&ContractBehavior::Rejecting) {
            return Err(Error::TransferFailed(format!("{} rejected the payment", to)));
        }

        let available = self.balance_of(&from);
        if available < amount {
            return Err(Error::TransferFailed(format!(
                "{} holds {}, needs {}",
                from, available, amount
            )));
        }

        self.balances.insert(from, available - amount);
        *self.balances.entry(to).or_insert(Decimal::ZERO) += amount;
        Ok(())
    }

    fn is_contract(&self, account: &Address) -> bool {
        self.contracts.contains_key(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_moves_balance() {
        let alice = Address::from_low_u64(1);
        let bob = Address::from_low_u64(2);
        let mut rail = MemoryRail::new();
        rail.mint(alice, Decimal::from(10));

        rail.transfer(alice, bob, Decimal::from(4)).unwrap();
        assert_eq!(rail.balance_of(&alice), Decimal::from(6));
        assert_eq!(rail.balance_of(&bob), Decimal::from(4));
        assert_eq!(rail.total_supply(), Decimal::from(10));
    }

    #[test]
    fn test_insufficient_balance() {
        let alice = Address::from_low_u64(1);
        let mut rail = MemoryRail::new();
        let err = rail
            .transfer(alice, Address::from_low_u64(2), Decimal::ONE)
            .unwrap_err();
        assert!(matches!(err, Error::TransferFailed(_)));
    }

    #[test]
    fn test_rejecting_contract() {
        let alice = Address::from_low_u64(1);
        let vault = Address::from_low_u64(3);
        let mut rail = MemoryRail::new();
        rail.mint(alice, Decimal::from(5));
        rail.deploy(vault, ContractBehavior::Rejecting);

        assert!(rail.is_contract(&vault));
        assert!(rail.transfer(alice, vault, Decimal::ONE).is_err());
        assert_eq!(rail.balance_of(&alice), Decimal::from(5));

        rail.deploy(vault, ContractBehavior::Accepting);
        rail.transfer(alice, vault, Decimal::ONE).unwrap();
        assert_eq!(rail.balance_of(&vault), Decimal::ONE);
    }
}
