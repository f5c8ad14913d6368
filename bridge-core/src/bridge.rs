//! Bridge state machine
//!
//! [`Bridge`] owns the three wallets, the sequence ledger, the gap scanner and
//! the value rail, and is the only way to change any of them. Every
//! invocation:
//!
//! 1. runs against a staged copy of the state,
//! 2. is charged against the caller's [`Budget`] as it goes,
//! 3. commits state and events together only if it finished without error.
//!
//! A failing invocation therefore has no effect at all: a confirmation whose
//! execution fails is not recorded, a batch that runs out of budget settles
//! nothing.
//!
//! Staging clones the whole state, wallet transaction history included, so
//! the cost of an invocation grows with the size of the state. The state a
//! commit replaces is moved aside rather than copied, which lets the host
//! revert the latest invocation with [`Bridge::rollback_last`] when it cannot
//! be persisted.
//!
//! # Example
//!
//! ```
//! use bridge_core::{Bridge, Budget, Config, Invocation, MemoryRail, Role, Target, Payload};
//! use bridge_core::types::BlockEnv;
//! use chrono::Utc;
//! use rust_decimal::Decimal;
//!
//! let config = Config::default();
//! let mut bridge = Bridge::genesis(&config, MemoryRail::new(), BlockEnv::new(1, Utc::now()))?;
//!
//! let operator = config.genesis.operator.members[0];
//! let payload = Payload::Provision {
//!     seq: 1,
//!     sender: operator,
//!     receiver: operator,
//!     amount: Decimal::ONE,
//! };
//! let call = Invocation::new(operator, Budget::new(1_000_000));
//! let tx_id = bridge.submit(Role::Operator, &call, Target::Ledger, payload, None)?;
//! assert_eq!(bridge.wallet(Role::Operator).confirmation_count(tx_id), 1);
//! # Ok::<(), bridge_core::Error>(())
//! ```

use crate::{
    address::Address,
    batch::{process_batch, BatchReport},
    budget::{Budget, CostSchedule},
    call::{Payload, Target},
    config::{Config, WalletConfig},
    error::{StateError, ValidationError},
    events::{BridgeEvent, EventRecord},
    ledger::{Origins, ProvisionRecord, SequenceLedger},
    multisig::MultisigWallet,
    rail::{MemoryRail, ValueRail},
    scanner::GapScanner,
    types::{Amount, BlockEnv, Invocation, Role, SeqNo, TxId},
    Result,
};
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Identity a wallet acts under when it executes
pub fn wallet_address(role: Role) -> Address {
    Address::derive(&format!("bridge/wallet/{}", role.label()))
}

/// Bridge account on the value rail
pub fn bridge_account() -> Address {
    Address::derive("bridge/account")
}

/// Everything an invocation may change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeState<R> {
    env: BlockEnv,
    operator: MultisigWallet,
    guardian: MultisigWallet,
    judge: MultisigWallet,
    ledger: SequenceLedger,
    scanner: GapScanner,
    rail: R,
}

impl<R> BridgeState<R> {
    fn wallet(&self, role: Role) -> &MultisigWallet {
        match role {
            Role::Operator => &self.operator,
            Role::Guardian => &self.guardian,
            Role::Judge => &self.judge,
        }
    }

    fn wallet_mut(&mut self, role: Role) -> &mut MultisigWallet {
        match role {
            Role::Operator => &mut self.operator,
            Role::Guardian => &mut self.guardian,
            Role::Judge => &mut self.judge,
        }
    }

    /// Block context
    pub fn env(&self) -> BlockEnv {
        self.env
    }
}

/// Cross-chain bridge
#[derive(Debug)]
pub struct Bridge<R: ValueRail = MemoryRail> {
    state: BridgeState<R>,
    costs: CostSchedule,
    log: Vec<EventRecord>,
    undo: Option<Undo<R>>,
}

/// State replaced by the latest commit
#[derive(Debug)]
struct Undo<R> {
    state: BridgeState<R>,
    log_len: usize,
}

impl<R: ValueRail> Bridge<R> {
    /// Build the genesis state from configuration
    pub fn genesis(config: &Config, rail: R, env: BlockEnv) -> Result<Self> {
        config.validate()?;

        let governor = wallet_address(Role::Guardian);
        let wallet = |role: Role, genesis: &WalletConfig| {
            MultisigWallet::new(
                role,
                wallet_address(role),
                governor,
                genesis.members.clone(),
                genesis.threshold,
            )
        };

        let origins = Origins {
            operator: wallet_address(Role::Operator),
            guardian: wallet_address(Role::Guardian),
            judge: wallet_address(Role::Judge),
        };

        let state = BridgeState {
            env,
            operator: wallet(Role::Operator, &config.genesis.operator)?,
            guardian: wallet(Role::Guardian, &config.genesis.guardian)?,
            judge: wallet(Role::Judge, &config.genesis.judge)?,
            ledger: SequenceLedger::new(
                origins,
                bridge_account(),
                env.timestamp,
                config.ledger.clone(),
            ),
            scanner: GapScanner::new(),
            rail,
        };

        tracing::info!(block = env.number, account = %bridge_account(), "Bridge genesis");
        Ok(Self::from_parts(state, config.costs.clone(), Vec::new()))
    }

    /// Reassemble a bridge from persisted parts
    pub fn from_parts(state: BridgeState<R>, costs: CostSchedule, log: Vec<EventRecord>) -> Self {
        Self {
            state,
            costs,
            log,
            undo: None,
        }
    }

    /// Committed state
    pub fn state(&self) -> &BridgeState<R> {
        &self.state
    }

    /// Run `op` on a staged copy and commit on success
    fn transact<T>(
        &mut self,
        invocation: &Invocation,
        payable: bool,
        op: impl FnOnce(&mut Staged<R>) -> Result<T>,
    ) -> Result<T> {
        if !payable && !invocation.value.is_zero() {
            return Err(ValidationError::UnexpectedValue.into());
        }

        let mut staged = Staged {
            state: self.state.clone(),
            budget: invocation.budget,
            costs: self.costs.clone(),
            caller: invocation.caller,
            value: invocation.value,
            events: Vec::new(),
        };

        let output = staged
            .budget
            .charge(self.costs.invocation_base)
            .and_then(|()| op(&mut staged));
        let output = match output {
            Ok(output) => output,
            Err(e) => {
                tracing::debug!(caller = %invocation.caller, error = %e, "Invocation aborted");
                return Err(e);
            }
        };

        let previous = std::mem::replace(&mut self.state, staged.state);
        self.undo = Some(Undo {
            state: previous,
            log_len: self.log.len(),
        });
        let block = self.state.env.number;
        for event in staged.events {
            let index = self.log.len() as u64;
            self.log.push(EventRecord { index, block, event });
        }
        Ok(output)
    }

    // Wallet entry points

    /// Submit a wallet transaction (confirms it for the caller)
    pub fn submit(
        &mut self,
        role: Role,
        invocation: &Invocation,
        target: Target,
        payload: Payload,
        unique_index: Option<u64>,
    ) -> Result<TxId> {
        self.transact(invocation, false, |s| {
            s.submit(role, target, payload, unique_index)
        })
    }

    /// Confirm a pending wallet transaction; returns whether it executed
    pub fn confirm(
        &mut self,
        role: Role,
        invocation: &Invocation,
        tx_id: TxId,
        payload_echo: &Payload,
    ) -> Result<bool> {
        self.transact(invocation, false, |s| s.confirm(role, tx_id, payload_echo))
    }

    /// Withdraw a confirmation
    pub fn revoke(&mut self, role: Role, invocation: &Invocation, tx_id: TxId) -> Result<()> {
        self.transact(invocation, false, |s| {
            let caller = s.caller;
            s.state.wallet_mut(role).revoke(caller, tx_id)?;
            s.events.push(BridgeEvent::Revoked {
                role,
                tx_id,
                member: caller,
            });
            Ok(())
        })
    }

    /// Execute a pending transaction that already has enough live
    /// confirmations, e.g. after a threshold decrease
    pub fn execute(&mut self, role: Role, invocation: &Invocation, tx_id: TxId) -> Result<()> {
        self.transact(invocation, false, |s| {
            let wallet = s.state.wallet(role);
            wallet.require_member(&s.caller)?;
            match wallet.transaction(tx_id) {
                None => return Err(StateError::UnknownTransaction(tx_id).into()),
                Some(tx) if tx.executed => return Err(StateError::AlreadyExecuted(tx_id).into()),
                Some(_) if !wallet.is_ready(tx_id) => return Err(StateError::NotReady(tx_id).into()),
                Some(_) => {}
            }
            s.execute(role, tx_id)
        })
    }

    // Public entry points

    /// Lock the attached value for delivery to `destination`
    pub fn transfer(&mut self, invocation: &Invocation, destination: &str) -> Result<SeqNo> {
        self.transact(invocation, true, |s| {
            s.charge_write()?;
            let env = s.state.env;
            let lock = s.state.ledger.transfer(
                &mut s.state.rail,
                &env,
                s.caller,
                destination,
                s.value,
            )?;
            s.events.push(BridgeEvent::OutboundLocked {
                seq: lock.seq,
                sender: lock.sender,
                destination: lock.destination,
                amount: lock.amount,
            });
            Ok(lock.seq)
        })
    }

    /// Pay out one provisioned sequence
    pub fn request_claim(&mut self, invocation: &Invocation, seq: SeqNo) -> Result<ProvisionRecord> {
        self.transact(invocation, false, |s| {
            s.budget.charge(s.costs.claim_attempt)?;
            let now = s.state.env.timestamp;
            let record = s.state.ledger.request_claim(&mut s.state.rail, now, seq)?;
            s.events.push(BridgeEvent::Claimed {
                seq,
                receiver: record.receiver,
                amount: record.amount,
            });
            Ok(record)
        })
    }

    /// Settle up to `max_count` candidates
    ///
    /// The budget must cover the whole batch up front, otherwise nothing is
    /// attempted.
    pub fn request_batch_claim(&mut self, invocation: &Invocation, max_count: usize) -> Result<BatchReport> {
        invocation.budget.ensure(self.costs.batch_claim(max_count))?;

        self.transact(invocation, false, |s| {
            let now = s.state.env.timestamp;
            let report = process_batch(
                &mut s.state.ledger,
                &mut s.state.rail,
                &mut s.budget,
                &s.costs,
                now,
                max_count,
            )?;
            for item in &report.claimed {
                s.events.push(BridgeEvent::Claimed {
                    seq: item.seq,
                    receiver: item.receiver,
                    amount: item.amount,
                });
            }
            for item in &report.failed {
                s.events.push(BridgeEvent::ClaimFailed {
                    seq: item.seq,
                    failure_count: item.failure_count,
                    unclaimable: item.unclaimable,
                });
            }
            Ok(report)
        })
    }

    /// Advance the caller's gap-scanner watermark
    pub fn update_next_unsubmitted_seq(&mut self, invocation: &Invocation, next_seq: SeqNo) -> Result<()> {
        self.transact(invocation, false, |s| {
            s.charge_write()?;
            let caller = s.caller;
            s.state
                .scanner
                .update_watermark(&s.state.operator, caller, next_seq)?;
            s.events.push(BridgeEvent::WatermarkAdvanced {
                member: caller,
                next_seq,
            });
            Ok(())
        })
    }

    /// Revert the latest committed invocation and its events
    ///
    /// Only one level is kept; returns `false` when there is nothing to
    /// revert.
    pub fn rollback_last(&mut self) -> bool {
        match self.undo.take() {
            Some(undo) => {
                self.state = undo.state;
                self.log.truncate(undo.log_len);
                tracing::warn!(events = self.log.len(), "Latest invocation rolled back");
                true
            }
            None => false,
        }
    }

    // Host operations

    /// Move to a later block
    pub fn advance_block(&mut self, blocks: u64, elapsed: Duration) {
        self.undo = None;
        self.state.env = self.state.env.advanced(blocks, elapsed);
    }

    /// Replace the block context
    pub fn set_env(&mut self, env: BlockEnv) {
        self.undo = None;
        self.state.env = env;
    }

    /// Mutable access to the value rail (funding, contract setup)
    pub fn rail_mut(&mut self) -> &mut R {
        self.undo = None;
        &mut self.state.rail
    }

    // Reads

    /// Block context
    pub fn env(&self) -> BlockEnv {
        self.state.env
    }

    /// Cost schedule
    pub fn costs(&self) -> &CostSchedule {
        &self.costs
    }

    /// Wallet of a role
    pub fn wallet(&self, role: Role) -> &MultisigWallet {
        self.state.wallet(role)
    }

    /// Sequence ledger
    pub fn ledger(&self) -> &SequenceLedger {
        &self.state.ledger
    }

    /// Gap scanner
    pub fn scanner(&self) -> &GapScanner {
        &self.state.scanner
    }

    /// Value rail
    pub fn rail(&self) -> &R {
        &self.state.rail
    }

    /// Balance held by the bridge
    pub fn bridge_balance(&self) -> Amount {
        self.state.rail.balance_of(&self.state.ledger.account())
    }

    /// Balance of any account
    pub fn balance_of(&self, account: &Address) -> Amount {
        self.state.rail.balance_of(account)
    }

    /// Sequences an Operator member still has to look at
    ///
    /// `window` is capped at the configured `max_scan_window`.
    pub fn get_unconfirmed_provision_seqs(&self, member: &Address, window: u64) -> Vec<SeqNo> {
        let window = window.min(self.state.ledger.params().max_scan_window);
        self.state.scanner.unconfirmed_provision_seqs(
            &self.state.ledger,
            &self.state.operator,
            member,
            window,
        )
    }

    /// Operator member's watermark
    pub fn unsubmitted_next_seq(&self, member: &Address) -> SeqNo {
        self.state.scanner.unsubmitted_next_seq(member)
    }

    /// Operator transactions submitted against a sequence
    pub fn get_seq2_tx_ids(&self, seq: SeqNo) -> &[TxId] {
        self.state.scanner.seq2_tx_ids(seq)
    }

    /// Committed events
    pub fn events(&self) -> &[EventRecord] {
        &self.log
    }

    /// Committed events from `index` on
    pub fn events_since(&self, index: u64) -> &[EventRecord] {
        let start = (index as usize).min(self.log.len());
        &self.log[start..]
    }
}

/// Invocation in progress
struct Staged<R> {
    state: BridgeState<R>,
    budget: Budget,
    costs: CostSchedule,
    caller: Address,
    value: Amount,
    events: Vec<BridgeEvent>,
}

impl<R: ValueRail> Staged<R> {
    fn charge_write(&mut self) -> Result<()> {
        self.budget.charge(self.costs.record_write)
    }

    fn submit(
        &mut self,
        role: Role,
        target: Target,
        payload: Payload,
        unique_index: Option<u64>,
    ) -> Result<TxId> {
        let caller = self.caller;
        let action = payload.name();
        let provision_seq = payload.provision_seq();

        let submission = self
            .state
            .wallet_mut(role)
            .submit(caller, target, payload, unique_index)?;
        let tx_id = submission.tx_id;

        if submission.created {
            self.charge_write()?;
            self.events.push(BridgeEvent::Submitted {
                role,
                tx_id,
                submitter: caller,
                target,
                action: action.to_string(),
            });
            if let (Role::Operator, Some(seq)) = (role, provision_seq) {
                self.state.scanner.record_submission(seq, tx_id);
            }
        } else if submission.confirmed {
            self.charge_write()?;
            self.events.push(BridgeEvent::Confirmed {
                role,
                tx_id,
                member: caller,
            });
        }

        if submission.ready {
            self.execute(role, tx_id)?;
        }
        Ok(tx_id)
    }

    fn confirm(&mut self, role: Role, tx_id: TxId, payload_echo: &Payload) -> Result<bool> {
        let caller = self.caller;
        let ready = self
            .state
            .wallet_mut(role)
            .confirm(caller, tx_id, payload_echo)?;
        self.charge_write()?;
        self.events.push(BridgeEvent::Confirmed {
            role,
            tx_id,
            member: caller,
        });

        if ready {
            self.execute(role, tx_id)?;
        }
        Ok(ready)
    }

    fn execute(&mut self, role: Role, tx_id: TxId) -> Result<()> {
        let wallet = self.state.wallet_mut(role);
        wallet.mark_executed(tx_id)?;
        let origin = wallet.address();
        let (target, payload) = wallet
            .transaction(tx_id)
            .map(|tx| (tx.target, tx.payload.clone()))
            .ok_or(StateError::UnknownTransaction(tx_id))?;

        tracing::info!(role = %role, tx_id = %tx_id, action = payload.name(), target = %target, "Executing transaction");
        self.events.push(BridgeEvent::Executed { role, tx_id });

        match target {
            Target::Wallet(governed) => {
                let change = self.state.wallet_mut(governed).apply_admin(origin, &payload)?;
                self.events.push(BridgeEvent::MembershipChanged {
                    role: governed,
                    change,
                });
                Ok(())
            }
            Target::Ledger => self.deliver(origin, payload),
        }
    }

    /// Hand a payload to the ledger under `origin`
    fn deliver(&mut self, origin: Address, payload: Payload) -> Result<()> {
        let now = self.state.env.timestamp;

        match &payload {
            Payload::Provision {
                seq,
                sender,
                receiver,
                amount,
            } => {
                let created = self
                    .state
                    .ledger
                    .provision(origin, now, *seq, *sender, *receiver, *amount)?;
                if created {
                    self.charge_write()?;
                    self.events.push(BridgeEvent::Provisioned {
                        seq: *seq,
                        receiver: *receiver,
                        amount: *amount,
                    });
                }
            }
            Payload::HoldClaim { seq } => {
                self.state.ledger.hold_claim(origin, *seq)?;
                self.events.push(BridgeEvent::ClaimHeld { seq: *seq });
            }
            Payload::ReleaseClaim { seq } => {
                self.state.ledger.release_claim(origin, *seq)?;
                self.events.push(BridgeEvent::ClaimReleased { seq: *seq });
            }
            Payload::RemoveProvision { seq } => {
                self.state.ledger.remove_provision(origin, *seq)?;
                self.events.push(BridgeEvent::ProvisionRemoved { seq: *seq });
            }
            Payload::ResolveUnclaimable { seq, new_receiver } => {
                self.budget.charge(self.costs.claim_attempt)?;
                self.state.ledger.resolve_unclaimable(
                    origin,
                    &mut self.state.rail,
                    *seq,
                    *new_receiver,
                )?;
                self.events.push(BridgeEvent::UnclaimableResolved {
                    seq: *seq,
                    receiver: *new_receiver,
                });
            }
            Payload::PauseBridge { reason } => {
                self.state.ledger.pause(origin, reason)?;
                self.events.push(BridgeEvent::Paused {
                    reason: reason.clone(),
                });
            }
            Payload::ResumeBridge { reason } => {
                self.state.ledger.resume(origin, reason)?;
                self.events.push(BridgeEvent::Resumed {
                    reason: reason.clone(),
                });
            }
            Payload::SetTransferLock { seconds } => {
                self.state.ledger.set_transfer_lock(origin, *seconds)?;
                self.events.push(BridgeEvent::ConfigChanged {
                    change: payload.clone(),
                });
            }
            Payload::SetLockBounds { min, max } => {
                self.state.ledger.set_lock_bounds(origin, *min, *max)?;
                self.events.push(BridgeEvent::ConfigChanged {
                    change: payload.clone(),
                });
            }
            Payload::SetMaxTryTransfer { count } => {
                self.state.ledger.set_max_try_transfer(origin, *count)?;
                self.events.push(BridgeEvent::ConfigChanged {
                    change: payload.clone(),
                });
            }
            Payload::SetAddressValidation { enabled } => {
                self.state.ledger.set_address_validation(origin, *enabled)?;
                self.events.push(BridgeEvent::ConfigChanged {
                    change: payload.clone(),
                });
            }
            Payload::SetServicePeriod { seconds } => {
                self.state.ledger.set_service_period(origin, *seconds)?;
                self.events.push(BridgeEvent::ConfigChanged {
                    change: payload.clone(),
                });
            }
            Payload::BurnBridgeBalance => {
                let amount =
                    self.state
                        .ledger
                        .burn_bridge_balance(origin, &mut self.state.rail, now)?;
                self.events.push(BridgeEvent::BalanceBurned {
                    sink: self.state.ledger.params().burn_sink,
                    amount,
                });
            }
            Payload::AddMember { .. }
            | Payload::RemoveMember { .. }
            | Payload::ReplaceMember { .. }
            | Payload::ChangeThreshold { .. } => {
                return Err(ValidationError::UnsupportedTarget {
                    action: payload.name(),
                    target: Target::Ledger.to_string(),
                }
                .into())
            }
        }
        Ok(())
    }
}
