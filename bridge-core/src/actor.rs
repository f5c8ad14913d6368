//! Actor-based concurrency for the bridge
//!
//! The bridge state machine is strictly serialized. This module puts one
//! [`Bridge`] behind a single Tokio task:
//! - One writer: invocations run one at a time, in mailbox order
//! - Every committed invocation is persisted before its reply is sent
//! - Bounded mailbox gives callers backpressure
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │               BridgeHandle (Clone)                    │
//! │         Sends messages to actor mailbox               │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │              BridgeActor (Single Task)                │
//! │  ┌────────────────────────────────────────────────┐  │
//! │  │ Bridge::submit / confirm / request_claim ...   │  │
//! │  │ (staged, all-or-nothing)                       │  │
//! │  └────────────────────────────────────────────────┘  │
//! │                       │ on commit                     │
//! │                       ▼                               │
//! │           Storage::persist()                          │
//! │          (atomic write to RocksDB)                    │
//! └───────────────────────────────────────────────────────┘
//! ```

use crate::{
    batch::BatchReport,
    bridge::Bridge,
    call::{Payload, Target},
    events::EventRecord,
    ledger::ProvisionRecord,
    metrics::Metrics,
    multisig::MultisigWallet,
    rail::ValueRail,
    storage::Storage,
    types::{Address, Amount, BlockEnv, Invocation, Role, SeqNo, TxId},
    Error, Result,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Message sent to the bridge actor
#[derive(Debug)]
pub enum BridgeMessage {
    /// Submit a wallet transaction
    Submit {
        /// Wallet
        role: Role,
        /// Caller and budget
        invocation: Invocation,
        /// Receiving component
        target: Target,
        /// Payload
        payload: Payload,
        /// Deduplication index
        unique_index: Option<u64>,
        /// Reply
        response: oneshot::Sender<Result<TxId>>,
    },

    /// Confirm a wallet transaction
    Confirm {
        /// Wallet
        role: Role,
        /// Caller and budget
        invocation: Invocation,
        /// Transaction
        tx_id: TxId,
        /// Expected payload
        payload: Payload,
        /// Reply: whether it executed
        response: oneshot::Sender<Result<bool>>,
    },

    /// Revoke a confirmation
    Revoke {
        /// Wallet
        role: Role,
        /// Caller and budget
        invocation: Invocation,
        /// Transaction
        tx_id: TxId,
        /// Reply
        response: oneshot::Sender<Result<()>>,
    },

    /// Execute a ready transaction
    Execute {
        /// Wallet
        role: Role,
        /// Caller and budget
        invocation: Invocation,
        /// Transaction
        tx_id: TxId,
        /// Reply
        response: oneshot::Sender<Result<()>>,
    },

    /// Lock value for the destination chain
    Transfer {
        /// Caller, value and budget
        invocation: Invocation,
        /// Destination-chain address
        destination: String,
        /// Reply: outbound sequence
        response: oneshot::Sender<Result<SeqNo>>,
    },

    /// Claim one sequence
    RequestClaim {
        /// Caller and budget
        invocation: Invocation,
        /// Sequence
        seq: SeqNo,
        /// Reply
        response: oneshot::Sender<Result<ProvisionRecord>>,
    },

    /// Run a batch claim
    RequestBatchClaim {
        /// Caller and budget
        invocation: Invocation,
        /// Attempt limit
        max_count: usize,
        /// Reply
        response: oneshot::Sender<Result<BatchReport>>,
    },

    /// Advance the caller's watermark
    UpdateWatermark {
        /// Caller and budget
        invocation: Invocation,
        /// New watermark
        next_seq: SeqNo,
        /// Reply
        response: oneshot::Sender<Result<()>>,
    },

    /// Move to a later block
    AdvanceBlock {
        /// Blocks to add
        blocks: u64,
        /// Time to add
        elapsed: chrono::Duration,
        /// Reply: new block context
        response: oneshot::Sender<Result<BlockEnv>>,
    },

    /// Get a provision record
    GetProvision {
        /// Sequence
        seq: SeqNo,
        /// Reply
        response: oneshot::Sender<Option<ProvisionRecord>>,
    },

    /// Get a wallet
    GetWallet {
        /// Wallet
        role: Role,
        /// Reply
        response: oneshot::Sender<MultisigWallet>,
    },

    /// Get claim candidates and failures
    GetClaimQueues {
        /// Reply: (candidates, failures)
        response: oneshot::Sender<(Vec<SeqNo>, Vec<SeqNo>)>,
    },

    /// Get a member's unhandled sequences
    GetUnconfirmedSeqs {
        /// Operator member
        member: Address,
        /// Window size
        window: u64,
        /// Reply
        response: oneshot::Sender<Vec<SeqNo>>,
    },

    /// Get the bridge balance
    GetBridgeBalance {
        /// Reply
        response: oneshot::Sender<Amount>,
    },

    /// Get committed events from an index on
    GetEvents {
        /// First index
        since: u64,
        /// Reply
        response: oneshot::Sender<Vec<EventRecord>>,
    },

    /// Shutdown actor
    Shutdown,
}

/// Actor that owns the bridge
#[derive(Debug)]
pub struct BridgeActor<R: ValueRail> {
    bridge: Bridge<R>,
    storage: Arc<Storage>,
    metrics: Metrics,
    mailbox: mpsc::Receiver<BridgeMessage>,
}

impl<R> BridgeActor<R>
where
    R: ValueRail + Serialize + Send + 'static,
{
    /// Create new actor
    pub fn new(
        bridge: Bridge<R>,
        storage: Arc<Storage>,
        metrics: Metrics,
        mailbox: mpsc::Receiver<BridgeMessage>,
    ) -> Self {
        metrics
            .provisioned_pending
            .set(bridge.ledger().unclaimed_count() as i64);
        Self {
            bridge,
            storage,
            metrics,
            mailbox,
        }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            if let BridgeMessage::Shutdown = msg {
                break;
            }
            self.handle_message(msg);
        }

        if let Err(e) = self.storage.persist(&self.bridge) {
            tracing::error!("Error persisting on shutdown: {}", e);
        }
        tracing::info!("Bridge actor stopped");
    }

    /// Persist and account for a finished invocation
    ///
    /// A commit that cannot be persisted is rolled back, so an error reply
    /// always means the invocation had no effect.
    fn finish<T>(&mut self, first_event: u64, result: Result<T>) -> Result<T> {
        let value = match result {
            Ok(value) => value,
            Err(e) => {
                self.metrics.record_abort();
                return Err(e);
            }
        };

        if let Err(e) = self.storage.persist(&self.bridge) {
            tracing::error!("Persist failed, rolling back invocation: {}", e);
            self.bridge.rollback_last();
            self.metrics.record_abort();
            return Err(e);
        }
        self.metrics.record_events(self.bridge.events_since(first_event));
        Ok(value)
    }

    /// Handle a single message
    fn handle_message(&mut self, msg: BridgeMessage) {
        let first_event = self.bridge.events().len() as u64;

        match msg {
            BridgeMessage::Submit {
                role,
                invocation,
                target,
                payload,
                unique_index,
                response,
            } => {
                let result = self
                    .bridge
                    .submit(role, &invocation, target, payload, unique_index);
                let _ = response.send(self.finish(first_event, result));
            }

            BridgeMessage::Confirm {
                role,
                invocation,
                tx_id,
                payload,
                response,
            } => {
                let result = self.bridge.confirm(role, &invocation, tx_id, &payload);
                let _ = response.send(self.finish(first_event, result));
            }

            BridgeMessage::Revoke {
                role,
                invocation,
                tx_id,
                response,
            } => {
                let result = self.bridge.revoke(role, &invocation, tx_id);
                let _ = response.send(self.finish(first_event, result));
            }

            BridgeMessage::Execute {
                role,
                invocation,
                tx_id,
                response,
            } => {
                let result = self.bridge.execute(role, &invocation, tx_id);
                let _ = response.send(self.finish(first_event, result));
            }

            BridgeMessage::Transfer {
                invocation,
                destination,
                response,
            } => {
                let result = self.bridge.transfer(&invocation, &destination);
                let _ = response.send(self.finish(first_event, result));
            }

            BridgeMessage::RequestClaim {
                invocation,
                seq,
                response,
            } => {
                let result = self.bridge.request_claim(&invocation, seq);
                let _ = response.send(self.finish(first_event, result));
            }

            BridgeMessage::RequestBatchClaim {
                invocation,
                max_count,
                response,
            } => {
                let result = self.bridge.request_batch_claim(&invocation, max_count);
                let _ = response.send(self.finish(first_event, result));
            }

            BridgeMessage::UpdateWatermark {
                invocation,
                next_seq,
                response,
            } => {
                let result = self.bridge.update_next_unsubmitted_seq(&invocation, next_seq);
                let _ = response.send(self.finish(first_event, result));
            }

            BridgeMessage::AdvanceBlock {
                blocks,
                elapsed,
                response,
            } => {
                let previous = self.bridge.env();
                self.bridge.advance_block(blocks, elapsed);
                let env = self.bridge.env();
                let result = self.storage.persist(&self.bridge).map(|_| env);
                if result.is_err() {
                    self.bridge.set_env(previous);
                }
                let _ = response.send(result);
            }

            BridgeMessage::GetProvision { seq, response } => {
                let _ = response.send(self.bridge.ledger().provision_record(seq).cloned());
            }

            BridgeMessage::GetWallet { role, response } => {
                let _ = response.send(self.bridge.wallet(role).clone());
            }

            BridgeMessage::GetClaimQueues { response } => {
                let ledger = self.bridge.ledger();
                let _ = response.send((ledger.claim_candidates(), ledger.claim_failures()));
            }

            BridgeMessage::GetUnconfirmedSeqs {
                member,
                window,
                response,
            } => {
                let _ = response.send(self.bridge.get_unconfirmed_provision_seqs(&member, window));
            }

            BridgeMessage::GetBridgeBalance { response } => {
                let _ = response.send(self.bridge.bridge_balance());
            }

            BridgeMessage::GetEvents { since, response } => {
                let _ = response.send(self.bridge.events_since(since).to_vec());
            }

            BridgeMessage::Shutdown => {
                // Handled in run loop
            }
        }
    }
}

/// Handle for sending messages to the actor
#[derive(Clone, Debug)]
pub struct BridgeHandle {
    sender: mpsc::Sender<BridgeMessage>,
}

impl BridgeHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<BridgeMessage>) -> Self {
        Self { sender }
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> BridgeMessage) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))
    }

    /// Submit a wallet transaction
    pub async fn submit(
        &self,
        role: Role,
        invocation: Invocation,
        target: Target,
        payload: Payload,
        unique_index: Option<u64>,
    ) -> Result<TxId> {
        self.request(|response| BridgeMessage::Submit {
            role,
            invocation,
            target,
            payload,
            unique_index,
            response,
        })
        .await?
    }

    /// Confirm a wallet transaction
    pub async fn confirm(
        &self,
        role: Role,
        invocation: Invocation,
        tx_id: TxId,
        payload: Payload,
    ) -> Result<bool> {
        self.request(|response| BridgeMessage::Confirm {
            role,
            invocation,
            tx_id,
            payload,
            response,
        })
        .await?
    }

    /// Revoke a confirmation
    pub async fn revoke(&self, role: Role, invocation: Invocation, tx_id: TxId) -> Result<()> {
        self.request(|response| BridgeMessage::Revoke {
            role,
            invocation,
            tx_id,
            response,
        })
        .await?
    }

    /// Execute a ready transaction
    pub async fn execute(&self, role: Role, invocation: Invocation, tx_id: TxId) -> Result<()> {
        self.request(|response| BridgeMessage::Execute {
            role,
            invocation,
            tx_id,
            response,
        })
        .await?
    }

    /// Lock value for the destination chain
    pub async fn transfer(&self, invocation: Invocation, destination: impl Into<String>) -> Result<SeqNo> {
        let destination = destination.into();
        self.request(|response| BridgeMessage::Transfer {
            invocation,
            destination,
            response,
        })
        .await?
    }

    /// Claim one sequence
    pub async fn request_claim(&self, invocation: Invocation, seq: SeqNo) -> Result<ProvisionRecord> {
        self.request(|response| BridgeMessage::RequestClaim {
            invocation,
            seq,
            response,
        })
        .await?
    }

    /// Run a batch claim
    pub async fn request_batch_claim(&self, invocation: Invocation, max_count: usize) -> Result<BatchReport> {
        self.request(|response| BridgeMessage::RequestBatchClaim {
            invocation,
            max_count,
            response,
        })
        .await?
    }

    /// Advance the caller's watermark
    pub async fn update_next_unsubmitted_seq(&self, invocation: Invocation, next_seq: SeqNo) -> Result<()> {
        self.request(|response| BridgeMessage::UpdateWatermark {
            invocation,
            next_seq,
            response,
        })
        .await?
    }

    /// Move to a later block
    pub async fn advance_block(&self, blocks: u64, elapsed: chrono::Duration) -> Result<BlockEnv> {
        self.request(|response| BridgeMessage::AdvanceBlock {
            blocks,
            elapsed,
            response,
        })
        .await?
    }

    /// Get a provision record
    pub async fn provision(&self, seq: SeqNo) -> Result<Option<ProvisionRecord>> {
        self.request(|response| BridgeMessage::GetProvision { seq, response })
            .await
    }

    /// Get a wallet
    pub async fn wallet(&self, role: Role) -> Result<MultisigWallet> {
        self.request(|response| BridgeMessage::GetWallet { role, response })
            .await
    }

    /// Get claim candidates and failures
    pub async fn claim_queues(&self) -> Result<(Vec<SeqNo>, Vec<SeqNo>)> {
        self.request(|response| BridgeMessage::GetClaimQueues { response })
            .await
    }

    /// Get a member's unhandled sequences
    pub async fn unconfirmed_provision_seqs(&self, member: Address, window: u64) -> Result<Vec<SeqNo>> {
        self.request(|response| BridgeMessage::GetUnconfirmedSeqs {
            member,
            window,
            response,
        })
        .await
    }

    /// Get the bridge balance
    pub async fn bridge_balance(&self) -> Result<Amount> {
        self.request(|response| BridgeMessage::GetBridgeBalance { response })
            .await
    }

    /// Get committed events from an index on
    pub async fn events(&self, since: u64) -> Result<Vec<EventRecord>> {
        self.request(|response| BridgeMessage::GetEvents { since, response })
            .await
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(BridgeMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        Ok(())
    }
}

/// Spawn the bridge actor
///
/// The returned task finishes after a shutdown once the final snapshot is
/// written.
pub fn spawn_bridge_actor<R>(
    bridge: Bridge<R>,
    storage: Arc<Storage>,
    metrics: Metrics,
    mailbox_capacity: usize,
) -> (BridgeHandle, JoinHandle<()>)
where
    R: ValueRail + Serialize + Send + 'static,
{
    let (tx, rx) = mpsc::channel(mailbox_capacity);
    let actor = BridgeActor::new(bridge, storage, metrics, rx);

    let task = tokio::spawn(async move {
        actor.run().await;
    });

    (BridgeHandle::new(tx), task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::bridge_account;
    use crate::budget::Budget;
    use crate::rail::MemoryRail;
    use crate::Config;
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    struct Harness {
        handle: BridgeHandle,
        task: JoinHandle<()>,
        storage: Arc<Storage>,
        metrics: Metrics,
        config: Config,
        _temp: tempfile::TempDir,
    }

    fn start() -> Harness {
        let temp = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp.path().to_path_buf();
        config.rocksdb.sync_writes = false;
        start_in(config, temp)
    }

    fn start_in(config: Config, temp: tempfile::TempDir) -> Harness {
        let storage = Arc::new(Storage::open(&config).unwrap());
        let mut rail = MemoryRail::new();
        rail.mint(bridge_account(), Decimal::from(10));
        let bridge = storage
            .open_bridge(&config, || {
                Bridge::genesis(&config, rail, BlockEnv::new(1, Utc::now()))
            })
            .unwrap();
        let metrics = Metrics::new().unwrap();
        let (handle, task) = spawn_bridge_actor(bridge, storage.clone(), metrics.clone(), 16);

        Harness {
            handle,
            task,
            storage,
            metrics,
            config,
            _temp: temp,
        }
    }

    fn call(caller: Address) -> Invocation {
        Invocation::new(caller, Budget::new(1_000_000))
    }

    #[tokio::test]
    async fn test_actor_spawn_and_shutdown() {
        let h = start();
        h.handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_actor_provision_and_claim() {
        let h = start();
        let ops = h.config.genesis.operator.members.clone();
        let receiver = Address::from_low_u64(0x456);
        let payload = Payload::Provision {
            seq: 1,
            sender: Address::from_low_u64(0x123),
            receiver,
            amount: Decimal::ONE,
        };

        let tx_id = h
            .handle
            .submit(Role::Operator, call(ops[0]), Target::Ledger, payload.clone(), None)
            .await
            .unwrap();
        let executed = h
            .handle
            .confirm(Role::Operator, call(ops[1]), tx_id, payload)
            .await
            .unwrap();
        assert!(executed);
        assert!(h.handle.provision(1).await.unwrap().is_some());

        // Still locked
        assert!(h.handle.request_claim(call(receiver), 1).await.is_err());
        assert_eq!(h.metrics.aborted_total.get(), 1);

        h.handle
            .advance_block(10, Duration::seconds(h.config.ledger.transfer_lock_secs as i64))
            .await
            .unwrap();
        let record = h.handle.request_claim(call(receiver), 1).await.unwrap();
        assert!(record.claimed);
        assert_eq!(h.handle.bridge_balance().await.unwrap(), Decimal::from(9));

        assert_eq!(h.metrics.executions_total.get(), 1);
        assert_eq!(h.metrics.claims_total.get(), 1);

        let events = h.handle.events(0).await.unwrap();
        assert_eq!(h.storage.event_count().unwrap(), events.len() as u64);

        h.handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_handle_after_shutdown() {
        let h = start();
        h.handle.shutdown().await.unwrap();
        h.task.await.unwrap();

        let err = h.handle.bridge_balance().await.unwrap_err();
        assert!(matches!(err, Error::Concurrency(_)));
    }

    #[tokio::test]
    async fn test_restart_restores_state_and_pending_gauge() {
        let h = start();
        let ops = h.config.genesis.operator.members.clone();
        let payload = Payload::Provision {
            seq: 4,
            sender: Address::from_low_u64(0x123),
            receiver: Address::from_low_u64(0x456),
            amount: Decimal::ONE,
        };
        let tx_id = h
            .handle
            .submit(Role::Operator, call(ops[0]), Target::Ledger, payload.clone(), None)
            .await
            .unwrap();
        h.handle
            .confirm(Role::Operator, call(ops[1]), tx_id, payload)
            .await
            .unwrap();
        assert_eq!(h.metrics.provisioned_pending.get(), 1);

        // Shutdown completes once the final snapshot is written
        h.handle.shutdown().await.unwrap();
        let Harness {
            task,
            storage,
            config,
            _temp,
            ..
        } = h;
        task.await.unwrap();
        drop(storage);

        let restarted = start_in(config, _temp);
        assert!(restarted.handle.provision(4).await.unwrap().is_some());
        assert_eq!(restarted.metrics.provisioned_pending.get(), 1);
        assert_eq!(restarted.metrics.submissions_total.get(), 0);
        restarted.handle.shutdown().await.unwrap();
    }
}
