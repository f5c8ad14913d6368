//! Bridge Core
//!
//! Multi-party governed ledger for cross-chain value transfer.
//!
//! # Architecture
//!
//! - **Three wallets**: Operator provisions inbound sequences, Guardian
//!   administers and recovers, Judge holds disputed claims
//! - **Threshold multisig**: a wallet transaction runs on its k-th
//!   confirmation
//! - **Sequence ledger**: inbound provisions behind a timelock, outbound
//!   locks numbered without gaps
//! - **Single Writer**: one actor task serializes every invocation
//! - **Atomic invocations**: a failed call leaves no trace
//!
//! # Invariants
//!
//! - A sequence is paid out at most once
//! - A sequence is in at most one of the candidate and failure queues
//! - Outbound sequence numbers are contiguous from 1
//! - Each member confirms a transaction at most once

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod address;
pub mod budget;
pub mod call;
pub mod error;
pub mod events;
pub mod multisig;
pub mod rail;
pub mod ledger;
pub mod batch;
pub mod scanner;
pub mod bridge;
pub mod storage;
pub mod actor;
pub mod config;
pub mod metrics;

// Re-exports
pub use error::{Error, ErrorKind, Result};
pub use types::{Address, Amount, BlockEnv, Invocation, Role, SeqNo, TxId};
pub use budget::{Budget, CostSchedule};
pub use call::{Payload, Target};
pub use events::{BridgeEvent, EventRecord};
pub use multisig::MultisigWallet;
pub use rail::{MemoryRail, ValueRail};
pub use ledger::{ProvisionRecord, SequenceLedger};
pub use batch::BatchReport;
pub use bridge::Bridge;
pub use storage::Storage;
pub use actor::{spawn_bridge_actor, BridgeHandle};
pub use config::Config;
pub use metrics::Metrics;
