//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `state` - Snapshot of the committed bridge state (single key)
//! - `events` - Append-only event log (key: index, big-endian)
//! - `outbound` - Outbound lock records (key: seq, big-endian)
//!
//! Each [`Storage::persist`] call writes the snapshot together with every
//! event committed since the previous call in one `WriteBatch`, so a crash
//! never leaves the log ahead of or behind the snapshot.

use crate::{
    bridge::{Bridge, BridgeState},
    budget::CostSchedule,
    error::{Error, Result},
    events::{BridgeEvent, EventRecord},
    ledger::OutboundLock,
    rail::ValueRail,
    types::SeqNo,
    Config,
};
use parking_lot::Mutex;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, WriteOptions, DB};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;

/// Column family names
const CF_STATE: &str = "state";
const CF_EVENTS: &str = "events";
const CF_OUTBOUND: &str = "outbound";

/// Key of the state snapshot
const STATE_KEY: &[u8] = b"bridge";

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
    sync_writes: bool,
    /// Events already written
    persisted: Mutex<u64>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("path", &self.db.path())
            .field("persisted", &*self.persisted.lock())
            .finish()
    }
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);
        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_STATE, Self::cf_options_state()),
            ColumnFamilyDescriptor::new(CF_EVENTS, Self::cf_options_log()),
            ColumnFamilyDescriptor::new(CF_OUTBOUND, Self::cf_options_log()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        let storage = Self {
            db: Arc::new(db),
            sync_writes: config.rocksdb.sync_writes,
            persisted: Mutex::new(0),
        };
        let count = storage.event_count()?;
        *storage.persisted.lock() = count;

        tracing::info!(path = ?path, events = count, "Opened RocksDB");
        Ok(storage)
    }

    // Column family options

    fn cf_options_state() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_log() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    // Writes

    /// Write the bridge's committed state and its new events atomically
    ///
    /// Returns how many events were written.
    pub fn persist<R>(&self, bridge: &Bridge<R>) -> Result<usize>
    where
        R: ValueRail + Serialize,
    {
        let mut persisted = self.persisted.lock();
        let fresh = bridge.events_since(*persisted);

        let mut batch = WriteBatch::default();

        let cf_state = self.cf_handle(CF_STATE)?;
        batch.put_cf(cf_state, STATE_KEY, bincode::serialize(bridge.state())?);

        let cf_events = self.cf_handle(CF_EVENTS)?;
        let cf_outbound = self.cf_handle(CF_OUTBOUND)?;
        for record in fresh {
            batch.put_cf(cf_events, record.index.to_be_bytes(), bincode::serialize(record)?);

            if let BridgeEvent::OutboundLocked { seq, .. } = record.event {
                let lock = bridge.ledger().outbound_lock(seq).ok_or_else(|| {
                    Error::Storage(format!("outbound lock {} missing from state", seq))
                })?;
                batch.put_cf(cf_outbound, seq.to_be_bytes(), bincode::serialize(lock)?);
            }
        }

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.sync_writes);
        self.db.write_opt(batch, &write_opts)?;

        let written = fresh.len();
        *persisted += written as u64;

        tracing::debug!(events = written, total = *persisted, "Bridge state persisted");
        Ok(written)
    }

    // Reads

    /// Rebuild the bridge from the last snapshot, if there is one
    pub fn restore<R>(&self, costs: CostSchedule) -> Result<Option<Bridge<R>>>
    where
        R: ValueRail + DeserializeOwned,
    {
        let cf_state = self.cf_handle(CF_STATE)?;
        let state: BridgeState<R> = match self.db.get_cf(cf_state, STATE_KEY)? {
            Some(bytes) => bincode::deserialize(&bytes)?,
            None => return Ok(None),
        };

        let log = self.events_from(0)?;
        tracing::info!(events = log.len(), block = state.env().number, "Bridge restored from snapshot");
        Ok(Some(Bridge::from_parts(state, costs, log)))
    }

    /// Restore the bridge, or build and persist genesis on an empty database
    pub fn open_bridge<R>(&self, config: &Config, genesis: impl FnOnce() -> Result<Bridge<R>>) -> Result<Bridge<R>>
    where
        R: ValueRail + Serialize + DeserializeOwned,
    {
        if let Some(bridge) = self.restore(config.costs.clone())? {
            return Ok(bridge);
        }
        let bridge = genesis()?;
        self.persist(&bridge)?;
        Ok(bridge)
    }

    /// Event by index
    pub fn get_event(&self, index: u64) -> Result<Option<EventRecord>> {
        let cf = self.cf_handle(CF_EVENTS)?;
        match self.db.get_cf(cf, index.to_be_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Events from `start` on, in index order
    pub fn events_from(&self, start: u64) -> Result<Vec<EventRecord>> {
        let cf = self.cf_handle(CF_EVENTS)?;
        let from = start.to_be_bytes();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&from, rocksdb::Direction::Forward));

        let mut events = Vec::new();
        for item in iter {
            let (_, value) = item?;
            events.push(bincode::deserialize(&value)?);
        }
        Ok(events)
    }

    /// Outbound lock by sequence
    pub fn get_outbound(&self, seq: SeqNo) -> Result<Option<OutboundLock>> {
        let cf = self.cf_handle(CF_OUTBOUND)?;
        match self.db.get_cf(cf, seq.to_be_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Number of events on disk
    pub fn event_count(&self) -> Result<u64> {
        let cf = self.cf_handle(CF_EVENTS)?;
        let mut iter = self.db.iterator_cf(cf, IteratorMode::End);
        match iter.next() {
            Some(item) => {
                let (key, _) = item?;
                let bytes: [u8; 8] = key
                    .as_ref()
                    .try_into()
                    .map_err(|_| Error::Storage("malformed event key".to_string()))?;
                Ok(u64::from_be_bytes(bytes) + 1)
            }
            None => Ok(0),
        }
    }

    /// Get storage statistics
    pub fn get_stats(&self) -> Result<StorageStats> {
        let cf_outbound = self.cf_handle(CF_OUTBOUND)?;
        let total_outbound = self
            .db
            .property_int_value_cf(cf_outbound, "rocksdb.estimate-num-keys")?
            .unwrap_or(0);

        Ok(StorageStats {
            total_events: self.event_count()?,
            total_outbound,
        })
    }

    /// Close database (graceful shutdown)
    pub fn close(self) -> Result<()> {
        drop(self.db);
        tracing::info!("RocksDB closed gracefully");
        Ok(())
    }
}

/// Storage statistics
#[derive(Debug, Clone)]
pub struct StorageStats {
    /// Events in the log
    pub total_events: u64,
    /// Outbound locks (estimate)
    pub total_outbound: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::bridge_account;
    use crate::budget::Budget;
    use crate::call::{Payload, Target};
    use crate::rail::MemoryRail;
    use crate::types::{Address, BlockEnv, Invocation, Role};
    use bech32::ToBase32;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn test_config() -> (Config, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.rocksdb.sync_writes = false;
        (config, temp_dir)
    }

    fn genesis(config: &Config) -> Bridge {
        let mut rail = MemoryRail::new();
        rail.mint(bridge_account(), Decimal::from(10));
        rail.mint(Address::from_low_u64(0xabc), Decimal::from(10));
        Bridge::genesis(config, rail, BlockEnv::new(1, Utc::now())).unwrap()
    }

    #[test]
    fn test_storage_open() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();
        assert!(storage.db.cf_handle(CF_STATE).is_some());
        assert!(storage.db.cf_handle(CF_EVENTS).is_some());
        assert!(storage.db.cf_handle(CF_OUTBOUND).is_some());
        assert_eq!(storage.event_count().unwrap(), 0);
    }

    #[test]
    fn test_restore_empty() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();
        let restored: Option<Bridge> = storage.restore(config.costs.clone()).unwrap();
        assert!(restored.is_none());
    }

    #[test]
    fn test_persist_and_restore() {
        let (config, _temp) = test_config();
        let operator = config.genesis.operator.members[0];

        {
            let storage = Storage::open(&config).unwrap();
            let mut bridge = storage.open_bridge(&config, || Ok(genesis(&config))).unwrap();

            let payload = Payload::Provision {
                seq: 1,
                sender: operator,
                receiver: operator,
                amount: Decimal::ONE,
            };
            bridge
                .submit(
                    Role::Operator,
                    &Invocation::new(operator, Budget::new(1_000_000)),
                    Target::Ledger,
                    payload,
                    None,
                )
                .unwrap();
            assert_eq!(storage.persist(&bridge).unwrap(), 1);
            // Nothing new
            assert_eq!(storage.persist(&bridge).unwrap(), 0);
        }

        let storage = Storage::open(&config).unwrap();
        assert_eq!(storage.event_count().unwrap(), 1);
        let bridge: Bridge = storage.restore(config.costs.clone()).unwrap().unwrap();
        assert_eq!(bridge.wallet(Role::Operator).transaction_count(), 1);
        assert_eq!(bridge.events().len(), 1);
        assert_eq!(bridge.bridge_balance(), Decimal::from(10));
    }

    #[test]
    fn test_outbound_locks_indexed() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();
        let mut bridge = genesis(&config);

        let sender = Address::from_low_u64(0xabc);
        let destination =
            bech32::encode("link", [3u8; 20].to_base32(), bech32::Variant::Bech32).unwrap();
        let call = Invocation::new(sender, Budget::new(1_000_000)).with_value(Decimal::ONE);
        let seq = bridge.transfer(&call, &destination).unwrap();
        storage.persist(&bridge).unwrap();

        let lock = storage.get_outbound(seq).unwrap().unwrap();
        assert_eq!(lock.destination, destination);
        assert_eq!(lock.origin_block, 1);
        assert!(storage.get_outbound(seq + 1).unwrap().is_none());

        let event = storage.get_event(0).unwrap().unwrap();
        assert!(matches!(event.event, BridgeEvent::OutboundLocked { .. }));
    }
}
