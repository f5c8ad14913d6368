//! Configuration for the bridge

use crate::{
    budget::CostSchedule,
    types::{Address, Amount},
    Error, Result,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Metrics listen address
    pub metrics_listen_addr: String,

    /// Wallet membership at genesis
    pub genesis: GenesisConfig,

    /// Ledger parameters at genesis
    pub ledger: LedgerConfig,

    /// Execution cost schedule
    pub costs: CostSchedule,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Actor configuration
    pub actor: ActorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/bridge"),
            service_name: "bridge-node".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            metrics_listen_addr: "0.0.0.0:9090".to_string(),
            genesis: GenesisConfig::default(),
            ledger: LedgerConfig::default(),
            costs: CostSchedule::default(),
            rocksdb: RocksDBConfig::default(),
            actor: ActorConfig::default(),
        }
    }
}

/// Members and threshold of one wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Member accounts
    pub members: Vec<Address>,

    /// Confirmations required to execute
    pub threshold: usize,
}

impl WalletConfig {
    fn check(&self, name: &str) -> Result<()> {
        let mut seen = BTreeSet::new();
        for member in &self.members {
            if member.is_zero() {
                return Err(Error::Config(format!("{} wallet has a zero member", name)));
            }
            if !seen.insert(member) {
                return Err(Error::Config(format!(
                    "{} wallet lists {} twice",
                    name, member
                )));
            }
        }
        if self.threshold == 0 || self.threshold > self.members.len() {
            return Err(Error::Config(format!(
                "{} wallet threshold {} outside [1, {}]",
                name,
                self.threshold,
                self.members.len()
            )));
        }
        Ok(())
    }
}

/// Genesis membership of the three wallets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisConfig {
    /// Operator wallet (provisioning)
    pub operator: WalletConfig,

    /// Guardian wallet (governance, fraud recovery)
    pub guardian: WalletConfig,

    /// Judge wallet (claim holds)
    pub judge: WalletConfig,
}

impl Default for GenesisConfig {
    fn default() -> Self {
        let wallet = |first: u64, count: u64, threshold| WalletConfig {
            members: (first..first + count).map(Address::from_low_u64).collect(),
            threshold,
        };
        Self {
            operator: wallet(0x100, 3, 2),
            guardian: wallet(0x200, 3, 2),
            judge: wallet(0x300, 2, 1),
        }
    }
}

/// Ledger parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Delay between provisioning and the earliest claim (seconds)
    pub transfer_lock_secs: u64,

    /// Smallest amount `transfer` accepts
    pub min_lockable: Amount,

    /// Largest amount `transfer` accepts
    pub max_lockable: Amount,

    /// Batch payout rejections before a sequence becomes unclaimable
    pub max_try_transfer: u32,

    /// Validate destination addresses on `transfer`
    pub address_validation: bool,

    /// Expected bech32 prefix of destination addresses
    pub destination_hrp: String,

    /// Time after genesis before the bridge balance may be burned (seconds)
    pub service_period_secs: u64,

    /// Receiver of `burn_bridge_balance`
    pub burn_sink: Address,

    /// Largest window a gap scan looks at
    #[serde(default = "default_max_scan_window")]
    pub max_scan_window: u64,
}

fn default_max_scan_window() -> u64 {
    1024
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            transfer_lock_secs: 24 * 60 * 60,
            min_lockable: Decimal::new(1, 2),
            max_lockable: Decimal::from(1_000_000),
            max_try_transfer: 3,
            address_validation: true,
            destination_hrp: "link".to_string(),
            service_period_secs: 2 * 365 * 24 * 60 * 60,
            burn_sink: Address::from_low_u64(0xdead),
            max_scan_window: default_max_scan_window(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Fsync every committed invocation
    pub sync_writes: bool,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 4,
            max_background_jobs: 2,
            sync_writes: true,
            enable_statistics: false,
        }
    }
}

/// Actor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorConfig {
    /// Mailbox capacity (pending requests)
    pub mailbox_capacity: usize,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 1024,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    ///
    /// `BRIDGE_CONFIG` names a TOML file to start from; individual
    /// `BRIDGE_*` variables override it.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("BRIDGE_CONFIG") {
            Ok(path) => Config::from_file(path)?,
            Err(_) => Config::default(),
        };

        if let Ok(data_dir) = std::env::var("BRIDGE_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(addr) = std::env::var("BRIDGE_METRICS_ADDR") {
            config.metrics_listen_addr = addr;
        }

        if let Ok(hrp) = std::env::var("BRIDGE_DESTINATION_HRP") {
            config.ledger.destination_hrp = hrp;
        }

        if let Ok(secs) = std::env::var("BRIDGE_TRANSFER_LOCK_SECS") {
            config.ledger.transfer_lock_secs = parse_var("BRIDGE_TRANSFER_LOCK_SECS", &secs)?;
        }

        if let Ok(count) = std::env::var("BRIDGE_MAX_TRY_TRANSFER") {
            config.ledger.max_try_transfer = parse_var("BRIDGE_MAX_TRY_TRANSFER", &count)?;
        }

        if let Ok(members) = std::env::var("BRIDGE_OPERATORS") {
            config.genesis.operator.members = parse_members("BRIDGE_OPERATORS", &members)?;
        }

        if let Ok(threshold) = std::env::var("BRIDGE_OPERATOR_THRESHOLD") {
            config.genesis.operator.threshold = parse_var("BRIDGE_OPERATOR_THRESHOLD", &threshold)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check internal consistency
    pub fn validate(&self) -> Result<()> {
        self.genesis.operator.check("operator")?;
        self.genesis.guardian.check("guardian")?;
        self.genesis.judge.check("judge")?;

        let ledger = &self.ledger;
        if ledger.min_lockable <= Decimal::ZERO || ledger.min_lockable > ledger.max_lockable {
            return Err(Error::Config(format!(
                "lockable bounds [{}, {}] are inconsistent",
                ledger.min_lockable, ledger.max_lockable
            )));
        }
        if ledger.max_try_transfer == 0 {
            return Err(Error::Config("max_try_transfer must be at least 1".to_string()));
        }
        if ledger.destination_hrp.is_empty() {
            return Err(Error::Config("destination_hrp must not be empty".to_string()));
        }
        if ledger.max_scan_window == 0 {
            return Err(Error::Config("max_scan_window must be positive".to_string()));
        }
        if self.actor.mailbox_capacity == 0 {
            return Err(Error::Config("mailbox_capacity must be positive".to_string()));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("{} has an invalid value: {}", name, value)))
}

fn parse_members(name: &str, value: &str) -> Result<Vec<Address>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse()
                .map_err(|e| Error::Config(format!("{}: {}", name, e)))
        })
        .collect()
}
