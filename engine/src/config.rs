// Processor configuration.
//
// Every tunable has a compiled default and an environment override.
// Unparseable values refuse to boot; missing values take the default.

use std::env;
use std::str::FromStr;
use thiserror::Error;

// Pipeline defaults
pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_BLOCK_TIME_MS: u64 = 15_000;
pub const DEFAULT_MIN_TXS_PER_BLOCK: usize = 3;
pub const DEFAULT_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_MEMPOOL_NAME: &str = "tx:mempool";
pub const DEFAULT_DLQ_NAME: &str = "tx:dead_letter";
pub const DEFAULT_BALANCE_TTL_SECONDS: u64 = 30;

// Per-transaction lease held for a single execution attempt
pub const LEASE_TTL_SECONDS: u64 = 60;
pub const TX_LEASE_PREFIX: &str = "lock:tx:";

// Balance cache keyspace
pub const BALANCE_CACHE_PREFIX: &str = "balance:";

// Environment keys
pub const ENV_BATCH_SIZE: &str = "TX_PROCESSOR_BATCH_SIZE";
pub const ENV_BLOCK_TIME_MS: &str = "TX_PROCESSOR_BLOCK_TIME_MS";
pub const ENV_MIN_TXS_PER_BLOCK: &str = "TX_PROCESSOR_MIN_TXS_PER_BLOCK";
pub const ENV_INTERVAL_MS: &str = "TX_PROCESSOR_INTERVAL_MS";
pub const ENV_MEMPOOL_NAME: &str = "TX_MEMPOOL_NAME";
pub const ENV_DLQ_NAME: &str = "TX_DLQ_NAME";
pub const ENV_BALANCE_TTL_SECONDS: &str = "CACHE_BALANCE_TTL_SECONDS";
pub const ENV_RUN_TX_PROCESSOR: &str = "RUN_TX_PROCESSOR";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Settings for the transaction processor and its collaborators.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Max ids popped from the mempool per cycle
    pub batch_size: usize,
    /// Force-seal interval: a non-empty batch older than this seals
    /// regardless of size
    pub block_time_ms: u64,
    /// Size threshold at which a batch seals immediately
    pub min_txs_per_block: usize,
    /// Cycle cadence
    pub interval_ms: u64,
    /// Mempool list key
    pub mempool_name: String,
    /// Dead-letter list key
    pub dlq_name: String,
    /// Balance cache TTL
    pub balance_ttl_seconds: u64,
    /// Whether this instance runs the processor loop
    pub run_processor: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        ProcessorConfig {
            batch_size: DEFAULT_BATCH_SIZE,
            block_time_ms: DEFAULT_BLOCK_TIME_MS,
            min_txs_per_block: DEFAULT_MIN_TXS_PER_BLOCK,
            interval_ms: DEFAULT_INTERVAL_MS,
            mempool_name: DEFAULT_MEMPOOL_NAME.to_owned(),
            dlq_name: DEFAULT_DLQ_NAME.to_owned(),
            balance_ttl_seconds: DEFAULT_BALANCE_TTL_SECONDS,
            run_processor: false,
        }
    }
}

impl ProcessorConfig {
    /// Load the configuration from the environment. A present but
    /// unparseable value is fatal so a typo cannot silently fall back
    /// to a default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = ProcessorConfig::default();
        Ok(ProcessorConfig {
            batch_size: env_parsed(ENV_BATCH_SIZE)?.unwrap_or(defaults.batch_size),
            block_time_ms: env_parsed(ENV_BLOCK_TIME_MS)?.unwrap_or(defaults.block_time_ms),
            min_txs_per_block: env_parsed(ENV_MIN_TXS_PER_BLOCK)?
                .unwrap_or(defaults.min_txs_per_block),
            interval_ms: env_parsed(ENV_INTERVAL_MS)?.unwrap_or(defaults.interval_ms),
            mempool_name: env::var(ENV_MEMPOOL_NAME).unwrap_or(defaults.mempool_name),
            dlq_name: env::var(ENV_DLQ_NAME).unwrap_or(defaults.dlq_name),
            balance_ttl_seconds: env_parsed(ENV_BALANCE_TTL_SECONDS)?
                .unwrap_or(defaults.balance_ttl_seconds),
            run_processor: env_truthy(ENV_RUN_TX_PROCESSOR),
        })
    }

    /// Age past which a PENDING row counts as orphaned and a
    /// PROCESSING row counts as stuck.
    pub fn stale_after_ms(&self) -> u64 {
        self.block_time_ms.saturating_mul(2)
    }
}

fn env_parsed<T: FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value }),
        Err(_) => Ok(None),
    }
}

fn env_truthy(key: &str) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.as_str(), "1" | "true" | "TRUE" | "True"),
        Err(_) => false,
    }
}
