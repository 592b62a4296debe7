pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Amounts are stored as integer minor units at a fixed scale
pub const COIN_DECIMALS: u8 = 8;
pub const COIN_VALUE: u64 = 10u64.pow(COIN_DECIMALS as u32);

// Ledger columns are decimal (18, 8): at most 10 integer digits and
// 8 fractional digits. Any amount above this cap is rejected.
pub const MAX_AMOUNT: u64 = 10u64.pow(18) - 1;

// External handle prefixes
pub const ACCOUNT_ADDRESS_PREFIX: &str = "acc_";
pub const TX_HASH_PREFIX: &str = "txn_";

// Handles carry 16 random bytes, hex encoded
pub const HANDLE_BYTES: usize = 16;

// Stand-in for the missing previous hash when sealing height 0
pub const GENESIS_PREV_HASH: &str = "GENESIS_BLOCK_PREV_HASH_0000000000000";
