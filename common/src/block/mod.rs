pub mod merkle;

pub use merkle::merkle_root;

use crate::{config::GENESIS_PREV_HASH, crypto, crypto::Hash, id::Id};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

// Block height, dense from 0
pub type BlockHeight = u64;

/// Sealed block row. Immutable once committed.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Block {
    pub id: Id,
    pub height: BlockHeight,
    pub block_hash: Hash,
    /// Hash of the previous block; None only at height 0.
    pub previous_block_hash: Option<Hash>,
    pub timestamp: DateTime<Utc>,
    pub merkle_root: Hash,
    /// Ids of the transactions bound into this block, in batch order.
    pub transaction_ids: Vec<Id>,
}

/// Render a block timestamp the way it enters the hash preimage:
/// ISO-8601 UTC with millisecond precision and a `Z` suffix.
pub fn timestamp_iso(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Compute a block hash from its committed fields.
///
/// Preimage: height, ISO timestamp, previous hash (or the genesis
/// sentinel), then every system hash in ascending order, concatenated
/// with no separators. `sorted_hashes` must already be sorted.
pub fn compute_block_hash<S: AsRef<str>>(
    height: BlockHeight,
    timestamp: &DateTime<Utc>,
    previous_block_hash: Option<&Hash>,
    sorted_hashes: &[S],
) -> Hash {
    let previous = previous_block_hash
        .map(|hash| hash.to_hex())
        .unwrap_or_else(|| GENESIS_PREV_HASH.to_owned());

    let mut preimage = String::new();
    preimage.push_str(&height.to_string());
    preimage.push_str(&timestamp_iso(timestamp));
    preimage.push_str(&previous);
    for hash in sorted_hashes {
        preimage.push_str(hash.as_ref());
    }

    crypto::hash(preimage.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_iso_millis_z() {
        let ts = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        assert_eq!(timestamp_iso(&ts), "2023-11-14T22:13:20.123Z");
    }

    #[test]
    fn test_genesis_uses_sentinel() {
        let ts = Utc.timestamp_millis_opt(0).unwrap();
        let hashes = ["txn_aa"];
        let genesis = compute_block_hash(0, &ts, None, &hashes);

        let mut preimage = String::from("0");
        preimage.push_str(&timestamp_iso(&ts));
        preimage.push_str(GENESIS_PREV_HASH);
        preimage.push_str("txn_aa");
        assert_eq!(genesis, crypto::hash(preimage.as_bytes()));
    }

    #[test]
    fn test_hash_binds_previous_link() {
        let ts = Utc.timestamp_millis_opt(1_000).unwrap();
        let hashes = ["txn_aa"];
        let prev_a = crypto::hash(b"a");
        let prev_b = crypto::hash(b"b");

        let with_a = compute_block_hash(1, &ts, Some(&prev_a), &hashes);
        let with_b = compute_block_hash(1, &ts, Some(&prev_b), &hashes);
        assert_ne!(with_a, with_b);
    }
}
