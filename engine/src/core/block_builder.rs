// Block sealing.
//
// Height, previous-hash link, Merkle root and block hash are all
// computed inside the caller's store transaction, so the latest-block
// read and the insert of height + 1 serialize together. The height
// unique index is the backstop if two sealers ever race.

use crate::core::{
    error::EngineError,
    storage::{StoreError, StoreTx},
};
use kolo_common::{
    block::{compute_block_hash, merkle_root, Block},
    id::Id,
    time::Clock,
    transaction::SystemTxHash,
};
use std::sync::Arc;

/// One confirmed transaction entering a block.
#[derive(Clone, Debug)]
pub struct SealEntry {
    pub tx_id: Id,
    pub system_hash: SystemTxHash,
}

pub struct BlockBuilder<C> {
    clock: Arc<C>,
}

impl<C: Clock> BlockBuilder<C> {
    pub fn new(clock: Arc<C>) -> Self {
        BlockBuilder { clock }
    }

    /// Assemble and insert the next block from a non-empty batch.
    ///
    /// System hashes are sorted before the commitment is computed, so
    /// the resulting Merkle root and block hash do not depend on the
    /// order the batch was drained in.
    pub async fn seal_block<T: StoreTx>(
        &self,
        tx: &mut T,
        entries: &[SealEntry],
    ) -> Result<Block, EngineError> {
        if entries.is_empty() {
            return Err(EngineError::Invariant(
                "refusing to seal an empty block".to_owned(),
            ));
        }

        let latest = tx.latest_block().await?;
        let (height, previous_block_hash) = match &latest {
            Some(block) => (block.height + 1, Some(block.block_hash.clone())),
            None => (0, None),
        };

        let timestamp = self.clock.now();
        let mut hashes: Vec<String> = entries
            .iter()
            .map(|entry| entry.system_hash.as_str().to_owned())
            .collect();
        hashes.sort_unstable();

        let block = Block {
            id: Id::random(),
            height,
            block_hash: compute_block_hash(
                height,
                &timestamp,
                previous_block_hash.as_ref(),
                &hashes,
            ),
            previous_block_hash,
            timestamp,
            merkle_root: merkle_root(&hashes),
            transaction_ids: entries.iter().map(|entry| entry.tx_id).collect(),
        };

        tx.insert_block(block.clone()).await?;
        debug!(
            "assembled block at height {} with {} transactions",
            height,
            entries.len()
        );
        Ok(block)
    }

    /// Walk the stored chain from height 0, recomputing every
    /// commitment and checking each previous-hash link. Returns the
    /// number of verified blocks.
    pub async fn verify_chain<T: StoreTx>(&self, tx: &mut T) -> Result<u64, EngineError> {
        let count = tx.block_count().await?;
        let mut previous: Option<kolo_common::crypto::Hash> = None;

        for height in 0..count {
            let block = tx.block_by_height(height).await?.ok_or_else(|| {
                EngineError::Invariant(format!("missing block at height {}", height))
            })?;

            if block.previous_block_hash != previous {
                return Err(EngineError::Invariant(format!(
                    "broken chain link at height {}",
                    height
                )));
            }

            let mut hashes = Vec::with_capacity(block.transaction_ids.len());
            for tx_id in &block.transaction_ids {
                let row = tx
                    .transaction_by_id(tx_id)
                    .await?
                    .ok_or(StoreError::RowMissing("transactions"))?;
                hashes.push(row.system_hash.as_str().to_owned());
            }
            hashes.sort_unstable();

            if merkle_root(&hashes) != block.merkle_root {
                return Err(EngineError::Invariant(format!(
                    "merkle root mismatch at height {}",
                    height
                )));
            }
            let recomputed = compute_block_hash(
                block.height,
                &block.timestamp,
                block.previous_block_hash.as_ref(),
                &hashes,
            );
            if recomputed != block.block_hash {
                return Err(EngineError::Invariant(format!(
                    "block hash mismatch at height {}",
                    height
                )));
            }

            previous = Some(block.block_hash.clone());
        }

        Ok(count)
    }
}
