// The periodic processor cycle.
//
// Each cycle drains a bounded batch from the mempool, executes every id
// under its lease and decides whether the collected PROCESSING rows
// seal into a block. The pipeline keeps no state between cycles beyond
// the last seal timestamp: a batch below threshold goes back to the
// queue head and is re-collected later as already-owned rows.

use crate::config::{ProcessorConfig, LEASE_TTL_SECONDS, TX_LEASE_PREFIX};
use crate::core::{
    balance::balance_key,
    block_builder::{BlockBuilder, SealEntry},
    error::EngineError,
    executor::{ExecutedTransfer, TransactionExecutor},
    queue::Queue,
    storage::{AccountStore, StoreTx},
};
use kolo_common::{block::Block, id::Id, time::Clock};
use std::str::FromStr;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{interval, MissedTickBehavior};

pub struct TransactionPipeline<S, Q, C> {
    queue: Arc<Q>,
    clock: Arc<C>,
    store: Arc<S>,
    executor: TransactionExecutor<S, Q>,
    builder: BlockBuilder<C>,
    config: ProcessorConfig,
    // At most one cycle runs at a time within this instance
    cycle_running: AtomicBool,
    last_sealed_at: AtomicU64,
    shutdown: Notify,
}

impl<S: AccountStore, Q: Queue, C: Clock> TransactionPipeline<S, Q, C> {
    pub fn new(store: Arc<S>, queue: Arc<Q>, clock: Arc<C>, config: ProcessorConfig) -> Self {
        let executor =
            TransactionExecutor::new(store.clone(), queue.clone(), config.dlq_name.clone());
        let builder = BlockBuilder::new(clock.clone());
        // Start the force-seal timer at boot, not at the epoch, so the
        // first cycle does not immediately seal a tiny batch
        let last_sealed_at = AtomicU64::new(clock.now_millis());
        TransactionPipeline {
            queue,
            clock,
            store,
            executor,
            builder,
            config,
            cycle_running: AtomicBool::new(false),
            last_sealed_at,
            shutdown: Notify::new(),
        }
    }

    /// Drive cycles at the configured cadence until `stop` is called.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = interval(Duration::from_millis(self.config.interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "transaction processor started (interval {} ms, batch {}, min {} txs, block time {} ms)",
            self.config.interval_ms,
            self.config.batch_size,
            self.config.min_txs_per_block,
            self.config.block_time_ms
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.cycle().await {
                        error!("processor cycle failed: {}", e);
                    }
                }
                _ = self.shutdown.notified() => {
                    info!("transaction processor stopping");
                    break;
                }
            }
        }
    }

    pub fn stop(&self) {
        self.shutdown.notify_one();
    }

    /// One full drain/execute/seal pass. Returns the sealed block when
    /// one was committed.
    pub async fn cycle(&self) -> Result<Option<Block>, EngineError> {
        if self.cycle_running.swap(true, Ordering::SeqCst) {
            debug!("previous cycle still running, skipping this tick");
            return Ok(None);
        }
        let result = self.cycle_inner().await;
        self.cycle_running.store(false, Ordering::SeqCst);
        result
    }

    async fn cycle_inner(&self) -> Result<Option<Block>, EngineError> {
        let collected = self.drain_batch().await?;
        if collected.is_empty() {
            return Ok(None);
        }

        let elapsed = self
            .clock
            .now_millis()
            .saturating_sub(self.last_sealed_at.load(Ordering::SeqCst));
        let should_seal = collected.len() >= self.config.min_txs_per_block
            || elapsed >= self.config.block_time_ms;
        if !should_seal {
            debug!(
                "batch of {} below threshold ({} ms since last block), returning to mempool",
                collected.len(),
                elapsed
            );
            self.requeue(&collected).await;
            return Ok(None);
        }

        match self.seal(&collected).await {
            Ok(block) => {
                for executed in &collected {
                    self.invalidate_balance(&executed.from_address).await;
                    self.invalidate_balance(&executed.to_address).await;
                }
                self.last_sealed_at
                    .store(self.clock.now_millis(), Ordering::SeqCst);
                info!(
                    "sealed block {} at height {} with {} transactions",
                    block.block_hash,
                    block.height,
                    collected.len()
                );
                Ok(Some(block))
            }
            Err(e) => {
                warn!(
                    "block seal failed, returning {} transactions to mempool: {}",
                    collected.len(),
                    e
                );
                self.requeue(&collected).await;
                Err(e)
            }
        }
    }

    // Pop up to batch_size ids and execute each under its lease
    async fn drain_batch(&self) -> Result<Vec<ExecutedTransfer>, EngineError> {
        let mut collected = Vec::new();
        for _ in 0..self.config.batch_size {
            let Some(raw) = self.queue.rpop(&self.config.mempool_name).await? else {
                break;
            };
            let Ok(tx_id) = Id::from_str(&raw) else {
                warn!("dropping malformed mempool entry {:?}", raw);
                continue;
            };

            let lease_key = format!("{}{}", TX_LEASE_PREFIX, tx_id);
            if !self
                .queue
                .set_nx_ex(&lease_key, "1", LEASE_TTL_SECONDS)
                .await?
            {
                // Another processor owns this id; it will finish or the
                // lease will expire
                debug!("lease busy for {}, skipping", tx_id);
                continue;
            }

            let outcome = self.executor.execute_single(&tx_id).await;
            if let Err(e) = self.queue.del(&lease_key).await {
                warn!("lease release failed for {}: {}", tx_id, e);
            }

            match outcome {
                Ok(Some(executed)) => collected.push(executed),
                Ok(None) => {}
                Err(e) => {
                    error!("execution of {} failed: {}", tx_id, e);
                    if let Err(push_err) = self
                        .queue
                        .lpush(&self.config.dlq_name, &tx_id.to_hex())
                        .await
                    {
                        error!("dead-letter push failed for {}: {}", tx_id, push_err);
                    }
                }
            }
        }
        Ok(collected)
    }

    // Build the block and flip the batch to CONFIRMED in one store tx
    async fn seal(&self, collected: &[ExecutedTransfer]) -> Result<Block, EngineError> {
        let entries: Vec<SealEntry> = collected
            .iter()
            .map(|executed| SealEntry {
                tx_id: executed.transaction.id,
                system_hash: executed.transaction.system_hash.clone(),
            })
            .collect();
        let ids: Vec<Id> = entries.iter().map(|entry| entry.tx_id).collect();

        let mut tx = self.store.begin().await?;
        let block = self.builder.seal_block(&mut tx, &entries).await?;
        tx.confirm_transactions(&ids, &block.id, block.height).await?;
        tx.commit().await?;
        Ok(block)
    }

    async fn requeue(&self, collected: &[ExecutedTransfer]) {
        for executed in collected {
            if let Err(e) = self
                .queue
                .lpush(&self.config.mempool_name, &executed.transaction.id.to_hex())
                .await
            {
                error!(
                    "requeue failed for {}; the janitor cannot see PROCESSING rows: {}",
                    executed.transaction.id, e
                );
            }
        }
    }

    async fn invalidate_balance(&self, address: &kolo_common::account::SystemAddress) {
        if let Err(e) = self.queue.del(&balance_key(address)).await {
            warn!("balance cache invalidation failed for {}: {}", address, e);
        }
    }
}
