// Recovery sweeps.
//
// A PENDING row older than the stale threshold was committed but never
// made it onto the queue (or its queue entry was lost); it goes back to
// the mempool. A PROCESSING row older than the threshold with no block
// assignment is stuck and only reported: remediation is an operator
// decision, never automatic.

use crate::config::ProcessorConfig;
use crate::core::{error::EngineError, queue::Queue, storage::AccountStore, storage::StoreTx};
use kolo_common::{
    time::{Clock, TimestampMillis},
    transaction::{Transaction, TransactionStatus},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{interval, MissedTickBehavior};

pub struct Janitor<S, Q, C> {
    store: Arc<S>,
    queue: Arc<Q>,
    clock: Arc<C>,
    config: ProcessorConfig,
    shutdown: Notify,
}

impl<S: AccountStore, Q: Queue, C: Clock> Janitor<S, Q, C> {
    pub fn new(store: Arc<S>, queue: Arc<Q>, clock: Arc<C>, config: ProcessorConfig) -> Self {
        Janitor {
            store,
            queue,
            clock,
            config,
            shutdown: Notify::new(),
        }
    }

    fn stale_cutoff(&self) -> TimestampMillis {
        self.clock
            .now_millis()
            .saturating_sub(self.config.stale_after_ms())
    }

    /// Re-enqueue orphaned PENDING rows. Duplicates on the queue are
    /// harmless: execution is idempotent and lease-guarded.
    pub async fn requeue_stale_pending(&self) -> Result<usize, EngineError> {
        let cutoff = self.stale_cutoff();
        let mut tx = self.store.begin().await?;
        let rows = tx
            .transactions_in_status_before(TransactionStatus::Pending, cutoff)
            .await?;
        tx.commit().await?;

        let mut requeued = 0;
        for row in rows {
            self.queue
                .lpush(&self.config.mempool_name, &row.id.to_hex())
                .await?;
            requeued += 1;
        }
        if requeued > 0 {
            info!("janitor requeued {} stale pending transactions", requeued);
        }
        Ok(requeued)
    }

    /// Report PROCESSING rows that have outlived the stale threshold
    /// without reaching a block.
    pub async fn stuck_processing(&self) -> Result<Vec<Transaction>, EngineError> {
        let cutoff = self.stale_cutoff();
        let mut tx = self.store.begin().await?;
        let rows = tx
            .transactions_in_status_before(TransactionStatus::Processing, cutoff)
            .await?;
        tx.commit().await?;

        let stuck: Vec<Transaction> = rows
            .into_iter()
            .filter(|row| row.block_id.is_none())
            .collect();
        if !stuck.is_empty() {
            warn!("{} transactions stuck in PROCESSING", stuck.len());
        }
        Ok(stuck)
    }

    /// Periodic sweep task; one pass per stale window.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = interval(Duration::from_millis(self.config.stale_after_ms().max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "janitor started (sweep every {} ms)",
            self.config.stale_after_ms()
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.requeue_stale_pending().await {
                        error!("janitor sweep failed: {}", e);
                    }
                    if let Err(e) = self.stuck_processing().await {
                        error!("janitor stuck scan failed: {}", e);
                    }
                }
                _ = self.shutdown.notified() => {
                    info!("janitor stopping");
                    break;
                }
            }
        }
    }

    pub fn stop(&self) {
        self.shutdown.notify_one();
    }
}
