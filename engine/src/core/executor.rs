// Single-transaction execution.
//
// The caller holds the per-transaction lease. One store transaction
// flips the row to PROCESSING, re-checks the ledger invariants against
// the locked endpoint rows and applies the debit/credit. Invariant
// failures terminate the row as FAILED with a compensating lock
// reversion where one is still outstanding; store failures fall back to
// a separate best-effort compensation pass.

use crate::core::{
    error::EngineError,
    queue::Queue,
    storage::{AccountStore, LockMode, StoreTx},
};
use kolo_common::{
    account::{Account, SystemAddress},
    config::MAX_AMOUNT,
    id::Id,
    transaction::{Transaction, TransactionStatus},
};
use std::sync::Arc;

/// An executed (now PROCESSING) transaction with the endpoint addresses
/// the sealing stage needs for cache invalidation.
#[derive(Clone, Debug)]
pub struct ExecutedTransfer {
    pub transaction: Transaction,
    pub from_address: SystemAddress,
    pub to_address: SystemAddress,
}

enum Outcome {
    /// Debit and credit applied in this call.
    Executed(ExecutedTransfer),
    /// Row was already PROCESSING: taken by an earlier cycle that did
    /// not seal. Returned so the batch can re-collect it.
    Owned(ExecutedTransfer),
    /// Missing row or terminal status; nothing to do.
    Skipped,
    /// Row terminated as FAILED inside this call.
    Terminated,
}

pub struct TransactionExecutor<S, Q> {
    store: Arc<S>,
    queue: Arc<Q>,
    dlq_name: String,
}

impl<S: AccountStore, Q: Queue> TransactionExecutor<S, Q> {
    pub fn new(store: Arc<S>, queue: Arc<Q>, dlq_name: String) -> Self {
        TransactionExecutor {
            store,
            queue,
            dlq_name,
        }
    }

    /// Execute one transaction under its lease. Returns the PROCESSING
    /// row when it belongs to the current batch, None when the id is
    /// settled, stale or terminated. Safe to call any number of times.
    pub async fn execute_single(
        &self,
        tx_id: &Id,
    ) -> Result<Option<ExecutedTransfer>, EngineError> {
        match self.execute_inner(tx_id).await {
            Ok(Outcome::Executed(executed)) => {
                debug!("executed transfer {}", executed.transaction.system_hash);
                Ok(Some(executed))
            }
            Ok(Outcome::Owned(executed)) => Ok(Some(executed)),
            Ok(Outcome::Skipped) => Ok(None),
            Ok(Outcome::Terminated) => {
                self.dead_letter(tx_id).await;
                Ok(None)
            }
            Err(EngineError::Store(store_err)) => {
                error!("execution of {} hit the store: {}", tx_id, store_err);
                // Compensate outside the poisoned transaction. If even
                // this fails the lease expiry makes the id retryable.
                self.fail_transaction(tx_id).await?;
                self.dead_letter(tx_id).await;
                Ok(None)
            }
            Err(other) => Err(other),
        }
    }

    async fn execute_inner(&self, tx_id: &Id) -> Result<Outcome, EngineError> {
        let mut tx = self.store.begin().await?;

        let Some(mut row) = tx.transaction_by_id(tx_id).await? else {
            // Stale queue entry; tolerated by design
            debug!("transaction {} not found, dropping from consideration", tx_id);
            tx.commit().await?;
            return Ok(Outcome::Skipped);
        };

        if row.status != TransactionStatus::Pending {
            if row.status == TransactionStatus::Processing {
                let addresses = self.endpoint_addresses(&mut tx, &row).await?;
                tx.commit().await?;
                let (from_address, to_address) = addresses;
                return Ok(Outcome::Owned(ExecutedTransfer {
                    transaction: row,
                    from_address,
                    to_address,
                }));
            }
            debug!("transaction {} already {}, skipping", tx_id, row.status);
            tx.commit().await?;
            return Ok(Outcome::Skipped);
        }

        row.status = TransactionStatus::Processing;
        tx.save_transaction(row.clone()).await?;

        // Lock both endpoints in ascending id order so concurrent
        // executors cannot deadlock on opposing transfers
        let (first, second) = if row.from_account_id <= row.to_account_id {
            (row.from_account_id, row.to_account_id)
        } else {
            (row.to_account_id, row.from_account_id)
        };
        let first_row = tx.account_by_id(&first, LockMode::PessimisticWrite).await?;
        let second_row = tx
            .account_by_id(&second, LockMode::PessimisticWrite)
            .await?;
        let (sender, recipient) = if row.from_account_id <= row.to_account_id {
            (first_row, second_row)
        } else {
            (second_row, first_row)
        };
        let (Some(mut sender), Some(mut recipient)) = (sender, recipient) else {
            error!("transaction {} references a missing account", row.system_hash);
            row.status = TransactionStatus::Failed;
            row.failure_reason = Some("Missing endpoint account".to_owned());
            tx.save_transaction(row).await?;
            tx.commit().await?;
            return Ok(Outcome::Terminated);
        };

        let amount = row.amount;
        if sender.locked < amount {
            // The reservation is already gone; there is no lock left to
            // revert, only the row to terminate
            error!(
                "transaction {}: locked {} below amount {}",
                row.system_hash, sender.locked, amount
            );
            row.status = TransactionStatus::Failed;
            row.failure_reason = Some("Inconsistent locked amount".to_owned());
            tx.save_transaction(row).await?;
            tx.commit().await?;
            return Ok(Outcome::Terminated);
        }

        if sender.balance < amount {
            error!(
                "transaction {}: balance {} below amount {}",
                row.system_hash, sender.balance, amount
            );
            row.status = TransactionStatus::Failed;
            row.failure_reason = Some("Insufficient balance at execution".to_owned());
            sender.locked -= amount;
            tx.save_account(sender).await?;
            tx.save_transaction(row).await?;
            tx.commit().await?;
            return Ok(Outcome::Terminated);
        }

        let credited = match recipient.balance.checked_add(amount) {
            Some(value) if value <= MAX_AMOUNT => value,
            _ => {
                error!(
                    "transaction {}: recipient balance would exceed the ledger cap",
                    row.system_hash
                );
                row.status = TransactionStatus::Failed;
                row.failure_reason = Some("Recipient balance overflow".to_owned());
                sender.locked -= amount;
                tx.save_account(sender).await?;
                tx.save_transaction(row).await?;
                tx.commit().await?;
                return Ok(Outcome::Terminated);
            }
        };

        sender.balance -= amount;
        sender.locked -= amount;
        recipient.balance = credited;

        let from_address = sender.address.clone();
        let to_address = recipient.address.clone();
        tx.save_account(sender).await?;
        tx.save_account(recipient).await?;
        tx.commit().await?;

        Ok(Outcome::Executed(ExecutedTransfer {
            transaction: row,
            from_address,
            to_address,
        }))
    }

    async fn endpoint_addresses(
        &self,
        tx: &mut S::Tx,
        row: &Transaction,
    ) -> Result<(SystemAddress, SystemAddress), EngineError> {
        let from = tx
            .account_by_id(&row.from_account_id, LockMode::None)
            .await?
            .map(|account| account.address);
        let to = tx
            .account_by_id(&row.to_account_id, LockMode::None)
            .await?
            .map(|account| account.address);
        match (from, to) {
            (Some(from), Some(to)) => Ok((from, to)),
            _ => Err(EngineError::Invariant(format!(
                "transaction {} references a missing account",
                row.system_hash
            ))),
        }
    }

    // Best-effort terminal marking after a store failure: new
    // transaction, FAILED status, compensating lock reversion
    async fn fail_transaction(&self, tx_id: &Id) -> Result<(), EngineError> {
        let mut tx = self.store.begin().await?;
        let Some(mut row) = tx.transaction_by_id(tx_id).await? else {
            tx.commit().await?;
            return Ok(());
        };
        if row.status.is_terminal() {
            tx.commit().await?;
            return Ok(());
        }

        row.status = TransactionStatus::Failed;
        row.failure_reason = Some("Storage failure during execution".to_owned());

        if let Some(mut sender) = tx
            .account_by_id(&row.from_account_id, LockMode::PessimisticWrite)
            .await?
        {
            revert_lock(&mut sender, row.amount);
            tx.save_account(sender).await?;
        }
        tx.save_transaction(row).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn dead_letter(&self, tx_id: &Id) {
        if let Err(e) = self.queue.lpush(&self.dlq_name, &tx_id.to_hex()).await {
            error!("dead-letter push failed for {}: {}", tx_id, e);
        }
    }
}

// Saturating so a partially applied debit cannot push the row negative
fn revert_lock(sender: &mut Account, amount: u64) {
    sender.locked = sender.locked.saturating_sub(amount);
}
