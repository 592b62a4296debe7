// Transfer submission.
//
// Funds are reserved at submission: the sender row is locked, the
// amount moves into `locked` and the nonce advances before the PENDING
// row becomes visible. Enqueue happens after commit, so a queued id
// always refers to a durable row.

use crate::config::ProcessorConfig;
use crate::core::{
    balance::balance_key,
    error::EngineError,
    queue::Queue,
    storage::{AccountStore, LockMode, StoreTx},
};
use kolo_common::{
    account::SystemAddress,
    amount::{checked_add, parse_amount},
    currency::Currency,
    id::Id,
    time::Clock,
    transaction::{SystemTxHash, Transaction, TransactionKind, TransactionStatus},
};
use serde::Serialize;
use std::sync::Arc;

/// What the caller gets back from a successful submission.
#[derive(Serialize, Clone, Debug)]
pub struct TransferReceipt {
    pub tx_id: Id,
    pub system_hash: SystemTxHash,
    pub status: TransactionStatus,
}

pub struct TransferIntake<S, Q, C> {
    store: Arc<S>,
    queue: Arc<Q>,
    clock: Arc<C>,
    config: ProcessorConfig,
}

impl<S: AccountStore, Q: Queue, C: Clock> TransferIntake<S, Q, C> {
    pub fn new(store: Arc<S>, queue: Arc<Q>, clock: Arc<C>, config: ProcessorConfig) -> Self {
        TransferIntake {
            store,
            queue,
            clock,
            config,
        }
    }

    /// Validate a transfer, reserve the funds and enqueue it for the
    /// processor. Returns the PENDING receipt.
    pub async fn submit_transfer(
        &self,
        user_id: &Id,
        from: &SystemAddress,
        to: &SystemAddress,
        amount: &str,
        currency: &str,
        description: Option<String>,
    ) -> Result<TransferReceipt, EngineError> {
        let amount = parse_amount(amount)?;
        if amount == 0 {
            return Err(EngineError::NonPositiveAmount);
        }
        if from == to {
            return Err(EngineError::SelfTransfer);
        }
        let currency = Currency::from_code(currency)?;

        let mut tx = self.store.begin().await?;

        // The sender lock serializes concurrent submissions from the
        // same account; dropping `tx` on any error path rolls back
        let mut sender = tx
            .account_for_user(from, user_id, LockMode::PessimisticWrite)
            .await?
            .ok_or(EngineError::Forbidden)?;
        if sender.currency != currency {
            return Err(EngineError::CurrencyMismatch {
                account: sender.currency,
                requested: currency,
            });
        }

        let recipient = tx
            .account_by_address(to, LockMode::None)
            .await?
            .ok_or(EngineError::AccountNotFound)?;
        if recipient.currency != currency {
            return Err(EngineError::CurrencyMismatch {
                account: recipient.currency,
                requested: currency,
            });
        }

        let available = sender.available();
        if available < amount {
            return Err(EngineError::InsufficientFunds {
                need: amount,
                available,
            });
        }

        let account_nonce = sender.nonce;
        sender.locked = checked_add(sender.locked, amount)?;
        sender.nonce += 1;

        let transaction = Transaction {
            id: Id::random(),
            system_hash: SystemTxHash::generate(),
            from_account_id: sender.id,
            to_account_id: recipient.id,
            amount,
            currency,
            fee: 0,
            status: TransactionStatus::Pending,
            kind: TransactionKind::Transfer,
            account_nonce,
            description,
            failure_reason: None,
            block_id: None,
            block_height: None,
            created_at: self.clock.now_millis(),
        };

        tx.save_account(sender).await?;
        tx.insert_transaction(transaction.clone()).await?;
        tx.commit().await?;

        debug!(
            "transfer {} accepted: {} -> {}, nonce {}",
            transaction.system_hash, from, to, account_nonce
        );

        // The row is durable at this point. Queue placement is best
        // effort; the janitor re-enqueues stragglers.
        if let Err(e) = self
            .queue
            .lpush(&self.config.mempool_name, &transaction.id.to_hex())
            .await
        {
            warn!(
                "transfer {} committed but enqueue failed: {}",
                transaction.system_hash, e
            );
        }
        if let Err(e) = self.queue.del(&balance_key(from)).await {
            warn!("balance cache invalidation failed for {}: {}", from, e);
        }

        Ok(TransferReceipt {
            tx_id: transaction.id,
            system_hash: transaction.system_hash,
            status: transaction.status,
        })
    }
}
