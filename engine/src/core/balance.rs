// Cached balance reads.

use crate::core::{
    error::EngineError,
    queue::Queue,
    storage::{AccountStore, LockMode, StoreTx},
};
use kolo_common::{
    account::{Nonce, SystemAddress},
    amount::format_amount,
    currency::Currency,
    id::Id,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::BALANCE_CACHE_PREFIX;

pub fn balance_key(address: &SystemAddress) -> String {
    format!("{}{}", BALANCE_CACHE_PREFIX, address)
}

/// Snapshot of an account's funds, amounts in their decimal projection.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BalanceSummary {
    pub available: String,
    pub locked: String,
    pub total: String,
    pub currency: Currency,
    pub nonce: Nonce,
}

pub struct BalanceView<S, Q> {
    store: Arc<S>,
    queue: Arc<Q>,
    ttl_seconds: u64,
}

impl<S: AccountStore, Q: Queue> BalanceView<S, Q> {
    pub fn new(store: Arc<S>, queue: Arc<Q>, ttl_seconds: u64) -> Self {
        BalanceView {
            store,
            queue,
            ttl_seconds,
        }
    }

    /// Read an account's balance, serving from the cache when it is
    /// warm. The store fallback is filtered by the owning user and
    /// repopulates the cache.
    pub async fn balance_of(
        &self,
        user_id: &Id,
        address: &SystemAddress,
    ) -> Result<BalanceSummary, EngineError> {
        let key = balance_key(address);
        if let Some(cached) = self.queue.get(&key).await? {
            match serde_json::from_str(&cached) {
                Ok(summary) => return Ok(summary),
                Err(e) => {
                    warn!("dropping unreadable balance cache entry for {}: {}", address, e);
                    let _ = self.queue.del(&key).await;
                }
            }
        }

        let mut tx = self.store.begin().await?;
        let account = tx
            .account_for_user(address, user_id, LockMode::None)
            .await?
            .ok_or(EngineError::Forbidden)?;
        tx.commit().await?;

        let summary = BalanceSummary {
            available: format_amount(account.available()),
            locked: format_amount(account.locked),
            total: format_amount(account.balance),
            currency: account.currency,
            nonce: account.nonce,
        };

        if let Ok(json) = serde_json::to_string(&summary) {
            if let Err(e) = self.queue.set_ex(&key, &json, self.ttl_seconds).await {
                warn!("balance cache write failed for {}: {}", address, e);
            }
        }
        Ok(summary)
    }

    /// Drop the cached entry for an address.
    pub async fn invalidate(&self, address: &SystemAddress) -> Result<(), EngineError> {
        self.queue.del(&balance_key(address)).await?;
        Ok(())
    }
}
