// In-memory AccountStore.
//
// Backs the test suite and the demo daemon. The semantics mirror what
// the engine expects from a relational backend:
// - pessimistic row locks are per-account async mutexes held until the
//   transaction commits or rolls back
// - a locked read re-reads committed state after acquisition, so a
//   waiter observes the winner's writes
// - writes are buffered per transaction and applied atomically at
//   commit, where unique and check constraints are enforced

use super::{AccountStore, LockMode, StoreError, StoreTx};
use async_trait::async_trait;
use dashmap::DashMap;
use indexmap::IndexMap;
use kolo_common::{
    account::{Account, SystemAddress, Wallet},
    block::{Block, BlockHeight},
    config::MAX_AMOUNT,
    crypto::Hash,
    id::Id,
    time::TimestampMillis,
    transaction::{SystemTxHash, Transaction, TransactionStatus},
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

#[derive(Default)]
struct Tables {
    wallets: IndexMap<Id, Wallet>,
    accounts: IndexMap<Id, Account>,
    transactions: IndexMap<Id, Transaction>,
    blocks: IndexMap<Id, Block>,
}

struct StoreInner {
    tables: RwLock<Tables>,
    row_locks: DashMap<Id, Arc<Mutex<()>>>,
}

#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            inner: Arc::new(StoreInner {
                tables: RwLock::new(Tables::default()),
                row_locks: DashMap::new(),
            }),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore::new()
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, StoreError> {
        Ok(MemoryTx {
            inner: self.inner.clone(),
            guards: HashMap::new(),
            staged: Staged::default(),
        })
    }
}

// Buffered writes of one transaction. `inserted` ids must not exist in
// the committed tables when the transaction applies.
#[derive(Default)]
struct Staged {
    wallets: IndexMap<Id, Wallet>,
    accounts: IndexMap<Id, Account>,
    transactions: IndexMap<Id, Transaction>,
    blocks: IndexMap<Id, Block>,
    inserted: HashSet<Id>,
}

pub struct MemoryTx {
    inner: Arc<StoreInner>,
    guards: HashMap<Id, OwnedMutexGuard<()>>,
    staged: Staged,
}

impl MemoryTx {
    // Take the row mutex for an account; re-entrant within one tx
    async fn lock_row(&mut self, id: Id) {
        if self.guards.contains_key(&id) {
            return;
        }
        let mutex = {
            self.inner
                .row_locks
                .entry(id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let guard = mutex.lock_owned().await;
        self.guards.insert(id, guard);
    }

    async fn read_account(&self, id: &Id) -> Option<Account> {
        if let Some(staged) = self.staged.accounts.get(id) {
            return Some(staged.clone());
        }
        self.inner.tables.read().await.accounts.get(id).cloned()
    }

    async fn find_account_id(&self, address: &SystemAddress) -> Option<Id> {
        if let Some(account) = self
            .staged
            .accounts
            .values()
            .find(|account| &account.address == address)
        {
            return Some(account.id);
        }
        self.inner
            .tables
            .read()
            .await
            .accounts
            .values()
            .find(|account| &account.address == address)
            .map(|account| account.id)
    }

    async fn read_wallet(&self, id: &Id) -> Option<Wallet> {
        if let Some(staged) = self.staged.wallets.get(id) {
            return Some(staged.clone());
        }
        self.inner.tables.read().await.wallets.get(id).cloned()
    }

    // Committed blocks with this tx's staged rows layered on top
    async fn merged_blocks(&self) -> Vec<Block> {
        let tables = self.inner.tables.read().await;
        let mut merged: IndexMap<Id, Block> = tables.blocks.clone();
        drop(tables);
        for (id, block) in &self.staged.blocks {
            merged.insert(*id, block.clone());
        }
        merged.into_values().collect()
    }

    fn validate(&self, tables: &Tables) -> Result<(), StoreError> {
        // Primary keys of fresh inserts must still be free
        for id in &self.staged.inserted {
            if tables.wallets.contains_key(id)
                || tables.accounts.contains_key(id)
                || tables.transactions.contains_key(id)
                || tables.blocks.contains_key(id)
            {
                return Err(StoreError::UniqueViolation("primary key"));
            }
        }

        for account in self.staged.accounts.values() {
            if account.balance < account.locked {
                return Err(StoreError::CheckViolation("accounts.balance >= accounts.locked"));
            }
            if account.balance > MAX_AMOUNT {
                return Err(StoreError::CheckViolation("accounts.balance cap"));
            }
            let wallet_known = tables.wallets.contains_key(&account.wallet_id)
                || self.staged.wallets.contains_key(&account.wallet_id);
            if !wallet_known {
                return Err(StoreError::CheckViolation("accounts.wallet_id"));
            }
            let address_taken = tables.accounts.values().any(|other| {
                other.id != account.id
                    && other.address == account.address
                    && !self.staged.accounts.contains_key(&other.id)
            }) || self.staged.accounts.values().any(|other| {
                other.id != account.id && other.address == account.address
            });
            if address_taken {
                return Err(StoreError::UniqueViolation("accounts.address"));
            }
            let scope_taken = tables.accounts.values().any(|other| {
                other.id != account.id
                    && other.wallet_id == account.wallet_id
                    && other.currency == account.currency
                    && !self.staged.accounts.contains_key(&other.id)
            }) || self.staged.accounts.values().any(|other| {
                other.id != account.id
                    && other.wallet_id == account.wallet_id
                    && other.currency == account.currency
            });
            if scope_taken {
                return Err(StoreError::UniqueViolation("accounts.wallet_id_currency"));
            }
        }

        for transaction in self.staged.transactions.values() {
            if transaction.amount == 0 {
                return Err(StoreError::CheckViolation("transactions.amount > 0"));
            }
            let hash_taken = tables.transactions.values().any(|other| {
                other.id != transaction.id && other.system_hash == transaction.system_hash
            }) || self.staged.transactions.values().any(|other| {
                other.id != transaction.id && other.system_hash == transaction.system_hash
            });
            if hash_taken {
                return Err(StoreError::UniqueViolation("transactions.system_hash"));
            }
            if let Some(existing) = tables.transactions.get(&transaction.id) {
                let legal = existing.status == transaction.status
                    || existing.status.can_transition_to(transaction.status);
                if !legal {
                    return Err(StoreError::CheckViolation("transaction status transition"));
                }
                if existing.status == TransactionStatus::Confirmed
                    && (existing.block_id != transaction.block_id
                        || existing.block_height != transaction.block_height)
                {
                    return Err(StoreError::CheckViolation("confirmed transactions are immutable"));
                }
            }
            if transaction.status == TransactionStatus::Confirmed
                && (transaction.block_id.is_none() || transaction.block_height.is_none())
            {
                return Err(StoreError::CheckViolation("confirmed transactions require a block"));
            }
            let endpoints_known = [transaction.from_account_id, transaction.to_account_id]
                .iter()
                .all(|id| {
                    tables.accounts.contains_key(id) || self.staged.accounts.contains_key(id)
                });
            if !endpoints_known {
                return Err(StoreError::CheckViolation("transactions.account_id"));
            }
        }

        for block in self.staged.blocks.values() {
            if tables.blocks.contains_key(&block.id) {
                return Err(StoreError::CheckViolation("blocks are immutable"));
            }
            let height_taken = tables
                .blocks
                .values()
                .any(|other| other.id != block.id && other.height == block.height)
                || self
                    .staged
                    .blocks
                    .values()
                    .any(|other| other.id != block.id && other.height == block.height);
            if height_taken {
                return Err(StoreError::UniqueViolation("blocks.height"));
            }
            let hash_taken = tables
                .blocks
                .values()
                .any(|other| other.id != block.id && other.block_hash == block.block_hash)
                || self
                    .staged
                    .blocks
                    .values()
                    .any(|other| other.id != block.id && other.block_hash == block.block_hash);
            if hash_taken {
                return Err(StoreError::UniqueViolation("blocks.block_hash"));
            }
        }

        Ok(())
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn account_by_address(
        &mut self,
        address: &SystemAddress,
        lock: LockMode,
    ) -> Result<Option<Account>, StoreError> {
        let Some(id) = self.find_account_id(address).await else {
            return Ok(None);
        };
        if lock == LockMode::PessimisticWrite {
            // Addresses are immutable so the id stays valid while we
            // wait; the re-read below observes the lock winner's commit
            self.lock_row(id).await;
        }
        Ok(self.read_account(&id).await)
    }

    async fn account_for_user(
        &mut self,
        address: &SystemAddress,
        user_id: &Id,
        lock: LockMode,
    ) -> Result<Option<Account>, StoreError> {
        let Some(account) = self.account_by_address(address, lock).await? else {
            return Ok(None);
        };
        let Some(wallet) = self.read_wallet(&account.wallet_id).await else {
            return Ok(None);
        };
        if &wallet.user_id != user_id {
            return Ok(None);
        }
        Ok(Some(account))
    }

    async fn account_by_id(
        &mut self,
        id: &Id,
        lock: LockMode,
    ) -> Result<Option<Account>, StoreError> {
        if lock == LockMode::PessimisticWrite {
            self.lock_row(*id).await;
        }
        Ok(self.read_account(id).await)
    }

    async fn insert_wallet(&mut self, wallet: Wallet) -> Result<(), StoreError> {
        if self.staged.wallets.contains_key(&wallet.id)
            || self.inner.tables.read().await.wallets.contains_key(&wallet.id)
        {
            return Err(StoreError::UniqueViolation("wallets.id"));
        }
        self.staged.inserted.insert(wallet.id);
        self.staged.wallets.insert(wallet.id, wallet);
        Ok(())
    }

    async fn insert_account(&mut self, account: Account) -> Result<(), StoreError> {
        if self.staged.accounts.contains_key(&account.id)
            || self.inner.tables.read().await.accounts.contains_key(&account.id)
        {
            return Err(StoreError::UniqueViolation("accounts.id"));
        }
        self.staged.inserted.insert(account.id);
        self.staged.accounts.insert(account.id, account);
        Ok(())
    }

    async fn save_account(&mut self, account: Account) -> Result<(), StoreError> {
        self.staged.accounts.insert(account.id, account);
        Ok(())
    }

    async fn transaction_by_id(&mut self, id: &Id) -> Result<Option<Transaction>, StoreError> {
        if let Some(staged) = self.staged.transactions.get(id) {
            return Ok(Some(staged.clone()));
        }
        Ok(self.inner.tables.read().await.transactions.get(id).cloned())
    }

    async fn transaction_by_hash(
        &mut self,
        hash: &SystemTxHash,
    ) -> Result<Option<Transaction>, StoreError> {
        if let Some(staged) = self
            .staged
            .transactions
            .values()
            .find(|row| &row.system_hash == hash)
        {
            return Ok(Some(staged.clone()));
        }
        Ok(self
            .inner
            .tables
            .read()
            .await
            .transactions
            .values()
            .find(|row| &row.system_hash == hash)
            .cloned())
    }

    async fn insert_transaction(&mut self, transaction: Transaction) -> Result<(), StoreError> {
        if self.staged.transactions.contains_key(&transaction.id)
            || self
                .inner
                .tables
                .read()
                .await
                .transactions
                .contains_key(&transaction.id)
        {
            return Err(StoreError::UniqueViolation("transactions.id"));
        }
        self.staged.inserted.insert(transaction.id);
        self.staged.transactions.insert(transaction.id, transaction);
        Ok(())
    }

    async fn save_transaction(&mut self, transaction: Transaction) -> Result<(), StoreError> {
        self.staged.transactions.insert(transaction.id, transaction);
        Ok(())
    }

    async fn transactions_in_status_before(
        &mut self,
        status: TransactionStatus,
        cutoff: TimestampMillis,
    ) -> Result<Vec<Transaction>, StoreError> {
        let tables = self.inner.tables.read().await;
        let mut merged: IndexMap<Id, Transaction> = tables.transactions.clone();
        drop(tables);
        for (id, row) in &self.staged.transactions {
            merged.insert(*id, row.clone());
        }

        let mut rows: Vec<Transaction> = merged
            .into_values()
            .filter(|row| row.status == status && row.created_at < cutoff)
            .collect();
        rows.sort_by_key(|row| row.created_at);
        Ok(rows)
    }

    async fn confirm_transactions(
        &mut self,
        ids: &[Id],
        block_id: &Id,
        height: BlockHeight,
    ) -> Result<(), StoreError> {
        for id in ids {
            let Some(mut row) = self.transaction_by_id(id).await? else {
                return Err(StoreError::RowMissing("transactions"));
            };
            if row.status != TransactionStatus::Processing {
                return Err(StoreError::CheckViolation("transaction status transition"));
            }
            row.status = TransactionStatus::Confirmed;
            row.block_id = Some(*block_id);
            row.block_height = Some(height);
            self.staged.transactions.insert(row.id, row);
        }
        Ok(())
    }

    async fn latest_block(&mut self) -> Result<Option<Block>, StoreError> {
        Ok(self
            .merged_blocks()
            .await
            .into_iter()
            .max_by_key(|block| block.height))
    }

    async fn block_by_height(
        &mut self,
        height: BlockHeight,
    ) -> Result<Option<Block>, StoreError> {
        Ok(self
            .merged_blocks()
            .await
            .into_iter()
            .find(|block| block.height == height))
    }

    async fn block_by_hash(&mut self, hash: &Hash) -> Result<Option<Block>, StoreError> {
        Ok(self
            .merged_blocks()
            .await
            .into_iter()
            .find(|block| &block.block_hash == hash))
    }

    async fn insert_block(&mut self, block: Block) -> Result<(), StoreError> {
        if self.staged.blocks.contains_key(&block.id)
            || self.inner.tables.read().await.blocks.contains_key(&block.id)
        {
            return Err(StoreError::UniqueViolation("blocks.id"));
        }
        self.staged.inserted.insert(block.id);
        self.staged.blocks.insert(block.id, block);
        Ok(())
    }

    async fn block_count(&mut self) -> Result<u64, StoreError> {
        Ok(self.merged_blocks().await.len() as u64)
    }

    async fn commit(self) -> Result<(), StoreError> {
        let mut tables = self.inner.tables.write().await;
        self.validate(&tables)?;

        for (id, wallet) in self.staged.wallets.clone() {
            tables.wallets.insert(id, wallet);
        }
        for (id, account) in self.staged.accounts.clone() {
            tables.accounts.insert(id, account);
        }
        for (id, transaction) in self.staged.transactions.clone() {
            tables.transactions.insert(id, transaction);
        }
        for (id, block) in self.staged.blocks.clone() {
            tables.blocks.insert(id, block);
        }
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        // Buffered writes are dropped with self; row guards release here
        Ok(())
    }
}
