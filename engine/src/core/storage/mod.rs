pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use kolo_common::{
    account::{Account, SystemAddress, Wallet},
    block::{Block, BlockHeight},
    crypto::Hash,
    id::Id,
    time::TimestampMillis,
    transaction::{SystemTxHash, Transaction, TransactionStatus},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique index rejected the write. Callers race-losing on the
    /// block height index branch on this.
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(&'static str),

    /// A check constraint rejected the write (negative balance shapes,
    /// illegal status transitions, amount cap).
    #[error("Check constraint violated: {0}")]
    CheckViolation(&'static str),

    #[error("Row not found: {0}")]
    RowMissing(&'static str),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            StoreError::UniqueViolation(_) | StoreError::CheckViolation(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    None,
    /// Row-level exclusive lock held until commit or rollback.
    PessimisticWrite,
}

/// Transactional persistence over accounts, transactions and blocks.
///
/// `begin` opens a transaction; all reads and writes go through it.
/// Dropping an uncommitted transaction is a rollback.
#[async_trait]
pub trait AccountStore: Send + Sync + 'static {
    type Tx: StoreTx;

    // Open a new store transaction
    async fn begin(&self) -> Result<Self::Tx, StoreError>;
}

#[async_trait]
pub trait StoreTx: Send {
    // Get an account by its external address
    async fn account_by_address(
        &mut self,
        address: &SystemAddress,
        lock: LockMode,
    ) -> Result<Option<Account>, StoreError>;

    // Get an account by address, restricted to the owning wallet's user
    async fn account_for_user(
        &mut self,
        address: &SystemAddress,
        user_id: &Id,
        lock: LockMode,
    ) -> Result<Option<Account>, StoreError>;

    // Get an account by row id
    async fn account_by_id(
        &mut self,
        id: &Id,
        lock: LockMode,
    ) -> Result<Option<Account>, StoreError>;

    // Store a new wallet
    async fn insert_wallet(&mut self, wallet: Wallet) -> Result<(), StoreError>;

    // Store a new account
    async fn insert_account(&mut self, account: Account) -> Result<(), StoreError>;

    // Write back a modified account row
    async fn save_account(&mut self, account: Account) -> Result<(), StoreError>;

    // Get a transaction by row id
    async fn transaction_by_id(&mut self, id: &Id) -> Result<Option<Transaction>, StoreError>;

    // Get a transaction by its external hash
    async fn transaction_by_hash(
        &mut self,
        hash: &SystemTxHash,
    ) -> Result<Option<Transaction>, StoreError>;

    // Store a new transaction
    async fn insert_transaction(&mut self, transaction: Transaction) -> Result<(), StoreError>;

    // Write back a modified transaction row
    async fn save_transaction(&mut self, transaction: Transaction) -> Result<(), StoreError>;

    // All rows in `status` created strictly before `cutoff`, oldest first
    async fn transactions_in_status_before(
        &mut self,
        status: TransactionStatus,
        cutoff: TimestampMillis,
    ) -> Result<Vec<Transaction>, StoreError>;

    // Flip a confirmed batch in place: PROCESSING -> CONFIRMED with the
    // block assignment. Fails if any row is missing or not PROCESSING.
    async fn confirm_transactions(
        &mut self,
        ids: &[Id],
        block_id: &Id,
        height: BlockHeight,
    ) -> Result<(), StoreError>;

    // Get the highest block
    async fn latest_block(&mut self) -> Result<Option<Block>, StoreError>;

    // Get the block at the given height
    async fn block_by_height(&mut self, height: BlockHeight)
        -> Result<Option<Block>, StoreError>;

    // Get a block by its hash
    async fn block_by_hash(&mut self, hash: &Hash) -> Result<Option<Block>, StoreError>;

    // Store a new block
    async fn insert_block(&mut self, block: Block) -> Result<(), StoreError>;

    // Count the blocks stored
    async fn block_count(&mut self) -> Result<u64, StoreError>;

    // Apply the buffered writes atomically and release all row locks
    async fn commit(self) -> Result<(), StoreError>;

    // Discard the buffered writes and release all row locks
    async fn rollback(self) -> Result<(), StoreError>;
}
