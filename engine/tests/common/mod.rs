// Shared fixtures for the engine integration tests.
#![allow(dead_code)]

use kolo_common::{
    account::{Account, SystemAddress},
    currency::Currency,
    id::Id,
    time::ManualClock,
    transaction::Transaction,
};
use kolo_engine::config::ProcessorConfig;
use kolo_engine::core::{
    balance::BalanceView,
    error::EngineError,
    intake::{TransferIntake, TransferReceipt},
    pipeline::TransactionPipeline,
    queue::{MemoryQueue, Queue},
    storage::{AccountStore, LockMode, MemoryStore, StoreTx},
};
use std::sync::Arc;

pub type TestQueue = MemoryQueue<ManualClock>;
pub type TestIntake = TransferIntake<MemoryStore, TestQueue, ManualClock>;
pub type TestPipeline = TransactionPipeline<MemoryStore, TestQueue, ManualClock>;

pub const START_MILLIS: u64 = 1_700_000_000_000;

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub queue: Arc<TestQueue>,
    pub clock: Arc<ManualClock>,
    pub config: ProcessorConfig,
    pub intake: Arc<TestIntake>,
    pub pipeline: Arc<TestPipeline>,
    pub balances: BalanceView<MemoryStore, TestQueue>,
}

impl Harness {
    pub fn new(config: ProcessorConfig) -> Self {
        let clock = Arc::new(ManualClock::new(START_MILLIS));
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new(clock.clone()));
        let intake = Arc::new(TransferIntake::new(
            store.clone(),
            queue.clone(),
            clock.clone(),
            config.clone(),
        ));
        let pipeline = Arc::new(TransactionPipeline::new(
            store.clone(),
            queue.clone(),
            clock.clone(),
            config.clone(),
        ));
        let balances = BalanceView::new(store.clone(), queue.clone(), config.balance_ttl_seconds);
        Harness {
            store,
            queue,
            clock,
            config,
            intake,
            pipeline,
            balances,
        }
    }

    /// Wallet + account fixture; returns the owning user id and the row.
    pub async fn create_account(&self, balance: &str, currency: &str) -> (Id, Account) {
        let user_id = Id::random();
        let wallet = kolo_common::account::Wallet {
            id: Id::random(),
            user_id,
            encrypted_mnemonic: vec![0u8; 32],
        };
        let mut account = Account::new(wallet.id, Currency::from_code(currency).unwrap());
        account.balance = kolo_common::amount::parse_amount(balance).unwrap();

        let mut tx = self.store.begin().await.unwrap();
        tx.insert_wallet(wallet).await.unwrap();
        tx.insert_account(account.clone()).await.unwrap();
        tx.commit().await.unwrap();
        (user_id, account)
    }

    pub async fn submit(
        &self,
        user_id: &Id,
        from: &SystemAddress,
        to: &SystemAddress,
        amount: &str,
    ) -> Result<TransferReceipt, EngineError> {
        // Distinct created_at per submission keeps audit ordering stable
        self.clock.advance(1);
        self.intake
            .submit_transfer(user_id, from, to, amount, "NGN", None)
            .await
    }

    pub async fn account(&self, id: &Id) -> Account {
        let mut tx = self.store.begin().await.unwrap();
        let account = tx
            .account_by_id(id, LockMode::None)
            .await
            .unwrap()
            .expect("account should exist");
        tx.rollback().await.unwrap();
        account
    }

    pub async fn transaction(&self, id: &Id) -> Transaction {
        let mut tx = self.store.begin().await.unwrap();
        let row = tx
            .transaction_by_id(id)
            .await
            .unwrap()
            .expect("transaction should exist");
        tx.rollback().await.unwrap();
        row
    }

    pub async fn mempool_len(&self) -> usize {
        self.queue.llen(&self.config.mempool_name).await.unwrap()
    }

    pub async fn dlq_len(&self) -> usize {
        self.queue.llen(&self.config.dlq_name).await.unwrap()
    }
}

/// Config tuned so a single cycle seals whatever it collects.
pub fn instant_seal_config() -> ProcessorConfig {
    ProcessorConfig {
        min_txs_per_block: 1,
        ..ProcessorConfig::default()
    }
}
