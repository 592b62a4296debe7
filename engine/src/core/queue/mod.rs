pub mod memory;

pub use memory::MemoryQueue;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue backend error: {0}")]
    Backend(String),
}

/// Durable list, lease and cache collaborator.
///
/// Lists give the mempool and dead-letter queues FIFO semantics: push
/// at the head, pop from the tail. Keys carry the per-transaction
/// leases (`set_nx_ex`) and the balance cache (`set_ex`/`get`).
#[async_trait]
pub trait Queue: Send + Sync + 'static {
    // Push a value at the head of `list`, returning the new length
    async fn lpush(&self, list: &str, value: &str) -> Result<usize, QueueError>;

    // Pop the value at the tail of `list`
    async fn rpop(&self, list: &str) -> Result<Option<String>, QueueError>;

    // Current length of `list`
    async fn llen(&self, list: &str) -> Result<usize, QueueError>;

    // Set `key` only if absent, with a TTL; true when acquired
    async fn set_nx_ex(&self, key: &str, value: &str, ttl_seconds: u64)
        -> Result<bool, QueueError>;

    // Set `key` unconditionally, with a TTL
    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), QueueError>;

    // Read `key` if present and not expired
    async fn get(&self, key: &str) -> Result<Option<String>, QueueError>;

    // Drop `key`
    async fn del(&self, key: &str) -> Result<(), QueueError>;
}
