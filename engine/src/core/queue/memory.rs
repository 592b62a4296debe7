// In-memory Queue collaborator.
//
// Lists are plain deques; keyed entries expire lazily against the
// injected Clock so tests can drive lease and cache expiry manually.

use super::{Queue, QueueError};
use async_trait::async_trait;
use dashmap::DashMap;
use kolo_common::time::{Clock, TimestampMillis};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

struct Entry {
    value: String,
    expires_at: TimestampMillis,
}

pub struct MemoryQueue<C: Clock> {
    clock: Arc<C>,
    lists: Mutex<HashMap<String, VecDeque<String>>>,
    entries: DashMap<String, Entry>,
}

impl<C: Clock> MemoryQueue<C> {
    pub fn new(clock: Arc<C>) -> Self {
        MemoryQueue {
            clock,
            lists: Mutex::new(HashMap::new()),
            entries: DashMap::new(),
        }
    }

    fn is_live(&self, entry: &Entry) -> bool {
        entry.expires_at > self.clock.now_millis()
    }
}

#[async_trait]
impl<C: Clock> Queue for MemoryQueue<C> {
    async fn lpush(&self, list: &str, value: &str) -> Result<usize, QueueError> {
        let mut lists = self.lists.lock().await;
        let deque = lists.entry(list.to_owned()).or_default();
        deque.push_front(value.to_owned());
        Ok(deque.len())
    }

    async fn rpop(&self, list: &str) -> Result<Option<String>, QueueError> {
        let mut lists = self.lists.lock().await;
        Ok(lists.get_mut(list).and_then(|deque| deque.pop_back()))
    }

    async fn llen(&self, list: &str) -> Result<usize, QueueError> {
        let lists = self.lists.lock().await;
        Ok(lists.get(list).map(|deque| deque.len()).unwrap_or(0))
    }

    async fn set_nx_ex(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> Result<bool, QueueError> {
        let expires_at = self.clock.now_millis() + ttl_seconds * 1_000;
        match self.entries.entry(key.to_owned()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                if self.is_live(occupied.get()) {
                    return Ok(false);
                }
                // Expired entry, take it over
                occupied.insert(Entry {
                    value: value.to_owned(),
                    expires_at,
                });
                Ok(true)
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(Entry {
                    value: value.to_owned(),
                    expires_at,
                });
                Ok(true)
            }
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), QueueError> {
        let expires_at = self.clock.now_millis() + ttl_seconds * 1_000;
        self.entries.insert(
            key.to_owned(),
            Entry {
                value: value.to_owned(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, QueueError> {
        let Some(entry) = self.entries.get(key) else {
            return Ok(None);
        };
        if !self.is_live(&entry) {
            drop(entry);
            self.entries.remove(key);
            return Ok(None);
        }
        Ok(Some(entry.value.clone()))
    }

    async fn del(&self, key: &str) -> Result<(), QueueError> {
        self.entries.remove(key);
        Ok(())
    }
}
