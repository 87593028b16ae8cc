//! Queue registry
//!
//! Owns the set of queues and the per-queue mutual-exclusion units. Each queue
//! gets its own async mutex so work on unrelated queues proceeds in parallel.

use crate::error::{QueueError, Result};
use crate::storage::{retry_on_conflict, QueueStore};
use crate::types::{Queue, QueueId};
use crate::utils::{current_timestamp, generate_queue_id};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::info;

pub const DEFAULT_MAX_NAME_LENGTH: usize = 100;

pub struct QueueRegistry {
    store: Arc<dyn QueueStore>,
    locks: RwLock<HashMap<QueueId, Arc<Mutex<()>>>>,
    max_name_length: usize,
}

impl QueueRegistry {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self::with_max_name_length(store, DEFAULT_MAX_NAME_LENGTH)
    }

    pub fn with_max_name_length(store: Arc<dyn QueueStore>, max_name_length: usize) -> Self {
        Self {
            store,
            locks: RwLock::new(HashMap::new()),
            max_name_length,
        }
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    fn validate_name(&self, name: &str) -> Result<String> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(QueueError::InvalidQueueName {
                reason: "name must not be empty".to_string(),
            });
        }
        if trimmed.chars().count() > self.max_name_length {
            return Err(QueueError::InvalidQueueName {
                reason: format!("name must be at most {} characters", self.max_name_length),
            });
        }
        Ok(trimmed.to_string())
    }

    /// Create a new, active queue
    pub fn create_queue(&self, name: &str) -> Result<Queue> {
        let name = self.validate_name(name)?;
        let queue = Queue::new(generate_queue_id(), name, current_timestamp());
        self.store.insert_queue(queue.clone())?;

        info!("Created queue {} ('{}')", queue.id, queue.name);
        Ok(queue)
    }

    /// Load a queue or fail with `QueueNotFound`
    pub fn queue(&self, queue_id: QueueId) -> Result<Queue> {
        self.store
            .load_queue(queue_id)?
            .ok_or(QueueError::QueueNotFound { queue_id })
    }

    pub fn list_queues(&self) -> Result<Vec<Queue>> {
        self.store.list_queues()
    }

    /// Enter the critical section for one queue
    pub async fn lock_queue(&self, queue_id: QueueId) -> Result<OwnedMutexGuard<()>> {
        let existing = {
            let locks = self
                .locks
                .read()
                .map_err(|_| QueueError::storage("Failed to acquire queue locks read lock"))?;
            locks.get(&queue_id).cloned()
        };

        let lock = match existing {
            Some(lock) => lock,
            None => {
                // Make sure the queue exists before minting a lock for it
                self.queue(queue_id)?;
                let mut locks = self
                    .locks
                    .write()
                    .map_err(|_| QueueError::storage("Failed to acquire queue locks write lock"))?;
                locks
                    .entry(queue_id)
                    .or_insert_with(|| Arc::new(Mutex::new(())))
                    .clone()
            }
        };

        Ok(lock.lock_owned().await)
    }

    /// Apply a queue-only change under the queue's version check.
    ///
    /// The caller must hold the queue's lock.
    pub(crate) fn update_queue(
        &self,
        queue_id: QueueId,
        max_attempts: u32,
        mut change: impl FnMut(&mut Queue) -> Result<()>,
    ) -> Result<Queue> {
        retry_on_conflict(max_attempts, |_| {
            let mut queue = self.queue(queue_id)?;
            change(&mut queue)?;
            queue.version = self.store.commit_queue(&queue)?;
            Ok(queue)
        })
    }
}
