//! In-memory queue store
//!
//! State is sharded per queue: each shard holds the queue record, its tickets
//! and the index of holders with an active ticket behind its own mutex.
//! Issuing also holds the global ticket index for the duration of the commit.

use crate::error::{QueueError, Result};
use crate::storage::QueueStore;
use crate::types::{HolderId, Queue, QueueId, Ticket, TicketId, TicketStatus};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

#[derive(Debug)]
struct QueueShard {
    queue: Queue,
    tickets: HashMap<TicketId, Ticket>,
    active_holders: HashMap<HolderId, TicketId>,
}

impl QueueShard {
    fn check_version(&self, queue: &Queue) -> Result<()> {
        if self.queue.version != queue.version {
            return Err(QueueError::VersionConflict {
                queue_id: queue.id,
                expected: queue.version,
                actual: self.queue.version,
            });
        }
        Ok(())
    }

    fn store_queue(&mut self, queue: &Queue) -> u64 {
        let mut next = queue.clone();
        next.version = self.queue.version + 1;
        self.queue = next;
        self.queue.version
    }
}

/// In-memory [`QueueStore`] implementation
#[derive(Debug, Default)]
pub struct InMemoryQueueStore {
    shards: RwLock<HashMap<QueueId, Arc<Mutex<QueueShard>>>>,
    ticket_index: RwLock<HashMap<TicketId, QueueId>>,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn shard(&self, queue_id: QueueId) -> Result<Option<Arc<Mutex<QueueShard>>>> {
        let shards = self
            .shards
            .read()
            .map_err(|_| QueueError::storage("Failed to acquire shards read lock"))?;
        Ok(shards.get(&queue_id).cloned())
    }

    fn existing_shard(&self, queue_id: QueueId) -> Result<Arc<Mutex<QueueShard>>> {
        self.shard(queue_id)?
            .ok_or(QueueError::QueueNotFound { queue_id })
    }

    fn with_shard<T>(
        &self,
        queue_id: QueueId,
        f: impl FnOnce(&mut QueueShard) -> Result<T>,
    ) -> Result<T> {
        let shard = self.existing_shard(queue_id)?;
        let mut guard = shard
            .lock()
            .map_err(|_| QueueError::storage("Failed to acquire queue shard lock"))?;
        f(&mut guard)
    }
}

impl QueueStore for InMemoryQueueStore {
    fn insert_queue(&self, queue: Queue) -> Result<()> {
        let mut shards = self
            .shards
            .write()
            .map_err(|_| QueueError::storage("Failed to acquire shards write lock"))?;

        if shards.contains_key(&queue.id) {
            return Err(QueueError::storage(format!(
                "queue {} already exists",
                queue.id
            )));
        }

        shards.insert(
            queue.id,
            Arc::new(Mutex::new(QueueShard {
                queue,
                tickets: HashMap::new(),
                active_holders: HashMap::new(),
            })),
        );
        Ok(())
    }

    fn load_queue(&self, queue_id: QueueId) -> Result<Option<Queue>> {
        match self.shard(queue_id)? {
            Some(shard) => {
                let guard = shard
                    .lock()
                    .map_err(|_| QueueError::storage("Failed to acquire queue shard lock"))?;
                Ok(Some(guard.queue.clone()))
            }
            None => Ok(None),
        }
    }

    fn list_queues(&self) -> Result<Vec<Queue>> {
        let shards: Vec<_> = {
            let shards = self
                .shards
                .read()
                .map_err(|_| QueueError::storage("Failed to acquire shards read lock"))?;
            shards.values().cloned().collect()
        };

        let mut queues = Vec::with_capacity(shards.len());
        for shard in shards {
            let guard = shard
                .lock()
                .map_err(|_| QueueError::storage("Failed to acquire queue shard lock"))?;
            queues.push(guard.queue.clone());
        }
        queues.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(queues)
    }

    fn load_ticket(&self, ticket_id: TicketId) -> Result<Option<Ticket>> {
        let queue_id = {
            let index = self
                .ticket_index
                .read()
                .map_err(|_| QueueError::storage("Failed to acquire ticket index lock"))?;
            match index.get(&ticket_id) {
                Some(queue_id) => *queue_id,
                None => return Ok(None),
            }
        };

        self.with_shard(queue_id, |shard| Ok(shard.tickets.get(&ticket_id).cloned()))
    }

    fn find_active_ticket(&self, queue_id: QueueId, holder_id: &str) -> Result<Option<Ticket>> {
        self.with_shard(queue_id, |shard| {
            Ok(shard
                .active_holders
                .get(holder_id)
                .and_then(|ticket_id| shard.tickets.get(ticket_id))
                .cloned())
        })
    }

    fn queue_tickets(
        &self,
        queue_id: QueueId,
        status: Option<TicketStatus>,
    ) -> Result<Vec<Ticket>> {
        self.with_shard(queue_id, |shard| {
            let mut tickets: Vec<Ticket> = shard
                .tickets
                .values()
                .filter(|ticket| status.map_or(true, |s| ticket.status == s))
                .cloned()
                .collect();
            tickets.sort_by_key(|ticket| ticket.position);
            Ok(tickets)
        })
    }

    fn commit_issue(&self, queue: &Queue, ticket: &Ticket) -> Result<u64> {
        // Index lock is taken before the shard lock so the ticket becomes
        // loadable in the same unit that commits it
        let mut index = self
            .ticket_index
            .write()
            .map_err(|_| QueueError::storage("Failed to acquire ticket index lock"))?;

        self.with_shard(queue.id, |shard| {
            shard.check_version(queue)?;

            if let Some(existing) = shard.active_holders.get(&ticket.holder_id) {
                return Err(QueueError::DuplicateHolder {
                    queue_id: queue.id,
                    holder_id: ticket.holder_id.clone(),
                    ticket_id: *existing,
                });
            }
            if ticket.position != queue.last_issued
                || queue.last_issued != shard.queue.last_issued + 1
            {
                return Err(QueueError::storage(format!(
                    "ticket position {} does not follow last issued {}",
                    ticket.position, shard.queue.last_issued
                )));
            }
            if shard.tickets.contains_key(&ticket.id) {
                return Err(QueueError::storage(format!(
                    "ticket {} already exists",
                    ticket.id
                )));
            }

            index.insert(ticket.id, ticket.queue_id);
            shard
                .active_holders
                .insert(ticket.holder_id.clone(), ticket.id);
            shard.tickets.insert(ticket.id, ticket.clone());
            Ok(shard.store_queue(queue))
        })
    }

    fn commit_transition(
        &self,
        queue: &Queue,
        ticket: &Ticket,
        previous: TicketStatus,
    ) -> Result<u64> {
        self.with_shard(queue.id, |shard| {
            shard.check_version(queue)?;

            let stored_status = shard
                .tickets
                .get(&ticket.id)
                .map(|stored| stored.status)
                .ok_or(QueueError::TicketNotFound {
                    ticket_id: ticket.id,
                })?;
            if stored_status != previous {
                return Err(QueueError::VersionConflict {
                    queue_id: queue.id,
                    expected: queue.version,
                    actual: shard.queue.version,
                });
            }

            if ticket.status.is_terminal() {
                if shard.active_holders.get(&ticket.holder_id) == Some(&ticket.id) {
                    shard.active_holders.remove(&ticket.holder_id);
                }
            }
            shard.tickets.insert(ticket.id, ticket.clone());
            Ok(shard.store_queue(queue))
        })
    }

    fn commit_queue(&self, queue: &Queue) -> Result<u64> {
        self.with_shard(queue.id, |shard| {
            shard.check_version(queue)?;
            Ok(shard.store_queue(queue))
        })
    }
}
