//! Per-queue observer registry and event fan-out
//!
//! Every observer owns a bounded channel. Publishing clones the current set of
//! senders for the queue under a short read lock and then delivers with
//! `try_send`, so a slow observer is never waited on: if its buffer is full or
//! its receiver is gone it is detached on the spot.

use crate::error::{QueueError, Result};
use crate::types::{QueueId, QueueUpdate};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

/// Identifies one attached observer channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverHandle {
    pub queue_id: QueueId,
    pub id: u64,
}

/// Receiving side of an attached observer
#[derive(Debug)]
pub struct Observer {
    handle: ObserverHandle,
    receiver: mpsc::Receiver<QueueUpdate>,
}

impl Observer {
    /// Wrap a receiver fed by something other than a local hub
    pub fn new(handle: ObserverHandle, receiver: mpsc::Receiver<QueueUpdate>) -> Self {
        Self { handle, receiver }
    }

    pub fn handle(&self) -> ObserverHandle {
        self.handle
    }

    /// Wait for the next event; `None` once the hub has detached this observer
    pub async fn recv(&mut self) -> Option<QueueUpdate> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<QueueUpdate> {
        self.receiver.try_recv().ok()
    }

    pub fn into_stream(self) -> ReceiverStream<QueueUpdate> {
        ReceiverStream::new(self.receiver)
    }
}

/// Outcome of one publish call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub detached: usize,
}

/// Fan-out hub keyed by queue
#[derive(Debug)]
pub struct BroadcastHub {
    buffer: usize,
    next_id: AtomicU64,
    observers: RwLock<HashMap<QueueId, HashMap<u64, mpsc::Sender<QueueUpdate>>>>,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(64)
    }
}

impl BroadcastHub {
    /// Create a hub whose observer channels hold up to `buffer` pending events
    pub fn new(buffer: usize) -> Self {
        Self {
            buffer: buffer.max(1),
            next_id: AtomicU64::new(1),
            observers: RwLock::new(HashMap::new()),
        }
    }

    pub fn buffer(&self) -> usize {
        self.buffer
    }

    /// Attach a new observer to a queue
    pub fn attach(&self, queue_id: QueueId) -> Result<Observer> {
        let (sender, receiver) = mpsc::channel(self.buffer);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut observers = self
            .observers
            .write()
            .map_err(|_| QueueError::storage("Failed to acquire observers write lock"))?;
        observers.entry(queue_id).or_default().insert(id, sender);

        debug!("Attached observer {} to queue {}", id, queue_id);
        Ok(Observer::new(ObserverHandle { queue_id, id }, receiver))
    }

    /// Detach an observer; returns false if it was already gone
    pub fn detach(&self, handle: ObserverHandle) -> Result<bool> {
        let mut observers = self
            .observers
            .write()
            .map_err(|_| QueueError::storage("Failed to acquire observers write lock"))?;
        Ok(Self::remove(&mut observers, handle))
    }

    fn remove(
        observers: &mut HashMap<QueueId, HashMap<u64, mpsc::Sender<QueueUpdate>>>,
        handle: ObserverHandle,
    ) -> bool {
        let Some(set) = observers.get_mut(&handle.queue_id) else {
            return false;
        };
        let removed = set.remove(&handle.id).is_some();
        if set.is_empty() {
            observers.remove(&handle.queue_id);
        }
        if removed {
            debug!("Detached observer {} from queue {}", handle.id, handle.queue_id);
        }
        removed
    }

    /// Deliver `event` to every observer attached to `queue_id` right now
    pub fn publish(&self, queue_id: QueueId, event: &QueueUpdate) -> Result<PublishReport> {
        let targets: Vec<(u64, mpsc::Sender<QueueUpdate>)> = {
            let observers = self
                .observers
                .read()
                .map_err(|_| QueueError::storage("Failed to acquire observers read lock"))?;
            match observers.get(&queue_id) {
                Some(set) => set.iter().map(|(id, tx)| (*id, tx.clone())).collect(),
                None => return Ok(PublishReport::default()),
            }
        };

        let mut report = PublishReport::default();
        let mut dead = Vec::new();

        for (id, sender) in targets {
            match sender.try_send(event.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!("Observer {} on queue {} is not keeping up, detaching", id, queue_id);
                    dead.push(id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Observer {} on queue {} has gone away", id, queue_id);
                    dead.push(id);
                }
            }
        }

        if !dead.is_empty() {
            let mut observers = self
                .observers
                .write()
                .map_err(|_| QueueError::storage("Failed to acquire observers write lock"))?;
            for id in dead {
                if Self::remove(&mut observers, ObserverHandle { queue_id, id }) {
                    report.detached += 1;
                }
            }
        }

        Ok(report)
    }

    /// Number of observers currently attached to a queue
    pub fn observer_count(&self, queue_id: QueueId) -> usize {
        self.observers
            .read()
            .map(|observers| observers.get(&queue_id).map_or(0, |set| set.len()))
            .unwrap_or(0)
    }

    pub fn total_observers(&self) -> usize {
        self.observers
            .read()
            .map(|observers| observers.values().map(|set| set.len()).sum())
            .unwrap_or(0)
    }
}
