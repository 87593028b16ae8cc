//! Test fixtures and fault-injecting collaborators for integration testing

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use waitline::broadcast::Observer;
use waitline::error::{QueueError, Result};
use waitline::metrics::MetricsCollector;
use waitline::queue::{QueueManager, QueueManagerConfig};
use waitline::storage::{InMemoryQueueStore, QueueStore};
use waitline::sync::{BackoffPolicy, LocalTransport, SyncConfig, SyncTransport};
use waitline::types::{Queue, QueueId, Ticket, TicketId, TicketStatus, TicketView};

/// Store wrapper that injects version conflicts or hard failures into commits
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: InMemoryQueueStore,
    conflicts_remaining: AtomicU32,
    failing: AtomicBool,
    commit_calls: AtomicU32,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` commits fail with a version conflict
    pub fn inject_conflicts(&self, count: u32) {
        self.conflicts_remaining.store(count, Ordering::SeqCst);
    }

    /// Make every commit fail with a storage failure until cleared
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of commit attempts seen, successful or not
    pub fn commit_calls(&self) -> u32 {
        self.commit_calls.load(Ordering::SeqCst)
    }

    fn before_commit(&self, queue: &Queue) -> Result<()> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);

        if self.failing.load(Ordering::SeqCst) {
            return Err(QueueError::StorageFailure {
                message: "injected write failure".to_string(),
            });
        }

        let injected = self
            .conflicts_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(QueueError::VersionConflict {
                queue_id: queue.id,
                expected: queue.version,
                actual: queue.version + 1,
            });
        }

        Ok(())
    }
}

impl QueueStore for FlakyStore {
    fn insert_queue(&self, queue: Queue) -> Result<()> {
        self.inner.insert_queue(queue)
    }

    fn load_queue(&self, queue_id: QueueId) -> Result<Option<Queue>> {
        self.inner.load_queue(queue_id)
    }

    fn list_queues(&self) -> Result<Vec<Queue>> {
        self.inner.list_queues()
    }

    fn load_ticket(&self, ticket_id: TicketId) -> Result<Option<Ticket>> {
        self.inner.load_ticket(ticket_id)
    }

    fn find_active_ticket(&self, queue_id: QueueId, holder_id: &str) -> Result<Option<Ticket>> {
        self.inner.find_active_ticket(queue_id, holder_id)
    }

    fn queue_tickets(
        &self,
        queue_id: QueueId,
        status: Option<TicketStatus>,
    ) -> Result<Vec<Ticket>> {
        self.inner.queue_tickets(queue_id, status)
    }

    fn commit_issue(&self, queue: &Queue, ticket: &Ticket) -> Result<u64> {
        self.before_commit(queue)?;
        self.inner.commit_issue(queue, ticket)
    }

    fn commit_transition(
        &self,
        queue: &Queue,
        ticket: &Ticket,
        previous: TicketStatus,
    ) -> Result<u64> {
        self.before_commit(queue)?;
        self.inner.commit_transition(queue, ticket, previous)
    }

    fn commit_queue(&self, queue: &Queue) -> Result<u64> {
        self.before_commit(queue)?;
        self.inner.commit_queue(queue)
    }
}

/// Transport that can be taken offline; every call fails while offline
#[derive(Clone)]
pub struct FlakyTransport {
    inner: LocalTransport,
    offline: Arc<AtomicBool>,
    attempts: Arc<AtomicU32>,
}

impl FlakyTransport {
    pub fn new(manager: QueueManager) -> Self {
        Self {
            inner: LocalTransport::new(manager),
            offline: Arc::new(AtomicBool::new(false)),
            attempts: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of subscribe attempts made
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(QueueError::TransportFailure {
                message: "network unreachable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SyncTransport for FlakyTransport {
    async fn subscribe(&self, queue_id: QueueId) -> Result<Observer> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        self.inner.subscribe(queue_id).await
    }

    async fn fetch(&self, ticket_id: TicketId) -> Result<TicketView> {
        self.check_online()?;
        self.inner.fetch(ticket_id).await
    }
}

/// Queue manager over a fault-injecting store
pub fn flaky_manager(max_commit_attempts: u32) -> (QueueManager, Arc<FlakyStore>) {
    let store = Arc::new(FlakyStore::new());
    let config = QueueManagerConfig {
        max_commit_attempts,
        ..QueueManagerConfig::default()
    };
    let metrics = Arc::new(MetricsCollector::new().expect("Failed to create collector"));
    let manager = QueueManager::with_metrics(store.clone(), config, metrics)
        .expect("Failed to create queue manager");
    (manager, store)
}

/// Sync settings with delays short enough for tests
pub fn fast_sync_config(base_ms: u64, ceiling_ms: u64) -> SyncConfig {
    SyncConfig {
        backoff: BackoffPolicy::new(
            Duration::from_millis(base_ms),
            Duration::from_millis(ceiling_ms),
        ),
        ..SyncConfig::default()
    }
}

/// Drive a ticket from WAITING through to COMPLETED
pub async fn serve_to_completion(manager: &QueueManager, ticket_id: TicketId) -> Result<Ticket> {
    manager.transition(ticket_id, TicketStatus::Called).await?;
    manager.transition(ticket_id, TicketStatus::Serving).await?;
    manager.transition(ticket_id, TicketStatus::Completed).await
}
