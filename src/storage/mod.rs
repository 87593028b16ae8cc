//! Persisted-state collaborator for queues and tickets
//!
//! The store is the only place queue counters and ticket records live. Each
//! `commit_*` method applies its writes as one indivisible unit and checks the
//! queue's optimistic-concurrency `version` first, so a write computed from a
//! stale read is rejected with [`QueueError::VersionConflict`] instead of being
//! applied.

pub mod memory;

pub use memory::InMemoryQueueStore;

use crate::error::{QueueError, Result};
use crate::types::{Queue, QueueId, Ticket, TicketId, TicketStatus};
use tracing::warn;

/// Storage operations required by the sequencing core
pub trait QueueStore: Send + Sync {
    /// Insert a freshly created queue
    fn insert_queue(&self, queue: Queue) -> Result<()>;

    /// Load a queue record
    fn load_queue(&self, queue_id: QueueId) -> Result<Option<Queue>>;

    /// Get all queues (for admin/monitoring)
    fn list_queues(&self) -> Result<Vec<Queue>>;

    /// Load a ticket record
    fn load_ticket(&self, ticket_id: TicketId) -> Result<Option<Ticket>>;

    /// Find the holder's ticket in WAITING, CALLED or SERVING, if any
    fn find_active_ticket(&self, queue_id: QueueId, holder_id: &str) -> Result<Option<Ticket>>;

    /// Tickets of a queue ordered by position, optionally filtered by status
    fn queue_tickets(&self, queue_id: QueueId, status: Option<TicketStatus>)
        -> Result<Vec<Ticket>>;

    /// Store the incremented queue counter together with the new ticket.
    ///
    /// `queue.version` must equal the stored version; returns the new version.
    fn commit_issue(&self, queue: &Queue, ticket: &Ticket) -> Result<u64>;

    /// Store a ticket status change together with the queue it affects.
    ///
    /// Fails with a conflict if the stored ticket is no longer in `previous`.
    fn commit_transition(&self, queue: &Queue, ticket: &Ticket, previous: TicketStatus)
        -> Result<u64>;

    /// Store a queue-only change (ETA sample, close, pause)
    fn commit_queue(&self, queue: &Queue) -> Result<u64>;
}

/// Run a read-compute-commit closure, retrying only on version conflicts.
///
/// The closure receives the 1-based attempt number. Any error other than a
/// version conflict is returned immediately; a conflict that survives
/// `max_attempts` attempts becomes a [`QueueError::StorageFailure`].
pub fn retry_on_conflict<T>(max_attempts: u32, mut op: impl FnMut(u32) -> Result<T>) -> Result<T> {
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt) {
            Err(e) if e.is_retryable() => {
                if attempt >= max_attempts {
                    return Err(QueueError::storage(format!(
                        "commit conflict persisted after {} attempts: {}",
                        attempt, e
                    )));
                }
                warn!("Commit attempt {} hit a version conflict: {}. Retrying", attempt, e);
                attempt += 1;
            }
            other => return other,
        }
    }
}
