//! Ticket sequencer
//!
//! Issuing is the critical section of the whole service: the duplicate-holder
//! check, the `last_issued` increment and the ticket insert are evaluated and
//! committed together while the queue's lock is held, and the resulting event
//! is published before the lock is released.

use crate::broadcast::{BroadcastHub, PublishReport};
use crate::error::{QueueError, Result};
use crate::queue::{publish_update, QueueRegistry};
use crate::storage::retry_on_conflict;
use crate::types::{HolderId, Queue, QueueId, Ticket};
use crate::utils::{current_timestamp, generate_ticket_id};
use std::sync::Arc;
use tracing::{debug, info};

pub const DEFAULT_MAX_COMMIT_ATTEMPTS: u32 = 5;

/// Result of a successful issue
#[derive(Debug, Clone)]
pub struct Issued {
    pub ticket: Ticket,
    /// Queue record as committed alongside the ticket
    pub queue: Queue,
    pub publish: PublishReport,
}

pub struct TicketSequencer {
    registry: Arc<QueueRegistry>,
    hub: Arc<BroadcastHub>,
    max_commit_attempts: u32,
}

impl TicketSequencer {
    pub fn new(registry: Arc<QueueRegistry>, hub: Arc<BroadcastHub>) -> Self {
        Self::with_max_attempts(registry, hub, DEFAULT_MAX_COMMIT_ATTEMPTS)
    }

    pub fn with_max_attempts(
        registry: Arc<QueueRegistry>,
        hub: Arc<BroadcastHub>,
        max_commit_attempts: u32,
    ) -> Self {
        Self {
            registry,
            hub,
            max_commit_attempts,
        }
    }

    /// Mint the next ticket of a queue for `holder_id`
    pub async fn issue(&self, queue_id: QueueId, holder_id: HolderId) -> Result<Issued> {
        let _guard = self.registry.lock_queue(queue_id).await?;
        let store = self.registry.store();

        let (ticket, queue) = retry_on_conflict(self.max_commit_attempts, |attempt| {
            let mut queue = self.registry.queue(queue_id)?;

            if !queue.active {
                return Err(QueueError::QueueInactive { queue_id });
            }
            if queue.paused {
                return Err(QueueError::QueuePaused { queue_id });
            }
            if let Some(existing) = store.find_active_ticket(queue_id, &holder_id)? {
                return Err(QueueError::DuplicateHolder {
                    queue_id,
                    holder_id: holder_id.clone(),
                    ticket_id: existing.id,
                });
            }

            queue.last_issued += 1;
            let ticket = Ticket::new(
                generate_ticket_id(),
                queue_id,
                holder_id.clone(),
                queue.last_issued,
                current_timestamp(),
            );

            if attempt > 1 {
                debug!(
                    "Issuing position {} in queue {} on attempt {}",
                    ticket.position, queue_id, attempt
                );
            }

            queue.version = store.commit_issue(&queue, &ticket)?;
            Ok((ticket, queue))
        })?;

        info!(
            "Issued ticket {} to holder '{}' at position {} in queue {}",
            ticket.id, ticket.holder_id, ticket.position, queue_id
        );

        let publish = publish_update(&self.hub, &queue);
        Ok(Issued {
            ticket,
            queue,
            publish,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryQueueStore;

    fn sequencer() -> (TicketSequencer, Arc<QueueRegistry>, Arc<BroadcastHub>) {
        let registry = Arc::new(QueueRegistry::new(Arc::new(InMemoryQueueStore::new())));
        let hub = Arc::new(BroadcastHub::default());
        (
            TicketSequencer::new(registry.clone(), hub.clone()),
            registry,
            hub,
        )
    }

    #[tokio::test]
    async fn test_positions_are_sequential() {
        let (sequencer, registry, _) = sequencer();
        let queue = registry.create_queue("Pharmacy").unwrap();

        for expected in 1..=3 {
            let issued = sequencer
                .issue(queue.id, format!("holder-{}", expected))
                .await
                .unwrap();
            assert_eq!(issued.ticket.position, expected);
            assert_eq!(issued.queue.last_issued, expected);
        }
    }

    #[tokio::test]
    async fn test_duplicate_holder_leaves_counter_untouched() {
        let (sequencer, registry, _) = sequencer();
        let queue = registry.create_queue("Pharmacy").unwrap();

        let first = sequencer.issue(queue.id, "alice".to_string()).await.unwrap();
        let before = registry.queue(queue.id).unwrap();

        let err = sequencer
            .issue(queue.id, "alice".to_string())
            .await
            .unwrap_err();
        match err {
            QueueError::DuplicateHolder { ticket_id, .. } => assert_eq!(ticket_id, first.ticket.id),
            other => panic!("unexpected error: {other:?}"),
        }

        let after = registry.queue(queue.id).unwrap();
        assert_eq!(after.last_issued, 1);
        assert_eq!(after.version, before.version);
    }

    #[tokio::test]
    async fn test_inactive_and_paused_queues_refuse_joins() {
        let (sequencer, registry, _) = sequencer();
        let queue = registry.create_queue("Pharmacy").unwrap();

        registry
            .update_queue(queue.id, 1, |q| {
                q.paused = true;
                Ok(())
            })
            .unwrap();
        assert!(matches!(
            sequencer.issue(queue.id, "bob".to_string()).await,
            Err(QueueError::QueuePaused { .. })
        ));

        registry
            .update_queue(queue.id, 1, |q| {
                q.active = false;
                Ok(())
            })
            .unwrap();
        assert!(matches!(
            sequencer.issue(queue.id, "bob".to_string()).await,
            Err(QueueError::QueueInactive { .. })
        ));
    }

    #[tokio::test]
    async fn test_issue_publishes_new_counter() {
        let (sequencer, registry, hub) = sequencer();
        let queue = registry.create_queue("Pharmacy").unwrap();
        let mut observer = hub.attach(queue.id).unwrap();

        let issued = sequencer.issue(queue.id, "carol".to_string()).await.unwrap();
        assert_eq!(issued.publish.delivered, 1);

        let event = observer.recv().await.unwrap();
        assert_eq!(event.last_issued, 1);
        assert_eq!(event.current_position, 0);
    }

    #[tokio::test]
    async fn test_unknown_queue() {
        let (sequencer, _, _) = sequencer();
        let err = sequencer
            .issue(crate::utils::generate_queue_id(), "dave".to_string())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
