//! Ticket status state machine
//!
//! ```text
//! WAITING -> CALLED -> SERVING -> COMPLETED
//!    |          |
//!    v          v
//! CANCELLED   NO_SHOW
//! ```
//!
//! A COMPLETED or NO_SHOW transition moves the queue's serving pointer forward
//! to the ticket's position. Completing a ticket also feeds the time since the
//! previous completion into the queue's service-time average.

use crate::broadcast::{BroadcastHub, PublishReport};
use crate::error::{QueueError, Result};
use crate::queue::{publish_update, QueueRegistry};
use crate::storage::retry_on_conflict;
use crate::types::{Queue, Ticket, TicketId, TicketStatus};
use crate::utils::{current_timestamp, seconds_between};
use crate::wait_time::EtaEstimator;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use super::sequencer::DEFAULT_MAX_COMMIT_ATTEMPTS;

impl TicketStatus {
    /// Whether `self -> next` is one of the five legal transitions
    pub fn can_transition_to(self, next: TicketStatus) -> bool {
        use TicketStatus::*;
        matches!(
            (self, next),
            (Waiting, Called)
                | (Waiting, Cancelled)
                | (Called, Serving)
                | (Called, NoShow)
                | (Serving, Completed)
        )
    }

    /// Whether this status advances the queue's serving pointer
    pub fn advances_queue(self) -> bool {
        matches!(self, TicketStatus::Completed | TicketStatus::NoShow)
    }

    /// Place in the lifecycle; all terminal statuses share the last stage
    fn stage(self) -> u8 {
        match self {
            TicketStatus::Waiting => 0,
            TicketStatus::Called => 1,
            TicketStatus::Serving => 2,
            TicketStatus::Completed | TicketStatus::NoShow | TicketStatus::Cancelled => 3,
        }
    }

    /// Whether a ticket in this status is terminal or already at or past `target`
    pub fn has_passed(self, target: TicketStatus) -> bool {
        self.is_terminal() || self.stage() >= target.stage()
    }
}

/// Check a requested transition without touching any state
///
/// Terminal tickets and requests for a stage the ticket already reached fail
/// with `AlreadyTransitioned`. Forward jumps and wrong branches fail with
/// `InvalidTransition`.
pub fn validate_transition(ticket: &Ticket, target: TicketStatus) -> Result<()> {
    if ticket.status.has_passed(target) {
        return Err(QueueError::AlreadyTransitioned {
            ticket_id: ticket.id,
            status: ticket.status,
        });
    }

    if !ticket.status.can_transition_to(target) {
        return Err(QueueError::InvalidTransition {
            ticket_id: ticket.id,
            from: ticket.status,
            to: target,
        });
    }

    Ok(())
}

/// Apply a validated transition to a ticket, recording its timestamp
fn apply_transition(ticket: &mut Ticket, target: TicketStatus, now: DateTime<Utc>) -> Result<()> {
    validate_transition(ticket, target)?;

    let slot = match target {
        TicketStatus::Called => &mut ticket.called_at,
        TicketStatus::Serving => &mut ticket.serving_at,
        TicketStatus::Completed | TicketStatus::NoShow | TicketStatus::Cancelled => {
            &mut ticket.completed_at
        }
        TicketStatus::Waiting => {
            return Err(QueueError::InvalidTransition {
                ticket_id: ticket.id,
                from: ticket.status,
                to: target,
            })
        }
    };
    if slot.is_some() {
        return Err(QueueError::AlreadyTransitioned {
            ticket_id: ticket.id,
            status: ticket.status,
        });
    }
    *slot = Some(now);
    ticket.status = target;
    Ok(())
}

/// Result of a committed transition
#[derive(Debug, Clone)]
pub struct Transitioned {
    pub ticket: Ticket,
    pub previous: TicketStatus,
    /// Queue record as committed alongside the ticket
    pub queue: Queue,
    pub publish: PublishReport,
}

pub struct StatusMachine {
    registry: Arc<QueueRegistry>,
    hub: Arc<BroadcastHub>,
    estimator: EtaEstimator,
    max_commit_attempts: u32,
}

impl StatusMachine {
    pub fn new(registry: Arc<QueueRegistry>, hub: Arc<BroadcastHub>, estimator: EtaEstimator) -> Self {
        Self::with_max_attempts(registry, hub, estimator, DEFAULT_MAX_COMMIT_ATTEMPTS)
    }

    pub fn with_max_attempts(
        registry: Arc<QueueRegistry>,
        hub: Arc<BroadcastHub>,
        estimator: EtaEstimator,
        max_commit_attempts: u32,
    ) -> Self {
        Self {
            registry,
            hub,
            estimator,
            max_commit_attempts,
        }
    }

    fn load_ticket(&self, ticket_id: TicketId) -> Result<Ticket> {
        self.registry
            .store()
            .load_ticket(ticket_id)?
            .ok_or(QueueError::TicketNotFound { ticket_id })
    }

    /// Move a ticket to `target`, updating its queue in the same commit
    pub async fn transition(&self, ticket_id: TicketId, target: TicketStatus) -> Result<Transitioned> {
        let queue_id = self.load_ticket(ticket_id)?.queue_id;

        let _guard = self.registry.lock_queue(queue_id).await?;
        let store = self.registry.store();

        let (ticket, previous, queue) = retry_on_conflict(self.max_commit_attempts, |_| {
            let mut ticket = self.load_ticket(ticket_id)?;
            let mut queue = self.registry.queue(queue_id)?;
            let previous = ticket.status;
            let now = current_timestamp();

            apply_transition(&mut ticket, target, now)?;

            if target.advances_queue() && ticket.position > queue.current_position {
                debug!(
                    "Queue {} serving pointer {} -> {}",
                    queue_id, queue.current_position, ticket.position
                );
                queue.current_position = ticket.position;
            }

            if target == TicketStatus::Completed {
                let since = queue.last_completed_at.unwrap_or(queue.created_at);
                self.estimator
                    .apply_completion(&mut queue, seconds_between(since, now));
                queue.last_completed_at = Some(now);
            }

            queue.version = store.commit_transition(&queue, &ticket, previous)?;
            Ok((ticket, previous, queue))
        })?;

        info!(
            "Ticket {} (position {}) in queue {}: {} -> {}",
            ticket.id, ticket.position, queue_id, previous, ticket.status
        );

        let publish = publish_update(&self.hub, &queue);
        Ok(Transitioned {
            ticket,
            previous,
            queue,
            publish,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::TicketSequencer;
    use crate::storage::InMemoryQueueStore;
    use crate::types::QueueId;

    struct Harness {
        registry: Arc<QueueRegistry>,
        sequencer: TicketSequencer,
        machine: StatusMachine,
        queue_id: QueueId,
    }

    fn harness() -> Harness {
        let registry = Arc::new(QueueRegistry::new(Arc::new(InMemoryQueueStore::new())));
        let hub = Arc::new(BroadcastHub::default());
        let queue_id = registry.create_queue("Bank").unwrap().id;
        Harness {
            sequencer: TicketSequencer::new(registry.clone(), hub.clone()),
            machine: StatusMachine::new(registry.clone(), hub, EtaEstimator::default()),
            registry,
            queue_id,
        }
    }

    impl Harness {
        async fn ticket(&self, holder: &str) -> Ticket {
            self.sequencer
                .issue(self.queue_id, holder.to_string())
                .await
                .unwrap()
                .ticket
        }

        /// Drive a fresh ticket into `status` along the legal path
        async fn ticket_in(&self, holder: &str, status: TicketStatus) -> Ticket {
            use TicketStatus::*;
            let ticket = self.ticket(holder).await;
            let path: &[TicketStatus] = match status {
                Waiting => &[],
                Called => &[Called],
                Serving => &[Called, Serving],
                Completed => &[Called, Serving, Completed],
                NoShow => &[Called, NoShow],
                Cancelled => &[Cancelled],
            };
            let mut current = ticket;
            for step in path {
                current = self.machine.transition(current.id, *step).await.unwrap().ticket;
            }
            current
        }
    }

    #[test]
    fn test_transition_table() {
        let legal: Vec<(TicketStatus, TicketStatus)> = TicketStatus::ALL
            .iter()
            .flat_map(|from| TicketStatus::ALL.iter().map(move |to| (*from, *to)))
            .filter(|(from, to)| from.can_transition_to(*to))
            .collect();

        assert_eq!(legal.len(), 5);
        for terminal in [TicketStatus::Completed, TicketStatus::NoShow, TicketStatus::Cancelled] {
            assert!(TicketStatus::ALL.iter().all(|to| !terminal.can_transition_to(*to)));
        }
    }

    #[tokio::test]
    async fn test_every_pair_exhaustively() {
        let h = harness();
        let mut n = 0;

        for from in TicketStatus::ALL {
            for to in TicketStatus::ALL {
                n += 1;
                let ticket = h.ticket_in(&format!("holder-{n}"), from).await;
                let result = h.machine.transition(ticket.id, to).await;

                if from.can_transition_to(to) {
                    let done = result.unwrap();
                    assert_eq!(done.ticket.status, to);
                    assert_eq!(done.previous, from);
                } else if from.has_passed(to) {
                    match result {
                        Err(QueueError::AlreadyTransitioned { status, .. }) => {
                            assert_eq!(status, from);
                        }
                        other => panic!("{from} -> {to}: unexpected {other:?}"),
                    }
                    let stored = h.registry.store().load_ticket(ticket.id).unwrap().unwrap();
                    assert_eq!(stored, ticket);
                } else {
                    match result {
                        Err(QueueError::InvalidTransition { from: f, to: t, .. }) => {
                            assert_eq!((f, t), (from, to));
                        }
                        other => panic!("{from} -> {to}: unexpected {other:?}"),
                    }
                    let stored = h.registry.store().load_ticket(ticket.id).unwrap().unwrap();
                    assert_eq!(stored, ticket);
                }
            }
        }
    }

    #[test]
    fn test_already_passed_versus_invalid() {
        use TicketStatus::*;

        for (from, to) in [
            (Completed, Called),
            (NoShow, Serving),
            (Cancelled, Completed),
            (Serving, Called),
            (Called, Waiting),
            (Waiting, Waiting),
        ] {
            assert!(from.has_passed(to), "{from} -> {to}");
        }
        for (from, to) in [
            (Waiting, Serving),
            (Waiting, Completed),
            (Waiting, NoShow),
            (Called, Cancelled),
            (Called, Completed),
            (Serving, NoShow),
        ] {
            assert!(!from.has_passed(to), "{from} -> {to}");
            assert!(!from.can_transition_to(to), "{from} -> {to}");
        }
    }

    #[tokio::test]
    async fn test_transition_after_serving_reports_already_transitioned() {
        let h = harness();
        let done = h.ticket_in("alice", TicketStatus::Completed).await;
        let serving = h.ticket_in("bob", TicketStatus::Serving).await;

        let err = h.machine.transition(done.id, TicketStatus::Called).await.unwrap_err();
        assert!(matches!(
            err,
            QueueError::AlreadyTransitioned { status: TicketStatus::Completed, .. }
        ));

        let err = h.machine.transition(serving.id, TicketStatus::Called).await.unwrap_err();
        assert!(matches!(
            err,
            QueueError::AlreadyTransitioned { status: TicketStatus::Serving, .. }
        ));
    }

    #[tokio::test]
    async fn test_timestamps_recorded() {
        let h = harness();
        let ticket = h.ticket_in("alice", TicketStatus::Completed).await;

        assert!(ticket.called_at.is_some());
        assert!(ticket.serving_at.is_some());
        assert!(ticket.completed_at.is_some());
        assert!(ticket.called_at <= ticket.serving_at);
    }

    #[tokio::test]
    async fn test_completion_advances_pointer_and_count() {
        let h = harness();
        let first = h.ticket_in("alice", TicketStatus::Serving).await;
        let _second = h.ticket("bob").await;

        let done = h
            .machine
            .transition(first.id, TicketStatus::Completed)
            .await
            .unwrap();

        assert_eq!(done.queue.current_position, 1);
        assert_eq!(done.queue.completed_count, 1);
        assert!(done.queue.last_completed_at.is_some());
    }

    #[tokio::test]
    async fn test_skip_moves_pointer_forward_only() {
        let h = harness();
        let first = h.ticket("a").await;
        let _second = h.ticket("b").await;
        let third = h.ticket("c").await;

        // Host serves position 3 out of order
        h.machine.transition(third.id, TicketStatus::Called).await.unwrap();
        let skipped = h.machine.transition(third.id, TicketStatus::NoShow).await.unwrap();
        assert_eq!(skipped.queue.current_position, 3);
        assert_eq!(skipped.queue.completed_count, 0);

        // Completing a ticket behind the pointer leaves it where it is
        h.machine.transition(first.id, TicketStatus::Called).await.unwrap();
        h.machine.transition(first.id, TicketStatus::Serving).await.unwrap();
        let done = h.machine.transition(first.id, TicketStatus::Completed).await.unwrap();
        assert_eq!(done.queue.current_position, 3);
        assert_eq!(done.queue.completed_count, 1);
    }

    #[tokio::test]
    async fn test_cancel_releases_holder() {
        let h = harness();
        h.ticket_in("alice", TicketStatus::Cancelled).await;

        let again = h.ticket("alice").await;
        assert_eq!(again.position, 2);
    }

    #[tokio::test]
    async fn test_unknown_ticket() {
        let h = harness();
        let err = h
            .machine
            .transition(crate::utils::generate_ticket_id(), TicketStatus::Called)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
