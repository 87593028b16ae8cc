//! Channel and query access used by the sync agent

use crate::broadcast::Observer;
use crate::error::Result;
use crate::queue::QueueManager;
use crate::types::{QueueId, TicketId, TicketView};
use async_trait::async_trait;

/// What a client needs from the service to stay in sync
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Open a push channel for a queue's updates
    async fn subscribe(&self, queue_id: QueueId) -> Result<Observer>;

    /// Fetch the full current state of a ticket
    async fn fetch(&self, ticket_id: TicketId) -> Result<TicketView>;
}

/// In-process transport backed directly by a queue manager
#[derive(Clone)]
pub struct LocalTransport {
    manager: QueueManager,
}

impl LocalTransport {
    pub fn new(manager: QueueManager) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl SyncTransport for LocalTransport {
    async fn subscribe(&self, queue_id: QueueId) -> Result<Observer> {
        self.manager.attach(queue_id)
    }

    async fn fetch(&self, ticket_id: TicketId) -> Result<TicketView> {
        self.manager.ticket_view(ticket_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_transport_round_trip() {
        let manager = QueueManager::in_memory().unwrap();
        let queue = manager.create_queue("Ferry").unwrap();
        let ticket = manager.issue_ticket(queue.id, "alice").await.unwrap();
        let transport = LocalTransport::new(manager.clone());

        let mut observer = transport.subscribe(queue.id).await.unwrap();
        manager.issue_ticket(queue.id, "bob").await.unwrap();
        assert_eq!(observer.recv().await.unwrap().last_issued, 2);

        let view = transport.fetch(ticket.id).await.unwrap();
        assert_eq!(view.ticket.id, ticket.id);
        assert_eq!(view.people_ahead, 1);
    }
}
