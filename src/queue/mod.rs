//! Queue management system
//!
//! This module handles queue creation, ticket issuance, the ticket status
//! lifecycle and the manager that exposes them to request handlers.

pub mod manager;
pub mod registry;
pub mod sequencer;
pub mod status;

// Re-export commonly used types
pub use manager::{QueueManager, QueueManagerConfig, QueueManagerStats};
pub use registry::QueueRegistry;
pub use sequencer::{Issued, TicketSequencer};
pub use status::{validate_transition, StatusMachine, Transitioned};

use crate::broadcast::{BroadcastHub, PublishReport};
use crate::types::{Queue, QueueUpdate};
use crate::utils::current_timestamp;
use tracing::{debug, error};

/// Publish a queue's committed state; delivery problems never fail the caller
pub(crate) fn publish_update(hub: &BroadcastHub, queue: &Queue) -> PublishReport {
    let event = QueueUpdate::from_queue(queue, current_timestamp());

    match hub.publish(queue.id, &event) {
        Ok(report) => {
            debug!(
                "Published update for queue {} (current: {}, last issued: {}) to {} observers, {} detached",
                queue.id, queue.current_position, queue.last_issued, report.delivered, report.detached
            );
            report
        }
        Err(e) => {
            error!("Failed to publish update for queue {}: {}", queue.id, e);
            PublishReport::default()
        }
    }
}
