//! Error types for the wait line service
//!
//! Every condition a caller can observe from the sequencing core is a typed
//! variant of [`QueueError`]. The core never turns these into silent no-ops
//! and never retries them itself, with the single exception of
//! [`QueueError::VersionConflict`], which storage commits retry internally.

use crate::types::{QueueId, TicketId, TicketStatus};

/// Result type alias for the sequencing core
pub type Result<T> = std::result::Result<T, QueueError>;

/// Errors raised by the queue registry, sequencer, state machine and hub
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueueError {
    #[error("Queue is not accepting joins: {queue_id}")]
    QueueInactive { queue_id: QueueId },

    #[error("Queue is paused: {queue_id}")]
    QueuePaused { queue_id: QueueId },

    #[error("Holder '{holder_id}' already holds active ticket {ticket_id} in queue {queue_id}")]
    DuplicateHolder {
        queue_id: QueueId,
        holder_id: String,
        ticket_id: TicketId,
    },

    #[error("Invalid transition for ticket {ticket_id}: {from} -> {to}")]
    InvalidTransition {
        ticket_id: TicketId,
        from: TicketStatus,
        to: TicketStatus,
    },

    #[error("Ticket {ticket_id} is already {status}")]
    AlreadyTransitioned {
        ticket_id: TicketId,
        status: TicketStatus,
    },

    #[error("Queue not found: {queue_id}")]
    QueueNotFound { queue_id: QueueId },

    #[error("Ticket not found: {ticket_id}")]
    TicketNotFound { ticket_id: TicketId },

    #[error("Invalid queue name: {reason}")]
    InvalidQueueName { reason: String },

    #[error("Version conflict on queue {queue_id}: expected {expected}, found {actual}")]
    VersionConflict {
        queue_id: QueueId,
        expected: u64,
        actual: u64,
    },

    #[error("Storage failure: {message}")]
    StorageFailure { message: String },

    #[error("Sync transport failure: {message}")]
    TransportFailure { message: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },
}

impl QueueError {
    /// True for both queue and ticket lookups that found nothing
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            QueueError::QueueNotFound { .. } | QueueError::TicketNotFound { .. }
        )
    }

    /// Only optimistic-concurrency conflicts are retried internally
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueueError::VersionConflict { .. })
    }

    pub(crate) fn storage(message: impl Into<String>) -> Self {
        QueueError::StorageFailure {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_error_classification() {
        let not_found = QueueError::TicketNotFound {
            ticket_id: Uuid::new_v4(),
        };
        assert!(not_found.is_not_found());
        assert!(!not_found.is_retryable());

        let conflict = QueueError::VersionConflict {
            queue_id: Uuid::new_v4(),
            expected: 3,
            actual: 4,
        };
        assert!(conflict.is_retryable());
        assert!(!conflict.is_not_found());

        assert!(!QueueError::storage("disk on fire").is_retryable());
    }

    #[test]
    fn test_error_messages() {
        let err = QueueError::InvalidTransition {
            ticket_id: Uuid::nil(),
            from: TicketStatus::Completed,
            to: TicketStatus::Called,
        };
        assert!(err.to_string().contains("COMPLETED -> CALLED"));
    }
}
