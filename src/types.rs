//! Common types used throughout the wait line service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for queues
pub type QueueId = Uuid;

/// Unique identifier for tickets (the content of the participant-facing code)
pub type TicketId = Uuid;

/// Opaque identity supplied by the caller for the participant holding a ticket
pub type HolderId = String;

/// Lifecycle status of a ticket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Waiting,
    Called,
    Serving,
    Completed,
    NoShow,
    Cancelled,
}

impl TicketStatus {
    /// All statuses, in lifecycle order
    pub const ALL: [TicketStatus; 6] = [
        TicketStatus::Waiting,
        TicketStatus::Called,
        TicketStatus::Serving,
        TicketStatus::Completed,
        TicketStatus::NoShow,
        TicketStatus::Cancelled,
    ];

    /// Statuses that count as holding a place in line
    pub fn is_active(self) -> bool {
        matches!(
            self,
            TicketStatus::Waiting | TicketStatus::Called | TicketStatus::Serving
        )
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TicketStatus::Waiting => write!(f, "WAITING"),
            TicketStatus::Called => write!(f, "CALLED"),
            TicketStatus::Serving => write!(f, "SERVING"),
            TicketStatus::Completed => write!(f, "COMPLETED"),
            TicketStatus::NoShow => write!(f, "NO_SHOW"),
            TicketStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// A named waiting line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Queue {
    pub id: QueueId,
    pub name: String,
    /// Whether new joins are accepted at all (false once closed)
    pub active: bool,
    /// Joins are temporarily refused while paused
    pub paused: bool,
    /// Position of the ticket most recently completed or skipped
    pub current_position: u64,
    /// Highest position ever assigned; the next ticket gets `last_issued + 1`
    pub last_issued: u64,
    pub completed_count: u64,
    /// Smoothed time between consecutive completions, in seconds
    pub avg_service_seconds: f64,
    pub last_completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Optimistic concurrency version, bumped by every committed write
    pub version: u64,
}

impl Queue {
    pub fn new(id: QueueId, name: String, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            name,
            active: true,
            paused: false,
            current_position: 0,
            last_issued: 0,
            completed_count: 0,
            avg_service_seconds: 0.0,
            last_completed_at: None,
            created_at,
            version: 0,
        }
    }

    pub fn accepts_joins(&self) -> bool {
        self.active && !self.paused
    }

    /// Read-only projection returned by `query_state`
    pub fn state(&self) -> QueueState {
        QueueState {
            queue_id: self.id,
            current_position: self.current_position,
            last_issued: self.last_issued,
            avg_service_seconds: self.avg_service_seconds,
            completed_count: self.completed_count,
            active: self.active,
            paused: self.paused,
        }
    }
}

/// One participant's claim on a position within a queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub queue_id: QueueId,
    pub holder_id: HolderId,
    pub position: u64,
    pub status: TicketStatus,
    pub created_at: DateTime<Utc>,
    pub called_at: Option<DateTime<Utc>>,
    pub serving_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Ticket {
    pub fn new(
        id: TicketId,
        queue_id: QueueId,
        holder_id: HolderId,
        position: u64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            queue_id,
            holder_id,
            position,
            status: TicketStatus::Waiting,
            created_at,
            called_at: None,
            serving_at: None,
            completed_at: None,
        }
    }
}

/// Snapshot of a queue's counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueState {
    pub queue_id: QueueId,
    pub current_position: u64,
    pub last_issued: u64,
    pub avg_service_seconds: f64,
    pub completed_count: u64,
    pub active: bool,
    pub paused: bool,
}

/// Participant-facing wait estimate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "seconds", rename_all = "snake_case")]
pub enum EtaResult {
    /// Too few completions for a meaningful estimate
    NotEnoughData,
    /// The target position has been reached or passed
    YourTurn,
    /// Raw estimated wait in seconds
    Seconds(f64),
}

/// A ticket together with everything needed to render its place in line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketView {
    pub ticket: Ticket,
    pub current_position: u64,
    /// `position - current_position`; negative once the line has moved past
    /// this ticket without serving it
    pub people_ahead: i64,
    pub eta: EtaResult,
    /// Version of the queue record the view was computed from
    pub queue_version: u64,
}

impl TicketView {
    /// A still-waiting ticket the line has already moved beyond
    pub fn is_skipped(&self) -> bool {
        self.ticket.status == TicketStatus::Waiting && self.people_ahead < 0
    }
}

/// Event pushed to every observer of a queue when its state changes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "queue_update")]
pub struct QueueUpdate {
    pub queue_id: QueueId,
    pub current_position: u64,
    pub avg_service_seconds: f64,
    pub last_issued: u64,
    pub completed_count: u64,
    pub active: bool,
    /// Version of the committed queue record this event describes
    pub version: u64,
    pub timestamp: DateTime<Utc>,
}

impl QueueUpdate {
    pub fn from_queue(queue: &Queue, timestamp: DateTime<Utc>) -> Self {
        Self {
            queue_id: queue.id,
            current_position: queue.current_position,
            avg_service_seconds: queue.avg_service_seconds,
            last_issued: queue.last_issued,
            completed_count: queue.completed_count,
            active: queue.active,
            version: queue.version,
            timestamp,
        }
    }
}
