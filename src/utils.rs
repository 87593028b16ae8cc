//! Utility functions for the wait line service

use crate::types::{EtaResult, QueueId, TicketId};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Generate a new unique queue ID
pub fn generate_queue_id() -> QueueId {
    Uuid::new_v4()
}

/// Generate a new unique ticket ID
pub fn generate_ticket_id() -> TicketId {
    Uuid::new_v4()
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Signed distance between a ticket and the serving pointer
pub fn people_ahead(position: u64, current_position: u64) -> i64 {
    position as i64 - current_position as i64
}

/// Seconds elapsed between two instants, never negative
pub fn seconds_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    let millis = later.signed_duration_since(earlier).num_milliseconds();
    (millis.max(0) as f64) / 1000.0
}

/// Round a raw wait in seconds up to whole minutes
pub fn eta_minutes(seconds: f64) -> u64 {
    if seconds <= 0.0 {
        return 0;
    }
    (seconds / 60.0).ceil() as u64
}

/// Human-readable rendering of an estimate
pub fn describe_eta(eta: &EtaResult) -> String {
    match eta {
        EtaResult::NotEnoughData => "Calculating...".to_string(),
        EtaResult::YourTurn => "Your turn!".to_string(),
        EtaResult::Seconds(seconds) => {
            let minutes = eta_minutes(*seconds);
            match minutes {
                0 => "Less than 1 minute".to_string(),
                1 => "About 1 minute".to_string(),
                m if m < 60 => format!("About {} minutes", m),
                m => {
                    let hours = m / 60;
                    let rest = m % 60;
                    match (hours, rest) {
                        (1, 0) => "About 1 hour".to_string(),
                        (h, 0) => format!("About {} hours", h),
                        (h, r) => format!("About {}h {}m", h, r),
                    }
                }
            }
        }
    }
}
