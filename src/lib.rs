//! Waitline - ticket sequencing and real-time queue sync
//!
//! This crate issues gap-free ticket positions per queue, drives tickets
//! through their status lifecycle, estimates waits from observed service
//! durations and keeps client views current over a push channel.

pub mod broadcast;
pub mod config;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod service;
pub mod storage;
pub mod sync;
pub mod types;
pub mod utils;
pub mod wait_time;

// Re-export commonly used types and traits
pub use error::{QueueError, Result};
pub use types::*;

// Re-export key components
pub use broadcast::{BroadcastHub, Observer, ObserverHandle};
pub use queue::{QueueManager, QueueManagerConfig};
pub use storage::{InMemoryQueueStore, QueueStore};
pub use sync::{SyncAgent, SyncConfig, SyncTransport};
pub use wait_time::{EstimatorConfig, EtaEstimator};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
