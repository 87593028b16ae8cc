//! Push fan-out of queue state changes to attached observers

pub mod hub;

pub use hub::{BroadcastHub, Observer, ObserverHandle, PublishReport};
