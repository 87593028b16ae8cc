//! Client-side synchronization
//!
//! A [`SyncAgent`] follows one ticket's queue over a [`SyncTransport`],
//! refetching the full ticket view after every (re)connect and reconnecting
//! with capped exponential backoff when the push channel drops.

pub mod agent;
pub mod backoff;
pub mod transport;

pub use agent::{ConnectionState, SyncAgent, SyncConfig, SyncSnapshot};
pub use backoff::{BackoffPolicy, ReconnectBackoff};
pub use transport::{LocalTransport, SyncTransport};
