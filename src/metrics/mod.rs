//! Metrics and monitoring for the waitline service
//!
//! Prometheus collectors for sequencing and fan-out activity, plus the
//! HTTP server exposing health probes and the metrics scrape endpoint.

pub mod collector;
pub mod health;

pub use collector::{
    BroadcastMetrics, MetricsCollector, MetricsTimer, PerformanceMetrics, QueueMetrics,
    ServiceMetrics,
};
pub use health::{HealthEndpoints, HealthServer, HealthServerConfig};
