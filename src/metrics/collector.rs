//! Metrics collection using Prometheus
//!
//! This module provides metrics collection for the waitline service using
//! Prometheus metrics.

use crate::queue::manager::QueueManagerStats;
use crate::types::TicketStatus;
use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the waitline service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Queue and ticket metrics
    queue_metrics: QueueMetrics,

    /// Observer fan-out metrics
    broadcast_metrics: BroadcastMetrics,

    /// Performance metrics
    performance_metrics: PerformanceMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,
}

/// Queue and ticket metrics
#[derive(Clone)]
pub struct QueueMetrics {
    /// Total queues created
    pub queues_created_total: IntCounter,

    /// Queues currently accepting joins
    pub open_queues: IntGauge,

    /// Total tickets issued
    pub tickets_issued_total: IntCounter,

    /// Joins refused, by reason
    pub join_rejections_total: IntCounterVec,

    /// Ticket transitions, by target status
    pub transitions_total: IntCounterVec,

    /// Tickets currently waiting, called or serving
    pub active_tickets: IntGauge,

    /// Operations that failed after exhausting commit retries
    pub storage_failures_total: IntCounter,
}

/// Observer fan-out metrics
#[derive(Clone)]
pub struct BroadcastMetrics {
    /// Total publish calls
    pub events_published_total: IntCounter,

    /// Total events handed to observer channels
    pub deliveries_total: IntCounter,

    /// Observers detached because they were full or gone
    pub observers_detached_total: IntCounter,

    /// Observers currently attached
    pub active_observers: IntGauge,
}

/// Performance metrics
#[derive(Clone)]
pub struct PerformanceMetrics {
    /// Time to issue a ticket, including waiting for the queue lock
    pub issue_duration: Histogram,

    /// Queue operation durations
    pub operation_duration: HistogramVec,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let queue_metrics = QueueMetrics::new(&registry)?;
        let broadcast_metrics = BroadcastMetrics::new(&registry)?;
        let performance_metrics = PerformanceMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            queue_metrics,
            broadcast_metrics,
            performance_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    pub fn queue(&self) -> &QueueMetrics {
        &self.queue_metrics
    }

    pub fn broadcast(&self) -> &BroadcastMetrics {
        &self.broadcast_metrics
    }

    pub fn performance(&self) -> &PerformanceMetrics {
        &self.performance_metrics
    }

    /// Refresh gauges from queue manager stats
    pub fn update_from_queue_stats(&self, stats: &QueueManagerStats) {
        self.queue_metrics.open_queues.set(stats.open_queues as i64);
        self.queue_metrics
            .active_tickets
            .set(stats.active_tickets as i64);
        self.broadcast_metrics
            .active_observers
            .set(stats.attached_observers as i64);
    }

    pub fn record_queue_created(&self) {
        self.queue_metrics.queues_created_total.inc();
    }

    /// Record a ticket being issued
    pub fn record_ticket_issued(&self, duration: Duration) {
        self.queue_metrics.tickets_issued_total.inc();
        self.performance_metrics
            .issue_duration
            .observe(duration.as_secs_f64());
    }

    /// Record a refused join (`inactive`, `paused`, `duplicate_holder`)
    pub fn record_join_rejected(&self, reason: &str) {
        self.queue_metrics
            .join_rejections_total
            .with_label_values(&[reason])
            .inc();
    }

    pub fn record_transition(&self, target: TicketStatus, duration: Duration) {
        let status = target.to_string().to_lowercase();
        self.queue_metrics
            .transitions_total
            .with_label_values(&[status.as_str()])
            .inc();
        self.record_operation("transition", duration);
    }

    pub fn record_storage_failure(&self) {
        self.queue_metrics.storage_failures_total.inc();
    }

    /// Record the outcome of one publish
    pub fn record_publish(&self, delivered: usize, detached: usize) {
        self.broadcast_metrics.events_published_total.inc();
        self.broadcast_metrics
            .deliveries_total
            .inc_by(delivered as u64);
        self.broadcast_metrics
            .observers_detached_total
            .inc_by(detached as u64);
    }

    /// Record queue operation duration
    pub fn record_operation(&self, operation: &str, duration: Duration) {
        self.performance_metrics
            .operation_duration
            .with_label_values(&[operation])
            .observe(duration.as_secs_f64());
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds = IntGauge::new("waitline_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let health_status = IntGauge::new(
            "waitline_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("waitline_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            health_status,
            component_health,
        })
    }
}

impl QueueMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let queues_created_total =
            IntCounter::new("waitline_queues_created_total", "Total queues created")?;
        registry.register(Box::new(queues_created_total.clone()))?;

        let open_queues = IntGauge::new("waitline_open_queues", "Queues accepting joins")?;
        registry.register(Box::new(open_queues.clone()))?;

        let tickets_issued_total =
            IntCounter::new("waitline_tickets_issued_total", "Total tickets issued")?;
        registry.register(Box::new(tickets_issued_total.clone()))?;

        let join_rejections_total = IntCounterVec::new(
            Opts::new("waitline_join_rejections_total", "Joins refused"),
            &["reason"],
        )?;
        registry.register(Box::new(join_rejections_total.clone()))?;

        let transitions_total = IntCounterVec::new(
            Opts::new("waitline_transitions_total", "Ticket status transitions"),
            &["status"],
        )?;
        registry.register(Box::new(transitions_total.clone()))?;

        let active_tickets = IntGauge::new(
            "waitline_active_tickets",
            "Tickets waiting, called or being served",
        )?;
        registry.register(Box::new(active_tickets.clone()))?;

        let storage_failures_total = IntCounter::new(
            "waitline_storage_failures_total",
            "Operations failed with a storage failure",
        )?;
        registry.register(Box::new(storage_failures_total.clone()))?;

        Ok(Self {
            queues_created_total,
            open_queues,
            tickets_issued_total,
            join_rejections_total,
            transitions_total,
            active_tickets,
            storage_failures_total,
        })
    }
}

impl BroadcastMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let events_published_total =
            IntCounter::new("waitline_events_published_total", "Total queue events published")?;
        registry.register(Box::new(events_published_total.clone()))?;

        let deliveries_total = IntCounter::new(
            "waitline_event_deliveries_total",
            "Total events delivered to observers",
        )?;
        registry.register(Box::new(deliveries_total.clone()))?;

        let observers_detached_total = IntCounter::new(
            "waitline_observers_detached_total",
            "Observers detached during publish",
        )?;
        registry.register(Box::new(observers_detached_total.clone()))?;

        let active_observers =
            IntGauge::new("waitline_active_observers", "Observers currently attached")?;
        registry.register(Box::new(active_observers.clone()))?;

        Ok(Self {
            events_published_total,
            deliveries_total,
            observers_detached_total,
            active_observers,
        })
    }
}

impl PerformanceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let issue_duration = Histogram::with_opts(
            HistogramOpts::new("waitline_issue_duration_seconds", "Ticket issue time")
                .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5]),
        )?;
        registry.register(Box::new(issue_duration.clone()))?;

        let operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "waitline_operation_duration_seconds",
                "Queue operation duration",
            )
            .buckets(vec![0.0001, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
            &["operation"],
        )?;
        registry.register(Box::new(operation_duration.clone()))?;

        Ok(Self {
            issue_duration,
            operation_duration,
        })
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new().expect("Failed to create default metrics collector")
    }
}
