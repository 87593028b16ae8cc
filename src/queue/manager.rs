//! Queue manager
//!
//! The entry point used by request handlers. It ties the registry, sequencer,
//! state machine, estimator and broadcast hub together and keeps service
//! statistics and metrics.

use crate::broadcast::{BroadcastHub, Observer, ObserverHandle};
use crate::error::{QueueError, Result};
use crate::metrics::MetricsCollector;
use crate::queue::registry::{QueueRegistry, DEFAULT_MAX_NAME_LENGTH};
use crate::queue::sequencer::{TicketSequencer, DEFAULT_MAX_COMMIT_ATTEMPTS};
use crate::queue::status::StatusMachine;
use crate::queue::publish_update;
use crate::storage::{InMemoryQueueStore, QueueStore};
use crate::types::{
    EtaResult, HolderId, Queue, QueueId, QueueState, Ticket, TicketId, TicketStatus, TicketView,
};
use crate::utils::people_ahead;
use crate::wait_time::{EstimatorConfig, EtaEstimator};
use std::sync::{Arc, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Tunables for the queue manager
#[derive(Debug, Clone)]
pub struct QueueManagerConfig {
    pub max_name_length: usize,
    pub max_commit_attempts: u32,
    pub observer_buffer: usize,
    pub estimator: EstimatorConfig,
}

impl Default for QueueManagerConfig {
    fn default() -> Self {
        Self {
            max_name_length: DEFAULT_MAX_NAME_LENGTH,
            max_commit_attempts: DEFAULT_MAX_COMMIT_ATTEMPTS,
            observer_buffer: 64,
            estimator: EstimatorConfig::default(),
        }
    }
}

/// Statistics about queue manager operations
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct QueueManagerStats {
    /// Total number of queues created
    pub queues_created: u64,
    /// Total number of tickets issued
    pub tickets_issued: u64,
    /// Total joins refused for a holder that already had a ticket
    pub duplicate_joins: u64,
    /// Total committed status transitions
    pub transitions: u64,
    /// Total events published
    pub events_published: u64,
    /// Current number of queues accepting joins
    pub open_queues: usize,
    /// Current number of waiting, called or serving tickets
    pub active_tickets: usize,
    /// Current number of attached observers
    pub attached_observers: usize,
}

/// The main queue manager
#[derive(Clone)]
pub struct QueueManager {
    registry: Arc<QueueRegistry>,
    sequencer: Arc<TicketSequencer>,
    status_machine: Arc<StatusMachine>,
    estimator: EtaEstimator,
    hub: Arc<BroadcastHub>,
    max_commit_attempts: u32,
    /// Manager statistics
    stats: Arc<RwLock<QueueManagerStats>>,
    /// Metrics collector for recording performance data
    metrics_collector: Arc<MetricsCollector>,
}

impl QueueManager {
    /// Create a queue manager over an in-memory store with default settings
    pub fn in_memory() -> Result<Self> {
        let metrics_collector =
            Arc::new(
                MetricsCollector::new().map_err(|e| QueueError::ConfigurationError {
                    message: format!("Failed to create metrics collector: {}", e),
                })?,
            );
        Self::with_metrics(
            Arc::new(InMemoryQueueStore::new()),
            QueueManagerConfig::default(),
            metrics_collector,
        )
    }

    /// Create a queue manager with explicit store, configuration and metrics
    pub fn with_metrics(
        store: Arc<dyn QueueStore>,
        config: QueueManagerConfig,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Result<Self> {
        let estimator = EtaEstimator::new(config.estimator.clone())?;
        if config.max_commit_attempts == 0 {
            return Err(QueueError::ConfigurationError {
                message: "max_commit_attempts must be greater than 0".to_string(),
            });
        }

        let registry = Arc::new(QueueRegistry::with_max_name_length(
            store,
            config.max_name_length,
        ));
        let hub = Arc::new(BroadcastHub::new(config.observer_buffer));

        Ok(Self {
            sequencer: Arc::new(TicketSequencer::with_max_attempts(
                registry.clone(),
                hub.clone(),
                config.max_commit_attempts,
            )),
            status_machine: Arc::new(StatusMachine::with_max_attempts(
                registry.clone(),
                hub.clone(),
                estimator.clone(),
                config.max_commit_attempts,
            )),
            registry,
            estimator,
            hub,
            max_commit_attempts: config.max_commit_attempts,
            stats: Arc::new(RwLock::new(QueueManagerStats::default())),
            metrics_collector,
        })
    }

    pub fn hub(&self) -> Arc<BroadcastHub> {
        self.hub.clone()
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics_collector.clone()
    }

    fn bump_stats(&self, f: impl FnOnce(&mut QueueManagerStats)) -> Result<()> {
        let mut stats = self
            .stats
            .write()
            .map_err(|_| QueueError::storage("Failed to acquire stats lock"))?;
        f(&mut stats);
        Ok(())
    }

    fn record_published(&self, delivered: usize, detached: usize) -> Result<()> {
        self.metrics_collector.record_publish(delivered, detached);
        self.bump_stats(|stats| stats.events_published += 1)
    }

    fn observe_failure(&self, err: &QueueError) {
        match err {
            QueueError::DuplicateHolder { .. } => {
                self.metrics_collector.record_join_rejected("duplicate_holder");
                if let Err(e) = self.bump_stats(|stats| stats.duplicate_joins += 1) {
                    warn!("Failed to count duplicate join: {}", e);
                }
            }
            QueueError::QueueInactive { .. } => {
                self.metrics_collector.record_join_rejected("inactive")
            }
            QueueError::QueuePaused { .. } => self.metrics_collector.record_join_rejected("paused"),
            QueueError::StorageFailure { .. } => self.metrics_collector.record_storage_failure(),
            _ => {}
        }
    }

    /// Create a new queue
    pub fn create_queue(&self, name: &str) -> Result<Queue> {
        let queue = self.registry.create_queue(name)?;
        self.metrics_collector.record_queue_created();
        self.bump_stats(|stats| stats.queues_created += 1)?;
        Ok(queue)
    }

    /// Issue the next ticket of a queue to a holder
    pub async fn issue_ticket(
        &self,
        queue_id: QueueId,
        holder_id: impl Into<HolderId>,
    ) -> Result<Ticket> {
        let start_time = Instant::now();
        let holder_id = holder_id.into();

        let issued = match self.sequencer.issue(queue_id, holder_id).await {
            Ok(issued) => issued,
            Err(e) => {
                debug!("Join refused for queue {}: {}", queue_id, e);
                self.observe_failure(&e);
                return Err(e);
            }
        };

        self.metrics_collector
            .record_ticket_issued(start_time.elapsed());
        self.bump_stats(|stats| stats.tickets_issued += 1)?;
        self.record_published(issued.publish.delivered, issued.publish.detached)?;

        Ok(issued.ticket)
    }

    /// Move a ticket to `target`
    pub async fn transition(&self, ticket_id: TicketId, target: TicketStatus) -> Result<Ticket> {
        let start_time = Instant::now();

        let done = match self.status_machine.transition(ticket_id, target).await {
            Ok(done) => done,
            Err(e) => {
                debug!("Transition of ticket {} to {} refused: {}", ticket_id, target, e);
                self.observe_failure(&e);
                return Err(e);
            }
        };

        self.metrics_collector
            .record_transition(target, start_time.elapsed());
        self.bump_stats(|stats| stats.transitions += 1)?;
        self.record_published(done.publish.delivered, done.publish.detached)?;

        Ok(done.ticket)
    }

    pub fn query_state(&self, queue_id: QueueId) -> Result<QueueState> {
        Ok(self.registry.queue(queue_id)?.state())
    }

    pub fn queue(&self, queue_id: QueueId) -> Result<Queue> {
        self.registry.queue(queue_id)
    }

    pub fn list_queues(&self) -> Result<Vec<Queue>> {
        self.registry.list_queues()
    }

    pub fn query_ticket(&self, ticket_id: TicketId) -> Result<Ticket> {
        self.registry
            .store()
            .load_ticket(ticket_id)?
            .ok_or(QueueError::TicketNotFound { ticket_id })
    }

    /// A ticket with its place in line and wait estimate
    pub fn ticket_view(&self, ticket_id: TicketId) -> Result<TicketView> {
        let ticket = self.query_ticket(ticket_id)?;
        let queue = self.registry.queue(ticket.queue_id)?;

        Ok(TicketView {
            current_position: queue.current_position,
            people_ahead: people_ahead(ticket.position, queue.current_position),
            eta: self.estimator.estimate(&queue, ticket.position),
            queue_version: queue.version,
            ticket,
        })
    }

    /// Tickets of a queue ordered by position
    pub fn queue_tickets(
        &self,
        queue_id: QueueId,
        status: Option<TicketStatus>,
    ) -> Result<Vec<Ticket>> {
        self.registry.queue(queue_id)?;
        self.registry.store().queue_tickets(queue_id, status)
    }

    pub fn estimate(&self, queue_id: QueueId, target_position: u64) -> Result<EtaResult> {
        let queue = self.registry.queue(queue_id)?;
        Ok(self.estimator.estimate(&queue, target_position))
    }

    /// Fold an externally measured service duration into a queue's average
    pub async fn on_completion(&self, queue_id: QueueId, service_seconds: f64) -> Result<QueueState> {
        self.change_queue(queue_id, "on_completion", |queue| {
            self.estimator.apply_completion(queue, service_seconds);
            Ok(())
        })
        .await
    }

    /// Stop accepting joins permanently
    pub async fn close_queue(&self, queue_id: QueueId) -> Result<QueueState> {
        let state = self
            .change_queue(queue_id, "close", |queue| {
                queue.active = false;
                Ok(())
            })
            .await?;
        info!("Closed queue {}", queue_id);
        Ok(state)
    }

    /// Temporarily refuse joins
    pub async fn pause_queue(&self, queue_id: QueueId) -> Result<QueueState> {
        self.set_paused(queue_id, true).await
    }

    pub async fn resume_queue(&self, queue_id: QueueId) -> Result<QueueState> {
        self.set_paused(queue_id, false).await
    }

    async fn set_paused(&self, queue_id: QueueId, paused: bool) -> Result<QueueState> {
        let state = self
            .change_queue(queue_id, if paused { "pause" } else { "resume" }, |queue| {
                if !queue.active {
                    return Err(QueueError::QueueInactive { queue_id });
                }
                queue.paused = paused;
                Ok(())
            })
            .await?;
        info!("Queue {} paused: {}", queue_id, paused);
        Ok(state)
    }

    /// Run a queue-only change inside the queue's critical section and publish it
    async fn change_queue(
        &self,
        queue_id: QueueId,
        operation: &str,
        change: impl FnMut(&mut Queue) -> Result<()>,
    ) -> Result<QueueState> {
        let start_time = Instant::now();
        let guard = self.registry.lock_queue(queue_id).await?;

        let queue = self
            .registry
            .update_queue(queue_id, self.max_commit_attempts, change)
            .inspect_err(|e| self.observe_failure(e))?;

        let report = publish_update(&self.hub, &queue);
        drop(guard);

        self.metrics_collector
            .record_operation(operation, start_time.elapsed());
        self.record_published(report.delivered, report.detached)?;
        Ok(queue.state())
    }

    /// Attach an observer to an existing queue
    pub fn attach(&self, queue_id: QueueId) -> Result<Observer> {
        self.registry.queue(queue_id)?;
        self.hub.attach(queue_id)
    }

    pub fn detach(&self, handle: ObserverHandle) -> Result<bool> {
        self.hub.detach(handle)
    }

    /// Get current statistics
    pub fn stats(&self) -> Result<QueueManagerStats> {
        let mut stats = self
            .stats
            .read()
            .map_err(|_| QueueError::storage("Failed to acquire stats lock"))?
            .clone();

        let queues = self.registry.list_queues()?;
        stats.open_queues = queues.iter().filter(|q| q.accepts_joins()).count();
        stats.active_tickets = 0;
        for queue in &queues {
            stats.active_tickets += self
                .registry
                .store()
                .queue_tickets(queue.id, None)?
                .iter()
                .filter(|t| t.status.is_active())
                .count();
        }
        stats.attached_observers = self.hub.total_observers();

        Ok(stats)
    }
}
