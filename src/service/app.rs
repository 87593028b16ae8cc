//! Main application state and service coordination
//!
//! This module contains the production AppState that owns the queue manager,
//! the health server and the background maintenance tasks.

use crate::config::AppConfig;
use crate::metrics::health::HealthServerConfig;
use crate::metrics::{HealthServer, MetricsCollector};
use crate::queue::{QueueManager, QueueManagerStats};
use crate::storage::InMemoryQueueStore;
use anyhow::Result;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Main application state containing all service components
pub struct AppState {
    /// Application configuration
    config: AppConfig,

    /// Core sequencing components
    queue_manager: QueueManager,

    /// Metrics collector shared with the queue manager
    metrics_collector: Arc<MetricsCollector>,

    /// Health server, present while the service is started
    health_server: Mutex<Option<Arc<HealthServer>>>,

    /// Background task handles
    background_tasks: Mutex<Vec<JoinHandle<()>>>,

    /// Service status
    is_running: Arc<RwLock<bool>>,

    started_at: Instant,
}

impl AppState {
    /// Initialize the application with all dependencies
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing {} service", config.service.name);

        let metrics_collector =
            Arc::new(
                MetricsCollector::new().map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to create metrics collector: {}", e),
                })?,
            );

        let queue_manager = QueueManager::with_metrics(
            Arc::new(InMemoryQueueStore::new()),
            config.manager_config(),
            metrics_collector.clone(),
        )
        .map_err(|e| ServiceError::Configuration {
            message: format!("Failed to initialize queue manager: {}", e),
        })?;

        Ok(Self {
            config,
            queue_manager,
            metrics_collector,
            health_server: Mutex::new(None),
            background_tasks: Mutex::new(Vec::new()),
            is_running: Arc::new(RwLock::new(false)),
            started_at: Instant::now(),
        })
    }

    /// Start the health server and background tasks
    pub async fn start(self: &Arc<Self>) -> Result<(), ServiceError> {
        info!("Starting {} service", self.config.service.name);

        // Mark as running
        *self.is_running.write().await = true;

        self.start_health_server().await?;
        self.start_background_tasks().await;

        info!("✅ {} service started successfully", self.config.service.name);
        Ok(())
    }

    /// Perform graceful shutdown
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of {}", self.config.service.name);

        // Mark as not running
        *self.is_running.write().await = false;

        self.stop_background_tasks().await;

        // Dropping the server also releases its reference to this state
        if let Some(server) = self.health_server.lock().await.take() {
            info!("Stopping health server...");
            if let Err(e) = server.stop().await {
                warn!("Failed to stop health server: {}", e);
            } else {
                info!("✅ Health server stopped");
            }
        }

        let final_stats = self
            .queue_manager
            .stats()
            .map_err(|e| ServiceError::BackgroundTask {
                message: format!("Failed to get final stats: {}", e),
            })?;

        info!("Final service statistics: {:?}", final_stats);
        info!("✅ {} shutdown completed", self.config.service.name);

        Ok(())
    }

    /// Get service configuration
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Check if service is running
    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    /// Get the queue manager for operations
    pub fn queue_manager(&self) -> QueueManager {
        self.queue_manager.clone()
    }

    pub fn metrics_collector(&self) -> Arc<MetricsCollector> {
        self.metrics_collector.clone()
    }

    pub fn stats(&self) -> crate::error::Result<QueueManagerStats> {
        self.queue_manager.stats()
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    async fn start_health_server(self: &Arc<Self>) -> Result<(), ServiceError> {
        let health_config = HealthServerConfig {
            port: self.config.service.health_port,
            host: "0.0.0.0".to_string(),
        };
        let server = Arc::new(
            HealthServer::new(health_config, self.metrics_collector.clone())
                .with_app_state(self.clone()),
        );

        let handle = {
            let server = server.clone();
            tokio::spawn(async move {
                if let Err(e) = server.start().await {
                    error!("Health server failed: {}", e);
                } else {
                    info!("Health server task completed");
                }
            })
        };

        *self.health_server.lock().await = Some(server);
        self.background_tasks.lock().await.push(handle);

        info!(
            "✅ Health endpoints started on port {}",
            self.config.service.health_port
        );
        Ok(())
    }

    /// Start background maintenance tasks
    async fn start_background_tasks(&self) {
        info!(
            "Starting stats refresh task ({}s interval)...",
            self.config.metrics_interval().as_secs()
        );

        let stats_task = {
            let queue_manager = self.queue_manager.clone();
            let metrics_collector = self.metrics_collector.clone();
            let is_running = self.is_running.clone();
            let refresh_interval = self.config.metrics_interval();
            let started_at = self.started_at;

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(refresh_interval);
                info!("Stats refresh task started");

                while *is_running.read().await {
                    interval.tick().await;

                    metrics_collector
                        .service()
                        .uptime_seconds
                        .set(started_at.elapsed().as_secs() as i64);

                    match queue_manager.stats() {
                        Ok(stats) => {
                            debug!(
                                "Updating metrics - open queues: {}, active tickets: {}, observers: {}",
                                stats.open_queues, stats.active_tickets, stats.attached_observers
                            );
                            metrics_collector.update_from_queue_stats(&stats);
                            metrics_collector.update_component_health("queue_manager", true);
                            metrics_collector.update_health_status(2);
                        }
                        Err(e) => {
                            warn!("Failed to get queue stats for metrics update: {}", e);
                            metrics_collector.update_component_health("queue_manager", false);
                            metrics_collector.update_health_status(1);
                        }
                    }
                }

                info!("Stats refresh task stopped");
            })
        };

        self.background_tasks.lock().await.push(stats_task);
    }

    /// Stop all background tasks
    async fn stop_background_tasks(&self) {
        let tasks: Vec<_> = self.background_tasks.lock().await.drain(..).collect();
        if tasks.is_empty() {
            info!("No background tasks to stop");
            return;
        }

        info!("Stopping {} background tasks...", tasks.len());
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            // Aborted tasks resolve with a cancellation error
            let _ = task.await;
        }
        info!("✅ Background tasks stopped");
    }
}
