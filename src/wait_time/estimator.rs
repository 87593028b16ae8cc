//! Smoothed service-time tracking and wait estimates
//!
//! Each queue keeps an exponential moving average of the time between
//! consecutive completions. The average is deliberately non-windowed so a host
//! who speeds up is reflected after a handful of completions.

use crate::error::{QueueError, Result};
use crate::types::{EtaResult, Queue, QueueUpdate};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Configuration for wait estimates
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// EMA smoothing weight given to the newest sample
    pub smoothing_weight: f64,
    /// Completions required before an estimate is reported
    pub min_samples: u64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            smoothing_weight: 0.3,
            min_samples: 10,
        }
    }
}

impl EstimatorConfig {
    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !(self.smoothing_weight > 0.0 && self.smoothing_weight <= 1.0) {
            return Err(QueueError::ConfigurationError {
                message: "smoothing_weight must be in (0, 1]".to_string(),
            });
        }

        if self.min_samples == 0 {
            return Err(QueueError::ConfigurationError {
                message: "min_samples must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

/// EMA-based wait estimator
#[derive(Debug, Clone)]
pub struct EtaEstimator {
    config: EstimatorConfig,
}

impl Default for EtaEstimator {
    fn default() -> Self {
        Self {
            config: EstimatorConfig::default(),
        }
    }
}

impl EtaEstimator {
    pub fn new(config: EstimatorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    /// Fold one service duration into the queue's average and count it
    pub fn apply_completion(&self, queue: &mut Queue, service_seconds: f64) {
        let sample = service_seconds.max(0.0);
        let alpha = self.config.smoothing_weight;
        let previous = queue.avg_service_seconds;

        queue.avg_service_seconds = previous * (1.0 - alpha) + sample * alpha;
        queue.completed_count += 1;

        debug!(
            "Queue {} service average {:.2}s -> {:.2}s after {:.2}s sample (completed: {})",
            queue.id, previous, queue.avg_service_seconds, sample, queue.completed_count
        );
    }

    /// Estimate the wait for `target_position` from the queue's counters
    pub fn estimate(&self, queue: &Queue, target_position: u64) -> EtaResult {
        self.estimate_from(
            queue.completed_count,
            queue.current_position,
            queue.avg_service_seconds,
            target_position,
        )
    }

    /// Same as [`estimate`](Self::estimate), from a pushed queue update
    pub fn estimate_update(&self, update: &QueueUpdate, target_position: u64) -> EtaResult {
        self.estimate_from(
            update.completed_count,
            update.current_position,
            update.avg_service_seconds,
            target_position,
        )
    }

    fn estimate_from(
        &self,
        completed_count: u64,
        current_position: u64,
        avg_service_seconds: f64,
        target_position: u64,
    ) -> EtaResult {
        if completed_count < self.config.min_samples {
            return EtaResult::NotEnoughData;
        }

        if target_position <= current_position {
            return EtaResult::YourTurn;
        }

        let ahead = (target_position - current_position) as f64;
        EtaResult::Seconds(ahead * avg_service_seconds)
    }
}
