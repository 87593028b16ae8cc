//! Wait time estimation
//!
//! This module keeps each queue's smoothed service duration and turns it into
//! participant-facing estimates.

pub mod estimator;

pub use estimator::{EstimatorConfig, EtaEstimator};
