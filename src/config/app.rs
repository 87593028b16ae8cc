//! Main application configuration
//!
//! This module defines the configuration structures for the waitline service,
//! including environment variable and TOML file loading and validation.

use crate::queue::QueueManagerConfig;
use crate::sync::{BackoffPolicy, SyncConfig};
use crate::wait_time::EstimatorConfig;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceSettings,
    pub queue: QueueSettings,
    pub estimator: EstimatorConfig,
    pub broadcast: BroadcastSettings,
    pub sync: SyncSettings,
}

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Service name for logging and metrics
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Port for health check endpoint
    pub health_port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,
    /// How often gauges are refreshed from manager stats
    pub metrics_interval_seconds: u64,
}

/// Queue and sequencing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Longest accepted queue name after trimming
    pub max_name_length: usize,
    /// Commit attempts before a version conflict becomes a storage failure
    pub max_commit_attempts: u32,
}

/// Observer fan-out settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastSettings {
    /// Events an observer may have pending before it is detached
    pub observer_buffer: usize,
}

/// Client reconnect settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub reconnect_base_ms: u64,
    pub reconnect_ceiling_ms: u64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "waitline".to_string(),
            log_level: "info".to_string(),
            health_port: 8080,
            shutdown_timeout_seconds: 30,
            metrics_interval_seconds: 15,
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_name_length: 100,
            max_commit_attempts: 5,
        }
    }
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            observer_buffer: 64,
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            reconnect_base_ms: 1_000,
            reconnect_ceiling_ms: 30_000,
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("Invalid {} value: {}", name, value)),
        Err(_) => Ok(None),
    }
}

impl AppConfig {
    /// Load configuration from environment variables with fallback to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration from a TOML file, then apply environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        // Validated only once overrides are in, so env can correct a file value
        let mut config = Self::parse_toml(&contents)
            .with_context(|| format!("Failed to load config file {}", path.display()))?;
        config.apply_env()?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Parse configuration from TOML; missing keys take their defaults
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config = Self::parse_toml(contents)?;
        validate_config(&config)?;
        Ok(config)
    }

    fn parse_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Invalid TOML configuration")
    }

    fn apply_env(&mut self) -> Result<()> {
        // Service settings
        if let Ok(name) = env::var("SERVICE_NAME") {
            self.service.name = name;
        }
        if let Ok(log_level) = env::var("LOG_LEVEL") {
            self.service.log_level = log_level;
        }
        if let Some(port) = env_parse("HEALTH_PORT")? {
            self.service.health_port = port;
        }
        if let Some(timeout) = env_parse("SHUTDOWN_TIMEOUT_SECONDS")? {
            self.service.shutdown_timeout_seconds = timeout;
        }
        if let Some(interval) = env_parse("METRICS_INTERVAL_SECONDS")? {
            self.service.metrics_interval_seconds = interval;
        }

        // Queue settings
        if let Some(length) = env_parse("MAX_QUEUE_NAME_LENGTH")? {
            self.queue.max_name_length = length;
        }
        if let Some(attempts) = env_parse("MAX_COMMIT_ATTEMPTS")? {
            self.queue.max_commit_attempts = attempts;
        }

        // Estimator settings
        if let Some(weight) = env_parse("ETA_SMOOTHING_WEIGHT")? {
            self.estimator.smoothing_weight = weight;
        }
        if let Some(samples) = env_parse("ETA_MIN_SAMPLES")? {
            self.estimator.min_samples = samples;
        }

        // Fan-out and reconnect settings
        if let Some(buffer) = env_parse("OBSERVER_BUFFER")? {
            self.broadcast.observer_buffer = buffer;
        }
        if let Some(base) = env_parse("RECONNECT_BASE_MS")? {
            self.sync.reconnect_base_ms = base;
        }
        if let Some(ceiling) = env_parse("RECONNECT_CEILING_MS")? {
            self.sync.reconnect_ceiling_ms = ceiling;
        }

        Ok(())
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.service.shutdown_timeout_seconds)
    }

    /// Get metrics refresh interval as Duration
    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.service.metrics_interval_seconds)
    }

    /// Settings for the queue manager
    pub fn manager_config(&self) -> QueueManagerConfig {
        QueueManagerConfig {
            max_name_length: self.queue.max_name_length,
            max_commit_attempts: self.queue.max_commit_attempts,
            observer_buffer: self.broadcast.observer_buffer,
            estimator: self.estimator.clone(),
        }
    }

    /// Settings for client sync agents
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            backoff: BackoffPolicy::new(
                Duration::from_millis(self.sync.reconnect_base_ms),
                Duration::from_millis(self.sync.reconnect_ceiling_ms),
            ),
            estimator: self.estimator.clone(),
        }
    }
}

/// Validate configuration values
pub fn validate_config(config: &AppConfig) -> Result<()> {
    // Validate log level
    match config.service.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => return Err(anyhow!("Invalid log level: {}", config.service.log_level)),
    }

    // Validate ports
    if config.service.health_port == 0 {
        return Err(anyhow!("Health port cannot be 0"));
    }

    // Validate timeouts
    if config.service.shutdown_timeout_seconds == 0 {
        return Err(anyhow!("Shutdown timeout must be greater than 0"));
    }
    if config.service.metrics_interval_seconds == 0 {
        return Err(anyhow!("Metrics interval must be greater than 0"));
    }

    // Validate queue settings
    if config.queue.max_name_length == 0 {
        return Err(anyhow!("Max queue name length must be greater than 0"));
    }
    if config.queue.max_commit_attempts == 0 {
        return Err(anyhow!("Max commit attempts must be greater than 0"));
    }

    config
        .estimator
        .validate()
        .map_err(|e| anyhow!("Invalid estimator settings: {}", e))?;

    if config.broadcast.observer_buffer == 0 {
        return Err(anyhow!("Observer buffer must be greater than 0"));
    }

    // Validate reconnect settings
    if config.sync.reconnect_base_ms == 0 {
        return Err(anyhow!("Reconnect base delay must be greater than 0"));
    }
    if config.sync.reconnect_ceiling_ms < config.sync.reconnect_base_ms {
        return Err(anyhow!(
            "Reconnect ceiling must not be below the base delay"
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(validate_config(&config).is_ok());
        assert_eq!(config.estimator.smoothing_weight, 0.3);
        assert_eq!(config.estimator.min_samples, 10);
        assert_eq!(config.sync_config().backoff, BackoffPolicy::default());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            [service]
            health_port = 9191

            [sync]
            reconnect_base_ms = 250
            reconnect_ceiling_ms = 4000
            "#,
        )
        .unwrap();

        assert_eq!(config.service.health_port, 9191);
        assert_eq!(config.service.name, "waitline");
        assert_eq!(config.queue.max_commit_attempts, 5);
        assert_eq!(
            config.sync_config().backoff.ceiling,
            Duration::from_millis(4000)
        );
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(AppConfig::from_toml_str("[service]\nlog_level = \"loud\"").is_err());
        assert!(AppConfig::from_toml_str("[estimator]\nsmoothing_weight = 1.5").is_err());
        assert!(AppConfig::from_toml_str(
            "[sync]\nreconnect_base_ms = 500\nreconnect_ceiling_ms = 100"
        )
        .is_err());
        assert!(AppConfig::from_toml_str("[broadcast]\nobserver_buffer = 0").is_err());
    }

    #[test]
    fn test_env_override_corrects_file_value() {
        let path = std::env::temp_dir().join(format!("waitline-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "[broadcast]\nobserver_buffer = 0\n").unwrap();

        // Only this test touches OBSERVER_BUFFER
        env::set_var("OBSERVER_BUFFER", "16");
        let loaded = AppConfig::from_file(&path);
        env::remove_var("OBSERVER_BUFFER");
        let rejected = AppConfig::from_file(&path);
        std::fs::remove_file(&path).unwrap();

        assert_eq!(loaded.unwrap().broadcast.observer_buffer, 16);
        assert!(rejected.is_err());
    }

    #[test]
    fn test_manager_config_mapping() {
        let mut config = AppConfig::default();
        config.queue.max_name_length = 40;
        config.broadcast.observer_buffer = 8;

        let manager = config.manager_config();
        assert_eq!(manager.max_name_length, 40);
        assert_eq!(manager.observer_buffer, 8);
    }
}
