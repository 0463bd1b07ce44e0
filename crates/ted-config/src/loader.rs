//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::{info, warn};

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "ted.toml",
    "./config/config.toml",
    "./config/ted.toml",
    "/etc/ted/config.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides,
    /// then validate the result.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        self.apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
            warn!(?path, "Configured config file does not exist, searching defaults");
        }

        if let Ok(path) = env::var("TED_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }

    fn apply_env_overrides(&self, config: &mut AppConfig) -> Result<(), ConfigError> {
        if let Ok(val) = env::var("TED_MODE") {
            config.mode = val.parse()?;
        }

        // Redis
        if let Ok(val) = env::var("TED_REDIS_URL") {
            config.redis.url = val;
        }
        if let Ok(val) = env::var("TED_REDIS_NAMESPACE") {
            config.redis.namespace = val;
        }

        // Staging
        if let Ok(val) = env::var("TED_STAGING_BACKEND") {
            config.staging.backend = val.parse()?;
        }
        if let Ok(val) = env::var("TED_STAGING_QUEUE") {
            config.staging.queue_name = val;
        }
        if let Ok(val) = env::var("TED_STAGING_LEASE_SECONDS") {
            if let Ok(lease) = val.parse() {
                config.staging.lease_seconds = lease;
            }
        }
        if let Ok(val) = env::var("TED_STAGING_SQLITE_URL") {
            config.staging.sqlite_url = val;
        }

        // AMQP
        if let Ok(val) = env::var("TED_AMQP_URI") {
            config.amqp.uri = val;
        }
        if let Ok(val) = env::var("TED_AMQP_QUEUE") {
            config.amqp.queue_name = val;
        }
        if let Ok(val) = env::var("TED_AMQP_PREFETCH") {
            if let Ok(prefetch) = val.parse() {
                config.amqp.prefetch = prefetch;
            }
        }
        if let Ok(val) = env::var("TED_AMQP_QUEUE_TYPE") {
            config.amqp.queue_type = Some(val);
        }
        if let Ok(val) = env::var("TED_AMQP_DEAD_LETTER_EXCHANGE") {
            config.amqp.dead_letter_exchange = Some(val);
        }
        if let Ok(val) = env::var("TED_AMQP_DELIVERY_LIMIT") {
            if let Ok(limit) = val.parse() {
                config.amqp.delivery_limit = Some(limit);
            }
        }

        // Drain
        if let Ok(val) = env::var("TED_DRAIN_POLL_INTERVAL_MS") {
            if let Ok(interval) = val.parse() {
                config.drain.poll_interval_ms = interval;
            }
        }
        if let Ok(val) = env::var("TED_DRAIN_BATCH_SIZE") {
            if let Ok(size) = val.parse() {
                config.drain.batch_size = size;
            }
        }

        // Projection
        if let Ok(val) = env::var("TED_PROJECTION_WEBHOOK_URL") {
            config.projection.webhook_url = val;
        }
        if let Ok(val) = env::var("TED_PROJECTION_TIMEOUT_MS") {
            if let Ok(timeout) = val.parse() {
                config.projection.timeout_ms = timeout;
            }
        }

        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
