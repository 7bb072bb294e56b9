//! Configuration management for mediajobs
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use mediajobs::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! let jobs = config.queue_resolver().resolve(&config.worker.queue).unwrap();
//! println!("Polling {} (dlq {})", jobs.queue_name, jobs.dlq_name);
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `MEDIAJOBS__<section>__<key>`
//!
//! Examples:
//! - `MEDIAJOBS__WORKER__ERROR_BACKOFF=10s`
//! - `MEDIAJOBS__STORAGE__PROVIDER=s3`
//! - `MEDIAJOBS__BROKER__PATH=/var/lib/mediajobs/broker`
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/mediajobs.toml`.
//! This can be overridden using the `MEDIAJOBS_CONFIG` environment variable.

mod models;
mod resolver;
mod sources;
mod validation;

pub use crate::humanize::HumanDuration;
pub use models::{
    BrokerConfig, Config, DEFAULT_JOB_QUEUE, DEFAULT_NOTIFICATION_QUEUE, LedgerConfig,
    QueueConfig, QueueEntry, StorageConfig, StorageProvider, TelemetryConfig, ToolsConfig,
    WorkerSettings,
};
pub use resolver::{QueueResolver, ResolverError};
pub use validation::{MAX_BATCH_SIZE, MAX_WAIT_TIME_SECS, ValidationError};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),

    #[error("Queue resolution failed: {0}")]
    ResolverError(#[from] ResolverError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// # Errors
    ///
    /// Returns an error if the file is malformed or validation fails
    /// (unknown worker queues, `max_receive_count` of zero, etc.).
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Get a queue resolver for this configuration
    pub fn queue_resolver(&self) -> QueueResolver<'_> {
        QueueResolver::new(&self.queues)
    }

    /// Resolved settings for the worker's job queue
    pub fn job_queue(&self) -> Result<QueueConfig, ConfigError> {
        Ok(self.queue_resolver().resolve(&self.worker.queue)?)
    }

    /// Resolved settings for the downstream notification queue
    pub fn notification_queue(&self) -> Result<QueueConfig, ConfigError> {
        Ok(self
            .queue_resolver()
            .resolve(&self.worker.notification_queue)?)
    }
}
