use super::models::{QueueConfig, QueueEntry};
use super::validation::{ValidationError, validate_queue};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolverError {
    #[error("Queue '{0}' is not configured")]
    QueueNotFound(String),

    #[error("Queue '{name}' has invalid settings: {source}")]
    Invalid {
        name: String,
        #[source]
        source: ValidationError,
    },
}

/// Maps logical queue names to their connection parameters
pub struct QueueResolver<'a> {
    queues: &'a HashMap<String, QueueEntry>,
}

impl<'a> QueueResolver<'a> {
    pub fn new(queues: &'a HashMap<String, QueueEntry>) -> Self {
        Self { queues }
    }

    /// Resolve a queue name into its full configuration
    ///
    /// The DLQ name defaults to `<name>-dlq` when not set explicitly.
    pub fn resolve(&self, name: &str) -> Result<QueueConfig, ResolverError> {
        let entry = self
            .queues
            .get(name)
            .ok_or_else(|| ResolverError::QueueNotFound(name.to_string()))?;

        validate_queue(name, entry).map_err(|source| ResolverError::Invalid {
            name: name.to_string(),
            source,
        })?;

        let dlq_name = entry
            .dlq_name
            .clone()
            .unwrap_or_else(|| format!("{}-dlq", name));

        Ok(QueueConfig {
            queue_name: name.to_string(),
            dlq_name,
            visibility_timeout: entry.visibility_timeout.into(),
            max_receive_count: entry.max_receive_count,
            wait_time: entry.wait_time.into(),
            batch_size: entry.batch_size,
            message_retention: entry.message_retention.into(),
            dlq_retention: entry.dlq_retention.into(),
        })
    }

    /// Resolve every configured queue
    pub fn resolve_all(&self) -> Result<HashMap<String, QueueConfig>, ResolverError> {
        self.queues
            .keys()
            .map(|name| self.resolve(name).map(|resolved| (name.clone(), resolved)))
            .collect()
    }
}
