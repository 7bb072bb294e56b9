use super::models::{Config, QueueEntry, StorageProvider};
use thiserror::Error;

/// Largest long-poll wait the broker accepts
pub const MAX_WAIT_TIME_SECS: u64 = 20;

/// Largest receive batch the broker accepts
pub const MAX_BATCH_SIZE: usize = 10;

/// Longest a received message may stay hidden (12 hours)
pub const MAX_VISIBILITY_TIMEOUT_SECS: u64 = 12 * 60 * 60;

/// Longest a message may be retained (14 days)
pub const MAX_RETENTION_SECS: u64 = 14 * 24 * 60 * 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Queue '{queue}': max_receive_count must be at least 1")]
    InvalidMaxReceiveCount { queue: String },

    #[error("Queue '{queue}': batch_size must be between 1 and {max}, got {actual}")]
    InvalidBatchSize {
        queue: String,
        actual: usize,
        max: usize,
    },

    #[error("Queue '{queue}': wait_time of {actual}s exceeds {max}s")]
    WaitTimeTooLong { queue: String, actual: u64, max: u64 },

    #[error("Queue '{queue}': dead-letter queue must differ from the queue itself")]
    DlqIsSelf { queue: String },

    #[error("Queue '{queue}': visibility_timeout of {actual}s exceeds {max}s")]
    VisibilityTimeoutTooLong { queue: String, actual: u64, max: u64 },

    #[error("Queue '{queue}': {field} of {actual}s exceeds {max}s")]
    RetentionTooLong {
        queue: String,
        field: String,
        actual: u64,
        max: u64,
    },

    #[error("Queue '{queue}': {field} must be positive")]
    ZeroDuration { queue: String, field: String },

    #[error("Queue name must not be empty")]
    EmptyQueueName,

    #[error("Worker references unknown queue '{queue}'")]
    UnknownWorkerQueue { queue: String },

    #[error("Job queue and notification queue must differ ('{queue}')")]
    SharedNotificationQueue { queue: String },

    #[error("Storage bucket must not be empty")]
    EmptyBucket,

    #[error("Storage provider is S3 but missing credentials (access_key or secret_key)")]
    MissingS3Credentials,
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    for (name, entry) in &config.queues {
        validate_queue(name, entry)?;
    }
    validate_worker(config)?;
    validate_storage(config)?;
    Ok(())
}

/// Check the invariants of one queue entry
pub fn validate_queue(name: &str, entry: &QueueEntry) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::EmptyQueueName);
    }

    if entry.max_receive_count < 1 {
        return Err(ValidationError::InvalidMaxReceiveCount {
            queue: name.to_string(),
        });
    }

    if entry.batch_size == 0 || entry.batch_size > MAX_BATCH_SIZE {
        return Err(ValidationError::InvalidBatchSize {
            queue: name.to_string(),
            actual: entry.batch_size,
            max: MAX_BATCH_SIZE,
        });
    }

    if entry.wait_time.as_secs() > MAX_WAIT_TIME_SECS {
        return Err(ValidationError::WaitTimeTooLong {
            queue: name.to_string(),
            actual: entry.wait_time.as_secs(),
            max: MAX_WAIT_TIME_SECS,
        });
    }

    if entry.dlq_name.as_deref() == Some(name) {
        return Err(ValidationError::DlqIsSelf {
            queue: name.to_string(),
        });
    }

    for (field, value) in [
        ("message_retention", entry.message_retention),
        ("dlq_retention", entry.dlq_retention),
    ] {
        if value.as_secs() == 0 {
            return Err(ValidationError::ZeroDuration {
                queue: name.to_string(),
                field: field.to_string(),
            });
        }
        if value.as_secs() > MAX_RETENTION_SECS {
            return Err(ValidationError::RetentionTooLong {
                queue: name.to_string(),
                field: field.to_string(),
                actual: value.as_secs(),
                max: MAX_RETENTION_SECS,
            });
        }
    }

    if entry.visibility_timeout.as_secs() > MAX_VISIBILITY_TIMEOUT_SECS {
        return Err(ValidationError::VisibilityTimeoutTooLong {
            queue: name.to_string(),
            actual: entry.visibility_timeout.as_secs(),
            max: MAX_VISIBILITY_TIMEOUT_SECS,
        });
    }

    Ok(())
}

/// The worker's queues must be configured and distinct
fn validate_worker(config: &Config) -> Result<(), ValidationError> {
    for queue in [&config.worker.queue, &config.worker.notification_queue] {
        if !config.queues.contains_key(queue) {
            return Err(ValidationError::UnknownWorkerQueue {
                queue: queue.clone(),
            });
        }
    }

    if config.worker.queue == config.worker.notification_queue {
        return Err(ValidationError::SharedNotificationQueue {
            queue: config.worker.queue.clone(),
        });
    }

    Ok(())
}

/// Validate bucket and credentials when provider is S3
fn validate_storage(config: &Config) -> Result<(), ValidationError> {
    if config.storage.bucket.trim().is_empty() {
        return Err(ValidationError::EmptyBucket);
    }

    if config.storage.provider == StorageProvider::S3
        && (config.storage.access_key.is_none() || config.storage.secret_key.is_none())
    {
        return Err(ValidationError::MissingS3Credentials);
    }

    Ok(())
}
