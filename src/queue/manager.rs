use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::broker::{BrokerClient, PeekedMessage, QueueAttributes, ReceivedMessage, RedrivePolicy};
use super::error::{QueueError, Result};
use crate::config::{MAX_BATCH_SIZE, QueueConfig};
use crate::jobs::{Job, JobMessage};

/// Owns one primary queue and its paired dead-letter queue
///
/// The broker handle is injected so the same manager drives the embedded
/// broker in production and a temp-dir broker (or a fake) in tests.
/// Broker errors are returned as-is; retrying is the caller's business.
#[derive(Clone)]
pub struct QueueManager {
    broker: Arc<dyn BrokerClient>,
    config: QueueConfig,
}

impl QueueManager {
    pub fn new(broker: Arc<dyn BrokerClient>, config: QueueConfig) -> Self {
        Self { broker, config }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn queue_name(&self) -> &str {
        &self.config.queue_name
    }

    /// Provision the DLQ, then the main queue with a redrive policy pointing at it
    ///
    /// Safe to run on every start: existing queues get their attributes
    /// refreshed and the redrive target resolves to the same DLQ id.
    pub async fn initialize(&self) -> Result<()> {
        let config = &self.config;

        self.ensure_queue(
            &config.dlq_name,
            QueueAttributes {
                visibility_timeout: config.visibility_timeout,
                message_retention: config.dlq_retention,
            },
        )
        .await?;
        let dlq = self.broker.queue_info(&config.dlq_name).await?;

        self.ensure_queue(
            &config.queue_name,
            QueueAttributes {
                visibility_timeout: config.visibility_timeout,
                message_retention: config.message_retention,
            },
        )
        .await?;

        self.broker
            .set_redrive_policy(
                &config.queue_name,
                RedrivePolicy {
                    dead_letter_target: dlq.id.clone(),
                    max_receive_count: config.max_receive_count,
                },
            )
            .await?;

        let main = self.broker.queue_info(&config.queue_name).await?;
        if main.redrive_policy.is_none() {
            return Err(QueueError::MissingRedrivePolicy(config.queue_name.clone()));
        }

        info!(
            queue = %config.queue_name,
            dlq = %config.dlq_name,
            dlq_id = %dlq.id,
            max_receive_count = config.max_receive_count,
            "Queue pair initialized"
        );
        Ok(())
    }

    async fn ensure_queue(&self, name: &str, attributes: QueueAttributes) -> Result<()> {
        match self.broker.create_queue(name, attributes).await {
            Ok(id) => {
                info!(queue = name, %id, "Queue created");
                Ok(())
            }
            Err(e) if e.is_already_exists() => {
                debug!(queue = name, "Queue already exists, refreshing attributes");
                self.broker.set_queue_attributes(name, attributes).await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Enqueue a job and return the broker's message id
    pub async fn publish(&self, job: &JobMessage) -> Result<String> {
        let message_id = self.send_json(job).await?;
        info!(
            queue = %self.config.queue_name,
            operation_id = %job.operation_id,
            job_type = %job.job_type,
            %message_id,
            "Job published"
        );
        Ok(message_id)
    }

    /// Serialize any message body as JSON and enqueue it
    pub async fn send_json<T: Serialize + ?Sized>(&self, body: &T) -> Result<String> {
        let body = serde_json::to_string(body)?;
        Ok(self.broker.send(&self.config.queue_name, body).await?)
    }

    /// Long poll for a batch of jobs; an empty batch means the wait elapsed
    pub async fn receive_messages(&self) -> Result<Vec<Job>> {
        let jobs: Vec<Job> = self
            .receive_raw()
            .await?
            .into_iter()
            .map(|m| Job::decode(m.message_id, m.receipt_handle, m.receive_count, m.body))
            .collect();

        if !jobs.is_empty() {
            debug!(queue = %self.config.queue_name, count = jobs.len(), "Received jobs");
        }
        Ok(jobs)
    }

    /// Long poll returning undecoded deliveries
    pub async fn receive_raw(&self) -> Result<Vec<ReceivedMessage>> {
        Ok(self
            .broker
            .receive(
                &self.config.queue_name,
                self.config.batch_size,
                self.config.wait_time,
            )
            .await?)
    }

    /// Acknowledge a processed delivery
    ///
    /// Call only after every side effect of the handler is committed.
    pub async fn delete_message(&self, receipt_handle: &str) -> Result<()> {
        self.broker
            .delete(&self.config.queue_name, receipt_handle)
            .await?;
        Ok(())
    }

    /// Inspect dead-lettered messages without consuming them
    pub async fn dead_letters(&self, limit: usize) -> Result<Vec<PeekedMessage>> {
        Ok(self.broker.peek(&self.config.dlq_name, limit).await?)
    }

    /// Move up to `limit` dead-lettered messages back onto the main queue
    ///
    /// Each message is re-sent before it is deleted from the DLQ, so a crash
    /// in between duplicates rather than loses it.
    pub async fn redrive_dead_letters(&self, limit: usize) -> Result<usize> {
        let mut moved = 0;

        while moved < limit {
            let batch = self
                .broker
                .receive(
                    &self.config.dlq_name,
                    (limit - moved).min(MAX_BATCH_SIZE),
                    Duration::ZERO,
                )
                .await?;
            if batch.is_empty() {
                break;
            }

            for message in batch {
                self.broker
                    .send(&self.config.queue_name, message.body)
                    .await?;
                if let Err(e) = self
                    .broker
                    .delete(&self.config.dlq_name, &message.receipt_handle)
                    .await
                {
                    warn!(message_id = %message.message_id, error = %e, "Redriven message not removed from DLQ");
                }
                moved += 1;
            }
        }

        info!(queue = %self.config.queue_name, moved, "Dead letters redriven");
        Ok(moved)
    }
}
