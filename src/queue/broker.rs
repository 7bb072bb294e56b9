//! Broker client capability set
//!
//! Everything the pipeline needs from a message broker fits in a handful of
//! calls: provision a queue, wire its redrive policy, send, long-poll
//! receive, and delete by receipt handle. [`FjallBroker`](super::FjallBroker)
//! is the embedded implementation; anything SQS-shaped can sit behind the
//! same trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::BrokerError;

/// Queue-level attributes set at creation and refreshed on every provisioning run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueAttributes {
    pub visibility_timeout: Duration,
    pub message_retention: Duration,
}

/// Broker-side rule moving a message to its DLQ after too many deliveries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedrivePolicy {
    /// Identifier (not name) of the dead-letter queue
    pub dead_letter_target: String,
    pub max_receive_count: u32,
}

/// Current broker-side view of a queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueInfo {
    pub id: String,
    pub name: String,
    pub attributes: QueueAttributes,
    pub redrive_policy: Option<RedrivePolicy>,
}

/// A delivered message; the receipt handle is valid until the next delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedMessage {
    pub message_id: String,
    pub receipt_handle: String,
    pub body: String,
    /// Deliveries so far, including this one
    pub receive_count: u32,
    pub sent_at: DateTime<Utc>,
}

/// A message inspected without being delivered
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeekedMessage {
    pub message_id: String,
    pub body: String,
    pub receive_count: u32,
    pub sent_at: DateTime<Utc>,
}

#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Create a queue and return its identifier
    ///
    /// Fails with `AlreadyExists` when the queue is already there.
    async fn create_queue(
        &self,
        name: &str,
        attributes: QueueAttributes,
    ) -> Result<String, BrokerError>;

    /// Overwrite the attributes of an existing queue
    async fn set_queue_attributes(
        &self,
        name: &str,
        attributes: QueueAttributes,
    ) -> Result<(), BrokerError>;

    /// Attach a redrive policy; the target queue must already exist
    async fn set_redrive_policy(&self, name: &str, policy: RedrivePolicy)
    -> Result<(), BrokerError>;

    async fn queue_info(&self, name: &str) -> Result<QueueInfo, BrokerError>;

    /// Enqueue a message body and return its message id
    async fn send(&self, queue: &str, body: String) -> Result<String, BrokerError>;

    /// Long poll for up to `max_messages`, waiting at most `wait` when the queue is empty
    ///
    /// An empty result after the wait elapses is not an error.
    async fn receive(
        &self,
        queue: &str,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, BrokerError>;

    /// Acknowledge a delivery; the receipt handle cannot be used again
    async fn delete(&self, queue: &str, receipt_handle: &str) -> Result<(), BrokerError>;

    /// Look at up to `limit` messages without changing their state
    async fn peek(&self, queue: &str, limit: usize) -> Result<Vec<PeekedMessage>, BrokerError>;
}
