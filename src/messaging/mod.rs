//! Completion and failure notifications for downstream services
//!
//! Notifications travel on their own queue (with its own DLQ) through the
//! same broker as jobs. Consumers must tolerate duplicates: a redelivered
//! job publishes its notification again, so `(operationId, type)` is the
//! idempotency key on the receiving side.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::queue::{QueueError, QueueManager};
use crate::storage::{FileDescriptor, ObjectRef};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Publish to {queue} failed: {source}")]
    Queue {
        queue: String,
        #[source]
        source: QueueError,
    },
}

impl PublishError {
    pub fn is_transient(&self) -> bool {
        match self {
            PublishError::Queue { source, .. } => source.is_transient(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PublishError>;

/// Artifact produced by a job, optionally pointing back at its input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactContent {
    #[serde(flatten)]
    pub file: FileDescriptor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file_ref: Option<ObjectRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NotificationContent {
    Artifact(ArtifactContent),
    Failure { error: String, attempts: u32 },
}

impl NotificationContent {
    pub fn artifact(file: FileDescriptor, source_file_ref: Option<ObjectRef>) -> Self {
        NotificationContent::Artifact(ArtifactContent {
            file,
            source_file_ref,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub operation_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub content: NotificationContent,
}

impl Notification {
    pub fn is_failure(&self) -> bool {
        self.event_type.ends_with("_FAILED")
    }
}

/// Publishes notifications onto the downstream queue
#[derive(Clone)]
pub struct NotificationPublisher {
    queue: QueueManager,
}

impl NotificationPublisher {
    pub fn new(queue: QueueManager) -> Self {
        Self { queue }
    }

    pub fn queue(&self) -> &QueueManager {
        &self.queue
    }

    /// Serialize and send one notification, returning the broker message id
    pub async fn publish(
        &self,
        operation_id: &str,
        event_type: &str,
        content: NotificationContent,
    ) -> Result<String> {
        let notification = Notification {
            operation_id: operation_id.to_string(),
            event_type: event_type.to_string(),
            content,
        };

        let message_id = self
            .queue
            .send_json(&notification)
            .await
            .map_err(|source| PublishError::Queue {
                queue: self.queue.queue_name().to_string(),
                source,
            })?;

        tracing::info!(
            operation_id,
            event_type,
            queue = %self.queue.queue_name(),
            %message_id,
            "Notification published"
        );
        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::queue::FjallBroker;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn descriptor() -> FileDescriptor {
        FileDescriptor {
            bucket: "b".to_string(),
            key: "extracted/op-1/song.mp3".to_string(),
            content_type: "audio/mpeg".to_string(),
        }
    }

    #[test]
    fn test_artifact_wire_shape() {
        let notification = Notification {
            operation_id: "op-1".to_string(),
            event_type: "AUDIO_EXTRACTION_COMPLETE".to_string(),
            content: NotificationContent::artifact(
                descriptor(),
                Some(ObjectRef {
                    bucket: "b".to_string(),
                    key: "k".to_string(),
                }),
            ),
        };

        let encoded = serde_json::to_value(&notification).unwrap();
        assert_eq!(
            encoded,
            json!({
                "operationId": "op-1",
                "type": "AUDIO_EXTRACTION_COMPLETE",
                "content": {
                    "bucket": "b",
                    "key": "extracted/op-1/song.mp3",
                    "contentType": "audio/mpeg",
                    "sourceFileRef": {"bucket": "b", "key": "k"}
                }
            })
        );

        let decoded: Notification = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, notification);
    }

    #[test]
    fn test_failure_content_decodes_as_failure() {
        let decoded: Notification = serde_json::from_value(json!({
            "operationId": "op-2",
            "type": "CONVERSION_FAILED",
            "content": {"error": "ffmpeg exited with 1", "attempts": 3}
        }))
        .unwrap();

        assert!(decoded.is_failure());
        assert_eq!(
            decoded.content,
            NotificationContent::Failure {
                error: "ffmpeg exited with 1".to_string(),
                attempts: 3
            }
        );
    }

    #[tokio::test]
    async fn test_publish_lands_on_notification_queue() {
        let temp_dir = TempDir::new().unwrap();
        let broker = Arc::new(FjallBroker::open(temp_dir.path()).unwrap());
        let queue = QueueManager::new(
            broker,
            QueueConfig {
                wait_time: Duration::ZERO,
                ..QueueConfig::new("events")
            },
        );
        queue.initialize().await.unwrap();

        let publisher = NotificationPublisher::new(queue.clone());
        publisher
            .publish(
                "op-1",
                "AUDIO_EXTRACTION_COMPLETE",
                NotificationContent::artifact(descriptor(), None),
            )
            .await
            .unwrap();

        let delivered = queue.receive_raw().await.unwrap();
        assert_eq!(delivered.len(), 1);
        let notification: Notification = serde_json::from_str(&delivered[0].body).unwrap();
        assert_eq!(notification.operation_id, "op-1");
        assert!(!notification.is_failure());
    }

    #[tokio::test]
    async fn test_publish_to_missing_queue_fails() {
        let temp_dir = TempDir::new().unwrap();
        let broker = Arc::new(FjallBroker::open(temp_dir.path()).unwrap());
        let publisher = NotificationPublisher::new(QueueManager::new(
            broker,
            QueueConfig::new("events"),
        ));

        let err = publisher
            .publish("op-1", "CONVERSION_COMPLETE", NotificationContent::artifact(descriptor(), None))
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Queue { ref queue, .. } if queue == "events"));
        assert!(!err.is_transient());
    }
}
