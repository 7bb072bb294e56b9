//! Caller side of the pipeline: record an operation, then enqueue its job

use serde_json::{Value, json};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::handlers::HandlerError;
use crate::handlers::types::validate_params;
use crate::jobs::{JobMessage, JobType};
use crate::ledger::{LedgerError, Operation, OperationStatus, OperationStore};
use crate::queue::{QueueError, QueueManager};

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("invalid params for {job_type}: {source}")]
    InvalidParams {
        job_type: JobType,
        #[source]
        source: HandlerError,
    },

    #[error("failed to record operation: {0}")]
    Ledger(#[from] LedgerError),

    #[error("failed to enqueue operation {operation_id}: {source}")]
    Enqueue {
        operation_id: String,
        #[source]
        source: QueueError,
    },
}

pub struct JobSubmitter {
    store: Arc<dyn OperationStore>,
    queue: QueueManager,
}

impl JobSubmitter {
    pub fn new(store: Arc<dyn OperationStore>, queue: QueueManager) -> Self {
        Self { store, queue }
    }

    /// Create a PENDING operation and enqueue its job under the same id
    ///
    /// Params are checked up front so a job that can never run is refused
    /// here instead of cycling through the DLQ. If the enqueue fails the
    /// operation is marked FAILED before the error is returned.
    pub async fn submit(
        &self,
        user_id: &str,
        job_type: JobType,
        params: Value,
    ) -> Result<Operation, SubmitError> {
        validate_params(job_type, &params)
            .map_err(|source| SubmitError::InvalidParams { job_type, source })?;

        let operation = self
            .store
            .create(user_id, job_type, json!({ "params": params.clone() }))
            .await?;

        let message = JobMessage::new(operation.id.clone(), job_type, params);
        if let Err(source) = self.queue.publish(&message).await {
            if let Err(e) = self
                .store
                .update_status(
                    &operation.id,
                    OperationStatus::Failed,
                    json!({ "error": format!("enqueue failed: {}", source) }),
                )
                .await
            {
                warn!(operation_id = %operation.id, error = %e, "Could not mark unqueued operation failed");
            }
            return Err(SubmitError::Enqueue {
                operation_id: operation.id,
                source,
            });
        }

        info!(operation_id = %operation.id, user_id, %job_type, "Job submitted");
        Ok(operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::jobs::JobBody;
    use crate::ledger::FjallOperationStore;
    use crate::queue::FjallBroker;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn setup(initialize: bool) -> (JobSubmitter, Arc<FjallOperationStore>, QueueManager, TempDir) {
        let temp = TempDir::new().unwrap();
        let broker = Arc::new(FjallBroker::open(temp.path().join("broker")).unwrap());
        let queue = QueueManager::new(
            broker,
            QueueConfig {
                wait_time: Duration::ZERO,
                ..QueueConfig::new("jobs")
            },
        );
        if initialize {
            queue.initialize().await.unwrap();
        }
        let store = Arc::new(FjallOperationStore::open(temp.path().join("ledger")).unwrap());
        (
            JobSubmitter::new(store.clone(), queue.clone()),
            store,
            queue,
            temp,
        )
    }

    #[tokio::test]
    async fn test_submit_records_then_enqueues() {
        let (submitter, store, queue, _temp) = setup(true).await;
        let params = json!({"sourceS3File": {"bucket": "b", "key": "k"}});

        let op = submitter
            .submit("user-1", JobType::Extract, params.clone())
            .await
            .unwrap();

        let stored = store.get(&op.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OperationStatus::Pending);
        assert_eq!(stored.metadata["params"], params);

        let jobs = queue.receive_messages().await.unwrap();
        assert_eq!(jobs.len(), 1);
        let JobBody::Valid(message) = &jobs[0].body else {
            panic!("expected a valid job");
        };
        assert_eq!(message.operation_id, op.id);
        assert_eq!(message.job_type, "EXTRACT");
        assert_eq!(message.params, params);
    }

    #[tokio::test]
    async fn test_invalid_params_create_nothing() {
        let (submitter, store, queue, _temp) = setup(true).await;

        let err = submitter
            .submit("user-1", JobType::Convert, json!({"sourceUrl": "https://x/y.mp4"}))
            .await
            .unwrap_err();

        assert!(matches!(err, SubmitError::InvalidParams { job_type: JobType::Convert, .. }));
        assert!(store.recent(10).unwrap().is_empty());
        assert!(queue.receive_messages().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_failure_marks_operation_failed() {
        let (submitter, store, _queue, _temp) = setup(false).await;

        let err = submitter
            .submit(
                "user-1",
                JobType::DownloadYoutube,
                json!({"url": "https://youtube.com/watch?v=1"}),
            )
            .await
            .unwrap_err();

        let SubmitError::Enqueue { operation_id, .. } = err else {
            panic!("expected an enqueue error");
        };
        let op = store.get(&operation_id).await.unwrap().unwrap();
        assert_eq!(op.status, OperationStatus::Failed);
        assert!(op.metadata["error"].as_str().unwrap().contains("enqueue failed"));
    }
}
