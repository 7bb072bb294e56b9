//! Worker loop: receive, dispatch, ack

use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::WorkerConfig;
use crate::handlers::{DispatchError, Dispatcher};
use crate::jobs::{Job, JobBody, JobType};
use crate::ledger::{LedgerError, OperationStatus, OperationStore};
use crate::messaging::{NotificationContent, NotificationPublisher};
use crate::observability::Metrics;
use crate::queue::{QueueError, QueueManager};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker is already running")]
    AlreadyRunning,

    #[error("queue initialization failed: {0}")]
    Initialize(#[source] QueueError),
}

/// Stops a running worker from outside its task
#[derive(Clone)]
pub struct ShutdownHandle {
    running: Arc<AtomicBool>,
    signal: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Request a cooperative stop; the in-flight batch still finishes
    pub fn shutdown(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("Worker shutdown requested");
        }
        self.signal.send_replace(true);
    }
}

pub struct Worker {
    queue: QueueManager,
    dispatcher: Dispatcher,
    notifier: Option<NotificationPublisher>,
    store: Option<Arc<dyn OperationStore>>,
    metrics: Arc<Metrics>,
    config: WorkerConfig,
    running: Arc<AtomicBool>,
    signal: Arc<watch::Sender<bool>>,
}

impl Worker {
    pub fn new(queue: QueueManager, dispatcher: Dispatcher, config: WorkerConfig) -> Self {
        let (signal, _) = watch::channel(false);
        Self {
            queue,
            dispatcher,
            notifier: None,
            store: None,
            metrics: Arc::new(Metrics::new()),
            config,
            running: Arc::new(AtomicBool::new(false)),
            signal: Arc::new(signal),
        }
    }

    /// Publisher used for `_FAILED` notifications on the final attempt
    pub fn with_notifier(mut self, notifier: NotificationPublisher) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Ledger to mark operations PROCESSING in
    pub fn with_store(mut self, store: Arc<dyn OperationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            running: self.running.clone(),
            signal: self.signal.clone(),
        }
    }

    pub fn shutdown(&self) {
        self.shutdown_handle().shutdown();
    }

    /// Run the polling loop until [`shutdown`](Self::shutdown)
    ///
    /// Provisions the queue pair first; a provisioning failure is returned
    /// and leaves the worker stopped.
    pub async fn start(&self) -> Result<(), WorkerError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(WorkerError::AlreadyRunning);
        }
        self.signal.send_replace(false);
        let mut stop = self.signal.subscribe();

        if let Err(e) = self.queue.initialize().await {
            self.running.store(false, Ordering::SeqCst);
            error!(queue = %self.queue.queue_name(), error = %e, "Queue initialization failed");
            return Err(WorkerError::Initialize(e));
        }

        info!(queue = %self.queue.queue_name(), "Worker started");

        while self.is_running() {
            let received = tokio::select! {
                biased;
                _ = stop.wait_for(|stopped| *stopped) => break,
                received = self.queue.receive_messages() => received,
            };

            match received {
                Ok(jobs) => {
                    for job in jobs {
                        self.process(job).await;
                    }
                }
                Err(e) => {
                    self.metrics.poll_error();
                    error!(
                        queue = %self.queue.queue_name(),
                        error = %e,
                        transient = e.is_transient(),
                        backoff_secs = self.config.error_backoff.as_secs_f64(),
                        "Receive failed, backing off"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.error_backoff) => {}
                        _ = stop.wait_for(|stopped| *stopped) => {}
                    }
                }
            }
        }

        info!(queue = %self.queue.queue_name(), "Worker stopped");
        Ok(())
    }

    async fn process(&self, job: Job) {
        self.metrics.job_received();
        let final_attempt = job.receive_count >= self.queue.config().max_receive_count;

        let message = match &job.body {
            JobBody::Valid(message) => message,
            JobBody::Malformed { error, .. } => {
                self.metrics.poison_message();
                warn!(
                    message_id = %job.message_id,
                    receive_count = job.receive_count,
                    error = %error,
                    "Undecodable job left for redrive"
                );
                if final_attempt {
                    let (operation_id, job_type) = job.body.salvage();
                    self.report_exhausted(
                        operation_id.as_deref(),
                        job_type,
                        format!("undecodable job body: {}", error),
                        job.receive_count,
                    )
                    .await;
                }
                return;
            }
        };

        self.mark_processing(&message.operation_id).await;

        let result = self
            .dispatcher
            .dispatch(
                &message.operation_id,
                &message.job_type,
                message.params.clone(),
                job.receive_count,
            )
            .await;

        match result {
            Ok(file) => match self.queue.delete_message(&job.receipt_handle).await {
                Ok(()) => {
                    self.metrics.job_completed();
                    info!(
                        operation_id = %message.operation_id,
                        job_type = %message.job_type,
                        key = %file.key,
                        "Job completed"
                    );
                }
                Err(e) => {
                    warn!(
                        operation_id = %message.operation_id,
                        error = %e,
                        "Ack failed, job will be redelivered"
                    );
                }
            },
            Err(e) => {
                self.metrics.job_failed();
                if matches!(e, DispatchError::UnknownJobType(_)) {
                    self.metrics.poison_message();
                }
                error!(
                    operation_id = %message.operation_id,
                    job_type = %message.job_type,
                    receive_count = job.receive_count,
                    error = %e,
                    "Job failed, leaving it for redelivery"
                );

                if final_attempt {
                    self.report_exhausted(
                        Some(&message.operation_id),
                        e.job_type(),
                        e.to_string(),
                        job.receive_count,
                    )
                    .await;
                }
            }
        }
    }

    async fn mark_processing(&self, operation_id: &str) {
        let Some(store) = &self.store else {
            return;
        };

        match store
            .update_status(operation_id, OperationStatus::Processing, Value::Null)
            .await
        {
            Ok(_) => {}
            Err(LedgerError::TerminalState { status, .. }) => {
                debug!(operation_id, %status, "Operation already finished, not marking PROCESSING");
            }
            Err(e) => {
                warn!(operation_id, error = %e, "Could not mark operation PROCESSING");
            }
        }
    }

    /// Last delivery before the broker dead-letters the message
    ///
    /// A known job type gets its `_FAILED` notification. Without one there
    /// is no event to name, so the operation is failed in the ledger directly.
    async fn report_exhausted(
        &self,
        operation_id: Option<&str>,
        job_type: Option<JobType>,
        error: String,
        attempts: u32,
    ) {
        let Some(operation_id) = operation_id else {
            warn!(attempts, error = %error, "Exhausted job names no operation, nothing to report");
            return;
        };

        if let (Some(notifier), Some(job_type)) = (&self.notifier, job_type) {
            let content = NotificationContent::Failure { error, attempts };
            match notifier
                .publish(operation_id, job_type.failure_event(), content)
                .await
            {
                Ok(_) => self.metrics.failure_notified(),
                Err(e) => {
                    error!(operation_id, error = %e, "Failure notification not sent");
                }
            }
            return;
        }

        let Some(store) = &self.store else {
            return;
        };
        let metadata = json!({ "error": error, "attempts": attempts });
        match store
            .update_status(operation_id, OperationStatus::Failed, metadata)
            .await
        {
            Ok(_) => info!(operation_id, attempts, "Operation failed without a notification"),
            Err(e) => warn!(operation_id, error = %e, "Could not mark operation FAILED"),
        }
    }
}
