//! Applies worker notifications to the operation ledger
//!
//! Runs on the consuming side of the notification queue. Every notification
//! maps to one terminal status, so applying the same one twice is harmless
//! and the updater can run under at-least-once delivery without bookkeeping.

use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::{OperationStatus, OperationStore};
use crate::messaging::{Notification, NotificationContent};
use crate::queue::{QueueError, QueueManager};

/// Counts from one drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdaterStats {
    pub applied: usize,
    /// Acked without a status change (unknown or already finished operation)
    pub skipped: usize,
    /// Left on the queue (undecodable body or transient store error)
    pub left: usize,
}

pub struct StatusUpdater {
    queue: QueueManager,
    store: Arc<dyn OperationStore>,
    error_backoff: Duration,
}

impl StatusUpdater {
    pub fn new(queue: QueueManager, store: Arc<dyn OperationStore>) -> Self {
        Self {
            queue,
            store,
            error_backoff: Duration::from_secs(5),
        }
    }

    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    /// Receive one batch of notifications and apply it
    pub async fn run_once(&self) -> Result<UpdaterStats, QueueError> {
        let mut stats = UpdaterStats::default();

        for message in self.queue.receive_raw().await? {
            let notification: Notification = match serde_json::from_str(&message.body) {
                Ok(notification) => notification,
                Err(e) => {
                    warn!(message_id = %message.message_id, error = %e, "Undecodable notification left on queue");
                    stats.left += 1;
                    continue;
                }
            };

            let Some((status, metadata)) = status_for(&notification) else {
                warn!(
                    operation_id = %notification.operation_id,
                    event_type = %notification.event_type,
                    "Unrecognized notification type left on queue"
                );
                stats.left += 1;
                continue;
            };

            match self
                .store
                .update_status(&notification.operation_id, status, metadata)
                .await
            {
                Ok(_) => {
                    info!(
                        operation_id = %notification.operation_id,
                        event_type = %notification.event_type,
                        %status,
                        "Operation status applied"
                    );
                    stats.applied += 1;
                }
                Err(e) if e.is_permanent() => {
                    warn!(
                        operation_id = %notification.operation_id,
                        event_type = %notification.event_type,
                        error = %e,
                        "Notification cannot apply, dropping"
                    );
                    stats.skipped += 1;
                }
                Err(e) => {
                    error!(operation_id = %notification.operation_id, error = %e, "Ledger update failed");
                    stats.left += 1;
                    continue;
                }
            }

            self.queue.delete_message(&message.receipt_handle).await?;
        }

        Ok(stats)
    }

    /// Drain notifications until `shutdown` flips to true
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(queue = %self.queue.queue_name(), "Status updater started");

        while !*shutdown.borrow() {
            match self.run_once().await {
                Ok(stats) if stats != UpdaterStats::default() => {
                    debug!(?stats, "Notification batch processed");
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "Notification receive failed, backing off");
                    tokio::select! {
                        _ = tokio::time::sleep(self.error_backoff) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }

        info!("Status updater stopped");
    }
}

/// Terminal status and metadata patch for a notification
fn status_for(notification: &Notification) -> Option<(OperationStatus, Value)> {
    let event = notification.event_type.as_str();

    match &notification.content {
        NotificationContent::Artifact(artifact) if event.ends_with("_COMPLETE") => Some((
            OperationStatus::Completed,
            json!({ "artifact": artifact, "event": event }),
        )),
        NotificationContent::Failure { error, attempts } if event.ends_with("_FAILED") => Some((
            OperationStatus::Failed,
            json!({ "error": error, "attempts": attempts, "event": event }),
        )),
        _ => None,
    }
}
