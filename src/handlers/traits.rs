use async_trait::async_trait;
use thiserror::Error;

use super::tools::ToolError;
use super::types::JobContext;
use crate::messaging::PublishError;
use crate::storage::{FileDescriptor, StorageError};
use crate::worker::http::DownloadError;

/// Handler errors
///
/// Every variant leaves the job unacknowledged; the broker redelivers it
/// until the redrive policy moves it to the DLQ.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("media tool failed: {0}")]
    Tool(#[from] ToolError),

    #[error("storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error("notification failed: {0}")]
    Publish(#[from] PublishError),

    #[error("source fetch failed: {0}")]
    Fetch(#[from] DownloadError),

    #[error("scratch io failed: {0}")]
    Io(#[from] std::io::Error),
}

/// A handler for one or more job types
///
/// A handler runs the media work, uploads its artifact and publishes the
/// completion notification. It may run more than once for the same
/// operation; the deterministic storage key makes the upload idempotent.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, ctx: JobContext) -> Result<FileDescriptor, HandlerError>;
}
