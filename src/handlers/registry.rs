use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use super::download::DownloadHandler;
use super::extract::ExtractHandler;
use super::services::HandlerServices;
use super::traits::{HandlerError, JobHandler};
use super::transcode::TranscodeHandler;
use super::types::JobContext;
use crate::jobs::{JobType, UnknownJobType};
use crate::storage::FileDescriptor;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown job type: {0}")]
    UnknownJobType(String),

    #[error("no handler registered for {0}")]
    NoHandler(JobType),

    #[error("{job_type} handler failed: {source}")]
    Handler {
        job_type: JobType,
        #[source]
        source: HandlerError,
    },
}

impl From<UnknownJobType> for DispatchError {
    fn from(value: UnknownJobType) -> Self {
        DispatchError::UnknownJobType(value.0)
    }
}

impl DispatchError {
    /// Job type the failing message was routed to, if it parsed
    pub fn job_type(&self) -> Option<JobType> {
        match self {
            DispatchError::UnknownJobType(_) => None,
            DispatchError::NoHandler(job_type) | DispatchError::Handler { job_type, .. } => {
                Some(*job_type)
            }
        }
    }
}

/// Registry mapping job types to handler instances
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<JobType, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, job_type: JobType, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(job_type, handler);
    }

    pub fn get(&self, job_type: JobType) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&job_type).cloned()
    }

    pub fn has_handler(&self, job_type: JobType) -> bool {
        self.handlers.contains_key(&job_type)
    }

    /// Registry with the built-in media handlers for every job type
    pub fn with_media_handlers(services: HandlerServices) -> Self {
        let mut registry = Self::new();

        let download: Arc<dyn JobHandler> = Arc::new(DownloadHandler::new(services.clone()));
        registry.register(JobType::DownloadFacebook, download.clone());
        registry.register(JobType::DownloadYoutube, download);
        registry.register(
            JobType::Convert,
            Arc::new(TranscodeHandler::new(services.clone())),
        );
        registry.register(JobType::Extract, Arc::new(ExtractHandler::new(services)));

        registry
    }
}

/// Routes a decoded job to the handler registered for its type
#[derive(Clone)]
pub struct Dispatcher {
    registry: HandlerRegistry,
}

impl Dispatcher {
    pub fn new(registry: HandlerRegistry) -> Self {
        Self { registry }
    }

    pub async fn dispatch(
        &self,
        operation_id: &str,
        job_type: &str,
        params: Value,
        receive_count: u32,
    ) -> Result<FileDescriptor, DispatchError> {
        let job_type: JobType = job_type.parse()?;
        let handler = self
            .registry
            .get(job_type)
            .ok_or(DispatchError::NoHandler(job_type))?;

        debug!(operation_id, %job_type, receive_count, "Dispatching job");

        handler
            .handle(JobContext {
                operation_id: operation_id.to_string(),
                job_type,
                params,
                receive_count,
            })
            .await
            .map_err(|source| DispatchError::Handler { job_type, source })
    }
}
