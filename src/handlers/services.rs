use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::debug;

use super::tools::MediaTools;
use super::traits::HandlerError;
use super::types::{JobContext, SourceRef};
use crate::messaging::{NotificationContent, NotificationPublisher};
use crate::storage::{FileDescriptor, ObjectRef, StorageGateway};
use crate::worker::http::HttpClient;

/// Collaborators shared by all media handlers
#[derive(Clone)]
pub struct HandlerServices {
    pub storage: StorageGateway,
    pub notifier: NotificationPublisher,
    pub tools: Arc<dyn MediaTools>,
    pub http: Arc<HttpClient>,
    /// Parent for per-job scratch directories; the system temp dir when unset
    pub scratch_dir: Option<PathBuf>,
}

impl HandlerServices {
    /// Fresh scratch directory, removed when the guard drops
    pub fn scratch(&self) -> Result<TempDir, HandlerError> {
        let dir = match &self.scratch_dir {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                tempfile::Builder::new().prefix("job-").tempdir_in(parent)?
            }
            None => tempfile::Builder::new().prefix("mediajobs-").tempdir()?,
        };
        Ok(dir)
    }

    /// Materialize a job source as a file inside `dir`
    pub async fn fetch_source(&self, source: &SourceRef, dir: &Path) -> Result<PathBuf, HandlerError> {
        let path = dir.join(format!("input.{}", source.extension().unwrap_or("bin")));
        let size = match source {
            SourceRef::Stored(ObjectRef { bucket, key }) => {
                let bytes = self.storage.download(bucket, key).await?;
                let size = bytes.len() as u64;
                tokio::fs::write(&path, bytes).await?;
                size
            }
            SourceRef::Url(url) => self.http.download_to(url, &path).await?,
        };
        debug!(file = %path.display(), size, "Source written to scratch");
        Ok(path)
    }

    /// Upload the produced file and announce it downstream
    pub async fn save_and_notify(
        &self,
        ctx: &JobContext,
        produced: &Path,
        title: Option<&str>,
        ext: &str,
        source_file_ref: Option<ObjectRef>,
    ) -> Result<FileDescriptor, HandlerError> {
        let bytes = tokio::fs::read(produced).await?;
        let file = self
            .storage
            .save(
                bytes,
                &ctx.operation_id,
                title,
                ctx.job_type.storage_prefix(),
                ext,
            )
            .await?;

        self.notifier
            .publish(
                &ctx.operation_id,
                ctx.job_type.completion_event(),
                NotificationContent::artifact(file.clone(), source_file_ref),
            )
            .await?;

        Ok(file)
    }
}
