//! Fakes shared by the handler tests

use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

use super::services::HandlerServices;
use super::tools::{MediaTools, ToolError};
use super::types::JobContext;
use crate::config::QueueConfig;
use crate::jobs::JobType;
use crate::messaging::{Notification, NotificationPublisher};
use crate::queue::{FjallBroker, QueueManager};
use crate::storage::StorageGateway;
use crate::worker::http::{HttpClient, HttpConfig};

/// Writes recognizable bytes instead of running yt-dlp/ffmpeg
pub(crate) struct FakeTools {
    fail: bool,
    calls: AtomicUsize,
}

impl FakeTools {
    pub(crate) fn new(fail: bool) -> Self {
        Self {
            fail,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self, tool: &str) -> Result<(), ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ToolError::Failed {
                tool: tool.to_string(),
                status: "exit status: 1".to_string(),
                stderr: "boom".to_string(),
            });
        }
        Ok(())
    }

    async fn rewrite(&self, input: &Path, output: &Path, tag: &str) -> Result<(), ToolError> {
        let data = tokio::fs::read(input).await.map_err(|source| ToolError::Spawn {
            tool: tag.to_string(),
            source,
        })?;
        let mut out = format!("{}:", tag).into_bytes();
        out.extend(data);
        tokio::fs::write(output, out)
            .await
            .map_err(|source| ToolError::Spawn {
                tool: tag.to_string(),
                source,
            })
    }
}

#[async_trait]
impl MediaTools for FakeTools {
    async fn download(
        &self,
        url: &str,
        _format: Option<&str>,
        dir: &Path,
    ) -> Result<PathBuf, ToolError> {
        self.check("yt-dlp")?;
        let path = dir.join("media.mp4");
        tokio::fs::write(&path, format!("downloaded:{}", url))
            .await
            .map_err(|source| ToolError::Spawn {
                tool: "yt-dlp".to_string(),
                source,
            })?;
        Ok(path)
    }

    async fn transcode(&self, input: &Path, output: &Path) -> Result<(), ToolError> {
        self.check("ffmpeg")?;
        self.rewrite(input, output, "transcoded").await
    }

    async fn extract_audio(&self, input: &Path, output: &Path) -> Result<(), ToolError> {
        self.check("ffmpeg")?;
        self.rewrite(input, output, "extracted").await
    }
}

/// Handler services wired to a temp-dir broker and in-memory storage
pub(crate) struct Harness {
    pub services: HandlerServices,
    pub tools: Arc<FakeTools>,
    pub events: QueueManager,
    _temp: TempDir,
}

impl Harness {
    pub(crate) async fn new() -> Self {
        Self::build(false).await
    }

    pub(crate) async fn failing() -> Self {
        Self::build(true).await
    }

    async fn build(fail: bool) -> Self {
        let temp = TempDir::new().unwrap();
        let broker = Arc::new(FjallBroker::open(temp.path().join("broker")).unwrap());
        let events = QueueManager::new(
            broker,
            QueueConfig {
                wait_time: Duration::ZERO,
                ..QueueConfig::new("events")
            },
        );
        events.initialize().await.unwrap();

        let tools = Arc::new(FakeTools::new(fail));
        let services = HandlerServices {
            storage: StorageGateway::in_memory("b"),
            notifier: NotificationPublisher::new(events.clone()),
            tools: tools.clone(),
            http: Arc::new(HttpClient::new(HttpConfig::default(), None).unwrap()),
            scratch_dir: Some(temp.path().join("scratch")),
        };

        Self {
            services,
            tools,
            events,
            _temp: temp,
        }
    }

    pub(crate) fn context(&self, operation_id: &str, job_type: JobType, params: Value) -> JobContext {
        JobContext {
            operation_id: operation_id.to_string(),
            job_type,
            params,
            receive_count: 1,
        }
    }

    pub(crate) async fn put_source(&self, key: &str, data: &[u8]) {
        self.services
            .storage
            .put_object("b", key, data.to_vec())
            .await
            .unwrap();
    }

    /// Drain published notifications
    pub(crate) async fn notifications(&self) -> Vec<Notification> {
        self.events
            .receive_raw()
            .await
            .unwrap()
            .into_iter()
            .map(|m| serde_json::from_str(&m.body).unwrap())
            .collect()
    }
}
