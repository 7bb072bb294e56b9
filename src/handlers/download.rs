use async_trait::async_trait;
use tracing::info;

use super::services::HandlerServices;
use super::traits::{HandlerError, JobHandler};
use super::types::{DownloadParams, JobContext};
use crate::storage::{FileDescriptor, sanitize_title};

const DEFAULT_EXTENSION: &str = "mp4";

/// Platform download (Facebook, YouTube) through yt-dlp
///
/// The artifact lands under `downloads/`; its extension is whatever the
/// downloader produced. Without a usable title the key is named after the
/// downloaded file, which yt-dlp names by the platform's media id, so a
/// redelivered job overwrites the same object.
pub struct DownloadHandler {
    services: HandlerServices,
}

impl DownloadHandler {
    pub fn new(services: HandlerServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl JobHandler for DownloadHandler {
    async fn handle(&self, ctx: JobContext) -> Result<FileDescriptor, HandlerError> {
        let params: DownloadParams = ctx.params()?;
        params.validate()?;

        let scratch = self.services.scratch()?;
        let produced = self
            .services
            .tools
            .download(&params.url, params.format.as_deref(), scratch.path())
            .await?;

        let ext = produced
            .extension()
            .and_then(|ext| ext.to_str())
            .filter(|ext| !ext.is_empty())
            .unwrap_or(DEFAULT_EXTENSION)
            .to_string();

        let title = params
            .title
            .as_deref()
            .filter(|title| !sanitize_title(title).is_empty())
            .or_else(|| produced.file_stem().and_then(|stem| stem.to_str()));

        let file = self
            .services
            .save_and_notify(&ctx, &produced, title, &ext, None)
            .await?;

        info!(
            operation_id = %ctx.operation_id,
            job_type = %ctx.job_type,
            key = %file.key,
            "Download stored"
        );
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::Harness;
    use crate::jobs::JobType;
    use crate::messaging::NotificationContent;
    use serde_json::json;

    #[tokio::test]
    async fn test_youtube_download_stored_and_announced() {
        let harness = Harness::new().await;
        let handler = DownloadHandler::new(harness.services.clone());

        let file = handler
            .handle(harness.context(
                "op-yt",
                JobType::DownloadYoutube,
                json!({"url": "https://youtube.com/watch?v=abc", "title": "My Clip"}),
            ))
            .await
            .unwrap();

        assert_eq!(file.key, "downloads/op-yt/My_Clip.mp4");
        assert_eq!(file.content_type, "video/mp4");
        assert_eq!(
            harness.services.storage.download("b", &file.key).await.unwrap(),
            b"downloaded:https://youtube.com/watch?v=abc"
        );

        let notifications = harness.notifications().await;
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].event_type, "YOUTUBE_DOWNLOAD_COMPLETE");
        assert!(matches!(
            &notifications[0].content,
            NotificationContent::Artifact(artifact) if artifact.source_file_ref.is_none()
        ));
    }

    #[tokio::test]
    async fn test_facebook_download_uses_own_event() {
        let harness = Harness::new().await;
        let handler = DownloadHandler::new(harness.services.clone());

        handler
            .handle(harness.context(
                "op-fb",
                JobType::DownloadFacebook,
                json!({"url": "https://facebook.com/watch/?v=1"}),
            ))
            .await
            .unwrap();

        let notifications = harness.notifications().await;
        assert_eq!(notifications[0].event_type, "FACEBOOK_DOWNLOAD_COMPLETE");
    }

    #[tokio::test]
    async fn test_untitled_redelivery_reuses_key() {
        let harness = Harness::new().await;
        let handler = DownloadHandler::new(harness.services.clone());
        let params = json!({"url": "https://youtube.com/watch?v=abc", "title": "!!!"});

        let first = handler
            .handle(harness.context("op-again", JobType::DownloadYoutube, params.clone()))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        let second = handler
            .handle(harness.context("op-again", JobType::DownloadYoutube, params))
            .await
            .unwrap();

        assert_eq!(first.key, "downloads/op-again/media.mp4");
        assert_eq!(second.key, first.key);
    }

    #[tokio::test]
    async fn test_invalid_url_rejected_before_tools_run() {
        let harness = Harness::new().await;
        let handler = DownloadHandler::new(harness.services.clone());

        let err = handler
            .handle(harness.context(
                "op-bad",
                JobType::DownloadYoutube,
                json!({"url": "ftp://example.com/file"}),
            ))
            .await
            .unwrap_err();

        assert!(matches!(err, HandlerError::InvalidParams(_)));
        assert_eq!(harness.tools.calls(), 0);
        assert!(harness.notifications().await.is_empty());
    }

    #[tokio::test]
    async fn test_tool_failure_publishes_nothing() {
        let harness = Harness::failing().await;
        let handler = DownloadHandler::new(harness.services.clone());

        let err = handler
            .handle(harness.context(
                "op-fail",
                JobType::DownloadYoutube,
                json!({"url": "https://youtube.com/watch?v=abc"}),
            ))
            .await
            .unwrap_err();

        assert!(matches!(err, HandlerError::Tool(_)));
        assert!(harness.notifications().await.is_empty());
    }
}
