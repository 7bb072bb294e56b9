use async_trait::async_trait;
use tracing::info;

use super::services::HandlerServices;
use super::traits::{HandlerError, JobHandler};
use super::types::{ExtractParams, JobContext};
use crate::storage::FileDescriptor;

/// EXTRACT: pull the audio track out of a stored file or URL
pub struct ExtractHandler {
    services: HandlerServices,
}

impl ExtractHandler {
    pub fn new(services: HandlerServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl JobHandler for ExtractHandler {
    async fn handle(&self, ctx: JobContext) -> Result<FileDescriptor, HandlerError> {
        let params: ExtractParams = ctx.params()?;
        params.validate()?;
        let source = params.source()?;

        let scratch = self.services.scratch()?;
        let input = self.services.fetch_source(&source, scratch.path()).await?;
        let output = scratch
            .path()
            .join(format!("audio.{}", params.output_format));

        self.services.tools.extract_audio(&input, &output).await?;

        let title = params.title.as_deref().or(source.stem());
        let file = self
            .services
            .save_and_notify(&ctx, &output, title, &params.output_format, source.file_ref())
            .await?;

        info!(
            operation_id = %ctx.operation_id,
            format = %params.output_format,
            key = %file.key,
            "Audio extracted"
        );
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::Harness;
    use crate::jobs::JobType;
    use serde_json::json;

    #[tokio::test]
    async fn test_extract_defaults_to_mp3() {
        let harness = Harness::new().await;
        harness.put_source("k", b"video").await;
        let handler = ExtractHandler::new(harness.services.clone());

        let file = handler
            .handle(harness.context(
                "op-1",
                JobType::Extract,
                json!({"sourceS3File": {"bucket": "b", "key": "k"}}),
            ))
            .await
            .unwrap();

        assert!(file.key.starts_with("extracted/op-1/"));
        assert!(file.key.ends_with(".mp3"));
        assert_eq!(file.bucket, "b");
        assert_eq!(file.content_type, "audio/mpeg");
        assert_eq!(file.operation_id(), Some("op-1"));

        let notifications = harness.notifications().await;
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].event_type, "AUDIO_EXTRACTION_COMPLETE");
        assert_eq!(notifications[0].operation_id, "op-1");
    }

    #[tokio::test]
    async fn test_extract_twice_overwrites_same_key() {
        let harness = Harness::new().await;
        harness.put_source("raw/song.mp4", b"video").await;
        let handler = ExtractHandler::new(harness.services.clone());
        let params = json!({
            "sourceS3File": {"bucket": "b", "key": "raw/song.mp4"},
            "outputFormat": "flac",
            "title": "song"
        });

        let first = handler
            .handle(harness.context("op-2", JobType::Extract, params.clone()))
            .await
            .unwrap();
        let second = handler
            .handle(harness.context("op-2", JobType::Extract, params))
            .await
            .unwrap();

        assert_eq!(first.key, "extracted/op-2/song.flac");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_scratch_dir_is_released() {
        let harness = Harness::new().await;
        harness.put_source("k.mp4", b"video").await;
        let handler = ExtractHandler::new(harness.services.clone());

        handler
            .handle(harness.context(
                "op-3",
                JobType::Extract,
                json!({"sourceS3File": {"bucket": "b", "key": "k.mp4"}}),
            ))
            .await
            .unwrap();

        let scratch_root = harness.services.scratch_dir.clone().unwrap();
        assert_eq!(std::fs::read_dir(scratch_root).unwrap().count(), 0);
    }
}
