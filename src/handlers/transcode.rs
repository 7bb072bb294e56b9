use async_trait::async_trait;
use tracing::info;

use super::services::HandlerServices;
use super::traits::{HandlerError, JobHandler};
use super::types::{ConvertParams, JobContext};
use crate::storage::FileDescriptor;

/// CONVERT: re-encode a stored file or URL into `outputFormat`
pub struct TranscodeHandler {
    services: HandlerServices,
}

impl TranscodeHandler {
    pub fn new(services: HandlerServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl JobHandler for TranscodeHandler {
    async fn handle(&self, ctx: JobContext) -> Result<FileDescriptor, HandlerError> {
        let params: ConvertParams = ctx.params()?;
        params.validate()?;
        let source = params.source()?;

        let scratch = self.services.scratch()?;
        let input = self.services.fetch_source(&source, scratch.path()).await?;
        let output = scratch
            .path()
            .join(format!("output.{}", params.output_format));

        self.services.tools.transcode(&input, &output).await?;

        let title = params.title.as_deref().or(source.stem());
        let file = self
            .services
            .save_and_notify(&ctx, &output, title, &params.output_format, source.file_ref())
            .await?;

        info!(
            operation_id = %ctx.operation_id,
            format = %params.output_format,
            key = %file.key,
            "Conversion stored"
        );
        Ok(file)
    }
}
