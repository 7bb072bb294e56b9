use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::traits::HandlerError;
use crate::jobs::JobType;
use crate::storage::ObjectRef;

/// Everything a handler learns about the job it runs
#[derive(Debug, Clone)]
pub struct JobContext {
    pub operation_id: String,
    pub job_type: JobType,
    pub params: Value,
    /// Deliveries so far, including this one
    pub receive_count: u32,
}

impl JobContext {
    pub fn params<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        decode_params(&self.params)
    }
}

pub fn decode_params<T: DeserializeOwned>(params: &Value) -> Result<T, HandlerError> {
    serde_json::from_value(params.clone()).map_err(|e| HandlerError::InvalidParams(e.to_string()))
}

/// Params for DOWNLOAD_FACEBOOK and DOWNLOAD_YOUTUBE
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadParams {
    pub url: String,
    pub title: Option<String>,
    pub format: Option<String>,
}

impl DownloadParams {
    pub fn validate(&self) -> Result<(), HandlerError> {
        let url = reqwest::Url::parse(&self.url)
            .map_err(|e| HandlerError::InvalidParams(format!("url: {}", e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(HandlerError::InvalidParams(format!(
                "url scheme {} not supported",
                url.scheme()
            )));
        }
        if let Some(format) = &self.format {
            validate_format(format)?;
        }
        Ok(())
    }
}

/// Params for CONVERT
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertParams {
    pub source_s3_file: Option<ObjectRef>,
    pub source_url: Option<String>,
    pub output_format: String,
    pub title: Option<String>,
}

impl ConvertParams {
    pub fn source(&self) -> Result<SourceRef, HandlerError> {
        SourceRef::pick(self.source_s3_file.as_ref(), self.source_url.as_deref())
    }

    pub fn validate(&self) -> Result<(), HandlerError> {
        self.source()?;
        validate_format(&self.output_format)
    }
}

/// Params for EXTRACT
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractParams {
    pub source_s3_file: Option<ObjectRef>,
    pub source_url: Option<String>,
    #[serde(default = "default_audio_format")]
    pub output_format: String,
    pub title: Option<String>,
}

impl ExtractParams {
    pub fn source(&self) -> Result<SourceRef, HandlerError> {
        SourceRef::pick(self.source_s3_file.as_ref(), self.source_url.as_deref())
    }

    pub fn validate(&self) -> Result<(), HandlerError> {
        self.source()?;
        validate_format(&self.output_format)
    }
}

fn default_audio_format() -> String {
    "mp3".to_string()
}

/// Where a convert/extract job reads its input from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRef {
    Stored(ObjectRef),
    Url(String),
}

impl SourceRef {
    fn pick(stored: Option<&ObjectRef>, url: Option<&str>) -> Result<Self, HandlerError> {
        match (stored, url) {
            (Some(stored), None) => Ok(SourceRef::Stored(stored.clone())),
            (None, Some(url)) => Ok(SourceRef::Url(url.to_string())),
            (Some(_), Some(_)) => Err(HandlerError::InvalidParams(
                "sourceS3File and sourceUrl are mutually exclusive".to_string(),
            )),
            (None, None) => Err(HandlerError::InvalidParams(
                "one of sourceS3File or sourceUrl is required".to_string(),
            )),
        }
    }

    /// Reference forwarded in the completion notification
    pub fn file_ref(&self) -> Option<ObjectRef> {
        match self {
            SourceRef::Stored(stored) => Some(stored.clone()),
            SourceRef::Url(_) => None,
        }
    }

    /// Extension of the source, if its name carries one
    pub fn extension(&self) -> Option<&str> {
        let name = match self {
            SourceRef::Stored(stored) => stored.key.as_str(),
            SourceRef::Url(url) => url.split(['?', '#']).next().unwrap_or(url),
        };
        let file = name.rsplit('/').next()?;
        let (stem, ext) = file.rsplit_once('.')?;
        (!stem.is_empty() && !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .then_some(ext)
    }

    /// Name used for the artifact when the job carries no title
    pub fn stem(&self) -> Option<&str> {
        match self {
            SourceRef::Stored(stored) => {
                let file = stored.key.rsplit('/').next()?;
                let stem = file.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(file);
                (!stem.is_empty()).then_some(stem)
            }
            SourceRef::Url(_) => None,
        }
    }
}

/// Output formats are short alphanumeric extensions
pub fn validate_format(format: &str) -> Result<(), HandlerError> {
    if format.is_empty() || format.len() > 8 || !format.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return Err(HandlerError::InvalidParams(format!(
            "unsupported output format {:?}",
            format
        )));
    }
    Ok(())
}

/// Decode and validate params for a job type without running anything
pub fn validate_params(job_type: JobType, params: &Value) -> Result<(), HandlerError> {
    match job_type {
        JobType::DownloadFacebook | JobType::DownloadYoutube => {
            decode_params::<DownloadParams>(params)?.validate()
        }
        JobType::Convert => decode_params::<ConvertParams>(params)?.validate(),
        JobType::Extract => decode_params::<ExtractParams>(params)?.validate(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_defaults_to_mp3() {
        let params: ExtractParams =
            decode_params(&json!({"sourceS3File": {"bucket": "b", "key": "k"}})).unwrap();

        assert_eq!(params.output_format, "mp3");
        assert_eq!(
            params.source().unwrap(),
            SourceRef::Stored(ObjectRef {
                bucket: "b".to_string(),
                key: "k".to_string()
            })
        );
    }

    #[test]
    fn test_convert_requires_exactly_one_source() {
        let both = json!({
            "sourceS3File": {"bucket": "b", "key": "k"},
            "sourceUrl": "https://example.com/a.mp4",
            "outputFormat": "webm"
        });
        let neither = json!({"outputFormat": "webm"});

        assert!(matches!(
            validate_params(JobType::Convert, &both),
            Err(HandlerError::InvalidParams(_))
        ));
        assert!(matches!(
            validate_params(JobType::Convert, &neither),
            Err(HandlerError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_convert_requires_output_format() {
        let params = json!({"sourceUrl": "https://example.com/a.mp4"});
        assert!(matches!(
            validate_params(JobType::Convert, &params),
            Err(HandlerError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_download_url_validation() {
        assert!(
            validate_params(
                JobType::DownloadYoutube,
                &json!({"url": "https://youtube.com/watch?v=abc"})
            )
            .is_ok()
        );
        assert!(
            validate_params(JobType::DownloadFacebook, &json!({"url": "file:///etc/passwd"}))
                .is_err()
        );
        assert!(validate_params(JobType::DownloadFacebook, &json!({"url": "not a url"})).is_err());
        assert!(
            validate_params(
                JobType::DownloadYoutube,
                &json!({"url": "https://youtube.com/x", "format": "../mp4"})
            )
            .is_err()
        );
    }

    #[test]
    fn test_source_extension_and_stem() {
        let stored = SourceRef::Stored(ObjectRef {
            bucket: "b".to_string(),
            key: "downloads/op-1/clip.webm".to_string(),
        });
        assert_eq!(stored.extension(), Some("webm"));
        assert_eq!(stored.stem(), Some("clip"));

        let url = SourceRef::Url("https://cdn.example.com/v/movie.mp4?sig=abc".to_string());
        assert_eq!(url.extension(), Some("mp4"));
        assert_eq!(url.stem(), None);
        assert_eq!(url.file_ref(), None);

        let bare = SourceRef::Url("https://cdn.example.com/stream".to_string());
        assert_eq!(bare.extension(), None);
    }
}
