//! Job wire format and job types
//!
//! A job message body is JSON:
//!
//! ```json
//! {
//!   "operationId": "0192f8a4-7c1e-7d3a-9b61-2f0a4c9e8d11",
//!   "type": "EXTRACT",
//!   "params": { "sourceS3File": { "bucket": "b", "key": "k" }, "outputFormat": "mp3" }
//! }
//! ```
//!
//! The `type` stays a plain string on the wire and in [`JobMessage`]; it is
//! only parsed into a [`JobType`] by the dispatcher, so an unknown type fails
//! that one message rather than the whole receive.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    DownloadFacebook,
    DownloadYoutube,
    Convert,
    Extract,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown job type: {0}")]
pub struct UnknownJobType(pub String);

impl JobType {
    pub const ALL: [JobType; 4] = [
        JobType::DownloadFacebook,
        JobType::DownloadYoutube,
        JobType::Convert,
        JobType::Extract,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::DownloadFacebook => "DOWNLOAD_FACEBOOK",
            JobType::DownloadYoutube => "DOWNLOAD_YOUTUBE",
            JobType::Convert => "CONVERT",
            JobType::Extract => "EXTRACT",
        }
    }

    /// Notification type published when a job of this type succeeds
    pub fn completion_event(&self) -> &'static str {
        match self {
            JobType::DownloadFacebook => "FACEBOOK_DOWNLOAD_COMPLETE",
            JobType::DownloadYoutube => "YOUTUBE_DOWNLOAD_COMPLETE",
            JobType::Convert => "CONVERSION_COMPLETE",
            JobType::Extract => "AUDIO_EXTRACTION_COMPLETE",
        }
    }

    /// Notification type published when the final delivery attempt fails
    pub fn failure_event(&self) -> &'static str {
        match self {
            JobType::DownloadFacebook => "FACEBOOK_DOWNLOAD_FAILED",
            JobType::DownloadYoutube => "YOUTUBE_DOWNLOAD_FAILED",
            JobType::Convert => "CONVERSION_FAILED",
            JobType::Extract => "AUDIO_EXTRACTION_FAILED",
        }
    }

    /// Storage prefix for artifacts produced by this job type
    pub fn storage_prefix(&self) -> &'static str {
        match self {
            JobType::DownloadFacebook | JobType::DownloadYoutube => "downloads",
            JobType::Convert => "converted",
            JobType::Extract => "extracted",
        }
    }
}

impl FromStr for JobType {
    type Err = UnknownJobType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobType::ALL
            .into_iter()
            .find(|job_type| job_type.as_str() == s)
            .ok_or_else(|| UnknownJobType(s.to_string()))
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job message body as it travels through the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMessage {
    pub operation_id: String,
    #[serde(rename = "type")]
    pub job_type: String,
    #[serde(default)]
    pub params: Value,
}

impl JobMessage {
    pub fn new(operation_id: impl Into<String>, job_type: JobType, params: Value) -> Self {
        Self {
            operation_id: operation_id.into(),
            job_type: job_type.as_str().to_string(),
            params,
        }
    }
}

/// Decoded body of a delivered message
#[derive(Debug, Clone, PartialEq)]
pub enum JobBody {
    Valid(JobMessage),
    /// Body that is not a job message; kept so the message is never silently dropped
    Malformed { raw: String, error: String },
}

impl JobBody {
    /// `operationId` and job type, recovered as far as the body allows
    ///
    /// A malformed body is scanned as loose JSON so a message with, say,
    /// non-object params can still be attributed to its operation.
    pub fn salvage(&self) -> (Option<String>, Option<JobType>) {
        match self {
            JobBody::Valid(message) => (
                Some(message.operation_id.clone()).filter(|id| !id.is_empty()),
                message.job_type.parse().ok(),
            ),
            JobBody::Malformed { raw, .. } => {
                let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(raw) else {
                    return (None, None);
                };
                let operation_id = fields
                    .get("operationId")
                    .and_then(Value::as_str)
                    .filter(|id| !id.is_empty())
                    .map(str::to_string);
                let job_type = fields
                    .get("type")
                    .and_then(Value::as_str)
                    .and_then(|t| t.parse().ok());
                (operation_id, job_type)
            }
        }
    }
}

/// A job as delivered by the queue, valid between receive and ack
#[derive(Debug, Clone)]
pub struct Job {
    pub message_id: String,
    pub receipt_handle: String,
    pub receive_count: u32,
    pub body: JobBody,
}

impl Job {
    pub fn decode(
        message_id: String,
        receipt_handle: String,
        receive_count: u32,
        raw: String,
    ) -> Self {
        let body = match serde_json::from_str::<JobMessage>(&raw) {
            Ok(message) => JobBody::Valid(message),
            Err(e) => JobBody::Malformed {
                raw,
                error: e.to_string(),
            },
        };

        Self {
            message_id,
            receipt_handle,
            receive_count,
            body,
        }
    }

    pub fn operation_id(&self) -> Option<&str> {
        match &self.body {
            JobBody::Valid(message) => Some(&message.operation_id),
            JobBody::Malformed { .. } => None,
        }
    }
}
