use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// What went wrong at the broker, discriminated by case rather than by message text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BrokerErrorKind {
    /// Queue already exists (success for idempotent provisioning)
    AlreadyExists,
    /// Queue does not exist
    QueueNotFound,
    /// Receipt handle is unknown, stale, or already used
    ReceiptHandleInvalid,
    /// Request rejected by the broker (bad attributes, oversized body)
    InvalidRequest,
    /// Broker asked us to slow down
    Throttled,
    /// Broker unreachable or its storage failed
    Unavailable,
}

impl BrokerErrorKind {
    /// Worth retrying after a pause
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Throttled | Self::Unavailable)
    }

    pub const ALL: [BrokerErrorKind; 6] = [
        Self::AlreadyExists,
        Self::QueueNotFound,
        Self::ReceiptHandleInvalid,
        Self::InvalidRequest,
        Self::Throttled,
        Self::Unavailable,
    ];

    /// Error code as carried in broker service responses
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::QueueNotFound => "QUEUE_NOT_FOUND",
            Self::ReceiptHandleInvalid => "RECEIPT_HANDLE_INVALID",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::Throttled => "THROTTLED",
            Self::Unavailable => "UNAVAILABLE",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.code() == code)
    }
}

impl fmt::Display for BrokerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AlreadyExists => "already exists",
            Self::QueueNotFound => "queue not found",
            Self::ReceiptHandleInvalid => "receipt handle invalid",
            Self::InvalidRequest => "invalid request",
            Self::Throttled => "throttled",
            Self::Unavailable => "unavailable",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
#[error("broker {kind}: {message}")]
pub struct BrokerError {
    pub kind: BrokerErrorKind,
    pub message: String,
}

impl BrokerError {
    pub fn new(kind: BrokerErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn already_exists(queue: &str) -> Self {
        Self::new(BrokerErrorKind::AlreadyExists, queue)
    }

    pub fn queue_not_found(queue: &str) -> Self {
        Self::new(BrokerErrorKind::QueueNotFound, queue)
    }

    pub fn receipt_invalid(receipt: &str) -> Self {
        Self::new(BrokerErrorKind::ReceiptHandleInvalid, receipt)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(BrokerErrorKind::Unavailable, message)
    }

    pub fn is_already_exists(&self) -> bool {
        self.kind == BrokerErrorKind::AlreadyExists
    }
}

impl From<fjall::Error> for BrokerError {
    fn from(value: fjall::Error) -> Self {
        Self::unavailable(format!("fjall: {}", value))
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(value: serde_json::Error) -> Self {
        Self::unavailable(format!("corrupt broker record: {}", value))
    }
}

/// Errors from the queue manager
#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("Failed to encode job: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Queue '{0}' has no redrive policy after provisioning")]
    MissingRedrivePolicy(String),
}

impl QueueError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Broker(e) if e.kind.is_transient())
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_match_serde_and_parse_back() {
        for kind in BrokerErrorKind::ALL {
            assert_eq!(serde_json::to_value(kind).unwrap(), kind.code());
            assert_eq!(BrokerErrorKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(BrokerErrorKind::from_code("TERMINAL_STATE"), None);
    }
}
