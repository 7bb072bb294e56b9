use axum::{Json, http::StatusCode, response::IntoResponse};
use thiserror::Error;

use super::models::ErrorResponse;
use crate::ledger::LedgerError;
use crate::queue::{BrokerError, BrokerErrorKind};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Broker(e) => match e.kind {
                BrokerErrorKind::AlreadyExists => StatusCode::CONFLICT,
                BrokerErrorKind::QueueNotFound => StatusCode::NOT_FOUND,
                BrokerErrorKind::ReceiptHandleInvalid => StatusCode::GONE,
                BrokerErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
                BrokerErrorKind::Throttled => StatusCode::TOO_MANY_REQUESTS,
                BrokerErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            },
            ApiError::Ledger(LedgerError::OperationNotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Ledger(LedgerError::TerminalState { .. }) => StatusCode::CONFLICT,
            ApiError::Ledger(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Broker(e) => e.kind.code(),
            ApiError::Ledger(LedgerError::OperationNotFound(_)) => "OPERATION_NOT_FOUND",
            ApiError::Ledger(LedgerError::TerminalState { .. }) => "TERMINAL_STATE",
            ApiError::Ledger(_) => "LEDGER_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: match &self {
                ApiError::Broker(e) => e.message.clone(),
                ApiError::Ledger(e) => e.to_string(),
            },
            status: match &self {
                ApiError::Ledger(LedgerError::TerminalState { status, .. }) => Some(*status),
                _ => None,
            },
        };

        (status, Json(body)).into_response()
    }
}
