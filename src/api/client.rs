//! Clients for processes that reach the broker service over HTTP

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use super::models::{
    CreateOperationRequest, CreateQueueRequest, CreateQueueResponse, ErrorResponse,
    ListOperationsQuery, PeekQuery, ReceiveRequest, SendMessageRequest, SendMessageResponse,
    UpdateStatusRequest,
};
use crate::jobs::JobType;
use crate::ledger::{LedgerError, Operation, OperationStatus, OperationStore};
use crate::queue::{
    BrokerClient, BrokerError, BrokerErrorKind, PeekedMessage, QueueAttributes, QueueDepth,
    QueueInfo, ReceivedMessage, RedrivePolicy,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Slack on top of a long poll's wait before the request is abandoned
const RECEIVE_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("invalid broker service URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// A failed call, before it is mapped onto the caller's error type
#[derive(Debug)]
enum CallError {
    Transport(reqwest::Error),
    Rejected {
        status: StatusCode,
        error: ErrorResponse,
    },
}

/// Map a broker call failure back onto [`BrokerError`]
fn broker_error(value: CallError) -> BrokerError {
    match value {
        CallError::Transport(e) => {
            BrokerError::unavailable(format!("broker service unreachable: {}", e))
        }
        CallError::Rejected { status, error } => {
            let kind = BrokerErrorKind::from_code(&error.code).unwrap_or(match status {
                StatusCode::TOO_MANY_REQUESTS => BrokerErrorKind::Throttled,
                s if s.is_client_error() => BrokerErrorKind::InvalidRequest,
                _ => BrokerErrorKind::Unavailable,
            });
            BrokerError::new(kind, error.message)
        }
    }
}

/// Map a ledger call failure back onto [`LedgerError`]
fn ledger_error(value: CallError, id: &str) -> LedgerError {
    match value {
        CallError::Transport(e) => LedgerError::Remote(format!("ledger unreachable: {}", e)),
        CallError::Rejected { error, .. } => match (error.code.as_str(), error.status) {
            ("OPERATION_NOT_FOUND", _) => LedgerError::OperationNotFound(id.to_string()),
            ("TERMINAL_STATE", Some(status)) => LedgerError::TerminalState {
                id: id.to_string(),
                status,
            },
            _ => LedgerError::Remote(error.message),
        },
    }
}

/// Shared HTTP plumbing for the broker and ledger clients
#[derive(Clone)]
struct ServiceClient {
    http: Client,
    base: Url,
}

impl ServiceClient {
    fn new(base_url: &str) -> Result<Self, ConnectError> {
        let invalid = |reason: String| ConnectError::InvalidUrl {
            url: base_url.to_string(),
            reason,
        };
        let base = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
        if base.cannot_be_a_base() || !matches!(base.scheme(), "http" | "https") {
            return Err(invalid("expected an http(s) base URL".to_string()));
        }

        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .no_proxy()
            .build()?;
        Ok(Self { http, base })
    }

    /// Base URL extended by percent-encoded path segments
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Response, CallError> {
        let response = request.send().await.map_err(CallError::Transport)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let error = serde_json::from_str::<ErrorResponse>(&text).unwrap_or(ErrorResponse {
            code: String::new(),
            message: format!("HTTP {}: {}", status, text),
            status: None,
        });
        Err(CallError::Rejected { status, error })
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, CallError> {
        self.execute(request)
            .await?
            .json()
            .await
            .map_err(CallError::Transport)
    }
}

/// [`BrokerClient`] backed by a remote broker service
#[derive(Clone)]
pub struct RemoteBroker {
    client: ServiceClient,
}

impl RemoteBroker {
    pub fn connect(base_url: &str) -> Result<Self, ConnectError> {
        Ok(Self {
            client: ServiceClient::new(base_url)?,
        })
    }

    /// Count visible and in-flight messages of a queue
    pub async fn depth(&self, queue: &str) -> Result<QueueDepth, BrokerError> {
        let url = self.client.url(&["queues", queue, "depth"]);
        self.client
            .fetch(self.client.http.get(url))
            .await
            .map_err(broker_error)
    }
}

#[async_trait]
impl BrokerClient for RemoteBroker {
    async fn create_queue(
        &self,
        name: &str,
        attributes: QueueAttributes,
    ) -> Result<String, BrokerError> {
        let request = CreateQueueRequest {
            name: name.to_string(),
            attributes,
        };
        let response: CreateQueueResponse = self
            .client
            .fetch(self.client.http.post(self.client.url(&["queues"])).json(&request))
            .await
            .map_err(broker_error)?;
        Ok(response.queue_id)
    }

    async fn set_queue_attributes(
        &self,
        name: &str,
        attributes: QueueAttributes,
    ) -> Result<(), BrokerError> {
        let url = self.client.url(&["queues", name, "attributes"]);
        self.client
            .execute(self.client.http.put(url).json(&attributes))
            .await
            .map_err(broker_error)?;
        Ok(())
    }

    async fn set_redrive_policy(&self, name: &str, policy: RedrivePolicy) -> Result<(), BrokerError> {
        let url = self.client.url(&["queues", name, "redrive-policy"]);
        self.client
            .execute(self.client.http.put(url).json(&policy))
            .await
            .map_err(broker_error)?;
        Ok(())
    }

    async fn queue_info(&self, name: &str) -> Result<QueueInfo, BrokerError> {
        let url = self.client.url(&["queues", name]);
        self.client
            .fetch(self.client.http.get(url))
            .await
            .map_err(broker_error)
    }

    async fn send(&self, queue: &str, body: String) -> Result<String, BrokerError> {
        let url = self.client.url(&["queues", queue, "messages"]);
        let response: SendMessageResponse = self
            .client
            .fetch(self.client.http.post(url).json(&SendMessageRequest { body }))
            .await
            .map_err(broker_error)?;
        Ok(response.message_id)
    }

    async fn receive(
        &self,
        queue: &str,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, BrokerError> {
        let url = self.client.url(&["queues", queue, "receive"]);
        let request = ReceiveRequest {
            max_messages,
            wait_ms: u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
        };
        let builder = self
            .client
            .http
            .post(url)
            .timeout(wait.saturating_add(RECEIVE_GRACE))
            .json(&request);
        self.client.fetch(builder).await.map_err(broker_error)
    }

    async fn delete(&self, queue: &str, receipt_handle: &str) -> Result<(), BrokerError> {
        let url = self.client.url(&["queues", queue, "receipts", receipt_handle]);
        self.client
            .execute(self.client.http.delete(url))
            .await
            .map_err(broker_error)?;
        Ok(())
    }

    async fn peek(&self, queue: &str, limit: usize) -> Result<Vec<PeekedMessage>, BrokerError> {
        let url = self.client.url(&["queues", queue, "peek"]);
        self.client
            .fetch(self.client.http.get(url).query(&PeekQuery { limit }))
            .await
            .map_err(broker_error)
    }
}

/// [`OperationStore`] backed by the broker service's ledger
#[derive(Clone)]
pub struct RemoteOperationStore {
    client: ServiceClient,
}

impl RemoteOperationStore {
    pub fn connect(base_url: &str) -> Result<Self, ConnectError> {
        Ok(Self {
            client: ServiceClient::new(base_url)?,
        })
    }

    /// Newest operations first, optionally only one user's
    pub async fn list(&self, user: Option<&str>, limit: usize) -> Result<Vec<Operation>, LedgerError> {
        let query = ListOperationsQuery {
            user: user.map(str::to_string),
            limit,
        };
        let url = self.client.url(&["operations"]);
        self.client
            .fetch(self.client.http.get(url).query(&query))
            .await
            .map_err(|e| ledger_error(e, ""))
    }
}

#[async_trait]
impl OperationStore for RemoteOperationStore {
    async fn create(&self, user_id: &str, job_type: JobType, metadata: Value) -> Result<Operation, LedgerError> {
        let request = CreateOperationRequest {
            user_id: user_id.to_string(),
            job_type,
            metadata,
        };
        let url = self.client.url(&["operations"]);
        self.client
            .fetch(self.client.http.post(url).json(&request))
            .await
            .map_err(|e| ledger_error(e, ""))
    }

    async fn update_status(
        &self,
        id: &str,
        status: OperationStatus,
        metadata: Value,
    ) -> Result<Operation, LedgerError> {
        let url = self.client.url(&["operations", id]);
        self.client
            .fetch(
                self.client
                    .http
                    .patch(url)
                    .json(&UpdateStatusRequest { status, metadata }),
            )
            .await
            .map_err(|e| ledger_error(e, id))
    }

    async fn get(&self, id: &str) -> Result<Option<Operation>, LedgerError> {
        let url = self.client.url(&["operations", id]);
        match self.client.fetch(self.client.http.get(url)).await {
            Ok(operation) => Ok(Some(operation)),
            Err(e) => match ledger_error(e, id) {
                LedgerError::OperationNotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_segments_are_encoded() {
        let client = ServiceClient::new("http://127.0.0.1:7400").unwrap();
        assert_eq!(
            client.url(&["queues", "media jobs", "receipts", "a/b"]).as_str(),
            "http://127.0.0.1:7400/queues/media%20jobs/receipts/a%2Fb"
        );

        let prefixed = ServiceClient::new("http://broker.internal/mq/").unwrap();
        assert_eq!(
            prefixed.url(&["operations"]).as_str(),
            "http://broker.internal/mq/operations"
        );
    }

    #[test]
    fn test_rejects_non_http_urls() {
        assert!(matches!(
            RemoteBroker::connect("mailto:ops@example.com"),
            Err(ConnectError::InvalidUrl { .. })
        ));
        assert!(matches!(
            RemoteBroker::connect("not a url"),
            Err(ConnectError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_rejection_without_error_body_maps_by_status() {
        let rejected = |status| CallError::Rejected {
            status,
            error: ErrorResponse {
                code: String::new(),
                message: "plain text".to_string(),
                status: None,
            },
        };

        let err = broker_error(rejected(StatusCode::UNPROCESSABLE_ENTITY));
        assert_eq!(err.kind, BrokerErrorKind::InvalidRequest);
        let err = broker_error(rejected(StatusCode::BAD_GATEWAY));
        assert_eq!(err.kind, BrokerErrorKind::Unavailable);
        assert!(err.kind.is_transient());

        let err = ledger_error(rejected(StatusCode::INTERNAL_SERVER_ERROR), "op");
        assert!(matches!(err, LedgerError::Remote(_)));
        assert!(!err.is_permanent());
    }
}
