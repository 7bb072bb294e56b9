//! Several processes sharing one broker service: every party below has its
//! own HTTP client, the way worker, updater and CLI do in production.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

use mediajobs::api::{self, AppState, RemoteBroker, RemoteOperationStore};
use mediajobs::config::QueueConfig;
use mediajobs::handlers::{Dispatcher, HandlerError, HandlerRegistry, JobContext, JobHandler};
use mediajobs::jobs::JobType;
use mediajobs::ledger::{FjallOperationStore, LedgerError, OperationStatus, OperationStore};
use mediajobs::queue::{BrokerClient, BrokerErrorKind, FjallBroker, QueueAttributes, QueueManager};
use mediajobs::storage::FileDescriptor;
use mediajobs::submit::JobSubmitter;
use mediajobs::worker::{Worker, WorkerConfig};

struct Service {
    url: String,
    _temp: TempDir,
}

impl Service {
    async fn start() -> Self {
        let temp = TempDir::new().unwrap();
        let broker = FjallBroker::open(temp.path().join("broker"))
            .unwrap()
            .with_poll_interval(Duration::from_millis(10));
        let store = FjallOperationStore::open(temp.path().join("ledger")).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(api::serve(
            listener,
            AppState::new(broker, store),
            std::future::pending(),
        ));

        Self { url, _temp: temp }
    }

    fn broker(&self) -> Arc<RemoteBroker> {
        Arc::new(RemoteBroker::connect(&self.url).unwrap())
    }

    fn store(&self) -> Arc<RemoteOperationStore> {
        Arc::new(RemoteOperationStore::connect(&self.url).unwrap())
    }
}

fn job_queue() -> QueueConfig {
    QueueConfig {
        wait_time: Duration::from_millis(200),
        ..QueueConfig::new("media-jobs")
    }
}

fn attributes(visibility_secs: u64) -> QueueAttributes {
    QueueAttributes {
        visibility_timeout: Duration::from_secs(visibility_secs),
        message_retention: Duration::from_secs(3600),
    }
}

struct CountingHandler {
    calls: AtomicUsize,
}

#[async_trait]
impl JobHandler for CountingHandler {
    async fn handle(&self, ctx: JobContext) -> Result<FileDescriptor, HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(FileDescriptor {
            bucket: "b".to_string(),
            key: format!("extracted/{}/k.mp3", ctx.operation_id),
            content_type: "audio/mpeg".to_string(),
        })
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn running_worker_sees_job_submitted_elsewhere() {
    let service = Service::start().await;

    let submitter_jobs = QueueManager::new(service.broker(), job_queue());
    submitter_jobs.initialize().await.unwrap();
    let submitter = JobSubmitter::new(service.store(), submitter_jobs);

    let handler = Arc::new(CountingHandler {
        calls: AtomicUsize::new(0),
    });
    let mut registry = HandlerRegistry::new();
    registry.register(JobType::Extract, handler.clone());
    let worker = Arc::new(
        Worker::new(
            QueueManager::new(service.broker(), job_queue()),
            Dispatcher::new(registry),
            WorkerConfig::default(),
        )
        .with_store(service.store()),
    );
    let task = tokio::spawn({
        let worker = worker.clone();
        async move { worker.start().await }
    });

    // let the worker settle into its long poll before anything is queued
    tokio::time::sleep(Duration::from_millis(300)).await;
    let operation = submitter
        .submit(
            "user-1",
            JobType::Extract,
            json!({"sourceS3File": {"bucket": "b", "key": "k"}, "outputFormat": "mp3"}),
        )
        .await
        .unwrap();

    let metrics = worker.metrics();
    tokio::time::timeout(Duration::from_secs(10), async {
        while metrics.snapshot().jobs_completed < 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("worker never picked up the submitted job");
    worker.shutdown();
    task.await.unwrap().unwrap();

    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    let seen = service.store().get(&operation.id).await.unwrap().unwrap();
    assert_eq!(seen.status, OperationStatus::Processing);
    assert_eq!(seen.user_id, "user-1");

    let depth = service.broker().depth("media-jobs").await.unwrap();
    assert_eq!((depth.visible, depth.in_flight), (0, 0));
}

#[tokio::test]
async fn visibility_timeout_keeps_consumers_apart() {
    let service = Service::start().await;
    let (first, second) = (service.broker(), service.broker());

    first.create_queue("jobs", attributes(30)).await.unwrap();
    second.send("jobs", "only-once".to_string()).await.unwrap();

    let taken = first.receive("jobs", 10, Duration::ZERO).await.unwrap();
    assert_eq!(taken.len(), 1);
    assert_eq!(taken[0].body, "only-once");
    assert_eq!(taken[0].receive_count, 1);

    let nothing = second.receive("jobs", 10, Duration::ZERO).await.unwrap();
    assert!(nothing.is_empty());

    second.delete("jobs", &taken[0].receipt_handle).await.unwrap();
    let depth = first.depth("jobs").await.unwrap();
    assert_eq!((depth.visible, depth.in_flight), (0, 0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn long_poll_wakes_on_send_from_another_client() {
    let service = Service::start().await;
    let (consumer, producer) = (service.broker(), service.broker());
    consumer.create_queue("jobs", attributes(30)).await.unwrap();

    let poll = tokio::spawn(async move {
        consumer
            .receive("jobs", 1, Duration::from_secs(5))
            .await
            .unwrap()
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    producer.send("jobs", "wake".to_string()).await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(2), poll)
        .await
        .expect("long poll did not return early")
        .unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].body, "wake");
}

#[tokio::test]
async fn broker_error_kinds_survive_the_wire() {
    let service = Service::start().await;
    let broker = service.broker();
    broker.create_queue("jobs", attributes(0)).await.unwrap();

    let err = broker.create_queue("jobs", attributes(0)).await.unwrap_err();
    assert_eq!(err.kind, BrokerErrorKind::AlreadyExists);

    let err = broker.queue_info("missing").await.unwrap_err();
    assert_eq!(err.kind, BrokerErrorKind::QueueNotFound);

    // visibility 0: the second receive redelivers and invalidates the first receipt
    broker.send("jobs", "m".to_string()).await.unwrap();
    let stale = broker.receive("jobs", 1, Duration::ZERO).await.unwrap();
    let fresh = broker.receive("jobs", 1, Duration::ZERO).await.unwrap();
    assert_eq!(fresh[0].receive_count, 2);

    let err = broker
        .delete("jobs", &stale[0].receipt_handle)
        .await
        .unwrap_err();
    assert_eq!(err.kind, BrokerErrorKind::ReceiptHandleInvalid);
    broker.delete("jobs", &fresh[0].receipt_handle).await.unwrap();

    let oversized = "x".repeat(mediajobs::queue::MAX_MESSAGE_BYTES + 1);
    let err = broker.send("jobs", oversized).await.unwrap_err();
    assert_eq!(err.kind, BrokerErrorKind::InvalidRequest);
}

#[tokio::test]
async fn ledger_errors_survive_the_wire() {
    let service = Service::start().await;
    let store = service.store();

    assert!(store.get("no-such-operation").await.unwrap().is_none());
    let err = store
        .update_status("no-such-operation", OperationStatus::Completed, Value::Null)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::OperationNotFound(ref id) if id == "no-such-operation"));

    let op = store
        .create("user-2", JobType::Convert, json!({"params": {"outputFormat": "mp4"}}))
        .await
        .unwrap();
    store
        .update_status(&op.id, OperationStatus::Completed, json!({"event": "CONVERSION_COMPLETE"}))
        .await
        .unwrap();

    let err = store
        .update_status(&op.id, OperationStatus::Processing, Value::Null)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::TerminalState { status: OperationStatus::Completed, .. }
    ));
    assert!(err.is_permanent());

    let listed = store.list(Some("user-2"), 10).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].metadata["event"], "CONVERSION_COMPLETE");
    assert_eq!(listed[0].metadata["params"]["outputFormat"], "mp4");
}

#[tokio::test]
async fn unreachable_service_is_transient() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let err = RemoteBroker::connect(&url)
        .unwrap()
        .send("jobs", "m".to_string())
        .await
        .unwrap_err();
    assert_eq!(err.kind, BrokerErrorKind::Unavailable);
    assert!(err.kind.is_transient());

    let err = RemoteOperationStore::connect(&url)
        .unwrap()
        .get("op")
        .await
        .unwrap_err();
    assert!(!err.is_permanent());
}
