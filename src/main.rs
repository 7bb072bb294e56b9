mod cli;

use clap::Parser;
use cli::{BrokerArgs, Cli, Commands, LimitArgs, OperationsArgs, SubmitArgs, WorkerArgs};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

use mediajobs::api::{self, AppState, RemoteBroker, RemoteOperationStore};
use mediajobs::config::Config;
use mediajobs::handlers::{Dispatcher, HandlerRegistry, HandlerServices, ProcessTools};
use mediajobs::ledger::{FjallOperationStore, OperationStore, StatusUpdater};
use mediajobs::messaging::NotificationPublisher;
use mediajobs::observability::{Metrics, init_tracing};
use mediajobs::queue::{FjallBroker, QueueManager};
use mediajobs::server;
use mediajobs::storage::StorageGateway;
use mediajobs::submit::JobSubmitter;
use mediajobs::worker::http::{HttpClient, HttpConfig};
use mediajobs::worker::{Worker, WorkerConfig};

type AnyError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), AnyError> {
    let cli = Cli::parse();

    let config = match cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    init_tracing(&config.telemetry);

    match cli.command {
        Commands::Broker(args) => run_broker(&config, args).await?,
        Commands::Worker(args) => run_worker(&config, args).await?,
        Commands::Updater => run_updater(&config).await?,
        Commands::Provision => provision(&config).await?,
        Commands::Submit(args) => submit(&config, args).await?,
        Commands::Status(args) => {
            let store = RemoteOperationStore::connect(&config.broker.url)?;
            match store.get(&args.operation_id).await? {
                Some(operation) => println!("{}", serde_json::to_string_pretty(&operation)?),
                None => return Err(format!("operation {} not found", args.operation_id).into()),
            }
        }
        Commands::Operations(args) => list_operations(&config, args).await?,
        Commands::Dlq(args) => inspect_dlq(&config, args).await?,
        Commands::Redrive(args) => redrive(&config, args).await?,
        Commands::Config => print!("{}", toml::to_string_pretty(&config)?),
    }

    Ok(())
}

/// The single process holding the fjall broker and ledger open
async fn run_broker(config: &Config, args: BrokerArgs) -> Result<(), AnyError> {
    let broker = FjallBroker::open(&config.broker.path)?
        .with_poll_interval(Duration::from_millis(config.broker.poll_interval_ms));
    let store = FjallOperationStore::open(&config.ledger.path)?;
    info!(
        broker = %config.broker.path.display(),
        ledger = %config.ledger.path.display(),
        "Broker and ledger opened"
    );

    let listen = args.listen.unwrap_or(config.broker.listen);
    api::run(listen, AppState::new(broker, store), server::shutdown_signal()).await
}

fn connect_broker(config: &Config) -> Result<Arc<RemoteBroker>, AnyError> {
    Ok(Arc::new(RemoteBroker::connect(&config.broker.url)?))
}

fn connect_store(config: &Config) -> Result<Arc<RemoteOperationStore>, AnyError> {
    Ok(Arc::new(RemoteOperationStore::connect(&config.broker.url)?))
}

async fn run_worker(config: &Config, args: WorkerArgs) -> Result<(), AnyError> {
    let broker = connect_broker(config)?;
    let store: Arc<dyn OperationStore> = connect_store(config)?;

    let events = QueueManager::new(broker.clone(), config.notification_queue()?);
    events.initialize().await?;
    let notifier = NotificationPublisher::new(events.clone());

    let services = HandlerServices {
        storage: StorageGateway::from_config(&config.storage),
        notifier: notifier.clone(),
        tools: Arc::new(ProcessTools::from_config(&config.tools)),
        http: Arc::new(HttpClient::new(HttpConfig::default(), config.tools.proxy.as_deref())?),
        scratch_dir: config.worker.scratch_dir.clone(),
    };
    let dispatcher = Dispatcher::new(HandlerRegistry::with_media_handlers(services));

    let metrics = Arc::new(Metrics::new());
    let worker = Worker::new(
        QueueManager::new(broker.clone(), config.job_queue()?),
        dispatcher,
        WorkerConfig::from(&config.worker),
    )
    .with_notifier(notifier)
    .with_store(store.clone())
    .with_metrics(metrics.clone());

    let (stop_tx, stop_rx) = watch::channel(false);

    let updater = args.with_updater.then(|| {
        let updater = StatusUpdater::new(events, store)
            .with_error_backoff(config.worker.error_backoff.as_duration());
        let stop = stop_rx.clone();
        tokio::spawn(async move { updater.run(stop).await })
    });

    let health_addr = args.health_addr.unwrap_or(config.worker.health_addr);
    let mut server_stop = stop_rx.clone();
    let health = tokio::spawn(server::run(health_addr, metrics, async move {
        let _ = server_stop.wait_for(|stopped| *stopped).await;
    }));

    let handle = worker.shutdown_handle();
    tokio::spawn(async move {
        server::shutdown_signal().await;
        handle.shutdown();
    });

    worker.start().await?;

    stop_tx.send_replace(true);
    health.await??;
    if let Some(updater) = updater {
        updater.await?;
    }

    info!("Shutdown complete");
    Ok(())
}

async fn run_updater(config: &Config) -> Result<(), AnyError> {
    let events = QueueManager::new(connect_broker(config)?, config.notification_queue()?);
    events.initialize().await?;

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        server::shutdown_signal().await;
        stop_tx.send_replace(true);
    });

    StatusUpdater::new(events, connect_store(config)?)
        .with_error_backoff(config.worker.error_backoff.as_duration())
        .run(stop_rx)
        .await;

    Ok(())
}

async fn provision(config: &Config) -> Result<(), AnyError> {
    let broker = connect_broker(config)?;

    for queue in [config.job_queue()?, config.notification_queue()?] {
        let manager = QueueManager::new(broker.clone(), queue);
        manager.initialize().await?;
        let queue = manager.config();
        println!(
            "{} -> {} (max receives {}, visibility {}s)",
            queue.queue_name,
            queue.dlq_name,
            queue.max_receive_count,
            queue.visibility_timeout.as_secs()
        );
    }

    Ok(())
}

async fn submit(config: &Config, args: SubmitArgs) -> Result<(), AnyError> {
    let params: serde_json::Value = serde_json::from_str(&args.params)?;

    let submitter = JobSubmitter::new(
        connect_store(config)?,
        QueueManager::new(connect_broker(config)?, config.job_queue()?),
    );

    let operation = submitter.submit(&args.user, args.job_type, params).await?;

    println!("{}", serde_json::to_string_pretty(&operation)?);
    Ok(())
}

async fn list_operations(config: &Config, args: OperationsArgs) -> Result<(), AnyError> {
    let store = connect_store(config)?;
    let operations = store.list(args.user.as_deref(), args.limit).await?;

    for op in &operations {
        println!(
            "{}  {:<16}  {:<10}  {}  {}",
            op.id,
            op.job_type.as_str(),
            op.status.as_str(),
            op.user_id,
            op.updated_at.to_rfc3339()
        );
    }
    Ok(())
}

async fn inspect_dlq(config: &Config, args: LimitArgs) -> Result<(), AnyError> {
    let broker = connect_broker(config)?;
    let queue = config.job_queue()?;

    let depth = broker.depth(&queue.dlq_name).await?;
    println!("{}: {} visible, {} in flight", queue.dlq_name, depth.visible, depth.in_flight);

    let manager = QueueManager::new(broker, queue);
    for message in manager.dead_letters(args.limit).await? {
        println!(
            "{}  sent {}  receives {}  {}",
            message.message_id,
            message.sent_at.to_rfc3339(),
            message.receive_count,
            message.body
        );
    }
    Ok(())
}

async fn redrive(config: &Config, args: LimitArgs) -> Result<(), AnyError> {
    let manager = QueueManager::new(connect_broker(config)?, config.job_queue()?);

    let moved = manager.redrive_dead_letters(args.limit).await?;

    println!("Moved {} message(s) back to {}", moved, manager.queue_name());
    Ok(())
}
