use crate::humanize::HumanDuration;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_JOB_QUEUE: &str = "media-jobs";
pub const DEFAULT_NOTIFICATION_QUEUE: &str = "media-notifications";

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default = "default_queues")]
    pub queues: HashMap<String, QueueEntry>,
    #[serde(default)]
    pub worker: WorkerSettings,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            queues: default_queues(),
            worker: WorkerSettings::default(),
            storage: StorageConfig::default(),
            tools: ToolsConfig::default(),
            ledger: LedgerConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

/// Broker service: one process owns the fjall data, the rest connect to `url`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_path")]
    pub path: PathBuf,
    /// How often an idle long poll re-checks for visible messages
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Address the `broker` command serves on
    #[serde(default = "default_broker_listen")]
    pub listen: SocketAddr,
    /// Base URL every other command reaches the broker service at
    #[serde(default = "default_broker_url")]
    pub url: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            path: default_broker_path(),
            poll_interval_ms: default_poll_interval_ms(),
            listen: default_broker_listen(),
            url: default_broker_url(),
        }
    }
}

fn default_broker_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 7400))
}

fn default_broker_url() -> String {
    "http://127.0.0.1:7400".to_string()
}

fn default_broker_path() -> PathBuf {
    PathBuf::from("data/broker")
}

fn default_poll_interval_ms() -> u64 {
    200
}

/// Raw per-queue settings as written in `[queues.<name>]`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueEntry {
    /// Dead-letter queue name, defaults to `<name>-dlq`
    pub dlq_name: Option<String>,
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout: HumanDuration,
    #[serde(default = "default_max_receive_count")]
    pub max_receive_count: u32,
    #[serde(default = "default_wait_time")]
    pub wait_time: HumanDuration,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_message_retention")]
    pub message_retention: HumanDuration,
    #[serde(default = "default_dlq_retention")]
    pub dlq_retention: HumanDuration,
}

impl Default for QueueEntry {
    fn default() -> Self {
        Self {
            dlq_name: None,
            visibility_timeout: default_visibility_timeout(),
            max_receive_count: default_max_receive_count(),
            wait_time: default_wait_time(),
            batch_size: default_batch_size(),
            message_retention: default_message_retention(),
            dlq_retention: default_dlq_retention(),
        }
    }
}

fn default_queues() -> HashMap<String, QueueEntry> {
    HashMap::from([
        (DEFAULT_JOB_QUEUE.to_string(), QueueEntry::default()),
        (DEFAULT_NOTIFICATION_QUEUE.to_string(), QueueEntry::default()),
    ])
}

fn default_visibility_timeout() -> HumanDuration {
    HumanDuration::from_secs(300)
}

fn default_max_receive_count() -> u32 {
    3
}

fn default_wait_time() -> HumanDuration {
    HumanDuration::from_secs(20)
}

fn default_batch_size() -> usize {
    10
}

fn default_message_retention() -> HumanDuration {
    HumanDuration::from_secs(86_400) // 1 day
}

fn default_dlq_retention() -> HumanDuration {
    HumanDuration::from_secs(1_209_600) // 14 days
}

/// Resolved connection parameters for one primary queue and its DLQ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub queue_name: String,
    pub dlq_name: String,
    pub visibility_timeout: Duration,
    pub max_receive_count: u32,
    pub wait_time: Duration,
    pub batch_size: usize,
    pub message_retention: Duration,
    pub dlq_retention: Duration,
}

impl QueueConfig {
    /// Defaults for `name`, with the DLQ named `<name>-dlq`
    pub fn new(name: impl Into<String>) -> Self {
        let queue_name = name.into();
        let entry = QueueEntry::default();
        Self {
            dlq_name: format!("{}-dlq", queue_name),
            queue_name,
            visibility_timeout: entry.visibility_timeout.into(),
            max_receive_count: entry.max_receive_count,
            wait_time: entry.wait_time.into(),
            batch_size: entry.batch_size,
            message_retention: entry.message_retention.into(),
            dlq_retention: entry.dlq_retention.into(),
        }
    }
}

/// Worker loop settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerSettings {
    #[serde(default = "default_job_queue")]
    pub queue: String,
    #[serde(default = "default_notification_queue")]
    pub notification_queue: String,
    /// Pause after a failed poll before trying again
    #[serde(default = "default_error_backoff")]
    pub error_backoff: HumanDuration,
    #[serde(default = "default_health_addr")]
    pub health_addr: SocketAddr,
    /// Parent directory for per-job scratch space (system temp dir when unset)
    pub scratch_dir: Option<PathBuf>,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            queue: default_job_queue(),
            notification_queue: default_notification_queue(),
            error_backoff: default_error_backoff(),
            health_addr: default_health_addr(),
            scratch_dir: None,
        }
    }
}

fn default_job_queue() -> String {
    DEFAULT_JOB_QUEUE.to_string()
}

fn default_notification_queue() -> String {
    DEFAULT_NOTIFICATION_QUEUE.to_string()
}

fn default_error_backoff() -> HumanDuration {
    HumanDuration::from_secs(5)
}

fn default_health_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8081))
}

/// Storage provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    S3,
    #[default]
    Local,
    Memory,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub provider: StorageProvider,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// Root directory for the local provider; each bucket is a subdirectory
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    pub endpoint: Option<String>,
    /// S3 access key (loaded from environment, not from config file)
    #[serde(skip)]
    pub access_key: Option<String>,
    /// S3 secret key (loaded from environment, not from config file)
    #[serde(skip)]
    pub secret_key: Option<String>,
    pub region: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: StorageProvider::Local,
            bucket: default_bucket(),
            root: default_storage_root(),
            endpoint: None,
            access_key: None,
            secret_key: None,
            region: None,
        }
    }
}

fn default_bucket() -> String {
    "mediajobs-artifacts".to_string()
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("data/blobs")
}

/// External media tool locations
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolsConfig {
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,
    #[serde(default = "default_yt_dlp")]
    pub yt_dlp: String,
    /// Used by yt-dlp and the HTTP source fetcher
    pub proxy: Option<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg: default_ffmpeg(),
            yt_dlp: default_yt_dlp(),
            proxy: None,
        }
    }
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

fn default_yt_dlp() -> String {
    "yt-dlp".to_string()
}

/// Operation ledger configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LedgerConfig {
    #[serde(default = "default_ledger_path")]
    pub path: PathBuf,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: default_ledger_path(),
        }
    }
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("data/ledger")
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
