//! Job worker
//!
//! Long-polls the job queue, hands each job to the dispatcher and acks it
//! once the handler's side effects are committed. Failed jobs stay on the
//! queue for the broker to redeliver and, eventually, dead-letter.

pub mod http;
pub mod runner;

use std::time::Duration;

use crate::config::WorkerSettings;

pub use runner::{ShutdownHandle, Worker, WorkerError};

/// Worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Pause after a failed receive before polling again
    pub error_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            error_backoff: Duration::from_secs(5),
        }
    }
}

impl From<&WorkerSettings> for WorkerConfig {
    fn from(settings: &WorkerSettings) -> Self {
        Self {
            error_backoff: settings.error_backoff.as_duration(),
        }
    }
}
