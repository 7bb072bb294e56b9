//! Metrics counters and tracing setup

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::EnvFilter;

use crate::config::TelemetryConfig;

/// Worker counters, served by the health endpoint
#[derive(Debug, Default)]
pub struct Metrics {
    jobs_received: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    poison_messages: AtomicU64,
    failure_notifications: AtomicU64,
    poll_errors: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_received(&self) {
        self.jobs_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_completed(&self) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_completed", "Metric incremented");
    }

    pub fn job_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_failed", "Metric incremented");
    }

    pub fn poison_message(&self) {
        self.poison_messages.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "poison_messages", "Metric incremented");
    }

    pub fn failure_notified(&self) {
        self.failure_notifications.fetch_add(1, Ordering::Relaxed);
    }

    pub fn poll_error(&self) {
        self.poll_errors.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "poll_errors", "Metric incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_received: self.jobs_received.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            poison_messages: self.poison_messages.load(Ordering::Relaxed),
            failure_notifications: self.failure_notifications.load(Ordering::Relaxed),
            poll_errors: self.poll_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub jobs_received: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub poison_messages: u64,
    pub failure_notifications: u64,
    pub poll_errors: u64,
}

/// Install the global subscriber
///
/// `RUST_LOG` wins over `[telemetry] log_level`. Calling this twice keeps
/// the first subscriber.
pub fn init_tracing(config: &TelemetryConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if let Err(e) = result {
        tracing::debug!(error = %e, "Tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_snapshot() {
        let metrics = Metrics::new();
        metrics.job_received();
        metrics.job_received();
        metrics.job_completed();
        metrics.job_failed();
        metrics.poll_error();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.jobs_received, 2);
        assert_eq!(snapshot.jobs_completed, 1);
        assert_eq!(snapshot.jobs_failed, 1);
        assert_eq!(snapshot.poll_errors, 1);
        assert_eq!(snapshot.poison_messages, 0);
    }

    #[test]
    fn test_init_tracing_twice_is_harmless() {
        let config = TelemetryConfig::default();
        init_tracing(&config);
        init_tracing(&config);
    }
}
