//! Operation records: the caller-visible state of a submitted job
//!
//! An Operation is created PENDING by the submitter, marked PROCESSING by the
//! worker (best effort), and finished COMPLETED or FAILED by the status
//! updater as notifications arrive. Terminal statuses stick: a redelivered
//! job cannot drag a finished operation back to PROCESSING.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mediajobs::ledger::{FjallOperationStore, OperationStore};
//!
//! let store = FjallOperationStore::open("data/ledger")?;
//! let op = store.create("user-1", JobType::Extract, json!({})).await?;
//! let op = store.get(&op.id).await?;
//! ```

pub mod error;
pub mod store;
pub mod updater;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::jobs::JobType;

pub use error::{LedgerError, Result};
pub use store::FjallOperationStore;
pub use updater::{StatusUpdater, UpdaterStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationStatus::Completed | OperationStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "PENDING",
            OperationStatus::Processing => "PROCESSING",
            OperationStatus::Completed => "COMPLETED",
            OperationStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(OperationStatus::Pending),
            "PROCESSING" => Ok(OperationStatus::Processing),
            "COMPLETED" => Ok(OperationStatus::Completed),
            "FAILED" => Ok(OperationStatus::Failed),
            other => Err(format!("unknown operation status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// UUIDv7, also the operationId of the job and its notification
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub status: OperationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Value,
}

#[async_trait]
pub trait OperationStore: Send + Sync {
    /// Create a PENDING operation with a fresh id
    async fn create(&self, user_id: &str, job_type: JobType, metadata: Value) -> Result<Operation>;

    /// Move an operation to `status`, merging `metadata` into what it already has
    ///
    /// Re-applying the current terminal status is accepted; leaving a
    /// terminal status fails with [`LedgerError::TerminalState`].
    async fn update_status(
        &self,
        id: &str,
        status: OperationStatus,
        metadata: Value,
    ) -> Result<Operation>;

    async fn get(&self, id: &str) -> Result<Option<Operation>>;
}

/// Shallow merge of two JSON objects; non-object patches replace the base
pub(crate) fn merge_metadata(base: &mut Value, patch: Value) {
    match (base, patch) {
        (_, Value::Null) => {}
        (Value::Object(base), Value::Object(patch)) => {
            for (key, value) in patch {
                base.insert(key, value);
            }
        }
        (base, patch) => *base = patch,
    }
}
