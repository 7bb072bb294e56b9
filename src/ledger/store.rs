use async_trait::async_trait;
use chrono::Utc;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use serde_json::Value;
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::error::{LedgerError, Result};
use super::{Operation, OperationStatus, OperationStore, merge_metadata};
use crate::jobs::JobType;

/// Fjall-backed operation ledger
///
/// Operation ids are UUIDv7, so key order is creation order and
/// [`recent`](Self::recent) is a reverse scan.
pub struct FjallOperationStore {
    keyspace: Keyspace,
    operations: PartitionHandle,
    /// `{user_id}\0{operation_id}` -> empty
    by_user: PartitionHandle,
    write_lock: Mutex<()>,
}

impl FjallOperationStore {
    /// Open or create a ledger at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Opening operation ledger");

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;
        let operations =
            keyspace.open_partition("operations", PartitionCreateOptions::default())?;
        let by_user = keyspace.open_partition("operations_by_user", PartitionCreateOptions::default())?;

        Ok(Self {
            keyspace,
            operations,
            by_user,
            write_lock: Mutex::new(()),
        })
    }

    fn load(&self, id: &str) -> Result<Option<Operation>> {
        match self.operations.get(id.as_bytes())? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Most recently created operations first
    pub fn recent(&self, limit: usize) -> Result<Vec<Operation>> {
        let mut operations = Vec::new();
        for item in self.operations.iter().rev().take(limit) {
            let (_, value) = item?;
            operations.push(serde_json::from_slice(&value)?);
        }
        Ok(operations)
    }

    /// Operations owned by one user, oldest first
    pub fn list_by_user(&self, user_id: &str) -> Result<Vec<Operation>> {
        let mut prefix = user_id.as_bytes().to_vec();
        prefix.push(0);

        let mut operations = Vec::new();
        for item in self.by_user.prefix(&prefix) {
            let (key, _) = item?;
            let id = String::from_utf8_lossy(&key[prefix.len()..]).to_string();
            if let Some(operation) = self.load(&id)? {
                operations.push(operation);
            }
        }
        Ok(operations)
    }

    /// Persist all pending writes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }
}

#[async_trait]
impl OperationStore for FjallOperationStore {
    async fn create(&self, user_id: &str, job_type: JobType, metadata: Value) -> Result<Operation> {
        let now = Utc::now();
        let operation = Operation {
            id: Uuid::now_v7().to_string(),
            user_id: user_id.to_string(),
            job_type,
            status: OperationStatus::Pending,
            created_at: now,
            updated_at: now,
            metadata: if metadata.is_null() {
                Value::Object(Default::default())
            } else {
                metadata
            },
        };

        let mut index_key = user_id.as_bytes().to_vec();
        index_key.push(0);
        index_key.extend_from_slice(operation.id.as_bytes());

        let mut batch = self.keyspace.batch();
        batch.insert(
            &self.operations,
            operation.id.as_bytes(),
            serde_json::to_vec(&operation)?,
        );
        batch.insert(&self.by_user, index_key, Vec::<u8>::new());
        batch.commit()?;
        self.persist()?;

        debug!(operation_id = %operation.id, user_id, %job_type, "Operation created");
        Ok(operation)
    }

    async fn update_status(
        &self,
        id: &str,
        status: OperationStatus,
        metadata: Value,
    ) -> Result<Operation> {
        let _guard = self.write_lock.lock().await;

        let mut operation = self
            .load(id)?
            .ok_or_else(|| LedgerError::OperationNotFound(id.to_string()))?;

        if operation.status.is_terminal() && operation.status != status {
            return Err(LedgerError::TerminalState {
                id: id.to_string(),
                status: operation.status,
            });
        }

        let previous = operation.status;
        operation.status = status;
        operation.updated_at = Utc::now();
        merge_metadata(&mut operation.metadata, metadata);

        self.operations
            .insert(id.as_bytes(), serde_json::to_vec(&operation)?)?;
        self.persist()?;

        debug!(operation_id = id, from = %previous, to = %status, "Operation status updated");
        Ok(operation)
    }

    async fn get(&self, id: &str) -> Result<Option<Operation>> {
        self.load(id)
    }
}
