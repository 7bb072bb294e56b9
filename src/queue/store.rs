use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::broker::{
    BrokerClient, PeekedMessage, QueueAttributes, QueueInfo, ReceivedMessage, RedrivePolicy,
};
use super::error::{BrokerError, BrokerErrorKind};

/// Largest message body the broker accepts (same ceiling as SQS)
pub const MAX_MESSAGE_BYTES: usize = 256 * 1024;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct QueueRecord {
    id: String,
    name: String,
    visibility_timeout_secs: u64,
    message_retention_secs: u64,
    redrive: Option<RedrivePolicy>,
}

impl QueueRecord {
    fn info(&self) -> QueueInfo {
        QueueInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            attributes: QueueAttributes {
                visibility_timeout: Duration::from_secs(self.visibility_timeout_secs),
                message_retention: Duration::from_secs(self.message_retention_secs),
            },
            redrive_policy: self.redrive.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MessageRecord {
    message_id: String,
    body: String,
    sent_at_ms: i64,
    visible_at_ms: i64,
    receive_count: u32,
    receipt: Option<String>,
}

impl MessageRecord {
    fn new(body: String, now: i64) -> Self {
        Self {
            message_id: Uuid::now_v7().to_string(),
            body,
            sent_at_ms: now,
            visible_at_ms: now,
            receive_count: 0,
            receipt: None,
        }
    }

    fn sent_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.sent_at_ms).unwrap_or_default()
    }
}

/// Message counts for one queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueDepth {
    pub visible: usize,
    pub in_flight: usize,
}

/// Embedded durable broker built on Fjall
///
/// Architecture:
/// - `queues` partition: queue name → QueueRecord (JSON)
/// - `messages` partition: `{queue}\0{message_id}` → MessageRecord (JSON)
/// - `receipts` partition: receipt handle → message key
///
/// Message ids are UUIDv7, so a prefix scan visits a queue roughly in send
/// order. A received message stays in `messages` with its `visible_at`
/// pushed forward by the visibility timeout; deleting it needs the receipt
/// issued by its latest delivery. Once a message has been delivered
/// `max_receive_count` times, the next receive moves it to the queue's
/// dead-letter target instead of delivering it again.
pub struct FjallBroker {
    keyspace: Keyspace,
    queues: PartitionHandle,
    messages: PartitionHandle,
    receipts: PartitionHandle,
    poll_interval: Duration,
    lock: Mutex<()>,
}

impl FjallBroker {
    /// Open or create a broker at the specified path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, BrokerError> {
        info!("Opening FjallBroker at: {}", path.as_ref().display());

        let keyspace = Config::new(path).open()?;

        let queues = keyspace.open_partition("queues", PartitionCreateOptions::default())?;
        let messages = keyspace.open_partition("messages", PartitionCreateOptions::default())?;
        let receipts = keyspace.open_partition("receipts", PartitionCreateOptions::default())?;

        Ok(Self {
            keyspace,
            queues,
            messages,
            receipts,
            poll_interval: DEFAULT_POLL_INTERVAL,
            lock: Mutex::new(()),
        })
    }

    /// How often an idle long poll re-checks for visible messages
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }

    /// Count visible and in-flight messages of a queue
    pub async fn depth(&self, queue: &str) -> Result<QueueDepth, BrokerError> {
        let _guard = self.lock.lock().await;
        self.load_queue(queue)?;

        let now = now_ms();
        let mut depth = QueueDepth::default();
        for item in self.messages.prefix(message_prefix(queue)) {
            let (_, value) = item?;
            let record: MessageRecord = serde_json::from_slice(&value)?;
            if record.visible_at_ms <= now {
                depth.visible += 1;
            } else {
                depth.in_flight += 1;
            }
        }
        Ok(depth)
    }

    /// Flush all writes to disk
    pub fn flush(&self) -> Result<(), BrokerError> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }

    fn load_queue(&self, name: &str) -> Result<QueueRecord, BrokerError> {
        match self.queues.get(name.as_bytes())? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Err(BrokerError::queue_not_found(name)),
        }
    }

    fn store_queue(&self, record: &QueueRecord) -> Result<(), BrokerError> {
        self.queues
            .insert(record.name.as_bytes(), serde_json::to_vec(record)?)?;
        Ok(())
    }

    fn find_queue_by_id(&self, id: &str) -> Result<QueueRecord, BrokerError> {
        for item in self.queues.iter() {
            let (_, value) = item?;
            let record: QueueRecord = serde_json::from_slice(&value)?;
            if record.id == id {
                return Ok(record);
            }
        }
        Err(BrokerError::queue_not_found(id))
    }

    /// One non-blocking pass over the queue, delivering what is visible
    async fn receive_visible(
        &self,
        queue: &str,
        max_messages: usize,
    ) -> Result<Vec<ReceivedMessage>, BrokerError> {
        let _guard = self.lock.lock().await;

        let record = self.load_queue(queue)?;
        let dead_letter = match &record.redrive {
            Some(policy) => Some((
                self.find_queue_by_id(&policy.dead_letter_target)?,
                policy.max_receive_count,
            )),
            None => None,
        };

        let now = now_ms();
        let retention_ms = secs_to_ms(record.message_retention_secs);
        let visibility_ms = secs_to_ms(record.visibility_timeout_secs);

        let candidates = self
            .messages
            .prefix(message_prefix(queue))
            .collect::<Result<Vec<_>, _>>()?;

        let mut delivered = Vec::new();
        for (key, value) in candidates {
            if delivered.len() >= max_messages {
                break;
            }

            let mut message: MessageRecord = serde_json::from_slice(&value)?;

            if now.saturating_sub(message.sent_at_ms) > retention_ms {
                debug!(queue, message_id = %message.message_id, "Message expired");
                self.remove_message(&key, &message)?;
                continue;
            }

            if message.visible_at_ms > now {
                continue;
            }

            if let Some((dlq, max_receive_count)) = &dead_letter {
                if message.receive_count >= *max_receive_count {
                    self.move_to_dead_letter(&key, &message, &dlq.name, now)?;
                    warn!(
                        queue,
                        dlq = %dlq.name,
                        message_id = %message.message_id,
                        receive_count = message.receive_count,
                        "Message exceeded max receive count, moved to DLQ"
                    );
                    continue;
                }
            }

            let receipt = Uuid::new_v4().to_string();
            let mut batch = self.keyspace.batch();
            if let Some(previous) = message.receipt.take() {
                batch.remove(&self.receipts, previous.into_bytes());
            }
            message.receive_count += 1;
            message.visible_at_ms = now.saturating_add(visibility_ms);
            message.receipt = Some(receipt.clone());
            batch.insert(&self.messages, key.to_vec(), serde_json::to_vec(&message)?);
            batch.insert(&self.receipts, receipt.as_bytes(), key.to_vec());
            batch.commit()?;

            delivered.push(ReceivedMessage {
                message_id: message.message_id.clone(),
                receipt_handle: receipt,
                sent_at: message.sent_at(),
                receive_count: message.receive_count,
                body: message.body,
            });
        }

        Ok(delivered)
    }

    fn remove_message(&self, key: &[u8], message: &MessageRecord) -> Result<(), BrokerError> {
        let mut batch = self.keyspace.batch();
        batch.remove(&self.messages, key.to_vec());
        if let Some(receipt) = &message.receipt {
            batch.remove(&self.receipts, receipt.as_bytes());
        }
        batch.commit()?;
        Ok(())
    }

    fn move_to_dead_letter(
        &self,
        key: &[u8],
        message: &MessageRecord,
        dlq: &str,
        now: i64,
    ) -> Result<(), BrokerError> {
        let dead = MessageRecord::new(message.body.clone(), now);

        let mut batch = self.keyspace.batch();
        batch.insert(
            &self.messages,
            message_key(dlq, &dead.message_id),
            serde_json::to_vec(&dead)?,
        );
        batch.remove(&self.messages, key.to_vec());
        if let Some(receipt) = &message.receipt {
            batch.remove(&self.receipts, receipt.as_bytes());
        }
        batch.commit()?;
        Ok(())
    }
}

#[async_trait]
impl BrokerClient for FjallBroker {
    async fn create_queue(
        &self,
        name: &str,
        attributes: QueueAttributes,
    ) -> Result<String, BrokerError> {
        if name.is_empty() || name.contains('\0') {
            return Err(BrokerError::new(
                BrokerErrorKind::InvalidRequest,
                format!("invalid queue name {:?}", name),
            ));
        }

        let _guard = self.lock.lock().await;

        if self.queues.get(name.as_bytes())?.is_some() {
            return Err(BrokerError::already_exists(name));
        }

        let record = QueueRecord {
            id: queue_id(name),
            name: name.to_string(),
            visibility_timeout_secs: attributes.visibility_timeout.as_secs(),
            message_retention_secs: attributes.message_retention.as_secs(),
            redrive: None,
        };
        self.store_queue(&record)?;

        info!(queue = name, id = %record.id, "Queue created");
        Ok(record.id)
    }

    async fn set_queue_attributes(
        &self,
        name: &str,
        attributes: QueueAttributes,
    ) -> Result<(), BrokerError> {
        let _guard = self.lock.lock().await;

        let mut record = self.load_queue(name)?;
        record.visibility_timeout_secs = attributes.visibility_timeout.as_secs();
        record.message_retention_secs = attributes.message_retention.as_secs();
        self.store_queue(&record)
    }

    async fn set_redrive_policy(
        &self,
        name: &str,
        policy: RedrivePolicy,
    ) -> Result<(), BrokerError> {
        if policy.max_receive_count < 1 {
            return Err(BrokerError::new(
                BrokerErrorKind::InvalidRequest,
                "maxReceiveCount must be at least 1",
            ));
        }

        let _guard = self.lock.lock().await;

        let mut record = self.load_queue(name)?;
        let target = self.find_queue_by_id(&policy.dead_letter_target)?;
        if target.name == record.name {
            return Err(BrokerError::new(
                BrokerErrorKind::InvalidRequest,
                format!("queue {} cannot dead-letter into itself", name),
            ));
        }

        record.redrive = Some(policy);
        self.store_queue(&record)?;

        debug!(queue = name, dlq = %target.name, "Redrive policy set");
        Ok(())
    }

    async fn queue_info(&self, name: &str) -> Result<QueueInfo, BrokerError> {
        let _guard = self.lock.lock().await;
        Ok(self.load_queue(name)?.info())
    }

    async fn send(&self, queue: &str, body: String) -> Result<String, BrokerError> {
        if body.len() > MAX_MESSAGE_BYTES {
            return Err(BrokerError::new(
                BrokerErrorKind::InvalidRequest,
                format!("message of {} bytes exceeds {}", body.len(), MAX_MESSAGE_BYTES),
            ));
        }

        let _guard = self.lock.lock().await;
        self.load_queue(queue)?;

        let record = MessageRecord::new(body, now_ms());
        self.messages.insert(
            message_key(queue, &record.message_id),
            serde_json::to_vec(&record)?,
        )?;
        self.flush()?;

        debug!(queue, message_id = %record.message_id, "Message sent");
        Ok(record.message_id)
    }

    async fn receive(
        &self,
        queue: &str,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, BrokerError> {
        let deadline = Instant::now() + wait;

        loop {
            let batch = self.receive_visible(queue, max_messages).await?;
            let now = Instant::now();
            if !batch.is_empty() || now >= deadline {
                return Ok(batch);
            }
            tokio::time::sleep((deadline - now).min(self.poll_interval)).await;
        }
    }

    async fn delete(&self, queue: &str, receipt_handle: &str) -> Result<(), BrokerError> {
        let _guard = self.lock.lock().await;

        let key = self
            .receipts
            .get(receipt_handle.as_bytes())?
            .ok_or_else(|| BrokerError::receipt_invalid(receipt_handle))?;

        if !key.starts_with(message_prefix(queue).as_slice()) {
            return Err(BrokerError::receipt_invalid(receipt_handle));
        }

        let message: MessageRecord = match self.messages.get(&*key)? {
            Some(bytes) => serde_json::from_slice(&bytes)?,
            None => {
                self.receipts.remove(receipt_handle.as_bytes())?;
                return Err(BrokerError::receipt_invalid(receipt_handle));
            }
        };

        if message.receipt.as_deref() != Some(receipt_handle) {
            return Err(BrokerError::receipt_invalid(receipt_handle));
        }

        self.remove_message(&key, &message)?;
        debug!(queue, message_id = %message.message_id, "Message deleted");
        Ok(())
    }

    async fn peek(&self, queue: &str, limit: usize) -> Result<Vec<PeekedMessage>, BrokerError> {
        let _guard = self.lock.lock().await;
        self.load_queue(queue)?;

        let mut peeked = Vec::new();
        for item in self.messages.prefix(message_prefix(queue)).take(limit) {
            let (_, value) = item?;
            let record: MessageRecord = serde_json::from_slice(&value)?;
            peeked.push(PeekedMessage {
                sent_at: record.sent_at(),
                message_id: record.message_id,
                body: record.body,
                receive_count: record.receive_count,
            });
        }
        Ok(peeked)
    }
}

fn queue_id(name: &str) -> String {
    format!("arn:mediajobs:local:{}", name)
}

fn message_prefix(queue: &str) -> Vec<u8> {
    format!("{}\0", queue).into_bytes()
}

fn message_key(queue: &str, message_id: &str) -> Vec<u8> {
    format!("{}\0{}", queue, message_id).into_bytes()
}

/// Whole seconds as milliseconds, saturating at `i64::MAX`
fn secs_to_ms(secs: u64) -> i64 {
    i64::try_from(secs.saturating_mul(1000)).unwrap_or(i64::MAX)
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
