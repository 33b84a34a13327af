//! Queue service: the public operation set
//!
//! Validates requests, resolves queues through the registry, drives the
//! per-queue stores, and translates their failures into [`QueueError`].
//! Nothing here retries: every failure is returned to the caller.

use bytes::Bytes;
use hqs_core::ErrorCode;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::queue::{
    check_range, QueueConfig, QueueInfo, DELAY_RANGE, RECEIVE_WAIT_RANGE,
    VISIBILITY_TIMEOUT_RANGE,
};
use crate::receipt::{ReceiptCodec, ReceiptHandle};
use crate::registry::{QueueRegistry, RegistryError};
use crate::store::{Capabilities, Delivery, QueueStats, QueueStore, StoreError};

pub const MAX_RECEIVE_MESSAGES: u32 = 10;
pub const MAX_BATCH_ENTRIES: usize = 10;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Queue does not exist: {0}")]
    QueueDoesNotExist(String),

    #[error("Queue already exists: {0}")]
    QueueAlreadyExists(String),

    #[error("Could not send message: {0}")]
    CouldNotSendMessage(String),

    #[error("Could not delete message: {0}")]
    CouldNotDeleteMessage(String),

    #[error("Receipt handle has expired: {0}")]
    HandleExpired(String),
}

impl QueueError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidRequest(_) => ErrorCode::InvalidRequest,
            Self::QueueDoesNotExist(_) => ErrorCode::QueueDoesNotExist,
            Self::QueueAlreadyExists(_) => ErrorCode::QueueAlreadyExists,
            Self::CouldNotSendMessage(_) => ErrorCode::CouldNotSendMessage,
            Self::CouldNotDeleteMessage(_) => ErrorCode::CouldNotDeleteMessage,
            Self::HandleExpired(_) => ErrorCode::HandleExpired,
        }
    }
}

impl From<RegistryError> for QueueError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::InvalidName(_)
            | RegistryError::InvalidConfig(_)
            | RegistryError::IdTooLong(_) => {
                Self::InvalidRequest(e.to_string())
            }
            RegistryError::QueueAlreadyExists(name) => Self::QueueAlreadyExists(name),
            RegistryError::QueueDoesNotExist(name) => Self::QueueDoesNotExist(name),
        }
    }
}

/// Service-wide settings
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub base_url: String,
    pub account_id: String,
    /// Pause between receive attempts while long polling
    pub long_poll_interval: Duration,
    /// Attributes for queues created without explicit ones
    pub default_queue_config: QueueConfig,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:4566".to_string(),
            account_id: "000000000000".to_string(),
            long_poll_interval: Duration::from_millis(100),
            default_queue_config: QueueConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub message_id: String,
    pub md5_of_body: String,
}

#[derive(Debug, Clone, Default)]
pub struct ReceiveOptions {
    pub max_messages: u32,
    /// Queue default when `None`
    pub visibility_timeout: Option<Duration>,
    /// Long-poll budget; queue default when `None`
    pub wait_time: Option<Duration>,
}

impl ReceiveOptions {
    pub fn new(max_messages: u32) -> Self {
        Self {
            max_messages,
            ..Self::default()
        }
    }

    pub fn visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = Some(timeout);
        self
    }

    pub fn wait_time(mut self, wait: Duration) -> Self {
        self.wait_time = Some(wait);
        self
    }
}

#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message_id: String,
    pub body: Bytes,
    pub md5_of_body: String,
    pub receipt_handle: String,
    pub receive_count: u32,
    pub attributes: BTreeMap<String, String>,
    pub sent_timestamp: i64,
    pub first_receive_timestamp: Option<i64>,
}

impl From<Delivery> for ReceivedMessage {
    fn from(delivery: Delivery) -> Self {
        let Delivery {
            message,
            receipt_handle,
        } = delivery;
        Self {
            message_id: message.id,
            body: message.body,
            md5_of_body: message.md5_of_body,
            receipt_handle,
            receive_count: message.receive_count,
            attributes: message.attributes,
            sent_timestamp: message.enqueue_time.timestamp_millis(),
            first_receive_timestamp: message.first_receive_time.map(|t| t.timestamp_millis()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SendBatchEntry {
    pub id: String,
    pub body: Bytes,
    pub attributes: BTreeMap<String, String>,
    pub delay: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct DeleteBatchEntry {
    pub id: String,
    pub receipt_handle: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendBatchSuccess {
    pub id: String,
    pub message_id: String,
    pub md5_of_body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    pub id: String,
    pub code: ErrorCode,
    pub message: String,
    pub sender_fault: bool,
}

impl BatchFailure {
    fn from_error(id: String, e: &QueueError) -> Self {
        let code = e.code();
        Self {
            id,
            code,
            message: e.to_string(),
            sender_fault: !code.is_retryable(),
        }
    }
}

/// Per-entry outcome of a batch call
#[derive(Debug, Clone)]
pub struct BatchOutcome<T> {
    pub successful: Vec<T>,
    pub failed: Vec<BatchFailure>,
}

impl<T> Default for BatchOutcome<T> {
    fn default() -> Self {
        Self {
            successful: Vec::new(),
            failed: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueAttributes {
    pub info: QueueInfo,
    pub stats: QueueStats,
}

pub struct QueueService {
    registry: QueueRegistry,
    codec: Arc<ReceiptCodec>,
    long_poll_interval: Duration,
    default_queue_config: QueueConfig,
}

impl QueueService {
    pub fn new(caps: Capabilities, settings: ServiceSettings) -> Self {
        Self {
            codec: Arc::clone(&caps.codec),
            registry: QueueRegistry::new(caps, settings.base_url, settings.account_id),
            long_poll_interval: settings.long_poll_interval,
            default_queue_config: settings.default_queue_config,
        }
    }

    pub fn default_queue_config(&self) -> &QueueConfig {
        &self.default_queue_config
    }

    pub fn registry(&self) -> &QueueRegistry {
        &self.registry
    }

    pub fn create_queue(&self, name: &str, config: QueueConfig) -> Result<QueueInfo, QueueError> {
        require("QueueName", name)?;
        let info = self.registry.create_queue(name, config)?;
        debug!(name = %name, url = %info.url, "Created queue");
        Ok(info)
    }

    pub fn delete_queue(&self, queue_url: &str) -> Result<(), QueueError> {
        require("QueueUrl", queue_url)?;
        self.registry.delete_queue(queue_url)?;
        Ok(())
    }

    pub fn list_queues(&self, prefix: Option<&str>) -> Vec<String> {
        let queues = self.registry.list_queues(prefix);
        debug!(count = queues.len(), "Listed queues");
        queues
    }

    pub fn get_queue_url(&self, name: &str) -> Result<String, QueueError> {
        require("QueueName", name)?;
        Ok(self.registry.get_queue_url(name)?)
    }

    pub fn purge_queue(&self, queue_url: &str) -> Result<(), QueueError> {
        let store = self.resolve(queue_url)?;
        store.purge().map_err(|e| queue_gone_or(e, QueueError::InvalidRequest))?;
        Ok(())
    }

    pub fn get_queue_attributes(&self, queue_url: &str) -> Result<QueueAttributes, QueueError> {
        let store = self.resolve(queue_url)?;
        let stats = store
            .stats()
            .map_err(|e| queue_gone_or(e, QueueError::InvalidRequest))?;
        Ok(QueueAttributes {
            info: store.info().clone(),
            stats,
        })
    }

    pub fn send_message(
        &self,
        queue_url: &str,
        body: Bytes,
        attributes: BTreeMap<String, String>,
        delay: Option<Duration>,
    ) -> Result<SentMessage, QueueError> {
        let store = self.resolve(queue_url)?;
        self.send_to(&store, body, attributes, delay)
    }

    pub fn send_message_batch(
        &self,
        queue_url: &str,
        entries: Vec<SendBatchEntry>,
    ) -> Result<BatchOutcome<SendBatchSuccess>, QueueError> {
        check_batch(entries.iter().map(|e| e.id.as_str()))?;
        let store = self.resolve(queue_url)?;

        let mut outcome = BatchOutcome::default();
        for entry in entries {
            match self.send_to(&store, entry.body, entry.attributes, entry.delay) {
                Ok(sent) => outcome.successful.push(SendBatchSuccess {
                    id: entry.id,
                    message_id: sent.message_id,
                    md5_of_body: sent.md5_of_body,
                }),
                Err(QueueError::QueueDoesNotExist(name)) => {
                    return Err(QueueError::QueueDoesNotExist(name))
                }
                Err(e) => outcome.failed.push(BatchFailure::from_error(entry.id, &e)),
            }
        }

        debug!(
            queue = %store.name(),
            sent = outcome.successful.len(),
            failed = outcome.failed.len(),
            "Sent message batch"
        );
        Ok(outcome)
    }

    /// Receive up to `options.max_messages` messages. With a non-zero wait the
    /// call keeps polling until a message arrives or the wait elapses;
    /// dropping the future cancels it.
    pub async fn receive_message(
        &self,
        queue_url: &str,
        options: ReceiveOptions,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        if !(1..=MAX_RECEIVE_MESSAGES).contains(&options.max_messages) {
            return Err(QueueError::InvalidRequest(format!(
                "MaxNumberOfMessages must be between 1 and {MAX_RECEIVE_MESSAGES}, got {}",
                options.max_messages
            )));
        }
        if let Some(timeout) = options.visibility_timeout {
            check_range("VisibilityTimeout", timeout.as_secs(), &VISIBILITY_TIMEOUT_RANGE)
                .map_err(|e| QueueError::InvalidRequest(e.to_string()))?;
        }
        if let Some(wait) = options.wait_time {
            check_range("WaitTimeSeconds", wait.as_secs(), &RECEIVE_WAIT_RANGE)
                .map_err(|e| QueueError::InvalidRequest(e.to_string()))?;
        }

        let store = self.resolve(queue_url)?;
        let wait = options
            .wait_time
            .unwrap_or_else(|| store.info().config.receive_wait());
        let give_up_at = tokio::time::Instant::now() + wait;

        loop {
            let deliveries = store
                .receive(options.max_messages as usize, options.visibility_timeout)
                .map_err(|e| queue_gone_or(e, QueueError::InvalidRequest))?;

            let now = tokio::time::Instant::now();
            if !deliveries.is_empty() || now >= give_up_at {
                debug!(queue = %store.name(), count = deliveries.len(), "Received messages");
                return Ok(deliveries.into_iter().map(ReceivedMessage::from).collect());
            }
            tokio::time::sleep(self.long_poll_interval.min(give_up_at - now)).await;
        }
    }

    pub fn delete_message(&self, queue_url: &str, receipt_handle: &str) -> Result<(), QueueError> {
        let store = self.resolve(queue_url)?;
        let handle = self.decode_for(&store, receipt_handle)?;

        store
            .delete(&handle.message_id, handle.epoch)
            .map_err(|e| queue_gone_or(e, QueueError::CouldNotDeleteMessage))?;
        debug!(queue = %store.name(), message_id = %handle.message_id, "Deleted message");
        Ok(())
    }

    pub fn delete_message_batch(
        &self,
        queue_url: &str,
        entries: Vec<DeleteBatchEntry>,
    ) -> Result<BatchOutcome<String>, QueueError> {
        check_batch(entries.iter().map(|e| e.id.as_str()))?;
        let store = self.resolve(queue_url)?;

        let mut outcome = BatchOutcome::default();
        for entry in entries {
            let result = self.decode_for(&store, &entry.receipt_handle).and_then(|handle| {
                store
                    .delete(&handle.message_id, handle.epoch)
                    .map(|_| ())
                    .map_err(|e| queue_gone_or(e, QueueError::CouldNotDeleteMessage))
            });
            match result {
                Ok(()) => outcome.successful.push(entry.id),
                Err(QueueError::QueueDoesNotExist(name)) => {
                    return Err(QueueError::QueueDoesNotExist(name))
                }
                Err(e) => outcome.failed.push(BatchFailure::from_error(entry.id, &e)),
            }
        }

        debug!(
            queue = %store.name(),
            deleted = outcome.successful.len(),
            failed = outcome.failed.len(),
            "Deleted message batch"
        );
        Ok(outcome)
    }

    pub fn change_message_visibility(
        &self,
        queue_url: &str,
        receipt_handle: &str,
        timeout: Duration,
    ) -> Result<(), QueueError> {
        check_range("VisibilityTimeout", timeout.as_secs(), &VISIBILITY_TIMEOUT_RANGE)
            .map_err(|e| QueueError::InvalidRequest(e.to_string()))?;
        let store = self.resolve(queue_url)?;
        let handle = self.decode_for(&store, receipt_handle)?;

        store
            .change_visibility(&handle.message_id, handle.epoch, timeout)
            .map_err(|e| queue_gone_or(e, QueueError::HandleExpired))
    }

    fn resolve(&self, queue_url: &str) -> Result<Arc<QueueStore>, QueueError> {
        require("QueueUrl", queue_url)?;
        Ok(self.registry.resolve(queue_url)?)
    }

    fn send_to(
        &self,
        store: &QueueStore,
        body: Bytes,
        attributes: BTreeMap<String, String>,
        delay: Option<Duration>,
    ) -> Result<SentMessage, QueueError> {
        if let Some(delay) = delay {
            check_range("DelaySeconds", delay.as_secs(), &DELAY_RANGE)
                .map_err(|e| QueueError::InvalidRequest(e.to_string()))?;
        }
        for (key, value) in &attributes {
            if key.is_empty() || value.is_empty() {
                return Err(QueueError::InvalidRequest(
                    "message attribute names and values must not be empty".to_string(),
                ));
            }
        }

        let message = store
            .enqueue(body, attributes, delay)
            .map_err(|e| queue_gone_or(e, QueueError::CouldNotSendMessage))?;
        debug!(queue = %store.name(), message_id = %message.id, "Sent message");
        Ok(SentMessage {
            message_id: message.id,
            md5_of_body: message.md5_of_body,
        })
    }

    /// Decode a client-supplied handle and check it was minted for `store`
    fn decode_for(&self, store: &QueueStore, receipt_handle: &str) -> Result<ReceiptHandle, QueueError> {
        let handle = self.codec.decode(receipt_handle).map_err(|e| {
            warn!(queue = %store.name(), error = %e, "Rejected receipt handle");
            QueueError::InvalidRequest(e.to_string())
        })?;
        if handle.queue_id != store.id() {
            warn!(queue = %store.name(), "Receipt handle minted for another queue");
            return Err(QueueError::InvalidRequest(
                "receipt handle does not belong to this queue".to_string(),
            ));
        }
        Ok(handle)
    }
}

impl std::fmt::Debug for QueueService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueService")
            .field("queues", &self.registry.len())
            .finish_non_exhaustive()
    }
}

fn require(name: &str, value: &str) -> Result<(), QueueError> {
    if value.is_empty() {
        return Err(QueueError::InvalidRequest(format!("{name} is required")));
    }
    Ok(())
}

fn check_batch<'a>(ids: impl Iterator<Item = &'a str>) -> Result<(), QueueError> {
    let mut seen = HashSet::new();
    for id in ids {
        require("Id", id)?;
        if !seen.insert(id) {
            return Err(QueueError::InvalidRequest(format!("duplicate batch entry id: {id}")));
        }
    }
    if seen.is_empty() {
        return Err(QueueError::InvalidRequest("batch must not be empty".to_string()));
    }
    if seen.len() > MAX_BATCH_ENTRIES {
        return Err(QueueError::InvalidRequest(format!(
            "batch holds {} entries, maximum is {MAX_BATCH_ENTRIES}",
            seen.len()
        )));
    }
    Ok(())
}

/// Map a store failure: a deleted queue is always `QueueDoesNotExist`,
/// invalid messages are the caller's fault, anything else becomes the
/// operation-specific error built by `other`.
fn queue_gone_or(e: StoreError, other: fn(String) -> QueueError) -> QueueError {
    match e {
        StoreError::QueueDeleted(name) => {
            info!(queue = %name, "Operation on deleted queue");
            QueueError::QueueDoesNotExist(name)
        }
        StoreError::InvalidMessage(msg) => QueueError::InvalidRequest(msg),
        e => other(e.to_string()),
    }
}
