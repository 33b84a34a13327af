//! Per-queue message table
//!
//! Every message is either *available* (a delivery candidate) or *in flight*
//! (checked out, or delayed, until `visible_at`). Both partitions and the
//! message table sit behind one mutex per queue: reclaiming expired
//! deliveries and selecting new ones happen in the same critical section,
//! so a message can never be handed out twice under the same epoch.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clock::{deadline, Clock};
use crate::ids::IdGenerator;
use crate::journal::{JournalError, MessageJournal};
use crate::queue::QueueInfo;
use crate::receipt::{fits_in_handle, ReceiptCodec, ReceiptHandle, MAX_ID_LEN};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Receipt handle no longer addresses message {0}")]
    HandleExpired(String),

    #[error("Queue has been deleted: {0}")]
    QueueDeleted(String),

    #[error("Message id collision: {0}")]
    DuplicateId(String),

    #[error("Generated message id is {0} bytes, maximum is {MAX_ID_LEN}")]
    IdTooLong(usize),

    #[error(transparent)]
    Journal(#[from] JournalError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    Available,
    InFlight,
}

/// A message as held by its queue
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub body: Bytes,
    pub md5_of_body: String,
    pub attributes: BTreeMap<String, String>,
    pub enqueue_time: DateTime<Utc>,
    pub receive_count: u32,
    /// Bumped on every transition to in flight; 0 means never delivered
    pub delivery_epoch: u64,
    pub visible_at: DateTime<Utc>,
    pub first_receive_time: Option<DateTime<Utc>>,
    pub state: MessageState,
}

/// One message handed to one consumer
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message: Message,
    pub receipt_handle: String,
}

/// Approximate message counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub available: usize,
    pub in_flight: usize,
    pub delayed: usize,
}

/// Capabilities a store borrows from its environment
#[derive(Clone)]
pub struct Capabilities {
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
    pub codec: Arc<ReceiptCodec>,
    pub journal: Arc<dyn MessageJournal>,
}

#[derive(Default)]
struct QueueState {
    messages: HashMap<String, Message>,
    /// Keyed by `(enqueue_time, id)`: oldest first, ties by id
    available: BTreeSet<(DateTime<Utc>, String)>,
    /// Keyed by `(visible_at, id)`: earliest expiry first
    in_flight: BTreeSet<(DateTime<Utc>, String)>,
    closed: bool,
}

impl QueueState {
    /// Move every in-flight message the clock reports visible back to the
    /// available set
    fn reclaim(&mut self, clock: &dyn Clock) -> usize {
        let mut reclaimed = 0;
        while let Some((visible_at, _)) = self.in_flight.first() {
            if !clock.is_visible(*visible_at) {
                break;
            }
            let Some((_, id)) = self.in_flight.pop_first() else {
                break;
            };
            if let Some(message) = self.messages.get_mut(&id) {
                message.state = MessageState::Available;
                self.available.insert((message.enqueue_time, id));
                reclaimed += 1;
            }
        }
        reclaimed
    }

    fn unlink(&mut self, message: &Message) {
        match message.state {
            MessageState::Available => {
                self.available
                    .remove(&(message.enqueue_time, message.id.clone()));
            }
            MessageState::InFlight => {
                self.in_flight
                    .remove(&(message.visible_at, message.id.clone()));
            }
        }
    }
}

pub struct QueueStore {
    info: QueueInfo,
    caps: Capabilities,
    state: Mutex<QueueState>,
}

impl std::fmt::Debug for QueueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueStore")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

impl QueueStore {
    pub fn new(info: QueueInfo, caps: Capabilities) -> Self {
        Self {
            info,
            caps,
            state: Mutex::new(QueueState::default()),
        }
    }

    pub fn info(&self) -> &QueueInfo {
        &self.info
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Add a message. A non-zero `delay` (queue default when `None`) keeps it
    /// hidden, with epoch 0, until the delay has elapsed.
    pub fn enqueue(
        &self,
        body: Bytes,
        attributes: BTreeMap<String, String>,
        delay: Option<Duration>,
    ) -> Result<Message, StoreError> {
        if body.is_empty() {
            return Err(StoreError::InvalidMessage(
                "message body must not be empty".to_string(),
            ));
        }
        let max = self.info.config.maximum_message_size as usize;
        if body.len() > max {
            return Err(StoreError::InvalidMessage(format!(
                "message body is {} bytes, maximum is {}",
                body.len(),
                max
            )));
        }
        let delay = delay.unwrap_or_else(|| self.info.config.delay());
        let md5_of_body = md5_hex(&body);

        let mut state = self.state.lock();
        if state.closed {
            return Err(StoreError::QueueDeleted(self.info.name.clone()));
        }

        let now = self.caps.clock.now();
        let id = self.caps.ids.new_message_id();
        if !fits_in_handle(&id) {
            return Err(StoreError::IdTooLong(id.len()));
        }
        if state.messages.contains_key(&id) {
            return Err(StoreError::DuplicateId(id));
        }

        let delayed = !delay.is_zero();
        let message = Message {
            id: id.clone(),
            body,
            md5_of_body,
            attributes,
            enqueue_time: now,
            receive_count: 0,
            delivery_epoch: 0,
            visible_at: if delayed { deadline(now, delay) } else { now },
            first_receive_time: None,
            state: if delayed {
                MessageState::InFlight
            } else {
                MessageState::Available
            },
        };

        self.caps.journal.append(&self.info.id, &message)?;

        if delayed {
            state.in_flight.insert((message.visible_at, id.clone()));
        } else {
            state.available.insert((now, id.clone()));
        }
        state.messages.insert(id.clone(), message.clone());

        debug!(queue = %self.info.name, message_id = %id, delayed, "Enqueued message");
        Ok(message)
    }

    /// Check out up to `max_messages` messages for `visibility_timeout`
    /// (queue default when `None`). Never waits: returns an empty vector when
    /// nothing is deliverable.
    pub fn receive(
        &self,
        max_messages: usize,
        visibility_timeout: Option<Duration>,
    ) -> Result<Vec<Delivery>, StoreError> {
        let timeout = visibility_timeout.unwrap_or_else(|| self.info.config.visibility_timeout());

        let mut state = self.state.lock();
        if state.closed {
            return Err(StoreError::QueueDeleted(self.info.name.clone()));
        }

        let now = self.caps.clock.now();
        let reclaimed = state.reclaim(self.caps.clock.as_ref());
        if reclaimed > 0 {
            debug!(queue = %self.info.name, count = reclaimed, "Reclaimed expired messages");
        }
        let stuck = self.drop_expired(&mut state, now);

        // Expired messages the journal refused to forget sit at the front
        let candidates: Vec<(DateTime<Utc>, String)> = state
            .available
            .iter()
            .skip(stuck)
            .take(max_messages)
            .cloned()
            .collect();

        let mut deliveries = Vec::new();
        for key in candidates {
            let Some(current) = state.messages.get(&key.1) else {
                continue;
            };
            let mut message = current.clone();
            message.delivery_epoch += 1;
            message.receive_count += 1;
            message.visible_at = deadline(now, timeout);
            message.first_receive_time.get_or_insert(now);
            message.state = MessageState::InFlight;

            if let Err(e) = self.caps.journal.overwrite(&self.info.id, &message) {
                warn!(queue = %self.info.name, message_id = %key.1, error = %e, "Journal overwrite failed, message stays available");
                break;
            }

            state.available.remove(&key);
            state.in_flight.insert((message.visible_at, key.1.clone()));
            state.messages.insert(key.1.clone(), message.clone());

            let receipt_handle = self.caps.codec.encode(&ReceiptHandle::new(
                self.info.id.clone(),
                key.1,
                message.delivery_epoch,
            ));
            deliveries.push(Delivery {
                message,
                receipt_handle,
            });
        }

        debug!(queue = %self.info.name, count = deliveries.len(), "Delivered messages");
        Ok(deliveries)
    }

    /// Remove a message iff `expected_epoch` is its current delivery epoch
    pub fn delete(&self, message_id: &str, expected_epoch: u64) -> Result<Message, StoreError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(StoreError::QueueDeleted(self.info.name.clone()));
        }

        let matches = state
            .messages
            .get(message_id)
            .is_some_and(|m| expected_epoch > 0 && m.delivery_epoch == expected_epoch);
        if !matches {
            return Err(StoreError::HandleExpired(message_id.to_string()));
        }

        self.caps.journal.remove(&self.info.id, message_id)?;

        let Some(message) = state.messages.remove(message_id) else {
            return Err(StoreError::HandleExpired(message_id.to_string()));
        };
        state.unlink(&message);

        debug!(queue = %self.info.name, message_id = %message_id, epoch = expected_epoch, "Deleted message");
        Ok(message)
    }

    /// Reset the visibility window of an in-flight message whose epoch
    /// matches. A zero timeout makes it available immediately.
    pub fn change_visibility(
        &self,
        message_id: &str,
        expected_epoch: u64,
        timeout: Duration,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(StoreError::QueueDeleted(self.info.name.clone()));
        }

        let now = self.caps.clock.now();
        state.reclaim(self.caps.clock.as_ref());

        let message = match state.messages.get(message_id) {
            Some(m)
                if expected_epoch > 0
                    && m.delivery_epoch == expected_epoch
                    && m.state == MessageState::InFlight =>
            {
                m.clone()
            }
            _ => return Err(StoreError::HandleExpired(message_id.to_string())),
        };
        state.unlink(&message);

        let mut updated = message;
        if timeout.is_zero() {
            updated.state = MessageState::Available;
            updated.visible_at = now;
            state
                .available
                .insert((updated.enqueue_time, updated.id.clone()));
        } else {
            updated.visible_at = deadline(now, timeout);
            state
                .in_flight
                .insert((updated.visible_at, updated.id.clone()));
        }

        if let Err(e) = self.caps.journal.overwrite(&self.info.id, &updated) {
            warn!(queue = %self.info.name, message_id = %message_id, error = %e, "Journal overwrite failed");
        }
        debug!(
            queue = %self.info.name,
            message_id = %message_id,
            timeout_secs = timeout.as_secs(),
            "Changed message visibility"
        );
        state.messages.insert(updated.id.clone(), updated);
        Ok(())
    }

    /// Discard every message; outstanding receipt handles die with them
    pub fn purge(&self) -> Result<usize, StoreError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(StoreError::QueueDeleted(self.info.name.clone()));
        }
        let purged = self.discard_all(&mut state);
        info!(queue = %self.info.name, count = purged, "Purged queue");
        Ok(purged)
    }

    /// Mark the store deleted and discard its messages. Callers still holding
    /// the store see `QueueDeleted` from then on.
    pub fn close(&self) -> usize {
        let mut state = self.state.lock();
        if state.closed {
            return 0;
        }
        state.closed = true;
        self.discard_all(&mut state)
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn stats(&self) -> Result<QueueStats, StoreError> {
        let state = self.state.lock();
        if state.closed {
            return Err(StoreError::QueueDeleted(self.info.name.clone()));
        }

        let mut stats = QueueStats {
            available: state.available.len(),
            ..QueueStats::default()
        };
        for (visible_at, id) in &state.in_flight {
            if self.caps.clock.is_visible(*visible_at) {
                stats.available += 1;
            } else if state.messages.get(id).is_some_and(|m| m.delivery_epoch == 0) {
                stats.delayed += 1;
            } else {
                stats.in_flight += 1;
            }
        }
        Ok(stats)
    }

    /// Snapshot of a single message
    pub fn message(&self, message_id: &str) -> Option<Message> {
        self.state.lock().messages.get(message_id).cloned()
    }

    /// Drop available messages past the retention period. A message is only
    /// forgotten once the journal has removed it; returns how many expired
    /// messages had to be kept because it refused.
    fn drop_expired(&self, state: &mut QueueState, now: DateTime<Utc>) -> usize {
        let retention = self.info.config.retention_period();
        let expired: Vec<(DateTime<Utc>, String)> = state
            .available
            .iter()
            .take_while(|(enqueue_time, _)| deadline(*enqueue_time, retention) <= now)
            .cloned()
            .collect();

        let mut stuck = 0;
        for key in expired {
            if let Err(e) = self.caps.journal.remove(&self.info.id, &key.1) {
                warn!(queue = %self.info.name, message_id = %key.1, error = %e, "Journal remove failed, keeping expired message");
                stuck += 1;
                continue;
            }
            state.available.remove(&key);
            state.messages.remove(&key.1);
            debug!(queue = %self.info.name, message_id = %key.1, "Dropped message past retention");
        }
        stuck
    }

    fn discard_all(&self, state: &mut QueueState) -> usize {
        let count = state.messages.len();
        for id in state.messages.keys() {
            if let Err(e) = self.caps.journal.remove(&self.info.id, id) {
                warn!(queue = %self.info.name, message_id = %id, error = %e, "Journal remove failed");
            }
        }
        state.messages.clear();
        state.available.clear();
        state.in_flight.clear();
        count
    }
}

fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
