//! Write-through persistence hooks
//!
//! The in-memory store is authoritative; a journal only mirrors its state.
//! Journal calls run inside the queue's critical section, so implementations
//! must be local and quick (an in-process log, a memory map), never a
//! wide-area round trip.

use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;

use crate::store::Message;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("Journal unavailable: {0}")]
    Unavailable(String),

    #[error("Journal write failed: {0}")]
    Write(String),
}

/// Persistence capability consumed by the queue store
pub trait MessageJournal: Send + Sync {
    /// Record a newly enqueued message
    fn append(&self, queue_id: &str, message: &Message) -> Result<(), JournalError>;

    /// Record a state change of an existing message
    fn overwrite(&self, queue_id: &str, message: &Message) -> Result<(), JournalError>;

    /// Forget a message
    fn remove(&self, queue_id: &str, message_id: &str) -> Result<(), JournalError>;
}

/// Journal that records nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopJournal;

impl MessageJournal for NoopJournal {
    fn append(&self, _queue_id: &str, _message: &Message) -> Result<(), JournalError> {
        Ok(())
    }

    fn overwrite(&self, _queue_id: &str, _message: &Message) -> Result<(), JournalError> {
        Ok(())
    }

    fn remove(&self, _queue_id: &str, _message_id: &str) -> Result<(), JournalError> {
        Ok(())
    }
}

/// Kind of journal entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalOp {
    Append,
    Overwrite,
    Remove,
}

/// In-memory journal keeping the latest record per message plus an
/// ordered operation log
#[derive(Debug, Default)]
pub struct MemoryJournal {
    records: DashMap<(String, String), Message>,
    log: Mutex<Vec<(JournalOp, String)>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest record for every live message of a queue, oldest first
    pub fn snapshot(&self, queue_id: &str) -> Vec<Message> {
        let mut messages: Vec<Message> = self
            .records
            .iter()
            .filter(|entry| entry.key().0 == queue_id)
            .map(|entry| entry.value().clone())
            .collect();
        messages.sort_by(|a, b| {
            a.enqueue_time
                .cmp(&b.enqueue_time)
                .then_with(|| a.id.cmp(&b.id))
        });
        messages
    }

    /// Operations in the order they were applied, as `(op, message id)`
    pub fn operations(&self) -> Vec<(JournalOp, String)> {
        self.log.lock().clone()
    }
}

impl MessageJournal for MemoryJournal {
    fn append(&self, queue_id: &str, message: &Message) -> Result<(), JournalError> {
        self.records
            .insert((queue_id.to_string(), message.id.clone()), message.clone());
        self.log.lock().push((JournalOp::Append, message.id.clone()));
        Ok(())
    }

    fn overwrite(&self, queue_id: &str, message: &Message) -> Result<(), JournalError> {
        self.records
            .insert((queue_id.to_string(), message.id.clone()), message.clone());
        self.log.lock().push((JournalOp::Overwrite, message.id.clone()));
        Ok(())
    }

    fn remove(&self, queue_id: &str, message_id: &str) -> Result<(), JournalError> {
        self.records
            .remove(&(queue_id.to_string(), message_id.to_string()));
        self.log.lock().push((JournalOp::Remove, message_id.to_string()));
        Ok(())
    }
}
