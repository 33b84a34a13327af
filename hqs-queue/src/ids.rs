//! Identifier generation
//!
//! Message ids must never collide within a queue's lifetime and queue ids
//! must differ between two incarnations of the same queue name, since
//! receipt handles embed both.

use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

pub trait IdGenerator: Send + Sync {
    fn new_message_id(&self) -> String;

    fn new_queue_id(&self) -> String;
}

/// Random v4 UUIDs
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidIds;

impl IdGenerator for UuidIds {
    fn new_message_id(&self) -> String {
        Uuid::new_v4().to_string()
    }

    fn new_queue_id(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }
}

/// Zero-padded counters, so ids sort in creation order. Test use only.
#[derive(Debug, Default)]
pub struct SequentialIds {
    next: AtomicU64,
}

impl SequentialIds {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdGenerator for SequentialIds {
    fn new_message_id(&self) -> String {
        format!("m{:08}", self.next.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn new_queue_id(&self) -> String {
        format!("q{:08}", self.next.fetch_add(1, Ordering::Relaxed) + 1)
    }
}
