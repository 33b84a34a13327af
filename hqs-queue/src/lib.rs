//! Message-lifecycle engine for HQS
//!
//! Provides in-memory queues with at-least-once delivery:
//! - CreateQueue, DeleteQueue, ListQueues, GetQueueUrl, PurgeQueue
//! - SendMessage, ReceiveMessage (with long polling), DeleteMessage
//! - Batch send/delete and ChangeMessageVisibility
//! - Signed receipt handles carrying a per-delivery epoch

pub mod clock;
pub mod handlers;
pub mod ids;
pub mod journal;
pub mod queue;
pub mod receipt;
pub mod registry;
pub mod service;
pub mod store;

#[cfg(test)]
mod store_tests;

pub use clock::{Clock, ManualClock, SystemClock};
pub use handlers::handle_request;
pub use ids::{IdGenerator, SequentialIds, UuidIds};
pub use journal::{MemoryJournal, MessageJournal, NoopJournal};
pub use queue::{QueueConfig, QueueInfo};
pub use receipt::{ReceiptCodec, ReceiptHandle};
pub use service::{QueueError, QueueService, ReceiveOptions, ServiceSettings};
pub use store::{Capabilities, QueueStore};
