//! Tests for the per-queue message table

use crate::clock::{Clock, ManualClock};
use crate::ids::{IdGenerator, SequentialIds};
use crate::journal::{JournalError, JournalOp, MemoryJournal, MessageJournal};
use crate::queue::{QueueConfig, QueueInfo};
use crate::receipt::{ReceiptCodec, ReceiptHandle, MAX_ID_LEN};
use chrono::{DateTime, Utc};
use crate::store::*;
use bytes::Bytes;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// TEST HELPERS
// =============================================================================

struct Harness {
    clock: Arc<ManualClock>,
    codec: Arc<ReceiptCodec>,
    journal: Arc<MemoryJournal>,
    store: QueueStore,
}

impl Harness {
    fn send(&self, body: &str) -> Message {
        self.store
            .enqueue(Bytes::from(body.to_string()), BTreeMap::new(), None)
            .unwrap()
    }

    fn handle(&self, delivery: &Delivery) -> ReceiptHandle {
        self.codec.decode(&delivery.receipt_handle).unwrap()
    }

    fn advance(&self, secs: u64) {
        self.clock.advance(Duration::from_secs(secs));
    }
}

fn info(config: QueueConfig) -> QueueInfo {
    QueueInfo {
        id: "q-test".to_string(),
        name: "test".to_string(),
        url: "http://localhost:4566/000000000000/test".to_string(),
        created_timestamp: 0,
        config,
    }
}

fn harness_with(config: QueueConfig) -> Harness {
    harness_with_ids(config, Arc::new(SequentialIds::new()))
}

fn harness_with_ids(config: QueueConfig, ids: Arc<dyn IdGenerator>) -> Harness {
    let clock = Arc::new(ManualClock::default());
    let codec = Arc::new(ReceiptCodec::new(b"store-test-secret").unwrap());
    let journal = Arc::new(MemoryJournal::new());
    let caps = Capabilities {
        clock: clock.clone(),
        ids,
        codec: codec.clone(),
        journal: journal.clone(),
    };
    Harness {
        clock,
        codec,
        journal,
        store: QueueStore::new(info(config), caps),
    }
}

fn harness() -> Harness {
    harness_with(QueueConfig::default())
}

/// Journal whose writes can be switched off per operation
#[derive(Default)]
struct FlakyJournal {
    fail_append: bool,
    fail_overwrite: bool,
    fail_remove: bool,
}

impl MessageJournal for FlakyJournal {
    fn append(&self, _queue_id: &str, _message: &Message) -> Result<(), JournalError> {
        if self.fail_append {
            return Err(JournalError::Write("append refused".to_string()));
        }
        Ok(())
    }

    fn overwrite(&self, _queue_id: &str, _message: &Message) -> Result<(), JournalError> {
        if self.fail_overwrite {
            return Err(JournalError::Write("overwrite refused".to_string()));
        }
        Ok(())
    }

    fn remove(&self, _queue_id: &str, _message_id: &str) -> Result<(), JournalError> {
        if self.fail_remove {
            return Err(JournalError::Unavailable("remove refused".to_string()));
        }
        Ok(())
    }
}

fn flaky_store(journal: FlakyJournal) -> (QueueStore, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    let caps = Capabilities {
        clock: clock.clone(),
        ids: Arc::new(SequentialIds::new()),
        codec: Arc::new(ReceiptCodec::random()),
        journal: Arc::new(journal),
    };
    let config = QueueConfig {
        message_retention_period: 60,
        ..QueueConfig::default()
    };
    (QueueStore::new(info(config), caps), clock)
}

/// Message ids of a fixed length
struct FixedLengthIds(usize);

impl IdGenerator for FixedLengthIds {
    fn new_message_id(&self) -> String {
        "m".repeat(self.0)
    }

    fn new_queue_id(&self) -> String {
        "q-test".to_string()
    }
}

/// Clock that keeps every in-flight message hidden regardless of time
struct NeverVisible(ManualClock);

impl Clock for NeverVisible {
    fn now(&self) -> DateTime<Utc> {
        self.0.now()
    }

    fn is_visible(&self, _visible_at: DateTime<Utc>) -> bool {
        false
    }
}

// =============================================================================
// ENQUEUE
// =============================================================================

mod enqueue_tests {
    use super::*;

    #[test]
    fn test_enqueue_makes_message_available() {
        let h = harness();
        let message = h.send("hello");

        assert_eq!(message.state, MessageState::Available);
        assert_eq!(message.delivery_epoch, 0);
        assert_eq!(message.receive_count, 0);
        assert_eq!(message.md5_of_body, "5d41402abc4b2a76b9719d911017c592");
        assert_eq!(h.store.stats().unwrap().available, 1);
    }

    #[test]
    fn test_enqueue_rejects_empty_body() {
        let h = harness();
        let result = h.store.enqueue(Bytes::new(), BTreeMap::new(), None);
        assert!(matches!(result, Err(StoreError::InvalidMessage(_))));
    }

    #[test]
    fn test_enqueue_rejects_oversized_body() {
        let h = harness_with(QueueConfig {
            maximum_message_size: 1_024,
            ..QueueConfig::default()
        });
        let at_limit = Bytes::from(vec![b'a'; 1_024]);
        assert!(h.store.enqueue(at_limit, BTreeMap::new(), None).is_ok());

        let too_big = Bytes::from(vec![b'a'; 1_025]);
        let result = h.store.enqueue(too_big, BTreeMap::new(), None);
        assert!(matches!(result, Err(StoreError::InvalidMessage(_))));
    }

    #[test]
    fn test_enqueue_keeps_attributes() {
        let h = harness();
        let mut attributes = BTreeMap::new();
        attributes.insert("trace".to_string(), "abc".to_string());
        let sent = h
            .store
            .enqueue(Bytes::from("x"), attributes.clone(), None)
            .unwrap();

        let delivered = h.store.receive(1, None).unwrap();
        assert_eq!(delivered[0].message.id, sent.id);
        assert_eq!(delivered[0].message.attributes, attributes);
    }

    #[test]
    fn test_delayed_message_hidden_until_delay_elapses() {
        let h = harness();
        h.store
            .enqueue(Bytes::from("later"), BTreeMap::new(), Some(Duration::from_secs(10)))
            .unwrap();

        assert_eq!(h.store.stats().unwrap().delayed, 1);
        assert!(h.store.receive(1, None).unwrap().is_empty());

        h.advance(10);
        let delivered = h.store.receive(1, None).unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].message.delivery_epoch, 1);
    }

    #[test]
    fn test_queue_default_delay_applies() {
        let h = harness_with(QueueConfig {
            delay_seconds: 5,
            ..QueueConfig::default()
        });
        h.send("delayed by default");
        assert!(h.store.receive(1, None).unwrap().is_empty());

        h.advance(5);
        assert_eq!(h.store.receive(1, None).unwrap().len(), 1);
    }

    #[test]
    fn test_delayed_message_cannot_be_deleted_before_delivery() {
        let h = harness();
        let message = h
            .store
            .enqueue(Bytes::from("later"), BTreeMap::new(), Some(Duration::from_secs(10)))
            .unwrap();
        let result = h.store.delete(&message.id, 0);
        assert!(matches!(result, Err(StoreError::HandleExpired(_))));
    }

    #[test]
    fn test_long_message_id_round_trips_through_handle() {
        let h = harness_with_ids(QueueConfig::default(), Arc::new(FixedLengthIds(800)));
        let message = h.send("long id");

        let delivered = h.store.receive(1, None).unwrap();
        let handle = h.handle(&delivered[0]);
        assert_eq!(handle.message_id, message.id);
        h.store.delete(&handle.message_id, handle.epoch).unwrap();
    }

    #[test]
    fn test_longest_message_id_round_trips_through_handle() {
        let h = harness_with_ids(QueueConfig::default(), Arc::new(FixedLengthIds(MAX_ID_LEN)));
        h.send("longest id");

        let delivered = h.store.receive(1, None).unwrap();
        assert_eq!(h.handle(&delivered[0]).message_id.len(), MAX_ID_LEN);
    }

    #[test]
    fn test_enqueue_rejects_id_too_long_for_handle() {
        let h = harness_with_ids(
            QueueConfig::default(),
            Arc::new(FixedLengthIds(MAX_ID_LEN + 1)),
        );
        let result = h.store.enqueue(Bytes::from("x"), BTreeMap::new(), None);
        assert!(matches!(result, Err(StoreError::IdTooLong(n)) if n == MAX_ID_LEN + 1));
        assert_eq!(h.store.stats().unwrap(), QueueStats::default());
        assert!(h.journal.operations().is_empty());
    }
}

// =============================================================================
// RECEIVE
// =============================================================================

mod receive_tests {
    use super::*;

    #[test]
    fn test_receive_empty_queue() {
        let h = harness();
        assert!(h.store.receive(10, None).unwrap().is_empty());
    }

    #[test]
    fn test_receive_oldest_first() {
        let h = harness();
        let first = h.send("one");
        h.advance(1);
        let second = h.send("two");
        h.advance(1);
        let third = h.send("three");

        let ids: Vec<String> = h
            .store
            .receive(10, None)
            .unwrap()
            .into_iter()
            .map(|d| d.message.id)
            .collect();
        assert_eq!(ids, vec![first.id, second.id, third.id]);
    }

    #[test]
    fn test_receive_respects_max() {
        let h = harness();
        for i in 0..5 {
            h.send(&format!("m{i}"));
        }
        assert_eq!(h.store.receive(3, None).unwrap().len(), 3);
        assert_eq!(h.store.receive(3, None).unwrap().len(), 2);
        assert!(h.store.receive(3, None).unwrap().is_empty());
    }

    #[test]
    fn test_receive_hides_message_for_visibility_timeout() {
        let h = harness();
        h.send("hello");

        let first = h.store.receive(1, Some(Duration::from_secs(30))).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].message.state, MessageState::InFlight);

        h.advance(29);
        assert!(h.store.receive(1, None).unwrap().is_empty());

        h.advance(1);
        let again = h.store.receive(1, None).unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].message.receive_count, 2);
    }

    #[test]
    fn test_each_delivery_bumps_epoch() {
        let h = harness();
        h.send("hello");

        let first = h.store.receive(1, Some(Duration::from_secs(5))).unwrap();
        h.advance(5);
        let second = h.store.receive(1, Some(Duration::from_secs(5))).unwrap();

        let first = h.handle(&first[0]);
        let second = h.handle(&second[0]);
        assert_eq!(first.message_id, second.message_id);
        assert_eq!(first.epoch, 1);
        assert_eq!(second.epoch, 2);
        assert_eq!(second.queue_id, "q-test");
    }

    #[test]
    fn test_first_receive_time_is_sticky() {
        let h = harness();
        h.send("hello");

        let first = h.store.receive(1, Some(Duration::from_secs(1))).unwrap();
        let first_seen = first[0].message.first_receive_time;
        assert!(first_seen.is_some());

        h.advance(1);
        let second = h.store.receive(1, None).unwrap();
        assert_eq!(second[0].message.first_receive_time, first_seen);
    }

    #[test]
    fn test_zero_visibility_redelivers_immediately() {
        let h = harness();
        h.send("hello");

        let first = h.store.receive(1, Some(Duration::ZERO)).unwrap();
        let second = h.store.receive(1, Some(Duration::ZERO)).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].message.delivery_epoch, 2);
    }

    #[test]
    fn test_reclaimed_message_keeps_its_place_in_line() {
        let h = harness();
        let old = h.send("old");
        h.store.receive(1, Some(Duration::from_secs(10))).unwrap();
        h.advance(1);
        h.send("new");

        h.advance(10);
        let delivered = h.store.receive(1, None).unwrap();
        assert_eq!(delivered[0].message.id, old.id);
    }
}

// =============================================================================
// DELETE
// =============================================================================

mod delete_tests {
    use super::*;

    #[test]
    fn test_delete_with_current_epoch() {
        let h = harness();
        h.send("hello");
        let delivered = h.store.receive(1, None).unwrap();
        let handle = h.handle(&delivered[0]);

        let deleted = h.store.delete(&handle.message_id, handle.epoch).unwrap();
        assert_eq!(deleted.body, Bytes::from("hello"));
        assert!(h.store.message(&handle.message_id).is_none());
        assert_eq!(h.store.stats().unwrap(), QueueStats::default());
    }

    #[test]
    fn test_delete_with_stale_epoch_fails() {
        let h = harness();
        h.send("hello");
        let stale = h.store.receive(1, Some(Duration::from_secs(30))).unwrap();
        h.advance(31);
        let fresh = h.store.receive(1, Some(Duration::from_secs(30))).unwrap();

        let stale = h.handle(&stale[0]);
        let fresh = h.handle(&fresh[0]);

        let result = h.store.delete(&stale.message_id, stale.epoch);
        assert!(matches!(result, Err(StoreError::HandleExpired(_))));
        assert!(h.store.delete(&fresh.message_id, fresh.epoch).is_ok());
    }

    #[test]
    fn test_delete_twice_fails() {
        let h = harness();
        h.send("hello");
        let delivered = h.store.receive(1, None).unwrap();
        let handle = h.handle(&delivered[0]);

        h.store.delete(&handle.message_id, handle.epoch).unwrap();
        let result = h.store.delete(&handle.message_id, handle.epoch);
        assert!(matches!(result, Err(StoreError::HandleExpired(_))));
    }

    #[test]
    fn test_delete_after_visibility_expired_but_before_redelivery() {
        let h = harness();
        h.send("hello");
        let delivered = h.store.receive(1, Some(Duration::from_secs(5))).unwrap();
        let handle = h.handle(&delivered[0]);

        h.advance(60);
        assert!(h.store.delete(&handle.message_id, handle.epoch).is_ok());
        assert!(h.store.receive(1, None).unwrap().is_empty());
    }

    #[test]
    fn test_delete_unknown_message() {
        let h = harness();
        let result = h.store.delete("m-missing", 1);
        assert!(matches!(result, Err(StoreError::HandleExpired(_))));
    }
}

// =============================================================================
// CHANGE VISIBILITY
// =============================================================================

mod visibility_tests {
    use super::*;

    #[test]
    fn test_extend_visibility() {
        let h = harness();
        h.send("hello");
        let delivered = h.store.receive(1, Some(Duration::from_secs(10))).unwrap();
        let handle = h.handle(&delivered[0]);

        h.advance(5);
        h.store
            .change_visibility(&handle.message_id, handle.epoch, Duration::from_secs(60))
            .unwrap();

        h.advance(30);
        assert!(h.store.receive(1, None).unwrap().is_empty());
        h.advance(30);
        assert_eq!(h.store.receive(1, None).unwrap().len(), 1);
    }

    #[test]
    fn test_zero_timeout_releases_message() {
        let h = harness();
        h.send("hello");
        let delivered = h.store.receive(1, None).unwrap();
        let handle = h.handle(&delivered[0]);

        h.store
            .change_visibility(&handle.message_id, handle.epoch, Duration::ZERO)
            .unwrap();

        assert_eq!(h.store.stats().unwrap().available, 1);
        let again = h.store.receive(1, None).unwrap();
        assert_eq!(h.handle(&again[0]).epoch, 2);
    }

    #[test]
    fn test_change_visibility_keeps_epoch() {
        let h = harness();
        h.send("hello");
        let delivered = h.store.receive(1, None).unwrap();
        let handle = h.handle(&delivered[0]);

        h.store
            .change_visibility(&handle.message_id, handle.epoch, Duration::from_secs(120))
            .unwrap();
        assert!(h.store.delete(&handle.message_id, handle.epoch).is_ok());
    }

    #[test]
    fn test_change_visibility_after_expiry_fails() {
        let h = harness();
        h.send("hello");
        let delivered = h.store.receive(1, Some(Duration::from_secs(5))).unwrap();
        let handle = h.handle(&delivered[0]);

        h.advance(5);
        let result =
            h.store
                .change_visibility(&handle.message_id, handle.epoch, Duration::from_secs(30));
        assert!(matches!(result, Err(StoreError::HandleExpired(_))));
    }

    #[test]
    fn test_change_visibility_with_stale_epoch_fails() {
        let h = harness();
        h.send("hello");
        h.store.receive(1, Some(Duration::ZERO)).unwrap();
        let current = h.store.receive(1, None).unwrap();
        let current = h.handle(&current[0]);

        let result = h
            .store
            .change_visibility(&current.message_id, 1, Duration::from_secs(30));
        assert!(matches!(result, Err(StoreError::HandleExpired(_))));
    }

    #[test]
    fn test_reclaim_asks_clock_for_visibility() {
        let caps = Capabilities {
            clock: Arc::new(NeverVisible(ManualClock::default())),
            ids: Arc::new(SequentialIds::new()),
            codec: Arc::new(ReceiptCodec::random()),
            journal: Arc::new(MemoryJournal::new()),
        };
        let store = QueueStore::new(info(QueueConfig::default()), caps);
        store.enqueue(Bytes::from("x"), BTreeMap::new(), None).unwrap();

        assert_eq!(store.receive(1, Some(Duration::ZERO)).unwrap().len(), 1);
        assert!(store.receive(1, None).unwrap().is_empty());

        let stats = store.stats().unwrap();
        assert_eq!(stats.in_flight, 1);
        assert_eq!(stats.available, 0);
    }
}

// =============================================================================
// CONCURRENCY
// =============================================================================

mod concurrency_tests {
    use super::*;

    #[test]
    fn test_concurrent_receivers_never_share_a_message() {
        let h = harness();
        for i in 0..200 {
            h.send(&format!("m{i}"));
        }

        let received: Vec<Vec<String>> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        let mut ids = Vec::new();
                        loop {
                            let batch = h.store.receive(3, None).unwrap();
                            if batch.is_empty() {
                                break;
                            }
                            ids.extend(batch.into_iter().map(|d| d.message.id));
                        }
                        ids
                    })
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        let all: Vec<String> = received.into_iter().flatten().collect();
        let unique: HashSet<&String> = all.iter().collect();
        assert_eq!(all.len(), 200);
        assert_eq!(unique.len(), 200);
    }

    #[test]
    fn test_concurrent_deletes_with_same_handle_succeed_once() {
        let h = harness();
        h.send("hello");
        let delivered = h.store.receive(1, None).unwrap();
        let handle = h.handle(&delivered[0]);

        let successes: usize = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(|| h.store.delete(&handle.message_id, handle.epoch).is_ok())
                })
                .collect();
            workers
                .into_iter()
                .map(|w| usize::from(w.join().unwrap()))
                .sum()
        });
        assert_eq!(successes, 1);
    }
}

// =============================================================================
// RETENTION
// =============================================================================

mod retention_tests {
    use super::*;

    #[test]
    fn test_message_dropped_after_retention_period() {
        let h = harness_with(QueueConfig {
            message_retention_period: 60,
            ..QueueConfig::default()
        });
        let message = h.send("short-lived");

        h.advance(60);
        assert!(h.store.receive(1, None).unwrap().is_empty());
        assert!(h.store.message(&message.id).is_none());
    }

    #[test]
    fn test_message_within_retention_is_delivered() {
        let h = harness_with(QueueConfig {
            message_retention_period: 60,
            ..QueueConfig::default()
        });
        h.send("still fresh");
        h.advance(59);
        assert_eq!(h.store.receive(1, None).unwrap().len(), 1);
    }
}

// =============================================================================
// PURGE / CLOSE
// =============================================================================

mod lifecycle_tests {
    use super::*;

    #[test]
    fn test_purge_discards_everything() {
        let h = harness();
        h.send("a");
        h.send("b");
        let delivered = h.store.receive(1, None).unwrap();
        let handle = h.handle(&delivered[0]);

        assert_eq!(h.store.purge().unwrap(), 2);
        assert_eq!(h.store.stats().unwrap(), QueueStats::default());
        assert!(h.store.delete(&handle.message_id, handle.epoch).is_err());

        // the queue stays usable
        h.send("c");
        assert_eq!(h.store.receive(1, None).unwrap().len(), 1);
    }

    #[test]
    fn test_close_rejects_further_operations() {
        let h = harness();
        h.send("a");
        assert_eq!(h.store.close(), 1);
        assert_eq!(h.store.close(), 0);

        assert!(matches!(
            h.store.enqueue(Bytes::from("b"), BTreeMap::new(), None),
            Err(StoreError::QueueDeleted(_))
        ));
        assert!(matches!(h.store.receive(1, None), Err(StoreError::QueueDeleted(_))));
        assert!(matches!(h.store.delete("m", 1), Err(StoreError::QueueDeleted(_))));
        assert!(matches!(h.store.purge(), Err(StoreError::QueueDeleted(_))));
        assert!(matches!(h.store.stats(), Err(StoreError::QueueDeleted(_))));
    }

    #[test]
    fn test_stats_counts_each_partition() {
        let h = harness();
        h.send("available");
        h.send("in flight");
        h.store
            .enqueue(Bytes::from("delayed"), BTreeMap::new(), Some(Duration::from_secs(30)))
            .unwrap();
        h.store.receive(1, Some(Duration::from_secs(10))).unwrap();

        let stats = h.store.stats().unwrap();
        assert_eq!(
            stats,
            QueueStats {
                available: 1,
                in_flight: 1,
                delayed: 1,
            }
        );

        // an expired visibility window counts as available before reclaim
        h.advance(10);
        assert_eq!(h.store.stats().unwrap().available, 2);
    }
}

// =============================================================================
// JOURNAL
// =============================================================================

mod journal_tests {
    use super::*;

    #[test]
    fn test_journal_mirrors_lifecycle() {
        let h = harness();
        let message = h.send("hello");
        let delivered = h.store.receive(1, None).unwrap();

        let snapshot = h.journal.snapshot("q-test");
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].delivery_epoch, 1);
        assert_eq!(snapshot[0].state, MessageState::InFlight);

        let handle = h.handle(&delivered[0]);
        h.store.delete(&handle.message_id, handle.epoch).unwrap();
        assert!(h.journal.snapshot("q-test").is_empty());

        assert_eq!(
            h.journal.operations(),
            vec![
                (JournalOp::Append, message.id.clone()),
                (JournalOp::Overwrite, message.id.clone()),
                (JournalOp::Remove, message.id),
            ]
        );
    }

    #[test]
    fn test_failed_append_rejects_message() {
        let (store, _) = flaky_store(FlakyJournal {
            fail_append: true,
            ..FlakyJournal::default()
        });
        let result = store.enqueue(Bytes::from("x"), BTreeMap::new(), None);
        assert!(matches!(result, Err(StoreError::Journal(_))));
        assert_eq!(store.stats().unwrap(), QueueStats::default());
    }

    #[test]
    fn test_failed_remove_keeps_message() {
        let (store, _) = flaky_store(FlakyJournal {
            fail_remove: true,
            ..FlakyJournal::default()
        });
        store.enqueue(Bytes::from("x"), BTreeMap::new(), None).unwrap();
        let delivered = store.receive(1, None).unwrap();
        let id = delivered[0].message.id.clone();

        assert!(matches!(store.delete(&id, 1), Err(StoreError::Journal(_))));
        assert!(store.message(&id).is_some());
    }

    #[test]
    fn test_failed_overwrite_leaves_message_available() {
        let (store, _) = flaky_store(FlakyJournal {
            fail_overwrite: true,
            ..FlakyJournal::default()
        });
        let message = store.enqueue(Bytes::from("x"), BTreeMap::new(), None).unwrap();

        assert!(store.receive(1, None).unwrap().is_empty());
        assert_eq!(store.stats().unwrap().available, 1);

        let kept = store.message(&message.id).unwrap();
        assert_eq!(kept.delivery_epoch, 0);
        assert_eq!(kept.state, MessageState::Available);
        assert!(kept.first_receive_time.is_none());
    }

    #[test]
    fn test_failed_remove_keeps_expired_message() {
        let (store, clock) = flaky_store(FlakyJournal {
            fail_remove: true,
            ..FlakyJournal::default()
        });
        let message = store.enqueue(Bytes::from("old"), BTreeMap::new(), None).unwrap();
        clock.advance(Duration::from_secs(60));

        assert!(store.receive(1, None).unwrap().is_empty());
        assert!(store.message(&message.id).is_some());
        assert_eq!(store.stats().unwrap().available, 1);
    }

    #[test]
    fn test_stuck_expired_message_does_not_block_fresh_ones() {
        let (store, clock) = flaky_store(FlakyJournal {
            fail_remove: true,
            ..FlakyJournal::default()
        });
        store.enqueue(Bytes::from("old"), BTreeMap::new(), None).unwrap();
        clock.advance(Duration::from_secs(30));
        let fresh = store.enqueue(Bytes::from("fresh"), BTreeMap::new(), None).unwrap();
        clock.advance(Duration::from_secs(30));

        let delivered = store.receive(10, None).unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].message.id, fresh.id);
    }
}
