//! Transactional Outbox: durable per-engine queue with claim-based
//! deduplication across replicas, draining into the Event Bus.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::RwLock;
use uuid::Uuid;

#[cfg(feature = "resilience")]
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig};

use super::event::DomainEvent;

/// Lifecycle of an Outbox Entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxStatus {
    /// Written by the pipeline's publish stage, not yet claimed.
    New,
    /// Claimed by exactly one replica, in flight to the bus.
    Claimed,
    /// Delivered; retained until the retention window elapses.
    Sent,
    /// Publish failed; released back to `New` or moved to the DLQ.
    Failed,
}

/// A durable record awaiting bus delivery.
#[derive(Debug, Clone)]
pub struct OutboxEntry {
    pub entry_id: String,
    pub event: DomainEvent,
    pub status: OutboxStatus,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<SystemTime>,
    pub sent_at: Option<SystemTime>,
    pub attempts: u32,
}

/// An entry that exhausted `max_attempts` and was moved to the dead-letter
/// sink.
#[derive(Debug, Clone)]
pub struct DeadLetterEntry {
    pub entry_id: String,
    pub event: DomainEvent,
    pub last_error: String,
    pub failed_at: SystemTime,
    pub attempts: u32,
}

/// Durable per-engine queue fed by the pipeline's publish stage (§4.4
/// stage 4) and drained by an [`OutboxPublisher`].
pub struct Outbox {
    entries: Arc<RwLock<HashMap<String, OutboxEntry>>>,
    dead_letters: Arc<RwLock<Vec<DeadLetterEntry>>>,
    max_attempts: u32,
    retention: Duration,
}

impl Outbox {
    pub fn new(max_attempts: u32, retention: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            dead_letters: Arc::new(RwLock::new(Vec::new())),
            max_attempts,
            retention,
        }
    }

    /// Write a new `NEW` entry for `event`. Part of the pipeline's publish
    /// stage; writing the same event twice (crash-replay from the pending
    /// log) is tolerated by callers treating insertion as upsert-by-event-id.
    pub async fn enqueue(&self, event: DomainEvent) -> String {
        let entry_id = event.event_id.to_string();
        let mut entries = self.entries.write().await;
        entries.entry(entry_id.clone()).or_insert_with(|| OutboxEntry {
            entry_id: entry_id.clone(),
            event,
            status: OutboxStatus::New,
            claimed_by: None,
            claimed_at: None,
            sent_at: None,
            attempts: 0,
        });
        entry_id
    }

    /// Atomically claim every `NEW` entry for `claimer`. This is the
    /// deduplication point: only one replica's call observes a given entry
    /// transition from `New`, because the whole scan-and-mark runs under
    /// the single write lock.
    pub async fn claim_new(&self, claimer: &str) -> Vec<OutboxEntry> {
        let mut entries = self.entries.write().await;
        let mut claimed = Vec::new();

        for entry in entries.values_mut() {
            if entry.status == OutboxStatus::New {
                entry.status = OutboxStatus::Claimed;
                entry.claimed_by = Some(claimer.to_string());
                entry.claimed_at = Some(SystemTime::now());
                claimed.push(entry.clone());
            }
        }

        claimed
    }

    /// Mark a claimed entry as delivered.
    pub async fn mark_sent(&self, entry_id: &str) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(entry_id) {
            entry.status = OutboxStatus::Sent;
            entry.sent_at = Some(SystemTime::now());
        }
    }

    /// Publish failed for this entry. Released back to `New` for another
    /// attempt, unless `max_attempts` is exhausted, in which case it moves
    /// to the dead-letter sink.
    pub async fn mark_failed(&self, entry_id: &str, error: impl Into<String>) {
        let error = error.into();
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get_mut(entry_id) else {
            return;
        };

        entry.attempts += 1;
        entry.status = OutboxStatus::Failed;

        if entry.attempts >= self.max_attempts {
            let dead_letter = DeadLetterEntry {
                entry_id: entry.entry_id.clone(),
                event: entry.event.clone(),
                last_error: error,
                failed_at: SystemTime::now(),
                attempts: entry.attempts,
            };
            entries.remove(entry_id);
            drop(entries);
            self.dead_letters.write().await.push(dead_letter);
        } else {
            entry.status = OutboxStatus::New;
            entry.claimed_by = None;
            entry.claimed_at = None;
        }
    }

    /// Delete entries that have sat `Sent` for longer than the retention
    /// window. Called periodically by the publisher loop.
    pub async fn sweep_sent(&self) -> usize {
        let now = SystemTime::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();

        entries.retain(|_id, entry| {
            if entry.status != OutboxStatus::Sent {
                return true;
            }
            let age = entry
                .sent_at
                .and_then(|t| now.duration_since(t).ok())
                .unwrap_or(Duration::ZERO);
            age < self.retention
        });

        before - entries.len()
    }

    pub async fn list_dlq_entries(&self) -> Vec<DeadLetterEntry> {
        self.dead_letters.read().await.clone()
    }

    /// Re-enqueue a dead-lettered entry as `New`, resetting its attempt
    /// counter, for an operator-triggered retry.
    pub async fn retry_dlq_entry(&self, entry_id: &str) -> bool {
        let mut dead_letters = self.dead_letters.write().await;
        let Some(index) = dead_letters.iter().position(|d| d.entry_id == entry_id) else {
            return false;
        };
        let dead_letter = dead_letters.remove(index);
        drop(dead_letters);

        let mut entries = self.entries.write().await;
        entries.insert(
            dead_letter.entry_id.clone(),
            OutboxEntry {
                entry_id: dead_letter.entry_id,
                event: dead_letter.event,
                status: OutboxStatus::New,
                claimed_by: None,
                claimed_at: None,
                sent_at: None,
                attempts: 0,
            },
        );
        true
    }

    /// Permanently discard a dead-lettered entry.
    pub async fn dismiss_dlq_entry(&self, entry_id: &str) -> bool {
        let mut dead_letters = self.dead_letters.write().await;
        let before = dead_letters.len();
        dead_letters.retain(|d| d.entry_id != entry_id);
        dead_letters.len() != before
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Destination an [`OutboxPublisher`] drains claimed entries into.
#[async_trait::async_trait]
pub trait BusPublisher: Send + Sync {
    async fn publish(&self, event: &DomainEvent) -> Result<(), String>;
}

/// Single-threaded (per replica) loop that polls for `NEW` entries, claims
/// them, and publishes to the bus.
pub struct OutboxPublisher<B: BusPublisher> {
    outbox: Arc<Outbox>,
    bus: Arc<B>,
    replica_id: String,
    /// Trips after repeated delivery failures so a persistently broken bus
    /// stops being hit on every poll tick; claimed entries fail fast
    /// (no network call) while the circuit is open.
    #[cfg(feature = "resilience")]
    circuit: Arc<CircuitBreaker>,
}

impl<B: BusPublisher> OutboxPublisher<B> {
    pub fn new(outbox: Arc<Outbox>, bus: Arc<B>, replica_id: impl Into<String>) -> Self {
        let replica_id = replica_id.into();
        Self {
            outbox,
            bus,
            #[cfg(feature = "resilience")]
            circuit: Arc::new(CircuitBreaker::new(
                format!("outbox-bus-{replica_id}"),
                CircuitBreakerConfig::default(),
            )),
            replica_id,
        }
    }

    /// Run a single poll/claim/publish cycle. Returns the number of
    /// entries successfully delivered.
    pub async fn tick(&self) -> usize {
        let claimed = self.outbox.claim_new(&self.replica_id).await;
        let mut delivered = 0;

        for entry in claimed {
            match self.publish_one(&entry.event).await {
                Ok(()) => {
                    self.outbox.mark_sent(&entry.entry_id).await;
                    delivered += 1;
                }
                Err(error) => {
                    self.outbox.mark_failed(&entry.entry_id, error).await;
                }
            }
        }

        self.outbox.sweep_sent().await;
        delivered
    }

    #[cfg(feature = "resilience")]
    async fn publish_one(&self, event: &DomainEvent) -> Result<(), String> {
        self.circuit
            .call(|| self.bus.publish(event))
            .await
            .map_err(|error| error.to_string())
    }

    #[cfg(not(feature = "resilience"))]
    async fn publish_one(&self, event: &DomainEvent) -> Result<(), String> {
        self.bus.publish(event).await
    }
}

/// Helper for constructing entry ids outside the context of a real event,
/// used by tests and admin tooling.
pub fn new_entry_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingBus {
        published: Arc<RwLock<Vec<DomainEvent>>>,
        fail_first_n: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl BusPublisher for RecordingBus {
        async fn publish(&self, event: &DomainEvent) -> Result<(), String> {
            if self.fail_first_n.load(Ordering::SeqCst) > 0 {
                self.fail_first_n.fetch_sub(1, Ordering::SeqCst);
                return Err("simulated delivery failure".to_string());
            }
            self.published.write().await.push(event.clone());
            Ok(())
        }
    }

    fn sample_event() -> DomainEvent {
        DomainEvent::new(
            "order.placed",
            "order-engine",
            "o1",
            Uuid::new_v4(),
            Default::default(),
        )
    }

    #[tokio::test]
    async fn only_one_claimer_wins_a_new_entry() {
        let outbox = Arc::new(Outbox::new(3, Duration::from_secs(60)));
        outbox.enqueue(sample_event()).await;

        let claim_a = outbox.claim_new("replica-a").await;
        let claim_b = outbox.claim_new("replica-b").await;

        assert_eq!(claim_a.len(), 1);
        assert_eq!(claim_b.len(), 0);
    }

    #[tokio::test]
    async fn publish_failure_releases_entry_until_max_attempts() {
        let outbox = Arc::new(Outbox::new(2, Duration::from_secs(60)));
        let bus = Arc::new(RecordingBus {
            published: Arc::new(RwLock::new(Vec::new())),
            fail_first_n: AtomicUsize::new(2),
        });
        let publisher = OutboxPublisher::new(Arc::clone(&outbox), Arc::clone(&bus), "replica-a");

        outbox.enqueue(sample_event()).await;

        assert_eq!(publisher.tick().await, 0); // attempt 1 fails, released to New
        assert_eq!(outbox.len().await, 1);
        assert!(outbox.list_dlq_entries().await.is_empty());

        assert_eq!(publisher.tick().await, 0); // attempt 2 fails, max_attempts reached -> DLQ
        assert_eq!(outbox.len().await, 0);
        assert_eq!(outbox.list_dlq_entries().await.len(), 1);
    }

    #[tokio::test]
    async fn successful_publish_marks_sent_then_sweeps_after_retention() {
        let outbox = Arc::new(Outbox::new(3, Duration::from_millis(10)));
        let bus = Arc::new(RecordingBus {
            published: Arc::new(RwLock::new(Vec::new())),
            fail_first_n: AtomicUsize::new(0),
        });
        let publisher = OutboxPublisher::new(Arc::clone(&outbox), Arc::clone(&bus), "replica-a");

        outbox.enqueue(sample_event()).await;
        assert_eq!(publisher.tick().await, 1);
        assert_eq!(bus.published.read().await.len(), 1);

        tokio::time::sleep(Duration::from_millis(30)).await;
        outbox.sweep_sent().await;
        assert!(outbox.is_empty().await);
    }

    #[cfg(feature = "resilience")]
    #[tokio::test]
    async fn circuit_breaker_stops_calling_the_bus_once_tripped() {
        struct AlwaysFailBus {
            call_count: AtomicUsize,
        }

        #[async_trait::async_trait]
        impl BusPublisher for AlwaysFailBus {
            async fn publish(&self, _event: &DomainEvent) -> Result<(), String> {
                self.call_count.fetch_add(1, Ordering::SeqCst);
                Err("downstream unreachable".to_string())
            }
        }

        let outbox = Arc::new(Outbox::new(20, Duration::from_secs(60)));
        let bus = Arc::new(AlwaysFailBus {
            call_count: AtomicUsize::new(0),
        });
        let publisher = OutboxPublisher::new(Arc::clone(&outbox), Arc::clone(&bus), "replica-a");

        outbox.enqueue(sample_event()).await;

        // Default failure_threshold is 5: each tick fails, the entry is
        // released back to `New`, and the breaker trips on the 5th failure.
        for _ in 0..5 {
            publisher.tick().await;
        }
        let calls_at_trip = bus.call_count.load(Ordering::SeqCst);
        assert_eq!(calls_at_trip, 5);

        // The breaker is now open: further ticks fail fast without ever
        // reaching the bus again.
        for _ in 0..3 {
            publisher.tick().await;
        }
        assert_eq!(bus.call_count.load(Ordering::SeqCst), calls_at_trip);
    }

    #[tokio::test]
    async fn dlq_entry_can_be_retried_or_dismissed() {
        let outbox = Arc::new(Outbox::new(1, Duration::from_secs(60)));
        let entry_id = outbox.enqueue(sample_event()).await;
        outbox.claim_new("replica-a").await;
        outbox.mark_failed(&entry_id, "boom").await;

        assert_eq!(outbox.list_dlq_entries().await.len(), 1);

        assert!(outbox.retry_dlq_entry(&entry_id).await);
        assert_eq!(outbox.len().await, 1);
        assert!(outbox.list_dlq_entries().await.is_empty());

        outbox.claim_new("replica-a").await;
        outbox.mark_failed(&entry_id, "boom again").await;
        assert!(outbox.dismiss_dlq_entry(&entry_id).await);
        assert!(outbox.list_dlq_entries().await.is_empty());
    }
}
