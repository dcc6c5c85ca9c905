//! Topic-per-event-type broadcast Event Bus.
//!
//! Within one publisher, publications are delivered in submission order;
//! across publishers, no global order is guaranteed — subscribers must not
//! assume ordering across event types.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

use super::event::DomainEvent;
use super::outbox::BusPublisher;

/// Handle returned by `subscribe`, used to `unsubscribe` later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    sender: mpsc::Sender<DomainEvent>,
}

/// Broadcast channel keyed by topic (`event.eventType`).
///
/// A single publisher's sends to one topic preserve order because they
/// share a bounded mpsc channel per subscriber; there is no cross-topic or
/// cross-publisher ordering guarantee.
pub struct EventBus {
    topics: Arc<RwLock<HashMap<String, Vec<Subscription>>>>,
    next_id: AtomicU64,
    channel_capacity: usize,
}

impl EventBus {
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            channel_capacity,
        }
    }

    /// Register a receiver for `topic`. Returns a subscription id (for
    /// `unsubscribe`) and the receiving half of its channel.
    pub async fn subscribe(&self, topic: impl Into<String>) -> (SubscriptionId, mpsc::Receiver<DomainEvent>) {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));

        let mut topics = self.topics.write().await;
        topics
            .entry(topic.into())
            .or_default()
            .push(Subscription { id, sender: tx });

        (id, rx)
    }

    pub async fn unsubscribe(&self, topic: &str, id: SubscriptionId) {
        let mut topics = self.topics.write().await;
        if let Some(subs) = topics.get_mut(topic) {
            subs.retain(|s| s.id != id);
        }
    }

    /// Deliver `event` to every subscriber of `topic`, in registration
    /// order for this call (preserving per-publisher FIFO as long as the
    /// caller serializes its own `publish` calls). Delivery is at-least
    /// once: a slow or dropped subscriber does not block others.
    pub async fn publish(&self, topic: &str, event: DomainEvent) {
        let subscribers = {
            let topics = self.topics.read().await;
            topics.get(topic).map(|s| s.iter().map(|sub| sub.sender.clone()).collect::<Vec<_>>())
        };

        let Some(subscribers) = subscribers else {
            return;
        };

        for sender in subscribers {
            // Best-effort: a full or closed channel must not block delivery
            // to other subscribers.
            let _ = sender.send(event.clone()).await;
        }
    }

    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .await
            .get(topic)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Adapts [`EventBus`] to the [`BusPublisher`] trait the outbox publisher
/// drains into, routing each event to the topic named by its `eventType`.
pub struct EventBusPublisher {
    bus: Arc<EventBus>,
}

impl EventBusPublisher {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

#[async_trait::async_trait]
impl BusPublisher for EventBusPublisher {
    async fn publish(&self, event: &DomainEvent) -> Result<(), String> {
        self.bus.publish(&event.event_type, event.clone()).await;
        Ok(())
    }
}
