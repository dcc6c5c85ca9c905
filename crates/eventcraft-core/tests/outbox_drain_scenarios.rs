#![cfg(feature = "cqrs")]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use eventcraft_core::cqrs::BusPublisher;
use eventcraft_core::prelude::*;
use tokio::sync::RwLock;
use uuid::Uuid;

struct RecordingBus {
    delivered: Arc<RwLock<Vec<DomainEvent>>>,
}

#[async_trait::async_trait]
impl BusPublisher for RecordingBus {
    async fn publish(&self, event: &DomainEvent) -> Result<(), String> {
        self.delivered.write().await.push(event.clone());
        Ok(())
    }
}

fn order_event(key: &str) -> DomainEvent {
    DomainEvent::new("order.placed", "order-engine", key, Uuid::new_v4(), HashMap::new())
}

// Two outbox publishers, standing in for two running replicas of the same
// engine, poll the same shared outbox concurrently. Each entry must be
// delivered exactly once even though both replicas race on every tick.
#[tokio::test]
async fn two_replicas_draining_concurrently_never_double_deliver() {
    let outbox = Arc::new(Outbox::new(3, Duration::from_secs(60)));
    for i in 0..50 {
        outbox.enqueue(order_event(&format!("order-{i}"))).await;
    }

    let delivered = Arc::new(RwLock::new(Vec::new()));
    let bus = Arc::new(RecordingBus {
        delivered: Arc::clone(&delivered),
    });

    let replica_a = Arc::new(OutboxPublisher::new(Arc::clone(&outbox), Arc::clone(&bus), "replica-a"));
    let replica_b = Arc::new(OutboxPublisher::new(Arc::clone(&outbox), Arc::clone(&bus), "replica-b"));

    let task_a = tokio::spawn({
        let replica_a = Arc::clone(&replica_a);
        async move {
            let mut total = 0;
            for _ in 0..20 {
                total += replica_a.tick().await;
            }
            total
        }
    });
    let task_b = tokio::spawn({
        let replica_b = Arc::clone(&replica_b);
        async move {
            let mut total = 0;
            for _ in 0..20 {
                total += replica_b.tick().await;
            }
            total
        }
    });

    let delivered_count = task_a.await.unwrap() + task_b.await.unwrap();
    assert_eq!(delivered_count, 50);

    let delivered = delivered.read().await;
    assert_eq!(delivered.len(), 50);
    let mut seen = std::collections::HashSet::new();
    for event in delivered.iter() {
        assert!(seen.insert(event.event_id), "event delivered more than once");
    }
}

// A publish failure on one replica releases the entry back to `New`; the
// other replica (or the same one, next tick) can then pick it up and
// succeed, rather than the entry being stuck `Claimed` forever.
#[tokio::test]
async fn a_failed_delivery_is_retried_by_whichever_replica_polls_next() {
    struct FlakyBus {
        delivered: Arc<RwLock<Vec<DomainEvent>>>,
        fail_next: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl BusPublisher for FlakyBus {
        async fn publish(&self, event: &DomainEvent) -> Result<(), String> {
            if self.fail_next.load(Ordering::SeqCst) > 0 {
                self.fail_next.fetch_sub(1, Ordering::SeqCst);
                return Err("replica unreachable".to_string());
            }
            self.delivered.write().await.push(event.clone());
            Ok(())
        }
    }

    let outbox = Arc::new(Outbox::new(5, Duration::from_secs(60)));
    outbox.enqueue(order_event("order-flaky")).await;

    let delivered = Arc::new(RwLock::new(Vec::new()));
    let bus = Arc::new(FlakyBus {
        delivered: Arc::clone(&delivered),
        fail_next: AtomicUsize::new(1),
    });

    let replica_a = OutboxPublisher::new(Arc::clone(&outbox), Arc::clone(&bus), "replica-a");
    let replica_b = OutboxPublisher::new(Arc::clone(&outbox), Arc::clone(&bus), "replica-b");

    assert_eq!(replica_a.tick().await, 0);
    assert_eq!(replica_b.tick().await, 1);
    assert_eq!(delivered.read().await.len(), 1);
}
