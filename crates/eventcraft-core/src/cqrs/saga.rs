//! Choreographed sagas: independent listeners reacting to bus events, with
//! no central coordinator.
//!
//! Contrast with [`crate::cqrs::saga_orchestrator`], which drives steps from
//! a single runtime.

#![cfg(feature = "cqrs")]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::timeout;

use super::event::DomainEvent;

/// Reacts to one incoming event, optionally emitting follow-up events.
///
/// Implementations must be idempotent: the bus delivers at least once, so
/// the same event may reach `on_event` more than once.
#[async_trait]
pub trait SagaListener: Send + Sync {
    /// Name used in logging and dead-letter records.
    fn name(&self) -> &str;

    /// Handle one delivery of `event`.
    async fn on_event(&self, event: &DomainEvent) -> Result<Vec<DomainEvent>, String>;
}

/// Per-listener completion budget: how long a single delivery may take, and
/// how many re-deliveries are attempted before giving up.
#[derive(Clone, Debug)]
pub struct ListenerBudget {
    pub timeout: Duration,
    pub max_attempts: u32,
}

impl Default for ListenerBudget {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_attempts: 3,
        }
    }
}

/// A listener delivery that exhausted its retry budget.
#[derive(Clone, Debug)]
pub struct DeadLetter {
    pub listener: String,
    pub event: DomainEvent,
    pub error: String,
    pub attempts: u32,
}

/// Maps event topics (by `eventType`) to the listeners registered on them
/// and drives delivery, retry, and dead-lettering.
pub struct ChoreographyRegistry {
    listeners: Arc<RwLock<HashMap<String, Vec<Arc<dyn SagaListener>>>>>,
    budget: ListenerBudget,
    dead_letters: Arc<RwLock<Vec<DeadLetter>>>,
}

impl ChoreographyRegistry {
    pub fn new(budget: ListenerBudget) -> Self {
        Self {
            listeners: Arc::new(RwLock::new(HashMap::new())),
            budget,
            dead_letters: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Register a listener on an event topic (the event's `eventType`).
    pub async fn register(&self, topic: impl Into<String>, listener: Arc<dyn SagaListener>) {
        let mut listeners = self.listeners.write().await;
        listeners.entry(topic.into()).or_default().push(listener);
    }

    /// Deliver `event` to every listener registered on its topic.
    ///
    /// Each listener is retried up to `max_attempts` within its timeout
    /// budget; exhausting the budget sends the delivery to the dead-letter
    /// sink instead of failing the whole dispatch. Every follow-up event a
    /// listener returns is decorated with the originating `correlationId`
    /// and, when the listener didn't set its own, the originating saga
    /// metadata.
    pub async fn dispatch(&self, event: &DomainEvent) -> Vec<DomainEvent> {
        let topic_listeners = {
            let listeners = self.listeners.read().await;
            listeners.get(&event.event_type).cloned().unwrap_or_default()
        };

        let mut follow_ups = Vec::new();
        for listener in topic_listeners {
            follow_ups.extend(self.deliver(&listener, event).await);
        }
        follow_ups
    }

    async fn deliver(&self, listener: &Arc<dyn SagaListener>, event: &DomainEvent) -> Vec<DomainEvent> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = timeout(self.budget.timeout, listener.on_event(event)).await;

            match outcome {
                Ok(Ok(events)) => {
                    return events
                        .into_iter()
                        .map(|mut follow_up| {
                            follow_up.correlation_id = event.correlation_id;
                            if follow_up.saga.saga_id.is_none() {
                                follow_up.saga = event.saga.clone();
                            }
                            follow_up
                        })
                        .collect();
                }
                Ok(Err(error)) => {
                    if attempt >= self.budget.max_attempts {
                        self.dead_letter(listener, event, error, attempt).await;
                        return Vec::new();
                    }
                }
                Err(_elapsed) => {
                    if attempt >= self.budget.max_attempts {
                        self.dead_letter(listener, event, "listener timed out".to_string(), attempt)
                            .await;
                        return Vec::new();
                    }
                }
            }
        }
    }

    async fn dead_letter(
        &self,
        listener: &Arc<dyn SagaListener>,
        event: &DomainEvent,
        error: String,
        attempts: u32,
    ) {
        self.dead_letters.write().await.push(DeadLetter {
            listener: listener.name().to_string(),
            event: event.clone(),
            error,
            attempts,
        });
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct CountingListener {
        calls: AtomicUsize,
        fail_until: usize,
    }

    #[async_trait]
    impl SagaListener for CountingListener {
        fn name(&self) -> &str {
            "counting"
        }

        async fn on_event(&self, event: &DomainEvent) -> Result<Vec<DomainEvent>, String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_until {
                return Err("not ready".to_string());
            }
            Ok(vec![DomainEvent::new(
                "order.confirmed",
                "order-engine",
                event.key.clone(),
                event.correlation_id,
                Default::default(),
            )])
        }
    }

    fn sample_event() -> DomainEvent {
        DomainEvent::new(
            "stock.reserved",
            "product-engine",
            "p1",
            Uuid::new_v4(),
            Default::default(),
        )
    }

    #[tokio::test]
    async fn follow_up_events_inherit_correlation_id() {
        let registry = ChoreographyRegistry::new(ListenerBudget::default());
        registry
            .register(
                "stock.reserved",
                Arc::new(CountingListener {
                    calls: AtomicUsize::new(0),
                    fail_until: 0,
                }),
            )
            .await;

        let event = sample_event();
        let follow_ups = registry.dispatch(&event).await;

        assert_eq!(follow_ups.len(), 1);
        assert_eq!(follow_ups[0].correlation_id, event.correlation_id);
    }

    #[tokio::test]
    async fn listener_is_retried_before_dead_lettering() {
        let registry = ChoreographyRegistry::new(ListenerBudget {
            timeout: Duration::from_secs(1),
            max_attempts: 3,
        });
        registry
            .register(
                "stock.reserved",
                Arc::new(CountingListener {
                    calls: AtomicUsize::new(0),
                    fail_until: 2,
                }),
            )
            .await;

        let follow_ups = registry.dispatch(&sample_event()).await;
        assert_eq!(follow_ups.len(), 1);
        assert!(registry.dead_letters().await.is_empty());
    }

    #[tokio::test]
    async fn exhausted_retries_are_dead_lettered() {
        let registry = ChoreographyRegistry::new(ListenerBudget {
            timeout: Duration::from_secs(1),
            max_attempts: 2,
        });
        registry
            .register(
                "stock.reserved",
                Arc::new(CountingListener {
                    calls: AtomicUsize::new(0),
                    fail_until: 100,
                }),
            )
            .await;

        let follow_ups = registry.dispatch(&sample_event()).await;
        assert!(follow_ups.is_empty());

        let dead_letters = registry.dead_letters().await;
        assert_eq!(dead_letters.len(), 1);
        assert_eq!(dead_letters[0].attempts, 2);
    }
}
