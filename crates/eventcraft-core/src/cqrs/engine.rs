//! Domain Engine: the assembled Identifier Generator, Event Log, View
//! Store, Completion Tracker, Pipeline, Outbox and Event Bus for one
//! domain, behind the single `handle_command` ingress.
//!
//! Built with an explicit builder rather than pulled from a container —
//! each domain engine owns its own replica id, projector, and background
//! tasks, and wiring them by hand keeps that ownership visible at the
//! call site.

use std::env;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use uuid::Uuid;

use super::completion_tracker::{CompletionRecord, CompletionStatus, CompletionTracker, WaitError};
use super::event::{DomainEvent, SagaMetadata};
use super::event_bus::{EventBus, EventBusPublisher};
use super::event_log::{EventLog, SequenceKey};
use super::id_generator::IdGenerator;
use super::outbox::{DeadLetterEntry, Outbox, OutboxPublisher};
use super::pipeline::{Pipeline, PipelineConfig, Projector};
use super::view_store::ViewStore;
use super::EngineError;
use crate::shutdown::{GracefulShutdown, ShutdownAwareTaskSpawner};

/// Outcome of `handle_command`: the pipeline's terminal status plus how
/// long ingress-to-completion took.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutcome {
    /// `true` once the pipeline reached a terminal, non-failed state.
    pub status: CompletionStatus,
    /// Populated when `status` is `Failed`.
    pub error_message: Option<String>,
    /// `EngineError::kind()` tag of the failure, e.g. `"conflict"`.
    /// Populated when `status` is `Failed`.
    pub error_kind: Option<&'static str>,
    /// Wall-clock time from `handle_command` being called to the
    /// completion record being resolved.
    pub processing_time_ms: u64,
}

/// Tunables read from the environment at engine construction. Each has a
/// documented default so an engine boots with no configuration present.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How often the outbox publisher loop polls for `NEW` entries.
    /// `OUTBOX_POLL_INTERVAL_MS`, default 100.
    pub outbox_poll_interval: Duration,
    /// Delivery attempts before an outbox entry moves to the dead-letter
    /// sink. `OUTBOX_MAX_ATTEMPTS`, default 5.
    pub outbox_max_attempts: u32,
    /// How long a terminal completion record may sit unclaimed before
    /// `CompletionTracker::sweep` discards it. `COMPLETION_TTL_SECONDS`,
    /// default 3600.
    pub completion_ttl: Duration,
    /// Budget `handle_command` waits for a completion before reporting a
    /// timeout. Derived from `SAGA_DEFAULT_STEP_TIMEOUT_MS`, default 30000
    /// (shared with the saga coordinator's per-step default so a command
    /// submitted as part of a saga step never outlives its own step).
    pub command_timeout: Duration,
}

impl EngineConfig {
    /// Read tunables from the environment, falling back to documented
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        Self {
            outbox_poll_interval: Duration::from_millis(env_u64("OUTBOX_POLL_INTERVAL_MS", 100)),
            outbox_max_attempts: env_u64("OUTBOX_MAX_ATTEMPTS", 5) as u32,
            completion_ttl: Duration::from_secs(env_u64("COMPLETION_TTL_SECONDS", 3600)),
            command_timeout: Duration::from_millis(env_u64("SAGA_DEFAULT_STEP_TIMEOUT_MS", 30_000)),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            outbox_poll_interval: Duration::from_millis(100),
            outbox_max_attempts: 5,
            completion_ttl: Duration::from_secs(3600),
            command_timeout: Duration::from_millis(30_000),
        }
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Assembles a domain's Identifier Generator, Event Log, View Store,
/// Completion Tracker, Pipeline, Outbox and Event Bus, and exposes the
/// command/query surface callers drive.
pub struct Engine<S: Clone + Send + Sync + 'static> {
    config: EngineConfig,
    source: String,
    event_log: Arc<EventLog<DomainEvent>>,
    view_store: Arc<ViewStore<S>>,
    outbox: Arc<Outbox>,
    completion_tracker: Arc<CompletionTracker>,
    pipeline: Arc<Pipeline<S>>,
    bus: Arc<EventBus>,
    outbox_publisher: Arc<OutboxPublisher<EventBusPublisher>>,
}

impl<S: Clone + Send + Sync + 'static> Engine<S> {
    /// Assemble an engine for `source` (the engine name stamped on every
    /// event it produces), keyed to `replica_id` for identifier generation
    /// and outbox claims, projecting with `projector`.
    pub fn build(
        source: impl Into<String>,
        replica_id: u16,
        config: EngineConfig,
        bus: Arc<EventBus>,
        projector: Projector<S>,
    ) -> Self {
        let source = source.into();
        let event_log = Arc::new(EventLog::new());
        let view_store = Arc::new(ViewStore::new());
        let outbox = Arc::new(Outbox::new(config.outbox_max_attempts, config.completion_ttl));
        let completion_tracker = Arc::new(CompletionTracker::new(config.completion_ttl));

        let pipeline_config = PipelineConfig {
            replica_id: format!("{source}-{replica_id}"),
            ..PipelineConfig::default()
        };
        let pipeline = Arc::new(Pipeline::new(
            pipeline_config,
            Arc::new(IdGenerator::new(replica_id)),
            Arc::clone(&event_log),
            Arc::clone(&view_store),
            Arc::clone(&outbox),
            Arc::clone(&completion_tracker),
            projector,
        ));

        let outbox_publisher = Arc::new(OutboxPublisher::new(
            Arc::clone(&outbox),
            Arc::new(EventBusPublisher::new(Arc::clone(&bus))),
            format!("{source}-{replica_id}"),
        ));

        Self {
            config,
            source,
            event_log,
            view_store,
            outbox,
            completion_tracker,
            pipeline,
            bus,
            outbox_publisher,
        }
    }

    /// Sole ingress: submit a command as a domain event, drive it through
    /// the pipeline, and wait for a terminal completion. Returns once the
    /// pipeline resolves the command or `command_timeout` elapses,
    /// whichever comes first — the pipeline keeps running regardless.
    ///
    /// `idempotency_key`, when given, is the client-supplied `eventId`: a
    /// resubmission with the same key replays the original's cached
    /// outcome once it has completed instead of reprocessing, per
    /// [`Pipeline::submit`].
    #[allow(clippy::too_many_arguments)]
    pub async fn handle_command(
        &self,
        event_type: impl Into<String>,
        key: impl Into<String>,
        correlation_id: Uuid,
        saga: Option<SagaMetadata>,
        idempotency_key: Option<Uuid>,
        payload: std::collections::HashMap<String, serde_json::Value>,
    ) -> Result<CommandOutcome, EngineError> {
        let started = Instant::now();

        let (_seq_key, rx) = self
            .pipeline
            .submit(
                event_type,
                self.source.clone(),
                key,
                correlation_id,
                saga.unwrap_or_default(),
                idempotency_key,
                payload,
            )
            .await
            .map_err(EngineError::TransientStore)?;

        // The pipeline only drains on an explicit `process_pending` call
        // (made by this engine's background loop, or synchronously here
        // when nothing is driving it yet) so a freshly built engine with
        // no background task spawned still resolves its own commands.
        self.pipeline.process_pending().await;

        self.resolve(rx, started).await
    }

    async fn resolve(
        &self,
        rx: oneshot::Receiver<CompletionRecord>,
        started: Instant,
    ) -> Result<CommandOutcome, EngineError> {
        let record = match self.completion_tracker.wait(rx, self.config.command_timeout).await {
            Ok(record) => record,
            Err(WaitError::TimedOut) => return Err(EngineError::Timeout("command did not complete in time".to_string())),
            Err(WaitError::Cancelled) => return Err(EngineError::Handler("completion waiter cancelled".to_string())),
            Err(WaitError::NotRegistered) => return Err(EngineError::Handler("no waiter registered for command".to_string())),
        };

        let (error_message, error_kind) = match &record.status {
            CompletionStatus::Failed { error, kind } => (Some(error.clone()), Some(*kind)),
            _ => (None, None),
        };

        Ok(CommandOutcome {
            status: record.status,
            error_message,
            error_kind,
            processing_time_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Current projected state for `key`, or `None` if it has never been
    /// projected or was deleted by a projector returning `None`.
    pub async fn view(&self, key: &str) -> Option<S> {
        self.view_store.get(key).await
    }

    /// Every `(key, state)` pair satisfying `predicate`.
    pub async fn query<F: Fn(&str, &S) -> bool>(&self, predicate: F) -> Vec<(String, S)> {
        self.view_store.query(predicate).await
    }

    /// Visit every event in the Event Log, in sequence order, across all
    /// keys.
    pub async fn replay_all<F: FnMut(&SequenceKey, &DomainEvent)>(&self, visitor: F) {
        self.event_log.replay_all(visitor).await
    }

    /// Visit every event for `key`, in sequence order.
    pub async fn replay_by_key<F: FnMut(&DomainEvent)>(&self, key: &str, visitor: F) {
        self.event_log.replay_by_key(key, visitor).await
    }

    /// Discard the View Store and rebuild every projection from the Event
    /// Log. Used on cold start when no persistent view snapshot exists.
    pub async fn rebuild_views<F: Fn(Option<S>, &DomainEvent) -> Option<S>>(&self, projector: F) {
        self.view_store.rebuild(&self.event_log, projector).await
    }

    /// Dead-lettered outbox entries, for operator inspection.
    pub async fn list_dlq_entries(&self) -> Vec<DeadLetterEntry> {
        self.outbox.list_dlq_entries().await
    }

    /// Re-enqueue a dead-lettered entry as `NEW` for another delivery
    /// attempt.
    pub async fn retry_dlq_entry(&self, entry_id: &str) -> bool {
        self.outbox.retry_dlq_entry(entry_id).await
    }

    /// Permanently discard a dead-lettered entry.
    pub async fn dismiss_dlq_entry(&self, entry_id: &str) -> bool {
        self.outbox.dismiss_dlq_entry(entry_id).await
    }

    /// Spawn this engine's background loops — continuous pipeline
    /// draining and outbox polling — under `spawner`, so both stop
    /// cleanly on shutdown instead of being left to finish mid-publish.
    pub fn spawn_background(self: &Arc<Self>, spawner: &ShutdownAwareTaskSpawner) {
        let engine = Arc::clone(self);
        spawner.spawn_background(&format!("{}-pipeline-drain", self.source), move || async move {
            loop {
                engine.pipeline.process_pending().await;
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        let engine = Arc::clone(self);
        let interval = self.config.outbox_poll_interval;
        spawner.spawn_background(&format!("{}-outbox-publish", self.source), move || async move {
            loop {
                engine.outbox_publisher.tick().await;
                tokio::time::sleep(interval).await;
            }
        });
    }

    /// Number of subscribers currently registered on `topic` of this
    /// engine's shared event bus.
    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.bus.subscriber_count(topic).await
    }

    /// Sweep orphaned completion records and sent outbox entries past
    /// their retention window. Intended to be called periodically
    /// alongside the background loops, or directly in tests.
    pub async fn sweep(&self) -> (usize, usize) {
        (self.completion_tracker.sweep().await, self.outbox.sweep_sent().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sum_projector() -> Projector<i64> {
        Arc::new(|current, event| {
            let amount = event.payload_i64("amount").unwrap_or(0);
            Ok(Some(current.unwrap_or(0) + amount))
        })
    }

    fn test_engine() -> Engine<i64> {
        Engine::build(
            "ledger-engine",
            1,
            EngineConfig {
                command_timeout: Duration::from_secs(2),
                ..EngineConfig::default()
            },
            Arc::new(EventBus::default()),
            sum_projector(),
        )
    }

    fn payload(amount: i64) -> HashMap<String, serde_json::Value> {
        let mut p = HashMap::new();
        p.insert("amount".to_string(), serde_json::json!(amount));
        p
    }

    #[tokio::test]
    async fn handle_command_resolves_and_updates_view() {
        let engine = test_engine();

        let outcome = engine
            .handle_command("deposit", "acct-1", Uuid::new_v4(), None, None, payload(10))
            .await
            .unwrap();

        assert_eq!(outcome.status, CompletionStatus::Completed);
        assert!(outcome.error_message.is_none());
        assert_eq!(engine.view("acct-1").await, Some(10));
    }

    #[tokio::test]
    async fn projector_conflict_surfaces_as_a_typed_failure() {
        let engine = Engine::build(
            "stock-engine",
            1,
            EngineConfig {
                command_timeout: Duration::from_secs(2),
                ..EngineConfig::default()
            },
            Arc::new(EventBus::default()),
            Arc::new(|_current: Option<i64>, _event: &DomainEvent| {
                Err(EngineError::Conflict("insufficient stock".to_string()))
            }),
        );

        let outcome = engine
            .handle_command("reserve", "sku-1", Uuid::new_v4(), None, None, payload(1))
            .await
            .unwrap();

        assert!(matches!(outcome.status, CompletionStatus::Failed { .. }));
        assert_eq!(outcome.error_kind, Some("conflict"));
        assert_eq!(outcome.error_message.as_deref(), Some("conflict: insufficient stock"));
    }

    #[tokio::test]
    async fn repeated_commands_on_one_key_accumulate_in_order() {
        let engine = test_engine();

        for amount in [1, 2, 3] {
            engine
                .handle_command("deposit", "acct-1", Uuid::new_v4(), None, None, payload(amount))
                .await
                .unwrap();
        }

        assert_eq!(engine.view("acct-1").await, Some(6));
    }

    #[tokio::test]
    async fn resubmitting_the_same_idempotency_key_does_not_double_apply() {
        let engine = test_engine();
        let idempotency_key = Uuid::new_v4();

        let first = engine
            .handle_command("deposit", "acct-1", Uuid::new_v4(), None, Some(idempotency_key), payload(10))
            .await
            .unwrap();
        let second = engine
            .handle_command("deposit", "acct-1", Uuid::new_v4(), None, Some(idempotency_key), payload(10))
            .await
            .unwrap();

        assert_eq!(first.status, CompletionStatus::Completed);
        assert_eq!(second.status, CompletionStatus::Completed);
        assert_eq!(engine.view("acct-1").await, Some(10));
    }

    #[tokio::test]
    async fn query_filters_by_predicate() {
        let engine = test_engine();
        engine.handle_command("deposit", "acct-1", Uuid::new_v4(), None, None, payload(5)).await.unwrap();
        engine.handle_command("deposit", "acct-2", Uuid::new_v4(), None, None, payload(50)).await.unwrap();

        let rich = engine.query(|_key, balance| *balance >= 10).await;
        assert_eq!(rich.len(), 1);
        assert_eq!(rich[0].0, "acct-2");
    }

    #[tokio::test]
    async fn rebuild_views_reconstructs_state_from_the_event_log() {
        let engine = test_engine();
        engine.handle_command("deposit", "acct-1", Uuid::new_v4(), None, None, payload(4)).await.unwrap();
        engine.handle_command("deposit", "acct-1", Uuid::new_v4(), None, None, payload(6)).await.unwrap();

        engine
            .rebuild_views(|current, event| Some(current.unwrap_or(0) + event.payload_i64("amount").unwrap_or(0)))
            .await;

        assert_eq!(engine.view("acct-1").await, Some(10));
    }

    #[tokio::test]
    async fn dlq_admin_operations_round_trip_an_entry() {
        let engine = test_engine();
        let event = DomainEvent::new("deposit", "ledger-engine", "acct-1", Uuid::new_v4(), payload(1));
        let entry_id = engine.outbox.enqueue(event).await;
        engine.outbox.claim_new("some-other-replica").await;
        for _ in 0..6 {
            engine.outbox.mark_failed(&entry_id, "boom").await;
        }

        assert_eq!(engine.list_dlq_entries().await.len(), 1);
        assert!(engine.retry_dlq_entry(&entry_id).await);
        assert!(engine.list_dlq_entries().await.is_empty());
    }
}
