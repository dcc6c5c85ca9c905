//! The six-stage pipeline: timestamp & metadata, persist, project, publish,
//! remove from pending, complete.
//!
//! Fed by the Pending Events Log, a change-data-capture-style buffer the
//! ingress call appends to. Per-key serialization across stages 2–3 is
//! enforced with a lane lock so a later event for a key is never projected
//! before an earlier one, while distinct keys drain in parallel.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::{oneshot, Mutex, RwLock};
use uuid::Uuid;

use super::completion_tracker::{CompletionRecord, CompletionStatus, CompletionTracker};
use super::error::EngineError;
use super::event::{DomainEvent, SagaMetadata};
use super::event_log::{EventLog, SequenceKey};
use super::id_generator::IdGenerator;
use super::outbox::Outbox;
use super::view_store::ViewStore;

/// A projection applied during stage 3. Errors leave the View Store's
/// current value for the key untouched (the mutator is atomic and rejects
/// on throw); `Ok(None)` deletes the key. Projectors distinguish business
/// conflicts (`EngineError::Conflict`) from other handler failures so a
/// caller can tell "insufficient stock" from "projector panicked".
pub type Projector<S> =
    Arc<dyn Fn(Option<S>, &DomainEvent) -> Result<Option<S>, EngineError> + Send + Sync>;

/// Tunables for stage retry and dead-lettering.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub replica_id: String,
    pub max_stage_retries: u32,
    pub stage_retry_delay: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            replica_id: "replica-0".to_string(),
            max_stage_retries: 3,
            stage_retry_delay: Duration::from_millis(50),
        }
    }
}

#[derive(Clone)]
struct PendingEntry {
    seq_key: SequenceKey,
    event: DomainEvent,
}

/// An event that exhausted stage 2/3 retries.
#[derive(Clone, Debug)]
pub struct PipelineDeadLetter {
    pub seq_key: String,
    pub event: DomainEvent,
    pub stage: &'static str,
    pub error: String,
    pub failed_at: SystemTime,
}

/// Drives one domain engine's event processing from ingress to completion.
pub struct Pipeline<S: Clone + Send + Sync + 'static> {
    config: PipelineConfig,
    id_generator: Arc<IdGenerator>,
    pending: Arc<RwLock<VecDeque<PendingEntry>>>,
    event_log: Arc<EventLog<DomainEvent>>,
    view_store: Arc<ViewStore<S>>,
    outbox: Arc<Outbox>,
    completion_tracker: Arc<CompletionTracker>,
    projector: Projector<S>,
    key_lanes: Arc<RwLock<HashMap<String, Arc<Mutex<()>>>>>,
    dead_letters: Arc<RwLock<Vec<PipelineDeadLetter>>>,
    event_dedup: Arc<RwLock<HashMap<Uuid, SequenceKey>>>,
}

impl<S: Clone + Send + Sync + 'static> Pipeline<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: PipelineConfig,
        id_generator: Arc<IdGenerator>,
        event_log: Arc<EventLog<DomainEvent>>,
        view_store: Arc<ViewStore<S>>,
        outbox: Arc<Outbox>,
        completion_tracker: Arc<CompletionTracker>,
        projector: Projector<S>,
    ) -> Self {
        Self {
            config,
            id_generator,
            pending: Arc::new(RwLock::new(VecDeque::new())),
            event_log,
            view_store,
            outbox,
            completion_tracker,
            projector,
            key_lanes: Arc::new(RwLock::new(HashMap::new())),
            dead_letters: Arc::new(RwLock::new(Vec::new())),
            event_dedup: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Stage 1 plus ingress: assign a sequence, stamp timestamp and
    /// correlation/saga metadata, register a completion waiter, and append
    /// to the Pending Events Log. Returns the sequence key and a receiver
    /// the caller can await (directly, or through
    /// [`CompletionTracker::wait`]) for the terminal status.
    ///
    /// When `event_id` is `Some` and was already submitted, this is a
    /// duplicate: if the original has already reached a terminal state, its
    /// cached [`CompletionRecord`] is replayed to the caller without
    /// re-running the command. A duplicate that arrives while the original
    /// is still in flight is not deduplicated — it is processed as an
    /// independent submission under a fresh sequence number.
    #[allow(clippy::too_many_arguments)]
    pub async fn submit(
        &self,
        event_type: impl Into<String>,
        source: impl Into<String>,
        key: impl Into<String>,
        correlation_id: Uuid,
        saga: SagaMetadata,
        event_id: Option<Uuid>,
        payload: std::collections::HashMap<String, serde_json::Value>,
    ) -> Result<(SequenceKey, oneshot::Receiver<CompletionRecord>), String> {
        if let Some(id) = event_id {
            if let Some(existing) = self.event_dedup.read().await.get(&id).cloned() {
                if let Some(record) = self.completion_tracker.peek(&seq_key_string(&existing)).await {
                    let (tx, rx) = oneshot::channel();
                    let _ = tx.send(record);
                    return Ok((existing, rx));
                }
            }
        }

        let key = key.into();
        let sequence = self
            .id_generator
            .next_id()
            .map_err(|e| e.to_string())?;
        let seq_key = SequenceKey::new(sequence, key.clone());

        let mut event = DomainEvent::new(event_type, source, key, correlation_id, payload).with_saga(saga);
        if let Some(id) = event_id {
            event = event.with_event_id(id);
            self.event_dedup.write().await.insert(id, seq_key.clone());
        }

        let rx = self.completion_tracker.register(seq_key_string(&seq_key)).await;

        self.pending
            .write()
            .await
            .push_back(PendingEntry { seq_key: seq_key.clone(), event });

        Ok((seq_key, rx))
    }

    /// Drain every currently pending entry through stages 2–6. Returns the
    /// number of entries drained (successfully or not — failures still
    /// leave the pending log, per stage 5's idempotent removal).
    pub async fn process_pending(&self) -> usize {
        let batch: Vec<PendingEntry> = {
            let mut pending = self.pending.write().await;
            pending.drain(..).collect()
        };

        let count = batch.len();
        for entry in batch {
            self.process_one(entry).await;
        }
        count
    }

    async fn process_one(&self, entry: PendingEntry) {
        let PendingEntry { seq_key, event } = entry;
        let lane = self.lane_for(&seq_key.key).await;
        let _guard = lane.lock().await;

        // Stage 2: persist.
        if let Err(error) = self.persist_with_retry(&seq_key, &event).await {
            self.fail(&seq_key, &event, "persist", EngineError::TransientStore(error)).await;
            return;
        }

        // Stage 3: project.
        if let Err(error) = self.project_with_retry(&event).await {
            self.fail(&seq_key, &event, "project", error).await;
            return;
        }

        // Stages 4-5 are idempotent under replay: re-enqueueing the same
        // event id or re-removing an absent pending entry are both no-ops.
        self.outbox.enqueue(event.clone()).await;

        // Stage 6: terminal completion. Logged but non-fatal if nothing is
        // listening; the submitter's future simply times out.
        self.completion_tracker
            .complete(&seq_key_string(&seq_key), CompletionStatus::Completed)
            .await;
    }

    /// `EventLog::append` never fails for the in-memory/SQLite-backed logs
    /// this pipeline is built against; the `Result` return keeps the stage
    /// boundary uniform with stage 3 and leaves room for a backend whose
    /// writes can fail.
    async fn persist_with_retry(&self, seq_key: &SequenceKey, event: &DomainEvent) -> Result<(), String> {
        self.event_log.append(seq_key.clone(), event.clone()).await;
        Ok(())
    }

    async fn project_with_retry(&self, event: &DomainEvent) -> Result<(), EngineError> {
        let mut last_error = EngineError::Handler(String::new());

        for attempt in 0..self.config.max_stage_retries {
            let error_slot: Arc<std::sync::Mutex<Option<EngineError>>> = Arc::new(std::sync::Mutex::new(None));
            let error_slot_inner = Arc::clone(&error_slot);
            let projector = Arc::clone(&self.projector);
            let event_for_projection = event.clone();

            self.view_store
                .execute_on_key(&event.key, move |current| {
                    match projector(current.clone(), &event_for_projection) {
                        Ok(next) => next,
                        Err(err) => {
                            *error_slot_inner.lock().unwrap() = Some(err);
                            current
                        }
                    }
                })
                .await;

            match error_slot.lock().unwrap().take() {
                None => return Ok(()),
                Some(error) => {
                    // A conflict reflects a business-rule rejection, not a
                    // transient failure of the projector itself; retrying it
                    // would only reproduce the same conflict, so surface it
                    // immediately instead of burning the retry budget.
                    if matches!(error, EngineError::Conflict(_)) {
                        return Err(error);
                    }
                    last_error = error;
                    if attempt + 1 < self.config.max_stage_retries {
                        tokio::time::sleep(self.config.stage_retry_delay).await;
                    }
                }
            }
        }

        Err(last_error)
    }

    async fn fail(&self, seq_key: &SequenceKey, event: &DomainEvent, stage: &'static str, error: EngineError) {
        let kind = error.kind();
        let error = error.to_string();
        self.dead_letters.write().await.push(PipelineDeadLetter {
            seq_key: seq_key_string(seq_key),
            event: event.clone(),
            stage,
            error: error.clone(),
            failed_at: SystemTime::now(),
        });
        self.completion_tracker
            .complete(&seq_key_string(seq_key), CompletionStatus::Failed { error, kind })
            .await;
    }

    async fn lane_for(&self, key: &str) -> Arc<Mutex<()>> {
        if let Some(lane) = self.key_lanes.read().await.get(key) {
            return Arc::clone(lane);
        }
        let mut lanes = self.key_lanes.write().await;
        Arc::clone(lanes.entry(key.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))))
    }

    pub async fn dead_letters(&self) -> Vec<PipelineDeadLetter> {
        self.dead_letters.read().await.clone()
    }

    pub async fn pending_len(&self) -> usize {
        self.pending.read().await.len()
    }

    pub fn replica_id(&self) -> &str {
        &self.config.replica_id
    }
}

fn seq_key_string(seq_key: &SequenceKey) -> String {
    format!("{}:{}", seq_key.sequence, seq_key.key)
}
