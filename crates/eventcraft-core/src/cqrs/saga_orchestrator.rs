//! Orchestrated saga runtime: a central step runner with per-step timeout,
//! retry, and reverse-order compensation.
//!
//! Contrast with [`crate::cqrs::saga`], which implements the choreographed
//! style (independent listeners reacting to bus events with no central
//! coordinator).

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::RwLock;
use tokio::time::Instant;
use uuid::Uuid;

/// Result type for saga operations.
pub type SagaResult<T> = Result<T, SagaError>;

/// A boxed, `Send` future — the shape every step action and compensation
/// closure must return.
pub type StepFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;

/// A step action or compensation: a closure over the saga context that
/// drives a single domain command.
pub type StepAction<C> = Arc<dyn Fn(Arc<C>) -> StepFuture + Send + Sync>;

/// Errors that can occur during saga execution.
#[derive(Debug, Clone)]
pub enum SagaError {
    /// Definition is malformed (duplicate names, no steps, non-positive
    /// timeout).
    InvalidDefinition(String),
    /// A saga with this id is already executing.
    AlreadyExecuting,
}

impl fmt::Display for SagaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SagaError::InvalidDefinition(msg) => write!(f, "invalid saga definition: {msg}"),
            SagaError::AlreadyExecuting => write!(f, "saga is already executing"),
        }
    }
}

impl std::error::Error for SagaError {}

/// Terminal and in-flight status of a saga instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaStatus {
    Running,
    Compensating,
    Completed,
    Failed,
    TimedOut,
}

/// Status of an individual step within a running saga instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Compensating,
    Compensated,
    CompensationFailed,
}

/// Runtime state of a single step, as recorded on the saga instance.
#[derive(Debug, Clone)]
pub struct SagaStepState {
    pub name: String,
    pub status: StepStatus,
    pub attempts: u32,
    pub started_at: Option<SystemTime>,
    pub ended_at: Option<SystemTime>,
    pub error: Option<String>,
}

impl SagaStepState {
    fn pending(name: String) -> Self {
        Self {
            name,
            status: StepStatus::Pending,
            attempts: 0,
            started_at: None,
            ended_at: None,
            error: None,
        }
    }
}

/// A saga definition's static step description: name, action, optional
/// compensation, timeout, and action retry policy.
pub struct SagaStepDefinition<C> {
    name: String,
    timeout: Duration,
    max_retries: u32,
    retry_delay: Duration,
    action: StepAction<C>,
    compensation: Option<StepAction<C>>,
}

impl<C> SagaStepDefinition<C> {
    /// A step with no retries and no compensation.
    pub fn new(
        name: impl Into<String>,
        timeout: Duration,
        action: StepAction<C>,
    ) -> Self {
        Self {
            name: name.into(),
            timeout,
            max_retries: 1,
            retry_delay: Duration::from_millis(0),
            action,
            compensation: None,
        }
    }

    /// Attach a compensation, invoked only if this step had previously
    /// succeeded and a later step failed.
    pub fn with_compensation(mut self, compensation: StepAction<C>) -> Self {
        self.compensation = Some(compensation);
        self
    }

    /// Set the action retry policy. `max_retries` is the total number of
    /// attempts, not the number of retries after the first. Applies only to
    /// the action; compensation is never retried by the runtime.
    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.retry_delay = retry_delay;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// An ordered list of steps and an optional overall saga timeout.
pub struct SagaDefinition<C> {
    name: String,
    steps: Vec<SagaStepDefinition<C>>,
    saga_timeout: Option<Duration>,
}

impl<C> SagaDefinition<C> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            saga_timeout: None,
        }
    }

    pub fn add_step(mut self, step: SagaStepDefinition<C>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_saga_timeout(mut self, timeout: Duration) -> Self {
        self.saga_timeout = Some(timeout);
        self
    }

    /// Unique step names, at least one step, non-empty names, positive
    /// timeouts. Checked once at construction, before the first execution.
    pub fn validate(&self) -> SagaResult<()> {
        if self.steps.is_empty() {
            return Err(SagaError::InvalidDefinition(
                "saga must declare at least one step".into(),
            ));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.name.is_empty() {
                return Err(SagaError::InvalidDefinition(
                    "step name must not be empty".into(),
                ));
            }
            if !seen.insert(step.name.as_str()) {
                return Err(SagaError::InvalidDefinition(format!(
                    "duplicate step name: {}",
                    step.name
                )));
            }
            if step.timeout.is_zero() {
                return Err(SagaError::InvalidDefinition(format!(
                    "step {} must have a positive timeout",
                    step.name
                )));
            }
        }

        Ok(())
    }
}

/// A running or completed saga, as tracked by the orchestrator.
#[derive(Debug, Clone)]
pub struct SagaInstance {
    pub saga_id: String,
    pub saga_type: String,
    pub current_step: usize,
    pub total_steps: usize,
    pub status: SagaStatus,
    pub per_step_status: Vec<SagaStepState>,
    pub started_at: SystemTime,
    pub updated_at: SystemTime,
}

/// Central runtime that drives saga steps and triggers compensations.
pub struct SagaOrchestrator<C> {
    running: Arc<RwLock<HashMap<String, SagaInstance>>>,
    history: Arc<RwLock<Vec<SagaInstance>>>,
    cancelled: Arc<RwLock<HashSet<String>>>,
    _phantom: std::marker::PhantomData<fn() -> C>,
}

impl<C: Send + Sync + 'static> SagaOrchestrator<C> {
    pub fn new() -> Self {
        Self {
            running: Arc::new(RwLock::new(HashMap::new())),
            history: Arc::new(RwLock::new(Vec::new())),
            cancelled: Arc::new(RwLock::new(HashSet::new())),
            _phantom: std::marker::PhantomData,
        }
    }

    /// Request cancellation. The orchestrator transitions to the
    /// compensation phase at the next safe point (between retries, between
    /// steps, or on deadline) — not necessarily immediately.
    pub async fn cancel_saga(&self, saga_id: &str) -> bool {
        if !self.running.read().await.contains_key(saga_id) {
            return false;
        }
        self.cancelled.write().await.insert(saga_id.to_string());
        true
    }

    async fn is_cancelled(&self, saga_id: &str) -> bool {
        self.cancelled.read().await.contains(saga_id)
    }

    pub async fn saga_status(&self, saga_id: &str) -> Option<SagaInstance> {
        if let Some(instance) = self.running.read().await.get(saga_id) {
            return Some(instance.clone());
        }
        self.history
            .read()
            .await
            .iter()
            .find(|i| i.saga_id == saga_id)
            .cloned()
    }

    pub async fn running_count(&self) -> usize {
        self.running.read().await.len()
    }

    pub async fn history(&self) -> Vec<SagaInstance> {
        self.history.read().await.clone()
    }

    /// Start a saga in the background and return its id immediately,
    /// matching the `startSaga(definitionName, initialContext) → sagaId`
    /// external interface: callers poll [`Self::saga_status`] or call
    /// [`Self::cancel_saga`] by id while it runs, rather than blocking on
    /// the whole action-plus-compensation run. Validation failures are
    /// reported synchronously since they are known before anything starts.
    pub async fn start_saga(&self, definition: SagaDefinition<C>, context: Arc<C>) -> SagaResult<String> {
        definition.validate()?;
        let saga_id = Uuid::new_v4().to_string();
        let orchestrator = self.clone();
        let id_for_task = saga_id.clone();
        tokio::spawn(async move {
            let _ = orchestrator.execute_with_id(id_for_task, definition, context).await;
        });
        Ok(saga_id)
    }

    /// Execute a saga instance end to end: action phase, then (on failure,
    /// timeout, or cancellation) the reverse-order compensation phase.
    /// Blocks until the saga reaches a terminal state; use [`Self::start_saga`]
    /// instead when a caller needs the id before completion (e.g. to cancel).
    pub async fn execute(
        &self,
        definition: SagaDefinition<C>,
        context: Arc<C>,
    ) -> SagaResult<SagaInstance> {
        definition.validate()?;
        let saga_id = Uuid::new_v4().to_string();
        self.execute_with_id(saga_id, definition, context).await
    }

    async fn execute_with_id(
        &self,
        saga_id: String,
        definition: SagaDefinition<C>,
        context: Arc<C>,
    ) -> SagaResult<SagaInstance> {
        let now = SystemTime::now();
        let mut instance = SagaInstance {
            saga_id: saga_id.clone(),
            saga_type: definition.name.clone(),
            current_step: 0,
            total_steps: definition.steps.len(),
            status: SagaStatus::Running,
            per_step_status: definition
                .steps
                .iter()
                .map(|s| SagaStepState::pending(s.name.clone()))
                .collect(),
            started_at: now,
            updated_at: now,
        };

        self.running
            .write()
            .await
            .insert(saga_id.clone(), instance.clone());

        let overall_deadline = definition
            .saga_timeout
            .map(|d| Instant::now() + d);

        let mut timed_out = false;
        let mut failed_at: Option<usize> = None;

        for (index, step) in definition.steps.iter().enumerate() {
            if self.is_cancelled(&saga_id).await {
                failed_at = Some(index);
                break;
            }

            if let Some(deadline) = overall_deadline {
                if Instant::now() >= deadline {
                    timed_out = true;
                    failed_at = Some(index);
                    break;
                }
            }

            instance.current_step = index;
            instance.per_step_status[index].status = StepStatus::Running;
            instance.per_step_status[index].started_at = Some(SystemTime::now());
            self.checkpoint(&saga_id, &instance).await;

            let budget = match overall_deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    step.timeout.min(remaining)
                }
                None => step.timeout,
            };

            match self
                .run_action_with_retry(step, Arc::clone(&context), budget, &saga_id)
                .await
            {
                StepOutcome::Success(attempts) => {
                    instance.per_step_status[index].status = StepStatus::Completed;
                    instance.per_step_status[index].attempts = attempts;
                    instance.per_step_status[index].ended_at = Some(SystemTime::now());
                }
                StepOutcome::TimedOut(attempts) => {
                    instance.per_step_status[index].status = StepStatus::Failed;
                    instance.per_step_status[index].attempts = attempts;
                    instance.per_step_status[index].ended_at = Some(SystemTime::now());
                    instance.per_step_status[index].error = Some("step timed out".to_string());
                    timed_out = true;
                    failed_at = Some(index);
                }
                StepOutcome::Cancelled(attempts) => {
                    instance.per_step_status[index].status = StepStatus::Failed;
                    instance.per_step_status[index].attempts = attempts;
                    instance.per_step_status[index].ended_at = Some(SystemTime::now());
                    instance.per_step_status[index].error = Some("saga cancelled".to_string());
                    failed_at = Some(index);
                }
                StepOutcome::Failed(attempts, error) => {
                    instance.per_step_status[index].status = StepStatus::Failed;
                    instance.per_step_status[index].attempts = attempts;
                    instance.per_step_status[index].ended_at = Some(SystemTime::now());
                    instance.per_step_status[index].error = Some(error);
                    failed_at = Some(index);
                }
            }

            if failed_at.is_some() {
                break;
            }
        }

        if let Some(failed_index) = failed_at {
            instance.status = SagaStatus::Compensating;
            self.checkpoint(&saga_id, &instance).await;
            self.run_compensation_phase(&definition, &context, &mut instance, failed_index)
                .await;
            instance.status = if timed_out {
                SagaStatus::TimedOut
            } else {
                SagaStatus::Failed
            };
        } else {
            instance.status = SagaStatus::Completed;
        }

        instance.updated_at = SystemTime::now();

        self.running.write().await.remove(&saga_id);
        self.cancelled.write().await.remove(&saga_id);
        self.history.write().await.push(instance.clone());

        Ok(instance)
    }

    async fn checkpoint(&self, saga_id: &str, instance: &SagaInstance) {
        let mut instance = instance.clone();
        instance.updated_at = SystemTime::now();
        self.running.write().await.insert(saga_id.to_string(), instance);
    }

    async fn run_action_with_retry(
        &self,
        step: &SagaStepDefinition<C>,
        context: Arc<C>,
        budget: Duration,
        saga_id: &str,
    ) -> StepOutcome {
        let deadline = Instant::now() + budget;
        let mut attempts = 0;
        let mut last_error = String::new();

        loop {
            if self.is_cancelled(saga_id).await {
                return StepOutcome::Cancelled(attempts);
            }

            attempts += 1;
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return StepOutcome::TimedOut(attempts);
            }

            let fut = (step.action)(Arc::clone(&context));
            match tokio::time::timeout(remaining, fut).await {
                Ok(Ok(())) => return StepOutcome::Success(attempts),
                Ok(Err(error)) => {
                    last_error = error;
                }
                Err(_elapsed) => return StepOutcome::TimedOut(attempts),
            }

            if attempts >= step.max_retries {
                return StepOutcome::Failed(attempts, last_error);
            }

            if Instant::now() + step.retry_delay >= deadline {
                return StepOutcome::Failed(attempts, last_error);
            }

            if self.is_cancelled(saga_id).await {
                return StepOutcome::Cancelled(attempts);
            }
            tokio::time::sleep(step.retry_delay).await;
        }
    }

    /// Walk previously-completed steps in reverse order invoking their
    /// compensation, with no retries, each bounded by its own step timeout.
    async fn run_compensation_phase(
        &self,
        definition: &SagaDefinition<C>,
        context: &Arc<C>,
        instance: &mut SagaInstance,
        failed_index: usize,
    ) {
        for index in (0..failed_index).rev() {
            let step = &definition.steps[index];
            if instance.per_step_status[index].status != StepStatus::Completed {
                continue;
            }
            let Some(compensation) = step.compensation.as_ref() else {
                continue;
            };

            instance.per_step_status[index].status = StepStatus::Compensating;

            let fut = compensation(Arc::clone(context));
            let outcome = tokio::time::timeout(step.timeout, fut).await;

            match outcome {
                Ok(Ok(())) => {
                    instance.per_step_status[index].status = StepStatus::Compensated;
                }
                Ok(Err(error)) => {
                    instance.per_step_status[index].status = StepStatus::CompensationFailed;
                    instance.per_step_status[index].error = Some(error);
                }
                Err(_elapsed) => {
                    instance.per_step_status[index].status = StepStatus::CompensationFailed;
                    instance.per_step_status[index].error =
                        Some("compensation timed out".to_string());
                }
            }
        }
    }
}

impl<C: Send + Sync + 'static> Default for SagaOrchestrator<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Clone for SagaOrchestrator<C> {
    fn clone(&self) -> Self {
        Self {
            running: Arc::clone(&self.running),
            history: Arc::clone(&self.history),
            cancelled: Arc::clone(&self.cancelled),
            _phantom: std::marker::PhantomData,
        }
    }
}

enum StepOutcome {
    Success(u32),
    Failed(u32, String),
    TimedOut(u32),
    Cancelled(u32),
}

/// Build a [`StepAction`] from an async closure.
pub fn step_action<C, F, Fut>(f: F) -> StepAction<C>
where
    F: Fn(Arc<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), String>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)) as StepFuture)
}
