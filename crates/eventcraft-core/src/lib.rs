//! # EventCraft Core
//!
//! The event sourcing core of a distributed microservices framework: an
//! append-only Event Log, a Materialized View Store, a Transactional
//! Outbox feeding an Event Bus, and a Saga Coordinator running either
//! choreographed or orchestrated workflows.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use eventcraft_core::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let bus = Arc::new(EventBus::default());
//!     let projector: Projector<i64> = Arc::new(|current, event| {
//!         Ok(Some(current.unwrap_or(0) + event.payload_i64("amount").unwrap_or(0)))
//!     });
//!     let engine = Engine::build("ledger-engine", 1, EngineConfig::from_env(), bus, projector);
//!     println!("engine built: {:?}", engine.view("acct-1").await);
//! }
//! ```

#![deny(warnings)]
#![deny(missing_docs)]
#![deny(unsafe_code)]

/// CQRS + Event Sourcing: Event Log, View Store, Outbox, Event Bus, Saga
/// Coordinator.
#[cfg(feature = "cqrs")]
pub mod cqrs;

/// Structured logging setup built on `tracing`.
#[cfg(feature = "otel")]
pub mod otel;

/// Graceful shutdown: signal handling, shutdown-aware task spawning.
pub mod shutdown;

/// Retry, circuit breaker and related resilience primitives used by the
/// pipeline and outbox delivery loops.
#[cfg(feature = "resilience")]
pub mod resilience;

// ============================================================================
// Re-exported dependencies
// ============================================================================
// These re-exports let consumers use common dependencies without adding
// them explicitly to their own Cargo.toml, keeping versions consistent
// across the workspace.

/// Re-export async_trait for async trait definitions
pub use async_trait;
/// Re-export backoff for retry/resilience patterns
#[cfg(feature = "resilience")]
pub use backoff;
/// Re-export chrono for date/time handling used by the AllSource backend
#[cfg(feature = "cqrs-allsource")]
pub use chrono;
/// Re-export dashmap for concurrent hash maps
#[cfg(feature = "resilience")]
pub use dashmap;
/// Re-export parking_lot for efficient synchronization primitives
#[cfg(feature = "resilience")]
pub use parking_lot;
/// Re-export rand for jittered backoff
#[cfg(feature = "resilience")]
pub use rand;
/// Re-export serde for serialization
pub use serde;
/// Re-export serde_json for JSON handling
pub use serde_json;
/// Re-export tokio for the async runtime
pub use tokio;
/// Re-export tracing for observability
#[cfg(feature = "otel")]
pub use tracing;
/// Re-export tracing_subscriber for log configuration
#[cfg(feature = "otel-subscriber")]
pub use tracing_subscriber;
/// Re-export uuid for event and correlation identifiers
pub use uuid;

/// Prelude module for convenient imports
///
/// Commonly used imports for applications built on an EventCraft domain
/// engine.
pub mod prelude {
    #[cfg(feature = "cqrs")]
    pub use crate::cqrs::{
        ChoreographyRegistry, CommandOutcome, CompletionRecord, CompletionStatus,
        CompletionTracker, DeadLetter, DeadLetterEntry, DomainEvent, Engine, EngineConfig,
        EngineError, Event, EventBus, EventBusPublisher, EventLog, EventTypeName, IdGenerator,
        ListenerBudget, Outbox, OutboxEntry, OutboxPublisher, OutboxStatus, Pipeline,
        PipelineConfig, Projector, SagaDefinition, SagaError, SagaInstance, SagaListener,
        SagaMetadata, SagaOrchestrator, SagaStatus, SagaStepDefinition, SagaStepState,
        SequenceKey, StepStatus, ViewStore, step_action,
    };
    /// Re-export otel setup utilities
    #[cfg(feature = "otel")]
    pub use crate::otel::{Observability, ObservabilityBuilder, ObservabilityError, ObservabilityGuard};
    /// Re-export resilience primitives
    #[cfg(feature = "resilience")]
    pub use crate::resilience::{
        CircuitBreaker, CircuitBreakerConfig, CircuitOpenError, RetryConfig, RetryExecutor,
    };
    /// Re-export shutdown utilities
    pub use crate::shutdown::{
        GracefulShutdown, GracefulShutdownExt, ShutdownAwareTaskSpawner, ShutdownSignal,
        ShutdownToken,
    };
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_eventcraft_core_exists() {
        assert!(true);
    }
}
