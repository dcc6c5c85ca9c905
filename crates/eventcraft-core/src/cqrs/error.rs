//! Unified error taxonomy for the event sourcing engine.
//!
//! Every engine component (pipeline, view store, outbox, event bus, saga
//! coordinator) reports failures through [`EngineError`] so callers can apply
//! one retry/backoff policy instead of reinventing it per component.

use std::fmt;

/// Errors produced by engine components.
#[derive(Debug, Clone)]
pub enum EngineError {
    /// Input failed structural or business-rule validation. Not retryable.
    Validation(String),
    /// The operation conflicts with current state (e.g. optimistic
    /// concurrency, duplicate key, already-claimed row). Caller should
    /// re-read and decide whether to retry.
    Conflict(String),
    /// The backing store failed in a way that is expected to clear up on its
    /// own (timeout, connection reset, lock contention). Safe to retry.
    TransientStore(String),
    /// The backing store failed in a way that will not clear up by retrying
    /// (corruption, schema mismatch, disk full).
    FatalStore(String),
    /// An operation exceeded its allotted time budget.
    Timeout(String),
    /// A message could not be handed off to its destination bus/queue.
    Delivery(String),
    /// A downstream handler (command handler, projection, saga step)
    /// returned an error while processing an otherwise well-formed request.
    Handler(String),
}

impl EngineError {
    /// True for failure classes a caller may reasonably retry without
    /// changing the request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::TransientStore(_) | EngineError::Timeout(_) | EngineError::Delivery(_)
        )
    }

    /// Short machine-readable tag, useful for metrics labels and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::Conflict(_) => "conflict",
            EngineError::TransientStore(_) => "transient_store",
            EngineError::FatalStore(_) => "fatal_store",
            EngineError::Timeout(_) => "timeout",
            EngineError::Delivery(_) => "delivery",
            EngineError::Handler(_) => "handler",
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "validation error: {msg}"),
            EngineError::Conflict(msg) => write!(f, "conflict: {msg}"),
            EngineError::TransientStore(msg) => write!(f, "transient store error: {msg}"),
            EngineError::FatalStore(msg) => write!(f, "fatal store error: {msg}"),
            EngineError::Timeout(msg) => write!(f, "timeout: {msg}"),
            EngineError::Delivery(msg) => write!(f, "delivery error: {msg}"),
            EngineError::Handler(msg) => write!(f, "handler error: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<String> for EngineError {
    fn from(msg: String) -> Self {
        // Backends that predate this taxonomy surface plain strings; treat
        // them as transient so existing retry loops keep working.
        EngineError::TransientStore(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(EngineError::TransientStore("x".into()).is_retryable());
        assert!(EngineError::Timeout("x".into()).is_retryable());
        assert!(EngineError::Delivery("x".into()).is_retryable());
        assert!(!EngineError::Validation("x".into()).is_retryable());
        assert!(!EngineError::Conflict("x".into()).is_retryable());
        assert!(!EngineError::FatalStore("x".into()).is_retryable());
        assert!(!EngineError::Handler("x".into()).is_retryable());
    }

    #[test]
    fn kind_tags() {
        assert_eq!(EngineError::Conflict("x".into()).kind(), "conflict");
        assert_eq!(EngineError::Handler("x".into()).kind(), "handler");
    }
}
