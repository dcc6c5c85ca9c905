//! Resilience patterns for building fault-tolerant applications.
//!
//! This module provides the resilience primitives the pipeline and outbox
//! stages lean on to survive transient store/broker failures:
//! - **Retry**: Exponential backoff with jitter, retry budgets, and adaptive
//!   retry
//! - **Circuit Breaker**: Fail-fast pattern with configurable thresholds
//!
//! # Example
//!
//! ```rust,ignore
//! use eventcraft_core::resilience::{
//!     RetryExecutor, RetryConfig,
//!     CircuitBreaker, CircuitBreakerConfig,
//! };
//!
//! // Retry with exponential backoff
//! let retry = RetryExecutor::new(RetryConfig::default());
//! let result = retry.execute("fetch_data", || async {
//!     // Your fallible operation
//!     Ok::<_, std::io::Error>("success")
//! }).await;
//!
//! // Circuit breaker
//! let cb = CircuitBreaker::new("external_api", CircuitBreakerConfig::default());
//! let result = cb.call(|| async {
//!     // Your external call
//!     Ok::<_, std::io::Error>("response")
//! }).await;
//! ```

mod circuit_breaker;
mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerManager, CircuitBreakerStats,
    CircuitOpenError, CircuitState,
};
pub use retry::{AdaptiveRetry, RetryBudget, RetryConfig, RetryError, RetryExecutor, RetryPolicy};
