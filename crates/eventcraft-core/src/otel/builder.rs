//! Observability builder for easy setup of structured logging.
//!
//! # Example
//!
//! ```rust,ignore
//! use eventcraft_core::otel::Observability;
//!
//! let _guard = Observability::builder("eventcraft-engine")
//!     .environment_from_env()
//!     .json_logging()
//!     .log_level_from_env()
//!     .build()?;
//! ```

use std::env;

use tracing_subscriber::{util::SubscriberInitExt, EnvFilter};

/// Builder for configuring structured logging.
pub struct ObservabilityBuilder {
    service_name: String,
    environment: Option<String>,
    json_logging: bool,
    log_level: String,
}

impl ObservabilityBuilder {
    /// Create a new observability builder
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            environment: None,
            json_logging: false,
            log_level: "info".to_string(),
        }
    }

    /// Set the environment (e.g., "production", "staging", "development")
    pub fn environment(mut self, env: impl Into<String>) -> Self {
        self.environment = Some(env.into());
        self
    }

    /// Read environment from ENVIRONMENT or ENV env var
    pub fn environment_from_env(mut self) -> Self {
        self.environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("ENV"))
            .ok();
        self
    }

    /// Enable JSON-formatted log output (for production)
    pub fn json_logging(mut self) -> Self {
        self.json_logging = true;
        self
    }

    /// Set the log level (trace, debug, info, warn, error)
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Read log level from RUST_LOG env var
    pub fn log_level_from_env(mut self) -> Self {
        if let Ok(level) = env::var("RUST_LOG") {
            self.log_level = level;
        }
        self
    }

    /// Build and initialize the tracing subscriber.
    ///
    /// Returns a guard; dropping it is a no-op but keeps call sites symmetric
    /// with richer observability backends a deployment might swap in later.
    pub fn build(self) -> Result<ObservabilityGuard, ObservabilityError> {
        let env_filter =
            EnvFilter::try_new(&self.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true);

        let result = if self.json_logging {
            subscriber.json().with_current_span(true).finish().try_init()
        } else {
            subscriber.finish().try_init()
        };

        result.map_err(|e| ObservabilityError::SubscriberInit(e.to_string()))?;

        tracing::info!(
            service = %self.service_name,
            environment = self.environment.as_deref().unwrap_or("unspecified"),
            "observability initialized"
        );

        Ok(ObservabilityGuard { _private: () })
    }
}

/// Guard that keeps the observability stack active for the process lifetime.
pub struct ObservabilityGuard {
    _private: (),
}

/// Errors that can occur during observability setup
#[derive(Debug)]
pub enum ObservabilityError {
    /// Failed to initialize the subscriber
    SubscriberInit(String),
}

impl std::fmt::Display for ObservabilityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObservabilityError::SubscriberInit(msg) => {
                write!(f, "failed to initialize tracing subscriber: {}", msg)
            }
        }
    }
}

impl std::error::Error for ObservabilityError {}

/// Type alias for the builder
pub type Observability = ObservabilityBuilder;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let builder = ObservabilityBuilder::new("test-service");
        assert_eq!(builder.service_name, "test-service");
        assert!(builder.environment.is_none());
        assert!(!builder.json_logging);
        assert_eq!(builder.log_level, "info");
    }

    #[test]
    fn builder_fluent_api() {
        let builder = ObservabilityBuilder::new("test-service")
            .environment("production")
            .json_logging()
            .log_level("debug");

        assert_eq!(builder.environment, Some("production".to_string()));
        assert!(builder.json_logging);
        assert_eq!(builder.log_level, "debug");
    }
}
