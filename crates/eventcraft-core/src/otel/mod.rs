//! Structured logging setup for event sourcing engine processes.
//!
//! # Quick Start
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

mod builder;

pub use builder::{Observability, ObservabilityBuilder, ObservabilityError, ObservabilityGuard};
