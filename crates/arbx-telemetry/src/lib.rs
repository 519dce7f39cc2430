//! Prometheus metrics and structured logging for ARBX.
//!
//! - Structured logging with tracing (JSON in production, pretty otherwise)
//! - Prometheus metrics for executions, leg orders, fill waits, rate limiting,
//!   compensations and reduce-only quarantine

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{init_logging, DEFAULT_LOG_FILTER};
pub use metrics::Metrics;
