//! Telemetry: structured logging and metrics.
//!
//! - **Logging**: `tracing` subscriber with JSON, pretty or compact output
//! - **Metrics**: Job counters, a running gauge and attempt durations via the `metrics` facade
//!
//! # Example
//!
//! ```rust,no_run
//! use batchflow_core::telemetry::{init_logging, LoggingConfig};
//!
//! init_logging(&LoggingConfig::default()).expect("Failed to initialize logging");
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat, LoggingConfig, SpanEventConfig};
pub use metrics::{register_metric_descriptions, RunnerMetrics};
