//! Structured logging with JSON/pretty/compact formats.
//!
//! Logs always go to stderr so that command output on stdout stays clean.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Global log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, pretty or compact)
    #[serde(default)]
    pub format: LogFormat,

    /// Per-module log levels
    #[serde(default)]
    pub module_levels: HashMap<String, String>,

    /// Whether to include file/line information
    #[serde(default)]
    pub include_location: bool,

    /// Whether to include thread information
    #[serde(default)]
    pub include_thread: bool,

    /// Whether to include target (module path)
    #[serde(default = "default_include_target")]
    pub include_target: bool,

    /// Span event configuration
    #[serde(default)]
    pub span_events: SpanEventConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            module_levels: HashMap::new(),
            include_location: false,
            include_thread: false,
            include_target: default_include_target(),
            span_events: SpanEventConfig::default(),
        }
    }
}

impl LoggingConfig {
    /// Build the filter from the global level plus per-module overrides.
    pub fn env_filter(&self) -> anyhow::Result<EnvFilter> {
        let mut filter = EnvFilter::try_new(&self.level)?;
        for (module, level) in &self.module_levels {
            let directive = format!("{}={}", module, level);
            filter = filter.add_directive(directive.parse()?);
        }
        Ok(filter)
    }
}

/// Log output format.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format for structured logging
    Json,
    /// Pretty format for development
    Pretty,
    /// Compact single-line format
    #[default]
    Compact,
}

/// Configuration for span event logging.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpanEventConfig {
    /// Log when spans are created
    #[serde(default)]
    pub on_new: bool,

    /// Log when spans are closed
    #[serde(default)]
    pub on_close: bool,
}

impl SpanEventConfig {
    fn to_fmt_span(&self) -> FmtSpan {
        let mut span = FmtSpan::NONE;
        if self.on_new {
            span |= FmtSpan::NEW;
        }
        if self.on_close {
            span |= FmtSpan::CLOSE;
        }
        span
    }
}

fn default_log_level() -> String {
    std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string())
}

fn default_include_target() -> bool {
    true
}

/// Install the global tracing subscriber.
///
/// # Errors
///
/// Returns an error if a level directive does not parse or a global
/// subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = config.env_filter()?;

    match config.format {
        LogFormat::Json => {
            let fmt_layer = fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_span_events(config.span_events.to_fmt_span())
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_thread_ids(config.include_thread)
                .with_thread_names(config.include_thread)
                .with_target(config.include_target);

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .try_init()?;
        }
        LogFormat::Pretty => {
            let fmt_layer = fmt::layer()
                .pretty()
                .with_writer(std::io::stderr)
                .with_span_events(config.span_events.to_fmt_span())
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_thread_ids(config.include_thread)
                .with_thread_names(config.include_thread)
                .with_target(config.include_target);

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .try_init()?;
        }
        LogFormat::Compact => {
            let fmt_layer = fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_span_events(config.span_events.to_fmt_span())
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_thread_ids(config.include_thread)
                .with_thread_names(config.include_thread)
                .with_target(config.include_target);

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .try_init()?;
        }
    }

    Ok(())
}
