//! Error handling for Batchflow Core.
//!
//! This module provides:
//! - A single error type for misuse of the runner API and invalid configuration
//! - Stable machine-readable error codes
//! - User-friendly messages vs detailed internal messages
//! - Error logging with tracing integration
//! - Metrics integration for error tracking
//!
//! Per-job failures are not represented here. An executor failure is a
//! [`JobError`](crate::jobs::JobError) recorded on the job itself and never
//! surfaces as a `BatchflowError`.
//!
//! # Usage
//!
//! ```rust,ignore
//! use batchflow_core::error::{BatchflowError, ErrorCode, Result};
//!
//! fn check(max: usize) -> Result<()> {
//!     if max == 0 {
//!         return Err(BatchflowError::invalid_config("max_concurrency must be at least 1"));
//!     }
//!     Ok(())
//! }
//! ```

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for Batchflow operations.
pub type Result<T> = std::result::Result<T, BatchflowError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
///
/// These codes are stable and can be used by callers for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Runner Errors (1000-1099)
    RunnerShutdown,
    RunnerAlreadyStarted,
    RunnerStopped,

    // Job Errors (1100-1199)
    JobNotFound,
    DuplicateJob,

    // Serialization Errors (2200-2299)
    SerializationError,
    DeserializationError,

    // Configuration Errors (5000-5099)
    ConfigurationError,
    MissingConfiguration,
    InvalidConfiguration,

    // Internal Errors (9000-9099)
    IoError,
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::RunnerShutdown => 1000,
            Self::RunnerAlreadyStarted => 1001,
            Self::RunnerStopped => 1002,

            Self::JobNotFound => 1100,
            Self::DuplicateJob => 1101,

            Self::SerializationError => 2200,
            Self::DeserializationError => 2201,

            Self::ConfigurationError => 5000,
            Self::MissingConfiguration => 5001,
            Self::InvalidConfiguration => 5002,

            Self::IoError => 9000,
            Self::InternalError => 9001,
        }
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "runner",
            1100..=1199 => "job",
            2200..=2299 => "serialization",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }

    /// Whether the error belongs to the configuration class.
    ///
    /// Submitting to a shut-down runner is reported as a configuration-class
    /// error, matching how construction-time validation failures surface.
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigurationError
                | Self::MissingConfiguration
                | Self::InvalidConfiguration
                | Self::RunnerShutdown
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Caller mistakes (bad input, unknown job)
    Low,
    /// Misuse of the runner lifecycle
    Medium,
    /// Configuration and I/O failures
    High,
    /// Bugs
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::JobNotFound | ErrorCode::DuplicateJob => Self::Low,

            ErrorCode::RunnerShutdown
            | ErrorCode::RunnerAlreadyStarted
            | ErrorCode::RunnerStopped => Self::Medium,

            ErrorCode::SerializationError
            | ErrorCode::DeserializationError
            | ErrorCode::ConfigurationError
            | ErrorCode::MissingConfiguration
            | ErrorCode::InvalidConfiguration
            | ErrorCode::IoError => Self::High,

            ErrorCode::InternalError => Self::Critical,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Additional context key-value pairs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Related entity ID (job, setting, etc.)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Related entity type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,

    /// Suggested action for resolution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggested_action = Some(suggestion.into());
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for Batchflow Core.
#[derive(Error, Debug)]
pub struct BatchflowError {
    /// Machine-readable error code
    code: ErrorCode,

    /// User-friendly error message
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for BatchflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl BatchflowError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::InternalError, "An internal error occurred", message)
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InvalidConfiguration, message)
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigurationError, message.into())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the user-friendly message.
    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    /// Get the internal message (if any).
    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    /// Get the error details.
    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    /// Whether this is a configuration-class error.
    pub fn is_config_error(&self) -> bool {
        self.code.is_config_error()
    }

    fn record_metrics(&self) {
        counter!(
            "batchflow_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
            "severity" => self.severity().as_str(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<serde_json::Error> for BatchflowError {
    fn from(error: serde_json::Error) -> Self {
        let code = if error.is_syntax() || error.is_data() || error.is_eof() {
            ErrorCode::DeserializationError
        } else {
            ErrorCode::SerializationError
        };

        Self::with_internal(code, "Failed to process JSON data", error.to_string()).with_source(error)
    }
}

impl From<std::io::Error> for BatchflowError {
    fn from(error: std::io::Error) -> Self {
        let user_msg = match error.kind() {
            std::io::ErrorKind::NotFound => "File not found",
            std::io::ErrorKind::PermissionDenied => "Permission denied",
            _ => "An I/O error occurred",
        };

        Self::with_internal(ErrorCode::IoError, user_msg, error.to_string()).with_source(error)
    }
}

impl From<config::ConfigError> for BatchflowError {
    fn from(error: config::ConfigError) -> Self {
        let (code, user_msg) = match &error {
            config::ConfigError::NotFound(_) => (
                ErrorCode::MissingConfiguration,
                "Required configuration not found",
            ),
            config::ConfigError::PathParse(_) | config::ConfigError::FileParse { .. } => (
                ErrorCode::InvalidConfiguration,
                "Configuration file is invalid",
            ),
            _ => (ErrorCode::ConfigurationError, "Configuration error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Convenience Constructors for Runner Errors
// ═══════════════════════════════════════════════════════════════════════════════

impl BatchflowError {
    /// The runner no longer accepts submissions.
    pub fn runner_shutdown(runner: &str) -> Self {
        Self::new(
            ErrorCode::RunnerShutdown,
            format!("Runner '{}' has been shut down", runner),
        )
        .with_details(ErrorDetails::new().with_entity("runner", runner))
    }

    /// `start` was called on a runner that is already running.
    pub fn already_started(runner: &str) -> Self {
        Self::new(
            ErrorCode::RunnerAlreadyStarted,
            format!("Runner '{}' has already been started", runner),
        )
        .with_details(ErrorDetails::new().with_entity("runner", runner))
    }

    /// The coordinating loop has exited and can no longer take commands.
    pub fn runner_stopped() -> Self {
        Self::new(ErrorCode::RunnerStopped, "Runner loop is no longer running")
    }

    /// No job with the given id is known to the runner.
    pub fn job_not_found(job_id: impl Into<String>) -> Self {
        let job_id = job_id.into();
        Self::new(ErrorCode::JobNotFound, format!("Job not found: {}", job_id))
            .with_details(ErrorDetails::new().with_entity("job", job_id))
    }

    /// A job with the same id was already submitted.
    pub fn duplicate_job(job_id: impl Into<String>) -> Self {
        let job_id = job_id.into();
        Self::new(ErrorCode::DuplicateJob, format!("Job id already submitted: {}", job_id))
            .with_details(
                ErrorDetails::new()
                    .with_entity("job", job_id)
                    .with_suggestion("Omit the id to have one generated"),
            )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
