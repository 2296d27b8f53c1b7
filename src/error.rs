//! Error types for HemoDrop.
//!
//! All errors are strongly typed using thiserror so callers can match on the
//! specific condition. Only [`ExecutionError::CycleFault`] is allowed to put the
//! sampling loop into backoff; everything else is contained to the subject,
//! session or observer it concerns.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Validation errors raised at the ingestion and configuration boundary.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Invalid reading: {field} must be a finite value >= 0 (got {value})")]
    InvalidReading {
        field: &'static str,
        value: f64,
    },

    #[error("Subject id cannot be empty")]
    EmptySubjectId,

    #[error("Reading for subject '{actual}' submitted under subject '{expected}'")]
    SubjectMismatch {
        expected: String,
        actual: String,
    },

    #[error("Invalid time range: from ({from}) must be before to ({to})")]
    InvalidTimeRange {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Execution errors raised while running monitoring operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("Subject not found: {id}")]
    SubjectNotFound {
        id: String,
    },

    #[error("Session not found: {id}")]
    SessionNotFound {
        id: String,
    },

    #[error("Alert not found: {id}")]
    AlertNotFound {
        id: String,
    },

    #[error("Alert already raised: {id}")]
    DuplicateAlert {
        id: String,
    },

    #[error("Reading source unavailable for subject '{subject}': {reason}")]
    SourceUnavailable {
        subject: String,
        reason: String,
    },

    #[error("Delivery to observer {observer} failed: {reason}")]
    DeliveryFailure {
        observer: u64,
        reason: String,
    },

    #[error("Sampling cycle fault: {reason}")]
    CycleFault {
        reason: String,
    },

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    #[error("Channel disconnected: {path}")]
    Disconnected {
        path: String,
    },

    #[error("Batch simulation is disabled in production mode")]
    SimulationDisabled,
}

/// Top-level error type for HemoDrop.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum HemoError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl HemoError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true for unknown subject, session or alert.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Execution(
                ExecutionError::SubjectNotFound { .. }
                    | ExecutionError::SessionNotFound { .. }
                    | ExecutionError::AlertNotFound { .. }
            )
        )
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) => false,
            Self::Execution(e) => matches!(
                e,
                ExecutionError::Timeout { .. }
                    | ExecutionError::SourceUnavailable { .. }
                    | ExecutionError::CycleFault { .. }
            ),
            Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for HemoDrop operations.
pub type HemoResult<T> = Result<T, HemoError>;

/// Renders a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic with non-string payload".to_string()
    }
}
