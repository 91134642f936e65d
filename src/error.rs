//! Error types for the greenhouse orchestration core.
//!
//! The taxonomy mirrors how failures surface in an asynchronous chain:
//!
//! | Variant | Surface |
//! |---------|---------|
//! | `NotFound` | warning log, silent abort of the step |
//! | `ValidationMissing` | warning log, silent abort (or a synchronous error at run creation) |
//! | `OperationFailure` | captured as a report error, run finalizes as failed |
//! | `TransportFailure` | logged; recorded on the retry record or task status |
//! | `Timeout` / `Expired` | terminal task status, never auto-retried |
//!
//! Domain halts are deliberately absent: a refusal to advance a grow cycle is a
//! [`crate::cycle::PhaseAdvance::Halted`] value, not an error.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GreenhouseError {
    #[error("Not found: {entity} {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("Missing required field(s) {fields:?} in {context}")]
    ValidationMissing {
        context: String,
        fields: Vec<&'static str>,
    },
    #[error("Operation {operation} failed: {error_type}: {message}")]
    OperationFailure {
        operation: String,
        error_type: String,
        message: String,
    },
    #[error("Transport failure for {target}: {reason}")]
    TransportFailure { target: String, reason: String },
    #[error("Deadline exceeded for {entity} {id}")]
    Timeout { entity: &'static str, id: String },
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Lock error: {0}")]
    LockError(String),
    #[error("Dispatch error: {0}")]
    DispatchError(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error(transparent)]
    InvalidTransition(#[from] StateTransitionError),
}

impl GreenhouseError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn storage(reason: impl Into<String>) -> Self {
        Self::StorageError(reason.into())
    }

    pub fn transport(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TransportFailure {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Stable machine-readable code used as `error_code` on status records.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::ValidationMissing { .. } => "validation_missing",
            Self::OperationFailure { .. } => "operation_failure",
            Self::TransportFailure { .. } => "transport_failure",
            Self::Timeout { .. } => "timeout",
            Self::StorageError(_) => "storage_error",
            Self::LockError(_) => "lock_error",
            Self::DispatchError(_) => "dispatch_error",
            Self::ConfigurationError(_) => "configuration_error",
            Self::Serialization(_) => "serialization_error",
            Self::InvalidTransition(_) => "invalid_transition",
        }
    }

    /// Whether the surrounding at-least-once delivery should be relied on to retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::TransportFailure { .. }
                | Self::StorageError(_)
                | Self::LockError(_)
                | Self::DispatchError(_)
        )
    }
}

/// Rejected lifecycle transition. Terminal states never transition again.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StateTransitionError {
    #[error("Invalid transition for {entity} {id}: {from} -> {to}")]
    Invalid {
        entity: &'static str,
        id: String,
        from: String,
        to: String,
    },
    #[error("{entity} {id} is already terminal in state {state}")]
    AlreadyTerminal {
        entity: &'static str,
        id: String,
        state: String,
    },
}

impl From<serde_json::Error> for GreenhouseError {
    fn from(error: serde_json::Error) -> Self {
        GreenhouseError::Serialization(format!("JSON serialization error: {error}"))
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for GreenhouseError {
    fn from(err: sqlx::Error) -> Self {
        GreenhouseError::StorageError(err.to_string())
    }
}

impl From<crate::config::ConfigurationError> for GreenhouseError {
    fn from(err: crate::config::ConfigurationError) -> Self {
        GreenhouseError::ConfigurationError(err.to_string())
    }
}

pub type GreenhouseResult<T> = std::result::Result<T, GreenhouseError>;
