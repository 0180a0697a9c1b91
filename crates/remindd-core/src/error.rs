//! Core error types for remindd-core.
//!
//! One hierarchy covers the whole engine: synchronous request errors
//! (validation, authorization, idempotency), delivery failures split into
//! retryable and permanent, and storage failures.

use thiserror::Error;

/// Core error type for remindd-core.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A referenced record does not exist
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Actor is neither the delivery recipient nor the reminder owner
    #[error("Actor '{actor}' is not authorized to acknowledge delivery {delivery_id}")]
    Unauthorized { actor: String, delivery_id: String },

    /// The delivery was already acknowledged; nothing was mutated
    #[error("Delivery {delivery_id} is already acknowledged")]
    AlreadyAcknowledged { delivery_id: String },

    /// Delivery failed but may succeed on retry
    #[error("Transient delivery failure: {0}")]
    TransientDelivery(String),

    /// Delivery failed and retrying will not help
    #[error("Permanent delivery failure: {0}")]
    PermanentDelivery(String),

    /// Storage-related errors
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Storage-specific errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Failed to open the backing database
    #[error("Failed to open store at {path}: {source}")]
    OpenFailed {
        path: std::path::PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Schema migration failed
    #[error("Store migration failed: {0}")]
    MigrationFailed(String),

    /// Database is locked
    #[error("Store is locked")]
    Locked,
}

/// Validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Invalid value for a field
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// Unknown or unparsable IANA timezone
    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    /// State does not permit the requested transition
    #[error("Reminder {id} is {status}; cannot {operation}")]
    InvalidTransition {
        id: String,
        status: String,
        operation: &'static str,
    },
}

impl ValidationError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationError::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _msg) => {
                if e.code == rusqlite::ErrorCode::DatabaseLocked {
                    StoreError::Locked
                } else {
                    StoreError::QueryFailed(err.to_string())
                }
            }
            _ => StoreError::QueryFailed(err.to_string()),
        }
    }
}

/// Result type alias for EngineError
pub type Result<T, E = EngineError> = std::result::Result<T, E>;
