//! Error types for the Goldroll state store.

use goldroll_core::ServiceError;
use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("lease {name} is held by {holder} until {expires_at}")]
    LeaseHeld {
        name: String,
        holder: String,
        expires_at: u64,
    },

    #[error("lease {0} is no longer held by this token")]
    LeaseLost(String),
}

impl From<StateError> for ServiceError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::NotFound(what) => ServiceError::NotFound(what),
            e @ (StateError::LeaseHeld { .. } | StateError::LeaseLost(_)) => {
                ServiceError::Conflict(e.to_string())
            }
            other => ServiceError::Request(other.to_string()),
        }
    }
}
