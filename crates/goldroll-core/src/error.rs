//! Error types shared across Goldroll crates.

use thiserror::Error;

/// Result type alias for service port calls.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors returned by an external collaborator behind a service port.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// The referenced object (image, key, template, refresh, parameter) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The service rejected the request or could not complete it.
    #[error("request failed: {0}")]
    Request(String),

    /// A conditional write lost against a concurrent writer, or a lease is held elsewhere.
    #[error("conflict: {0}")]
    Conflict(String),
}

/// Errors found while validating a `goldroll.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("sharing.key_id is required when consumer accounts are configured")]
    MissingKeyId,

    #[error("refresh.min_healthy_percentage must be within 0..=100, got {0}")]
    MinHealthyOutOfRange(u8),

    #[error("sharing.policy_write_attempts must be at least 1")]
    NoPolicyWriteAttempts,

    #[error("image.parameter_name must not be empty")]
    EmptyParameterName,
}
