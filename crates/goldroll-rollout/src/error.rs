//! Rollout error types.

use goldroll_core::{ServiceError, TemplateUpdate};
use thiserror::Error;

/// Result type alias for rollout operations.
pub type RolloutResult<T> = Result<T, RolloutError>;

/// Errors surfaced by the rollout components to the sequencer.
#[derive(Debug, Error)]
pub enum RolloutError {
    /// The referenced refresh, history slot, or template does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// An external service rejected or could not complete a request.
    #[error("{operation} failed: {source}")]
    Upstream {
        operation: &'static str,
        source: ServiceError,
    },

    /// Missing or malformed input, or nothing to act on.
    #[error("precondition violated: {0}")]
    Precondition(String),

    /// A conditional write kept losing to a concurrent writer. Transient.
    #[error("concurrent modification during {operation}: {message}")]
    Conflict {
        operation: &'static str,
        message: String,
    },

    /// The caller does not hold the rollout lease.
    #[error("rollout lease rejected: {0}")]
    Lease(String),

    /// Propagation failed after some templates were already re-pointed.
    #[error("propagation stopped after {} template(s): {source}", .updated.len())]
    PartialPropagation {
        updated: Vec<TemplateUpdate>,
        source: Box<RolloutError>,
    },

    /// Rollback itself failed. No automated fallback remains.
    #[error("rollback failed after {reason}; manual intervention required: {source}")]
    RollbackFailed {
        reason: String,
        source: Box<RolloutError>,
    },
}

/// Coarse classification used by sequencers to decide what to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Upstream,
    Precondition,
    Conflict,
    Lease,
    RollbackFailed,
}

impl RolloutError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Upstream { .. } => ErrorKind::Upstream,
            Self::Precondition(_) => ErrorKind::Precondition,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Lease(_) => ErrorKind::Lease,
            Self::PartialPropagation { source, .. } => source.kind(),
            Self::RollbackFailed { .. } => ErrorKind::RollbackFailed,
        }
    }

    /// Templates already re-pointed before the failure, if any.
    pub fn partial_progress(&self) -> &[TemplateUpdate] {
        match self {
            Self::PartialPropagation { updated, .. } => updated,
            _ => &[],
        }
    }
}

/// Map a `ServiceError` from the named operation into a `RolloutError`.
pub(crate) fn upstream(operation: &'static str) -> impl FnOnce(ServiceError) -> RolloutError {
    move |err| match err {
        ServiceError::NotFound(what) => RolloutError::NotFound(format!("{operation}: {what}")),
        ServiceError::Conflict(message) => RolloutError::Conflict { operation, message },
        source @ ServiceError::Request(_) => RolloutError::Upstream { operation, source },
    }
}
