//! Backend error types.

use thiserror::Error;

/// Result type alias for remote backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors reported by the remote side of an instance.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("failed to start instance {instance_id} on node {node_id}: {reason}")]
    StartFailed {
        instance_id: String,
        node_id: String,
        reason: String,
    },

    #[error("backend not found: {0}")]
    NotFound(String),

    #[error("backend {instance_id} failed to initialize: {reason}")]
    InitFailed { instance_id: String, reason: String },

    #[error("rpc to {instance_id} failed: {reason}")]
    Rpc { instance_id: String, reason: String },

    #[error("shutdown of {instance_id} failed: {reason}")]
    Shutdown { instance_id: String, reason: String },

    #[error("deallocating resources of {instance_id} failed: {reason}")]
    Deallocate { instance_id: String, reason: String },
}
