//! Error types for instance state.

use thiserror::Error;

/// Result type alias for registry and handle operations.
pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("instance already registered: {0}")]
    AlreadyRegistered(String),

    #[error("instance not registered: {0}")]
    NotFound(String),

    #[error("instance {instance_id} is bound to node {bound}, cannot rebind to {requested}")]
    NodeRebind {
        instance_id: String,
        bound: String,
        requested: String,
    },
}
