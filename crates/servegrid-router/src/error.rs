//! Router error types.

use std::fmt;

use servegrid_backend::BackendError;
use servegrid_state::StateError;
use thiserror::Error;

/// Why a bounded drain loop gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainStop {
    IterationBudget,
    Timeout,
}

impl fmt::Display for DrainStop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IterationBudget => f.write_str("iteration budget exhausted"),
            Self::Timeout => f.write_str("drain timeout elapsed"),
        }
    }
}

/// Errors surfaced by routing and migration operations.
///
/// Variants that carry an `instance_id` for a freshly provisioned instance
/// mean that process is still running and unregistered; tearing it down is
/// up to the caller.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("source instance not registered: {0}")]
    SourceNotFound(String),

    #[error("failed to provision instance {instance_id}: {source}")]
    Provision {
        instance_id: String,
        source: BackendError,
    },

    #[error("backend of instance {instance_id} failed to initialize: {source}")]
    Initialization {
        instance_id: String,
        source: BackendError,
    },

    #[error("fetching generation state from {instance_id} failed: {source}")]
    DrainFailed {
        instance_id: String,
        target_instance_id: String,
        source: BackendError,
    },

    #[error("drain into {target_instance_id} stopped after {iterations} iterations: {reason}")]
    DrainIncomplete {
        target_instance_id: String,
        iterations: u64,
        reason: DrainStop,
    },

    #[error("registry error: {0}")]
    State(#[from] StateError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type RouterResult<T> = Result<T, RouterError>;
