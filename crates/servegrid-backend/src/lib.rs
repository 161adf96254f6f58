//! servegrid-backend: contracts for the remote side of a model-serving instance.
//!
//! The control plane never talks to a serving process directly. Everything
//! it needs goes through four narrow interfaces:
//!
//! - **`BackendProxy`**: per-instance RPC client (initialize, fetch and
//!   inject generation state, shutdown, terminate)
//! - **`BackendDirectory`**: resolves the proxy of a started instance by id
//! - **`Provisioner`**: starts a serving process pinned to a worker node
//! - **`ResourceScheduler`**: releases node capacity held by an instance
//!
//! [`LocalCluster`] implements all of them in-process. It backs the
//! `servegridd` simulation mode and the router's tests.

pub mod error;
pub mod local;
pub mod proxy;

pub use error::{BackendError, BackendResult};
pub use local::LocalCluster;
pub use proxy::*;
