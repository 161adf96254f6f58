//! servegrid-state: in-memory state for serving instances.
//!
//! # Architecture
//!
//! ```text
//! InstanceRegistry (registry lock)
//!   └── instance_id → Arc<InstanceHandle>
//!         ├── immutable: id, max_queue_length, gpu_count, backend proxy
//!         └── handle lock: status, node binding
//! ```
//!
//! Lock order is always registry first, handle second. Neither lock is held
//! across a remote call.

pub mod error;
pub mod handle;
pub mod registry;
pub mod types;

pub use error::{StateError, StateResult};
pub use handle::InstanceHandle;
pub use registry::{InstanceRegistry, RegistryGuard};
pub use types::*;
