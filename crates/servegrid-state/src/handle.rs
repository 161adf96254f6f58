//! Per-instance state record.

use std::fmt;

use servegrid_backend::BackendProxy;
use tokio::sync::Mutex;

use crate::error::{StateError, StateResult};
use crate::types::*;

/// Mutable part of a handle, guarded by the handle lock.
#[derive(Debug)]
struct HandleState {
    status: LifecycleStatus,
    /// Bound once when the instance is placed, never rebound.
    node_id: Option<NodeId>,
}

/// One serving instance: identity, capacity, backend proxy, lifecycle.
///
/// The identity and capacity fields are fixed at creation. Status and node
/// binding change only under the handle's own lock.
pub struct InstanceHandle {
    instance_id: InstanceId,
    max_queue_length: u32,
    gpu_count: u32,
    backend: Box<dyn BackendProxy>,
    state: Mutex<HandleState>,
}

impl InstanceHandle {
    /// Create a handle in `Provisioning` state with no node binding.
    pub fn new(
        instance_id: impl Into<InstanceId>,
        max_queue_length: u32,
        gpu_count: u32,
        backend: Box<dyn BackendProxy>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            max_queue_length,
            gpu_count,
            backend,
            state: Mutex::new(HandleState {
                status: LifecycleStatus::Provisioning,
                node_id: None,
            }),
        }
    }

    /// Unique id of this instance.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Request queue capacity fixed at creation.
    pub fn max_queue_length(&self) -> u32 {
        self.max_queue_length
    }

    /// GPUs claimed by this instance.
    pub fn gpu_count(&self) -> u32 {
        self.gpu_count
    }

    /// RPC client of this instance's backend.
    pub fn backend(&self) -> &dyn BackendProxy {
        self.backend.as_ref()
    }

    /// Current lifecycle status.
    pub async fn lifecycle(&self) -> LifecycleStatus {
        self.state.lock().await.status
    }

    /// Node the instance is bound to, if placed.
    pub async fn node_id(&self) -> Option<NodeId> {
        self.state.lock().await.node_id.clone()
    }

    /// Bind the handle to `node_id` and mark it `Ready`.
    ///
    /// Fails without changing anything if the handle is already bound to a
    /// different node.
    pub async fn mark_ready(&self, node_id: &str) -> StateResult<()> {
        let mut state = self.state.lock().await;
        match state.node_id.clone() {
            Some(bound) if bound != node_id => {
                return Err(StateError::NodeRebind {
                    instance_id: self.instance_id.clone(),
                    bound,
                    requested: node_id.to_string(),
                });
            }
            Some(_) => {}
            None => state.node_id = Some(node_id.to_string()),
        }
        state.status = LifecycleStatus::Ready;
        Ok(())
    }

    /// Set the status unconditionally, returning the previous one.
    pub async fn set_status(&self, status: LifecycleStatus) -> LifecycleStatus {
        let mut state = self.state.lock().await;
        std::mem::replace(&mut state.status, status)
    }

    /// Move from `from` to `to`. Returns false and leaves the status alone
    /// if the handle is not currently in `from`.
    pub async fn transition(&self, from: LifecycleStatus, to: LifecycleStatus) -> bool {
        let mut state = self.state.lock().await;
        if state.status != from {
            return false;
        }
        state.status = to;
        true
    }

    /// Consistent snapshot of the handle. `model_name` is left empty.
    pub async fn status(&self) -> InstanceStatus {
        let state = self.state.lock().await;
        InstanceStatus {
            instance_id: self.instance_id.clone(),
            model_name: String::new(),
            node_id: state.node_id.clone(),
            status: state.status,
            max_queue_length: self.max_queue_length,
            gpu_count: self.gpu_count,
        }
    }
}

impl fmt::Debug for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceHandle")
            .field("instance_id", &self.instance_id)
            .field("max_queue_length", &self.max_queue_length)
            .field("gpu_count", &self.gpu_count)
            .finish_non_exhaustive()
    }
}
