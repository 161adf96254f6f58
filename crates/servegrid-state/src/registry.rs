//! InstanceRegistry: the routable set of serving instances.
//!
//! A single registry-wide lock guards membership. An id present here is
//! routable. Composite updates that must look atomic to readers (the
//! migration cutover, status lookups) run inside one acquisition of that
//! lock; handle locks are only ever taken while it is held, never before.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::handle::InstanceHandle;
use crate::types::*;

/// Guard over the registry map, for multi-step critical sections.
pub type RegistryGuard<'a> = MutexGuard<'a, HashMap<InstanceId, Arc<InstanceHandle>>>;

#[derive(Debug, Default)]
pub struct InstanceRegistry {
    instances: Mutex<HashMap<InstanceId, Arc<InstanceHandle>>>,
}

impl InstanceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the registry lock.
    pub async fn lock(&self) -> RegistryGuard<'_> {
        self.instances.lock().await
    }

    /// Register a handle. At most one handle per id.
    pub async fn insert(&self, handle: Arc<InstanceHandle>) -> StateResult<()> {
        let mut instances = self.instances.lock().await;
        let id = handle.instance_id().to_string();
        if instances.contains_key(&id) {
            return Err(StateError::AlreadyRegistered(id));
        }
        debug!(instance_id = %id, "instance registered");
        instances.insert(id, handle);
        Ok(())
    }

    /// Deregister an instance, returning its handle if it was present.
    pub async fn remove(&self, instance_id: &str) -> Option<Arc<InstanceHandle>> {
        let removed = self.instances.lock().await.remove(instance_id);
        if removed.is_some() {
            debug!(%instance_id, "instance deregistered");
        }
        removed
    }

    /// Handle of a registered instance.
    pub async fn get(&self, instance_id: &str) -> Option<Arc<InstanceHandle>> {
        self.instances.lock().await.get(instance_id).cloned()
    }

    /// Whether `instance_id` is registered.
    pub async fn contains(&self, instance_id: &str) -> bool {
        self.instances.lock().await.contains_key(instance_id)
    }

    /// Number of registered instances.
    pub async fn len(&self) -> usize {
        self.instances.lock().await.len()
    }

    /// Whether no instance is registered.
    pub async fn is_empty(&self) -> bool {
        self.instances.lock().await.is_empty()
    }

    /// Ids of every routable instance, sorted.
    pub async fn instance_ids(&self) -> Vec<InstanceId> {
        let mut ids: Vec<InstanceId> = self.instances.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Replace `retiring_id` with `replacement` in one critical section.
    ///
    /// Under the registry lock: remove the retiring handle, mark it
    /// `Retired` under its own lock, insert the replacement. Readers see
    /// either the old entry or the new one, never both or neither. Returns
    /// the retired handle.
    ///
    /// If `retiring_id` is not registered, or the replacement id is already
    /// taken, nothing is changed.
    pub async fn swap(
        &self,
        retiring_id: &str,
        replacement: Arc<InstanceHandle>,
    ) -> StateResult<Arc<InstanceHandle>> {
        let mut instances = self.instances.lock().await;
        if !instances.contains_key(retiring_id) {
            return Err(StateError::NotFound(retiring_id.to_string()));
        }
        let new_id = replacement.instance_id().to_string();
        if instances.contains_key(&new_id) {
            return Err(StateError::AlreadyRegistered(new_id));
        }

        let retired = instances
            .remove(retiring_id)
            .ok_or_else(|| StateError::NotFound(retiring_id.to_string()))?;
        retired.set_status(LifecycleStatus::Retired).await;
        instances.insert(new_id.clone(), replacement);

        debug!(retired = %retiring_id, replacement = %new_id, "registry entry swapped");
        Ok(retired)
    }
}
