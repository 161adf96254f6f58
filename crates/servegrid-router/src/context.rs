//! What a migration needs from the router it runs inside.

use std::fmt;
use std::sync::Arc;

use servegrid_backend::{BackendDirectory, BoxFuture, LocalCluster, Provisioner, ResourceScheduler};
use servegrid_state::{InstanceId, InstanceRegistry, ResourceRequirements};

use crate::error::RouterResult;

/// Capabilities of the base router a [`MigrationExecutor`] is composed with.
///
/// [`MigrationExecutor`]: crate::executor::MigrationExecutor
pub trait RouterContext: Send + Sync {
    fn model_name(&self) -> &str;

    /// Fresh, never-before-used instance id.
    fn new_instance_id(&self) -> InstanceId;

    /// The routable instances of this model.
    fn registry(&self) -> &InstanceRegistry;

    fn resource_requirements(&self) -> &ResourceRequirements;

    fn backend_kind(&self) -> &str;

    fn backend_config(&self) -> &serde_json::Value;

    /// Queue length given to newly created instances.
    fn max_queue_length(&self) -> u32;

    /// Deregister an instance and tear down its backend. Returns false if
    /// the id was not registered.
    fn stop_instance<'a>(&'a self, instance_id: &'a str) -> BoxFuture<'a, RouterResult<bool>>;
}

/// Remote collaborators shared by a router and its executors.
#[derive(Clone)]
pub struct ClusterClients {
    pub provisioner: Arc<dyn Provisioner>,
    pub directory: Arc<dyn BackendDirectory>,
    pub scheduler: Arc<dyn ResourceScheduler>,
}

impl ClusterClients {
    /// Bundle the three remote collaborators.
    pub fn new(
        provisioner: Arc<dyn Provisioner>,
        directory: Arc<dyn BackendDirectory>,
        scheduler: Arc<dyn ResourceScheduler>,
    ) -> Self {
        Self {
            provisioner,
            directory,
            scheduler,
        }
    }

    /// All three roles played by one in-process cluster.
    pub fn local(cluster: &LocalCluster) -> Self {
        Self {
            provisioner: Arc::new(cluster.clone()),
            directory: Arc::new(cluster.clone()),
            scheduler: Arc::new(cluster.clone()),
        }
    }
}

impl fmt::Debug for ClusterClients {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterClients").finish_non_exhaustive()
    }
}
