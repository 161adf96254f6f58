//! Round-robin router for one model.
//!
//! Owns the [`InstanceRegistry`] of routable instances and places new
//! instances on worker nodes. Migrations run through a [`MigrationExecutor`]
//! that borrows the router as its [`RouterContext`].

use std::sync::Arc;

use servegrid_backend::BoxFuture;
use servegrid_state::{
    InstanceHandle, InstanceId, InstanceRegistry, InstanceStatus, LifecycleStatus,
    ResourceRequirements, StateError,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{MigrationConfig, RouterConfig};
use crate::context::{ClusterClients, RouterContext};
use crate::error::{RouterError, RouterResult};
use crate::events::EventSink;
use crate::executor::MigrationExecutor;
use crate::lifecycle::{initialize, provision, retire};
use crate::load_balancer::RoundRobinBalancer;
use crate::status::get_instance_status;

pub struct RoundRobinRouter {
    config: RouterConfig,
    registry: InstanceRegistry,
    balancer: RoundRobinBalancer,
    clients: ClusterClients,
}

impl RoundRobinRouter {
    /// Create a router with an empty registry. Fails on invalid config.
    pub fn new(config: RouterConfig, clients: ClusterClients) -> RouterResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            registry: InstanceRegistry::new(),
            balancer: RoundRobinBalancer::new(),
            clients,
        })
    }

    /// Start a new instance on `node_id` and make it routable.
    pub async fn place_instance(&self, node_id: &str) -> RouterResult<InstanceId> {
        let instance_id = self.new_instance_id();
        self.place_instance_as(&instance_id, node_id).await?;
        Ok(instance_id)
    }

    /// Like [`place_instance`](Self::place_instance) with a caller-chosen id.
    pub async fn place_instance_as(&self, instance_id: &str, node_id: &str) -> RouterResult<()> {
        if self.registry.contains(instance_id).await {
            return Err(StateError::AlreadyRegistered(instance_id.to_string()).into());
        }

        let handle = provision(self, &self.clients, instance_id, node_id).await?;
        initialize(&handle).await?;
        self.registry.insert(Arc::new(handle)).await?;

        info!(%instance_id, %node_id, model = %self.config.model_name, "instance placed");
        Ok(())
    }

    /// Next serving instance in round-robin order.
    pub async fn select_instance(&self) -> Option<Arc<InstanceHandle>> {
        let instances = self.registry.lock().await;
        let mut serving: Vec<&Arc<InstanceHandle>> = Vec::with_capacity(instances.len());
        for handle in instances.values() {
            if handle.lifecycle().await.is_serving() {
                serving.push(handle);
            }
        }
        serving.sort_by(|a, b| a.instance_id().cmp(b.instance_id()));
        self.balancer.pick(&serving).map(|handle| Arc::clone(handle))
    }

    /// Status of a routable instance, or `None` if it is not registered.
    pub async fn get_instance_status(&self, instance_id: &str) -> Option<InstanceStatus> {
        get_instance_status(self, instance_id).await
    }

    /// Status of every routable instance, sorted by id.
    pub async fn list_instances(&self) -> Vec<InstanceStatus> {
        let instances = self.registry.lock().await;
        let mut statuses = Vec::with_capacity(instances.len());
        for handle in instances.values() {
            let mut status = handle.status().await;
            status.model_name = self.config.model_name.clone();
            statuses.push(status);
        }
        statuses.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        statuses
    }

    /// Executor bound to this router.
    pub fn migration_executor(self: &Arc<Self>, config: &MigrationConfig) -> RouterResult<MigrationExecutor> {
        config.validate()?;
        let router: Arc<dyn RouterContext> = Arc::clone(self) as Arc<dyn RouterContext>;
        Ok(MigrationExecutor::new(router, self.clients.clone(), config))
    }

    async fn stop(&self, instance_id: &str) -> RouterResult<bool> {
        let Some(handle) = self.registry.remove(instance_id).await else {
            warn!(%instance_id, "stop requested for unknown instance");
            return Ok(false);
        };
        handle.set_status(LifecycleStatus::Retired).await;
        if !retire(self, &self.clients, &handle, &EventSink::default()).await {
            warn!(%instance_id, "instance stopped with teardown errors");
        }
        info!(%instance_id, model = %self.config.model_name, "instance stopped");
        Ok(true)
    }
}

impl RouterContext for RoundRobinRouter {
    fn model_name(&self) -> &str {
        &self.config.model_name
    }

    fn new_instance_id(&self) -> InstanceId {
        Uuid::new_v4().to_string()
    }

    fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    fn resource_requirements(&self) -> &ResourceRequirements {
        &self.config.resources
    }

    fn backend_kind(&self) -> &str {
        &self.config.backend_kind
    }

    fn backend_config(&self) -> &serde_json::Value {
        &self.config.backend_config
    }

    fn max_queue_length(&self) -> u32 {
        self.config.max_queue_length
    }

    fn stop_instance<'a>(&'a self, instance_id: &'a str) -> BoxFuture<'a, RouterResult<bool>> {
        Box::pin(self.stop(instance_id))
    }
}

impl std::fmt::Debug for RoundRobinRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoundRobinRouter")
            .field("model_name", &self.config.model_name)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use servegrid_backend::{BackendError, LocalCluster};

    fn router(cluster: &LocalCluster) -> RoundRobinRouter {
        RoundRobinRouter::new(RouterConfig::new("facebook/opt-125m"), ClusterClients::local(cluster)).unwrap()
    }

    #[test]
    fn new_rejects_invalid_config() {
        let cluster = LocalCluster::new();
        let err = RoundRobinRouter::new(RouterConfig::default(), ClusterClients::local(&cluster)).unwrap_err();
        assert!(matches!(err, RouterError::Config(_)));
    }

    #[test]
    fn instance_ids_are_unique() {
        let cluster = LocalCluster::new();
        let router = router(&cluster);
        let a = router.new_instance_id();
        let b = router.new_instance_id();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(&a).is_ok());
    }

    #[tokio::test]
    async fn place_instance_registers_ready_instance() {
        let cluster = LocalCluster::new();
        let router = router(&cluster);

        let id = router.place_instance("node-1").await.unwrap();

        let status = router.get_instance_status(&id).await.unwrap();
        assert_eq!(status.model_name, "facebook/opt-125m");
        assert_eq!(status.node_id.as_deref(), Some("node-1"));
        assert_eq!(status.status, LifecycleStatus::Ready);
        assert_eq!(status.max_queue_length, 10);
        assert_eq!(status.gpu_count, 1);
        assert_eq!(cluster.node_of(&id).as_deref(), Some("node-1"));
        assert_eq!(cluster.initialized(), vec![id]);
    }

    #[tokio::test]
    async fn place_instance_as_rejects_duplicate_id() {
        let cluster = LocalCluster::new();
        let router = router(&cluster);
        router.place_instance_as("inst-A", "node-1").await.unwrap();

        let err = router.place_instance_as("inst-A", "node-2").await.unwrap_err();
        assert!(matches!(err, RouterError::State(StateError::AlreadyRegistered(_))));
        assert_eq!(cluster.started().len(), 1);
    }

    #[tokio::test]
    async fn failed_start_registers_nothing() {
        let cluster = LocalCluster::new();
        cluster.fail_start_on("node-9");
        let router = router(&cluster);

        let err = router.place_instance_as("inst-A", "node-9").await.unwrap_err();
        match err {
            RouterError::Provision { instance_id, source } => {
                assert_eq!(instance_id, "inst-A");
                assert!(matches!(source, BackendError::StartFailed { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(router.registry().is_empty().await);
    }

    #[tokio::test]
    async fn unknown_instance_has_no_status() {
        let cluster = LocalCluster::new();
        let router = router(&cluster);
        router.place_instance("node-1").await.unwrap();

        assert!(router.get_instance_status("no-such-instance").await.is_none());
    }

    #[tokio::test]
    async fn select_instance_rotates_over_serving_instances() {
        let cluster = LocalCluster::new();
        let router = router(&cluster);
        assert!(router.select_instance().await.is_none());

        router.place_instance_as("inst-a", "node-1").await.unwrap();
        router.place_instance_as("inst-b", "node-2").await.unwrap();

        let picked: Vec<String> = {
            let mut picked = Vec::new();
            for _ in 0..4 {
                picked.push(router.select_instance().await.unwrap().instance_id().to_string());
            }
            picked
        };
        assert_eq!(picked, ["inst-a", "inst-b", "inst-a", "inst-b"]);
    }

    #[tokio::test]
    async fn select_instance_skips_non_serving_instances() {
        let cluster = LocalCluster::new();
        let router = router(&cluster);
        router.place_instance_as("inst-a", "node-1").await.unwrap();
        router.place_instance_as("inst-b", "node-2").await.unwrap();
        router.place_instance_as("inst-c", "node-3").await.unwrap();

        // A draining source still serves.
        let draining = router.registry().get("inst-b").await.unwrap();
        draining.set_status(LifecycleStatus::Migrating).await;
        let stale = router.registry().get("inst-a").await.unwrap();
        stale.set_status(LifecycleStatus::Provisioning).await;

        let mut picked = Vec::new();
        for _ in 0..4 {
            picked.push(router.select_instance().await.unwrap().instance_id().to_string());
        }
        assert_eq!(picked, ["inst-b", "inst-c", "inst-b", "inst-c"]);
    }

    #[tokio::test]
    async fn select_instance_with_single_serving_instance() {
        let cluster = LocalCluster::new();
        let router = router(&cluster);
        router.place_instance_as("inst-a", "node-1").await.unwrap();
        router.place_instance_as("inst-b", "node-2").await.unwrap();

        let source = router.registry().get("inst-a").await.unwrap();
        source.set_status(LifecycleStatus::Retired).await;

        for _ in 0..3 {
            assert_eq!(router.select_instance().await.unwrap().instance_id(), "inst-b");
        }
    }

    #[tokio::test]
    async fn stop_instance_tears_down_and_deregisters() {
        let cluster = LocalCluster::new();
        let router = router(&cluster);
        router.place_instance_as("inst-a", "node-1").await.unwrap();
        let handle = router.registry().get("inst-a").await.unwrap();

        assert!(router.stop_instance("inst-a").await.unwrap());

        assert!(router.get_instance_status("inst-a").await.is_none());
        assert_eq!(handle.lifecycle().await, LifecycleStatus::Retired);
        assert_eq!(cluster.shutdowns(), vec!["inst-a".to_string()]);
        assert_eq!(cluster.terminated(), vec!["inst-a".to_string()]);
        assert!(!cluster.is_live("inst-a"));
        assert_eq!(cluster.deallocations().len(), 1);

        assert!(!router.stop_instance("inst-a").await.unwrap());
    }

    #[tokio::test]
    async fn list_instances_is_sorted() {
        let cluster = LocalCluster::new();
        let router = router(&cluster);
        router.place_instance_as("inst-b", "node-2").await.unwrap();
        router.place_instance_as("inst-a", "node-1").await.unwrap();

        let ids: Vec<String> = router
            .list_instances()
            .await
            .into_iter()
            .map(|s| s.instance_id)
            .collect();
        assert_eq!(ids, ["inst-a", "inst-b"]);
    }

    #[test]
    fn executor_rejects_invalid_migration_config() {
        let cluster = LocalCluster::new();
        let router = Arc::new(router(&cluster));
        let config = MigrationConfig {
            max_drain_iterations: Some(0),
            ..MigrationConfig::default()
        };
        assert!(router.migration_executor(&config).is_err());
        assert!(router.migration_executor(&MigrationConfig::default()).is_ok());
    }
}
