//! Remote actor contracts.
//!
//! The traits here are object-safe so the router can hold them as
//! `Box<dyn ...>` / `Arc<dyn ...>` and swap the in-process simulation for a
//! real RPC client. Suspending operations return a boxed future; the two
//! fire-and-forget operations (`inject_generation_state`, `terminate`) are
//! plain synchronous dispatches with no result.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::error::BackendResult;

/// Boxed future alias used by every suspending remote call.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A single token of generation context.
pub type TokenId = u32;

/// Resource key every serving process demands a slice of.
pub const WORKER_NODE_RESOURCE: &str = "worker_node";

/// Prefix of the per-node resource key that pins a process to one node.
pub const WORKER_ID_PREFIX: &str = "worker_id_";

/// Amount of each locality resource a serving process claims.
pub const LOCALITY_HINT_WEIGHT: f64 = 0.1;

/// CPU/GPU demand of one serving instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceRequirements {
    pub num_cpus: u32,
    pub num_gpus: u32,
}

impl Default for ResourceRequirements {
    fn default() -> Self {
        Self {
            num_cpus: 1,
            num_gpus: 1,
        }
    }
}

/// Placement request handed to the cluster when starting a process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartupConfig {
    pub num_cpus: u32,
    pub num_gpus: u32,
    /// Custom resources; carries the two locality hints.
    pub resources: BTreeMap<String, f64>,
}

impl StartupConfig {
    /// Build a request whose locality hints bind the process to `node_id`.
    pub fn pinned_to(node_id: &str, requirements: &ResourceRequirements) -> Self {
        let mut resources = BTreeMap::new();
        resources.insert(WORKER_NODE_RESOURCE.to_string(), LOCALITY_HINT_WEIGHT);
        resources.insert(worker_resource(node_id), LOCALITY_HINT_WEIGHT);
        Self {
            num_cpus: requirements.num_cpus,
            num_gpus: requirements.num_gpus,
            resources,
        }
    }

    /// The node this request is pinned to, if it carries a node hint.
    pub fn target_node(&self) -> Option<&str> {
        self.resources
            .keys()
            .find_map(|key| key.strip_prefix(WORKER_ID_PREFIX))
    }
}

/// Per-node resource key, e.g. `worker_id_node-2`.
pub fn worker_resource(node_id: &str) -> String {
    format!("{WORKER_ID_PREFIX}{node_id}")
}

/// Everything a provisioner needs to start one serving process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartInstanceRequest {
    pub instance_id: String,
    pub model_name: String,
    /// Backend implementation, e.g. "transformers" or "vllm".
    pub backend_kind: String,
    /// Opaque backend configuration forwarded untouched.
    pub backend_config: serde_json::Value,
    pub startup: StartupConfig,
}

/// RPC client for one serving instance.
///
/// Each handle owns exactly one proxy; proxies are never shared between
/// handles.
pub trait BackendProxy: Send + Sync {
    /// Load the model. Resolves once the backend accepts generation state
    /// and requests.
    fn initialize(&self) -> BoxFuture<'_, BackendResult<()>>;

    /// Snapshot of the in-progress generation context, possibly empty.
    fn fetch_generation_state(&self) -> BoxFuture<'_, BackendResult<Vec<TokenId>>>;

    /// Push generation context into the backend's KV cache. Fire-and-forget.
    fn inject_generation_state(&self, tokens: Vec<TokenId>);

    /// Ask the backend to stop serving.
    fn shutdown(&self) -> BoxFuture<'_, BackendResult<()>>;

    /// Kill the backend process. Fire-and-forget.
    fn terminate(&self);
}

/// Directory service resolving the proxy of a started instance.
pub trait BackendDirectory: Send + Sync {
    fn resolve(&self, instance_id: &str) -> BackendResult<Box<dyn BackendProxy>>;
}

/// Starts serving processes on worker nodes.
pub trait Provisioner: Send + Sync {
    /// Start a process and resolve once it is live. The model is not loaded
    /// yet; that is [`BackendProxy::initialize`].
    fn start_instance(&self, request: StartInstanceRequest) -> BoxFuture<'_, BackendResult<()>>;
}

/// Cluster-level capacity bookkeeping.
pub trait ResourceScheduler: Send + Sync {
    fn deallocate_resource<'a>(
        &'a self,
        model_name: &'a str,
        instance_id: &'a str,
        requirements: &'a ResourceRequirements,
    ) -> BoxFuture<'a, BackendResult<()>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pinned_startup_carries_both_hints() {
        let requirements = ResourceRequirements {
            num_cpus: 1,
            num_gpus: 2,
        };
        let startup = StartupConfig::pinned_to("node-2", &requirements);

        assert_eq!(startup.num_cpus, 1);
        assert_eq!(startup.num_gpus, 2);
        assert_eq!(startup.resources.len(), 2);
        assert_eq!(startup.resources["worker_node"], 0.1);
        assert_eq!(startup.resources["worker_id_node-2"], 0.1);
    }

    #[test]
    fn target_node_recovers_pinned_node() {
        let startup = StartupConfig::pinned_to("gpu-box-7", &ResourceRequirements::default());
        assert_eq!(startup.target_node(), Some("gpu-box-7"));
    }

    #[test]
    fn target_node_absent_without_hint() {
        let startup = StartupConfig {
            num_cpus: 1,
            num_gpus: 1,
            resources: BTreeMap::new(),
        };
        assert_eq!(startup.target_node(), None);
    }

    #[test]
    fn requirements_fill_missing_fields_with_defaults() {
        let requirements: ResourceRequirements =
            serde_json::from_str(r#"{"num_gpus": 4}"#).unwrap();
        assert_eq!(requirements.num_cpus, 1);
        assert_eq!(requirements.num_gpus, 4);
    }
}
