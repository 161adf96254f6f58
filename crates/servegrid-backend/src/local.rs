//! In-process cluster simulation.
//!
//! `LocalCluster` plays provisioner, directory and resource scheduler at
//! once. Started instances get a [`LocalBackend`] proxy whose generation
//! state follows a per-instance script. Every remote call is recorded so
//! callers can assert on the exact sequence, and individual calls can be
//! made to fail.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::error::{BackendError, BackendResult};
use crate::proxy::*;

/// Calls that should fail instead of succeeding.
#[derive(Debug, Default)]
struct FailurePlan {
    /// Nodes on which `start_instance` fails.
    start_on_nodes: HashSet<String>,
    /// Nodes whose instances fail to initialize.
    init_on_nodes: HashSet<String>,
    /// Instances whose shutdown fails.
    shutdown_of: HashSet<String>,
    deallocate: bool,
}

/// A resource release observed by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deallocation {
    pub model_name: String,
    pub instance_id: String,
    pub requirements: ResourceRequirements,
}

#[derive(Debug, Default)]
struct ClusterState {
    started: Vec<StartInstanceRequest>,
    /// instance_id → node it was started on.
    placement: HashMap<String, String>,
    /// Started and not yet terminated.
    live: HashSet<String>,
    initialized: Vec<String>,
    injected: Vec<(String, Vec<TokenId>)>,
    shutdowns: Vec<String>,
    terminated: Vec<String>,
    deallocations: Vec<Deallocation>,
    /// Remaining scripted fetch results per instance.
    scripts: HashMap<String, VecDeque<Vec<TokenId>>>,
    /// Reported forever once the script runs dry.
    steady_state: HashMap<String, Vec<TokenId>>,
    fetches: HashMap<String, u64>,
    failures: FailurePlan,
}

/// Simulated cluster. Cheap to clone; clones share state.
#[derive(Debug, Clone, Default)]
pub struct LocalCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl LocalCluster {
    /// Create an empty cluster with no instances and no failures.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ClusterState> {
        lock(&self.state)
    }

    // ── Scripting ──────────────────────────────────────────────────

    /// Queue the generation states `instance_id` reports, one per fetch.
    ///
    /// Once the queue is drained the instance reports its steady state,
    /// or an empty state if none is set.
    pub fn script_generation_states(&self, instance_id: &str, states: Vec<Vec<TokenId>>) {
        self.state()
            .scripts
            .entry(instance_id.to_string())
            .or_default()
            .extend(states);
    }

    /// State reported after the script is exhausted.
    pub fn set_steady_state(&self, instance_id: &str, tokens: Vec<TokenId>) {
        self.state()
            .steady_state
            .insert(instance_id.to_string(), tokens);
    }

    /// Make `start_instance` fail for every request pinned to `node_id`.
    pub fn fail_start_on(&self, node_id: &str) {
        self.state().failures.start_on_nodes.insert(node_id.to_string());
    }

    /// Make `initialize` fail for instances started on `node_id`.
    pub fn fail_init_on(&self, node_id: &str) {
        self.state().failures.init_on_nodes.insert(node_id.to_string());
    }

    /// Make `shutdown` fail for `instance_id`.
    pub fn fail_shutdown_of(&self, instance_id: &str) {
        self.state()
            .failures
            .shutdown_of
            .insert(instance_id.to_string());
    }

    /// Make every `deallocate_resource` call fail.
    pub fn fail_deallocate(&self) {
        self.state().failures.deallocate = true;
    }

    // ── Inspection ─────────────────────────────────────────────────

    /// Every start request accepted so far, in order.
    pub fn started(&self) -> Vec<StartInstanceRequest> {
        self.state().started.clone()
    }

    /// Node an instance was started on.
    pub fn node_of(&self, instance_id: &str) -> Option<String> {
        self.state().placement.get(instance_id).cloned()
    }

    /// Whether `instance_id` was started and not yet terminated.
    pub fn is_live(&self, instance_id: &str) -> bool {
        self.state().live.contains(instance_id)
    }

    /// Instances whose backend was initialized, in order.
    pub fn initialized(&self) -> Vec<String> {
        self.state().initialized.clone()
    }

    /// Every inject call, in dispatch order.
    pub fn injected(&self) -> Vec<(String, Vec<TokenId>)> {
        self.state().injected.clone()
    }

    /// Inject payloads received by one instance.
    pub fn injected_into(&self, instance_id: &str) -> Vec<Vec<TokenId>> {
        self.state()
            .injected
            .iter()
            .filter(|(id, _)| id == instance_id)
            .map(|(_, tokens)| tokens.clone())
            .collect()
    }

    /// Instances that acknowledged a shutdown, in order.
    pub fn shutdowns(&self) -> Vec<String> {
        self.state().shutdowns.clone()
    }

    /// Instances whose process was terminated, in order.
    pub fn terminated(&self) -> Vec<String> {
        self.state().terminated.clone()
    }

    /// Resource releases received by the scheduler, in order.
    pub fn deallocations(&self) -> Vec<Deallocation> {
        self.state().deallocations.clone()
    }

    /// Number of fetch calls served for an instance.
    pub fn fetch_count(&self, instance_id: &str) -> u64 {
        self.state().fetches.get(instance_id).copied().unwrap_or(0)
    }
}

impl Provisioner for LocalCluster {
    fn start_instance(&self, request: StartInstanceRequest) -> BoxFuture<'_, BackendResult<()>> {
        Box::pin(async move {
            let mut state = self.state();
            let node_id = request
                .startup
                .target_node()
                .ok_or_else(|| BackendError::StartFailed {
                    instance_id: request.instance_id.clone(),
                    node_id: String::new(),
                    reason: "request carries no node locality hint".to_string(),
                })?
                .to_string();

            if state.failures.start_on_nodes.contains(&node_id) {
                return Err(BackendError::StartFailed {
                    instance_id: request.instance_id.clone(),
                    node_id,
                    reason: "node rejected placement".to_string(),
                });
            }
            if state.placement.contains_key(&request.instance_id) {
                return Err(BackendError::StartFailed {
                    instance_id: request.instance_id.clone(),
                    node_id,
                    reason: "instance id already started".to_string(),
                });
            }

            debug!(instance_id = %request.instance_id, %node_id, "local instance started");
            state
                .placement
                .insert(request.instance_id.clone(), node_id);
            state.live.insert(request.instance_id.clone());
            state.started.push(request);
            Ok(())
        })
    }
}

impl BackendDirectory for LocalCluster {
    fn resolve(&self, instance_id: &str) -> BackendResult<Box<dyn BackendProxy>> {
        if !self.state().live.contains(instance_id) {
            return Err(BackendError::NotFound(instance_id.to_string()));
        }
        Ok(Box::new(LocalBackend {
            instance_id: instance_id.to_string(),
            state: Arc::clone(&self.state),
        }))
    }
}

impl ResourceScheduler for LocalCluster {
    fn deallocate_resource<'a>(
        &'a self,
        model_name: &'a str,
        instance_id: &'a str,
        requirements: &'a ResourceRequirements,
    ) -> BoxFuture<'a, BackendResult<()>> {
        Box::pin(async move {
            let mut state = self.state();
            if state.failures.deallocate {
                return Err(BackendError::Deallocate {
                    instance_id: instance_id.to_string(),
                    reason: "scheduler unavailable".to_string(),
                });
            }
            state.deallocations.push(Deallocation {
                model_name: model_name.to_string(),
                instance_id: instance_id.to_string(),
                requirements: *requirements,
            });
            Ok(())
        })
    }
}

/// Proxy to one simulated serving process.
#[derive(Debug)]
pub struct LocalBackend {
    instance_id: String,
    state: Arc<Mutex<ClusterState>>,
}

impl LocalBackend {
    fn ensure_live(&self, state: &ClusterState) -> BackendResult<()> {
        if state.live.contains(&self.instance_id) {
            Ok(())
        } else {
            Err(BackendError::Rpc {
                instance_id: self.instance_id.clone(),
                reason: "process is not running".to_string(),
            })
        }
    }
}

impl BackendProxy for LocalBackend {
    fn initialize(&self) -> BoxFuture<'_, BackendResult<()>> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            self.ensure_live(&state)?;
            let failing = state
                .placement
                .get(&self.instance_id)
                .is_some_and(|node| state.failures.init_on_nodes.contains(node));
            if failing {
                return Err(BackendError::InitFailed {
                    instance_id: self.instance_id.clone(),
                    reason: "model load failed".to_string(),
                });
            }
            state.initialized.push(self.instance_id.clone());
            Ok(())
        })
    }

    fn fetch_generation_state(&self) -> BoxFuture<'_, BackendResult<Vec<TokenId>>> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            self.ensure_live(&state)?;
            *state.fetches.entry(self.instance_id.clone()).or_insert(0) += 1;

            let scripted = state
                .scripts
                .get_mut(&self.instance_id)
                .and_then(VecDeque::pop_front);
            let tokens = match scripted {
                Some(tokens) => tokens,
                None => state
                    .steady_state
                    .get(&self.instance_id)
                    .cloned()
                    .unwrap_or_default(),
            };
            Ok(tokens)
        })
    }

    fn inject_generation_state(&self, tokens: Vec<TokenId>) {
        let mut state = lock(&self.state);
        debug!(instance_id = %self.instance_id, tokens = tokens.len(), "kv cache injected");
        state.injected.push((self.instance_id.clone(), tokens));
    }

    fn shutdown(&self) -> BoxFuture<'_, BackendResult<()>> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            if state.failures.shutdown_of.contains(&self.instance_id) {
                return Err(BackendError::Shutdown {
                    instance_id: self.instance_id.clone(),
                    reason: "backend did not acknowledge".to_string(),
                });
            }
            state.shutdowns.push(self.instance_id.clone());
            Ok(())
        })
    }

    fn terminate(&self) {
        let mut state = lock(&self.state);
        state.live.remove(&self.instance_id);
        state.terminated.push(self.instance_id.clone());
    }
}

fn lock(state: &Mutex<ClusterState>) -> MutexGuard<'_, ClusterState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
