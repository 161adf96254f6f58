//! Migration executor: moves a serving instance to another node.
//!
//! See the crate docs for the phase sequence. The executor never holds the
//! registry lock across a remote call: the lock is taken once, for the
//! in-memory swap at cutover, and released before the source is torn down.

use std::sync::Arc;

use serde::Serialize;
use servegrid_state::{LifecycleStatus, MigrationPlan, StateError};
use tracing::{info, warn};

use crate::config::MigrationConfig;
use crate::context::{ClusterClients, RouterContext};
use crate::drain::{DrainPolicy, drain_generation_state};
use crate::error::{RouterError, RouterResult};
use crate::events::{EventSink, MigrationEvent, MigrationHook};
use crate::lifecycle::{initialize, provision, retire};

/// Result of a migration that got as far as cutover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MigrationOutcome {
    /// The target is routable under `instance_id`; the source is retired.
    Completed {
        instance_id: String,
        retired_instance_id: String,
    },
    /// The source left the registry before cutover. The target process is
    /// still running but was never registered.
    CutoverAborted {
        source_instance_id: String,
        orphaned_instance_id: String,
    },
}

impl MigrationOutcome {
    /// Id of the instance now serving, if the cutover happened.
    pub fn instance_id(&self) -> Option<&str> {
        match self {
            Self::Completed { instance_id, .. } => Some(instance_id),
            Self::CutoverAborted { .. } => None,
        }
    }

    /// Whether the target took over from the source.
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Executes [`MigrationPlan`]s against one router.
#[derive(Clone)]
pub struct MigrationExecutor {
    router: Arc<dyn RouterContext>,
    clients: ClusterClients,
    policy: DrainPolicy,
    events: EventSink,
}

impl MigrationExecutor {
    /// Create an executor for `router` with the drain policy from `config`.
    pub fn new(router: Arc<dyn RouterContext>, clients: ClusterClients, config: &MigrationConfig) -> Self {
        Self {
            router,
            clients,
            policy: config.drain_policy(),
            events: EventSink::default(),
        }
    }

    /// Await `hook` at every phase boundary.
    pub fn with_hook(mut self, hook: MigrationHook) -> Self {
        self.events = EventSink::new(Some(hook));
        self
    }

    /// Move `plan.source_instance_id` onto `plan.target_node_id`.
    ///
    /// Errors before cutover leave the registry as it was. A target that was
    /// already started when the error happened keeps running; its id is in
    /// the error.
    pub async fn execute_migration_plan(&self, plan: &MigrationPlan) -> RouterResult<MigrationOutcome> {
        let ctx = self.router.as_ref();
        let source_id = plan.source_instance_id.as_str();
        info!(
            source = %source_id,
            target_node = %plan.target_node_id,
            model = %ctx.model_name(),
            "executing migration plan"
        );

        let source = ctx
            .registry()
            .get(source_id)
            .await
            .ok_or_else(|| RouterError::SourceNotFound(source_id.to_string()))?;

        // Provision and register the target handle (not routable yet).
        let instance_id = ctx.new_instance_id();
        let target = provision(ctx, &self.clients, &instance_id, &plan.target_node_id).await?;
        self.events
            .emit(MigrationEvent::Provisioned {
                instance_id: instance_id.clone(),
                node_id: plan.target_node_id.clone(),
            })
            .await;

        initialize(&target).await?;
        self.events
            .emit(MigrationEvent::Initialized {
                instance_id: instance_id.clone(),
            })
            .await;

        // Drain.
        let marked = source
            .transition(LifecycleStatus::Ready, LifecycleStatus::Migrating)
            .await;
        let report = match drain_generation_state(&source, &target, &self.policy, &self.events).await {
            Ok(report) => report,
            Err(e) => {
                if marked {
                    source
                        .transition(LifecycleStatus::Migrating, LifecycleStatus::Ready)
                        .await;
                }
                warn!(source = %source_id, target = %instance_id, error = %e, "drain aborted");
                return Err(e);
            }
        };
        info!(
            source = %source_id,
            target = %instance_id,
            iterations = report.iterations,
            injected_tokens = report.injected_tokens,
            "migrated generation state"
        );

        // Cutover.
        let retired = match ctx.registry().swap(source_id, Arc::new(target)).await {
            Ok(retired) => retired,
            Err(StateError::NotFound(_)) => {
                self.events
                    .emit(MigrationEvent::CutoverAborted {
                        source_instance_id: source_id.to_string(),
                        orphaned_instance_id: instance_id.clone(),
                    })
                    .await;
                return Ok(MigrationOutcome::CutoverAborted {
                    source_instance_id: source_id.to_string(),
                    orphaned_instance_id: instance_id,
                });
            }
            Err(e) => return Err(e.into()),
        };
        self.events
            .emit(MigrationEvent::CutoverCompleted {
                retired_instance_id: source_id.to_string(),
                instance_id: instance_id.clone(),
            })
            .await;

        // Retire the source outside the registry lock.
        retire(ctx, &self.clients, &retired, &self.events).await;

        info!(source = %source_id, instance_id = %instance_id, "migration completed");
        Ok(MigrationOutcome::Completed {
            instance_id,
            retired_instance_id: source_id.to_string(),
        })
    }
}
