//! Instance lifecycle steps shared by initial placement and migration.
//!
//! - [`provision`]: start a process on a node and build its handle
//! - [`initialize`]: load the model on the new backend
//! - [`retire`]: shut down, kill, and release a deregistered instance

use servegrid_backend::{StartInstanceRequest, StartupConfig};
use servegrid_state::InstanceHandle;
use tracing::{debug, info};

use crate::context::{ClusterClients, RouterContext};
use crate::error::{RouterError, RouterResult};
use crate::events::{EventSink, MigrationEvent, TeardownStage};

/// Start `instance_id` on `node_id` and return its handle, bound and `Ready`.
///
/// Blocks until the remote process is live. The handle is not registered.
pub async fn provision(
    ctx: &dyn RouterContext,
    clients: &ClusterClients,
    instance_id: &str,
    node_id: &str,
) -> RouterResult<InstanceHandle> {
    let requirements = ctx.resource_requirements();
    let request = StartInstanceRequest {
        instance_id: instance_id.to_string(),
        model_name: ctx.model_name().to_string(),
        backend_kind: ctx.backend_kind().to_string(),
        backend_config: ctx.backend_config().clone(),
        startup: StartupConfig::pinned_to(node_id, requirements),
    };
    debug!(
        %instance_id,
        %node_id,
        model = %ctx.model_name(),
        num_cpus = request.startup.num_cpus,
        num_gpus = request.startup.num_gpus,
        "starting instance"
    );

    clients
        .provisioner
        .start_instance(request)
        .await
        .map_err(|source| RouterError::Provision {
            instance_id: instance_id.to_string(),
            source,
        })?;

    let backend = clients
        .directory
        .resolve(instance_id)
        .map_err(|source| RouterError::Provision {
            instance_id: instance_id.to_string(),
            source,
        })?;

    let handle = InstanceHandle::new(
        instance_id,
        ctx.max_queue_length(),
        requirements.num_gpus,
        backend,
    );
    handle.mark_ready(node_id).await?;

    info!(%instance_id, %node_id, model = %ctx.model_name(), "instance started");
    Ok(handle)
}

/// Load the model on a provisioned instance.
pub async fn initialize(handle: &InstanceHandle) -> RouterResult<()> {
    handle
        .backend()
        .initialize()
        .await
        .map_err(|source| RouterError::Initialization {
            instance_id: handle.instance_id().to_string(),
            source,
        })
}

/// Tear down a handle that is already out of the registry.
///
/// Best-effort: every step runs even if an earlier one failed, and failures
/// are only logged and emitted as [`MigrationEvent::TeardownFailed`].
/// Returns true if every step succeeded.
pub async fn retire(
    ctx: &dyn RouterContext,
    clients: &ClusterClients,
    handle: &InstanceHandle,
    events: &EventSink,
) -> bool {
    let instance_id = handle.instance_id();
    let mut clean = true;

    if let Err(e) = handle.backend().shutdown().await {
        clean = false;
        events
            .emit(MigrationEvent::TeardownFailed {
                instance_id: instance_id.to_string(),
                stage: TeardownStage::Shutdown,
                error: e.to_string(),
            })
            .await;
    }
    handle.backend().terminate();

    if let Err(e) = clients
        .scheduler
        .deallocate_resource(ctx.model_name(), instance_id, ctx.resource_requirements())
        .await
    {
        clean = false;
        events
            .emit(MigrationEvent::TeardownFailed {
                instance_id: instance_id.to_string(),
                stage: TeardownStage::Deallocate,
                error: e.to_string(),
            })
            .await;
    }

    events
        .emit(MigrationEvent::Retired {
            instance_id: instance_id.to_string(),
        })
        .await;
    clean
}
