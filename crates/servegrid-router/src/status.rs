//! Instance status lookups that are safe to run during a migration.

use servegrid_state::InstanceStatus;

use crate::context::RouterContext;

/// Snapshot of a registered instance, or `None` if the id is not routable.
///
/// The registry lock is held for the whole read, so a concurrent cutover is
/// observed either entirely before or entirely after: a migrated-away source
/// is never reported as serving.
pub async fn get_instance_status(ctx: &dyn RouterContext, instance_id: &str) -> Option<InstanceStatus> {
    let instances = ctx.registry().lock().await;
    let handle = instances.get(instance_id)?;
    let mut status = handle.status().await;
    status.model_name = ctx.model_name().to_string();
    Some(status)
}
