//! Domain types shared by the router and the status API.

use serde::{Deserialize, Serialize};

pub use servegrid_backend::{ResourceRequirements, TokenId};

/// Unique identifier of a serving instance.
pub type InstanceId = String;

/// Unique identifier of a worker node.
pub type NodeId = String;

/// In-progress decoding context of an instance, oldest token first.
pub type GenerationState = Vec<TokenId>;

/// Lifecycle of a serving instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    /// Process requested, not yet bound to a node.
    Provisioning,
    Ready,
    /// Generation state is being drained to a replacement.
    Migrating,
    /// Removed from routing; backend torn down or about to be.
    Retired,
}

impl LifecycleStatus {
    /// Whether an instance in this state can still take requests.
    pub fn is_serving(self) -> bool {
        matches!(self, Self::Ready | Self::Migrating)
    }
}

/// Point-in-time status record of one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceStatus {
    pub instance_id: InstanceId,
    /// Stamped by the status query; empty on a raw handle snapshot.
    pub model_name: String,
    pub node_id: Option<NodeId>,
    pub status: LifecycleStatus,
    pub max_queue_length: u32,
    pub gpu_count: u32,
}

/// Request to move a serving instance onto another node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationPlan {
    pub source_instance_id: InstanceId,
    pub target_node_id: NodeId,
}

impl MigrationPlan {
    /// Plan to move `source_instance_id` onto `target_node_id`.
    pub fn new(source_instance_id: impl Into<InstanceId>, target_node_id: impl Into<NodeId>) -> Self {
        Self {
            source_instance_id: source_instance_id.into(),
            target_node_id: target_node_id.into(),
        }
    }
}
