//! NodePool objects

use serde::{Deserialize, Serialize};

use crate::store::meta::ObjectMeta;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodePoolState {
    #[default]
    Pending,
    Scaling,
    Stable,
    Failed,
    Deleting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePoolSpec {
    pub num_instances: u32,

    pub instance_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePoolStatus {
    #[serde(default)]
    pub observed_generation: u64,

    #[serde(default)]
    pub state: NodePoolState,

    #[serde(default)]
    pub num_instances: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodePool {
    pub metadata: ObjectMeta,

    pub spec: NodePoolSpec,

    #[serde(default)]
    pub status: NodePoolStatus,
}

crate::impl_object!(NodePool, "NodePool", NodePoolSpec, NodePoolStatus);
