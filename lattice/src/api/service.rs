//! Service objects

use serde::{Deserialize, Serialize};

use crate::api::container_build::WorkloadContainerBuildArtifacts;
use crate::definition::component;
use crate::definition::tree::Path;
use crate::store::meta::ObjectMeta;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    #[default]
    Pending,
    Scaling,
    Updating,
    Stable,
    Failed,
    Deleting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Absolute path of the service in its system
    pub path: Path,

    pub definition: component::Service,

    pub artifacts: WorkloadContainerBuildArtifacts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceFailureInfo {
    pub message: String,

    pub internal: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    #[serde(default)]
    pub observed_generation: u64,

    #[serde(default)]
    pub state: ServiceState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_info: Option<ServiceFailureInfo>,

    /// NodePool the instances run on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_pool: Option<String>,

    #[serde(default)]
    pub available_instances: u32,

    #[serde(default)]
    pub updated_instances: u32,

    #[serde(default)]
    pub stale_instances: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub metadata: ObjectMeta,

    pub spec: ServiceSpec,

    #[serde(default)]
    pub status: ServiceStatus,
}

crate::impl_object!(Service, "Service", ServiceSpec, ServiceStatus);
