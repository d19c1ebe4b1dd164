//! Instance objects, one per service replica or job run

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::definition::component::EnvValue;
use crate::store::meta::ObjectMeta;

/// Name of the main container inside an instance
pub const MAIN_CONTAINER: &str = "main";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    #[default]
    Pending,
    Running,
    /// Run-to-completion instances only
    Succeeded,
    Failed,
}

impl InstanceState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstanceState::Succeeded | InstanceState::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceContainer {
    pub image: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec: Option<Vec<String>>,

    #[serde(default)]
    pub env: BTreeMap<String, EnvValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSpec {
    /// Name of the owning Service or Job object
    pub workload: String,

    /// Job runs exit on their own; service replicas run until stopped
    #[serde(default)]
    pub run_to_completion: bool,

    /// Generation hash the instance was created for
    pub generation: String,

    /// Jobs without a shared node pool leave placement to the runtime
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_pool: Option<String>,

    /// `main` plus one `sidecar-<name>` entry per sidecar
    pub containers: BTreeMap<String, InstanceContainer>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceStatus {
    #[serde(default)]
    pub state: InstanceState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub metadata: ObjectMeta,

    pub spec: InstanceSpec,

    #[serde(default)]
    pub status: InstanceStatus,
}

crate::impl_object!(Instance, "Instance", InstanceSpec, InstanceStatus);

/// Container name of a sidecar inside an instance
pub fn sidecar_container_name(sidecar: &str) -> String {
    format!("sidecar-{}", sidecar)
}
