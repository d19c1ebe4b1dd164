//! System objects

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::api::container_build::WorkloadContainerBuildArtifacts;
use crate::api::job::JobState;
use crate::api::node_pool::NodePoolState;
use crate::api::service::ServiceState;
use crate::definition::resolution::{empty_system_tree, ResolutionTree};
use crate::definition::tree::{Path, Tree};
use crate::store::meta::ObjectMeta;

/// Rollup state of a system
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemState {
    #[default]
    Pending,
    Stable,
    Degraded,
    Scaling,
    Updating,
    Failed,
    Deleting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemSpec {
    /// Repository the system definition lives in
    pub definition_url: String,

    /// Deployed definition, keyed by absolute path
    #[serde(default = "empty_system_tree")]
    pub definition: ResolutionTree,

    /// Built artifacts of every deployed workload, keyed by absolute path
    #[serde(default)]
    pub workload_build_artifacts: Tree<WorkloadContainerBuildArtifacts>,
}

impl SystemSpec {
    pub fn new(definition_url: impl Into<String>) -> Self {
        Self {
            definition_url: definition_url.into(),
            definition: empty_system_tree(),
            workload_build_artifacts: Tree::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemServiceStatus {
    /// Name of the Service object
    pub name: String,

    pub state: ServiceState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemJobStatus {
    pub name: String,

    pub state: JobState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemNodePoolStatus {
    pub name: String,

    pub state: NodePoolState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemStatus {
    #[serde(default)]
    pub observed_generation: u64,

    #[serde(default)]
    pub state: SystemState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default)]
    pub services: BTreeMap<Path, SystemServiceStatus>,

    #[serde(default)]
    pub jobs: BTreeMap<Path, SystemJobStatus>,

    /// Shared node pools, keyed by `path:name`
    #[serde(default)]
    pub node_pools: BTreeMap<String, SystemNodePoolStatus>,
}

/// Root object of a deployed application; lives in the internal namespace, named by system id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct System {
    pub metadata: ObjectMeta,

    pub spec: SystemSpec,

    #[serde(default)]
    pub status: SystemStatus,
}

crate::impl_object!(System, "System", SystemSpec, SystemStatus);

impl System {
    /// State as reported to callers: a spec the controller has not observed yet reads as updating
    pub fn effective_state(&self) -> SystemState {
        match self.status.state {
            SystemState::Pending | SystemState::Failed => self.status.state,
            _ if self.status.observed_generation < self.metadata.generation => SystemState::Updating,
            state => state,
        }
    }
}
