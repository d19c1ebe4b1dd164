//! ContainerBuild objects

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::definition::component;
use crate::definition::tree::PathSubcomponent;
use crate::store::meta::ObjectMeta;

/// ContainerBuild lifecycle states
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerBuildState {
    #[default]
    Pending,
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl ContainerBuildState {
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ContainerBuildState::Pending | ContainerBuildState::Queued | ContainerBuildState::Running
        )
    }
}

/// Step the executor is currently in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContainerBuildPhase {
    PullingGitRepository,
    BuildingDockerImage,
    PushingDockerImage,
    PullingDockerImage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerBuildFailureInfo {
    pub message: String,

    /// Internal failures are reported to users with a generic message
    pub internal: bool,

    /// The build ran past its wall-clock deadline
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub timed_out: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerBuildArtifacts {
    pub docker_image_fqn: String,
}

/// Artifacts of every container of a workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadContainerBuildArtifacts {
    pub main_container: ContainerBuildArtifacts,

    #[serde(default)]
    pub sidecars: BTreeMap<String, ContainerBuildArtifacts>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerBuildSpec {
    /// Hydrated container build definition
    pub build: component::ContainerBuild,

    /// Secret holding the SSH key that fetches the build's source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key_secret: Option<PathSubcomponent>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerBuildStatus {
    #[serde(default)]
    pub state: ContainerBuildState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_observed_phase: Option<ContainerBuildPhase>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_info: Option<ContainerBuildFailureInfo>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<ContainerBuildArtifacts>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_timestamp: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_timestamp: Option<DateTime<Utc>>,
}

/// One fingerprinted image build, shared by every Build that needs the same container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerBuild {
    pub metadata: ObjectMeta,

    pub spec: ContainerBuildSpec,

    #[serde(default)]
    pub status: ContainerBuildStatus,
}

crate::impl_object!(
    ContainerBuild,
    "ContainerBuild",
    ContainerBuildSpec,
    ContainerBuildStatus
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_wire_names() {
        let json = serde_json::to_string(&ContainerBuildPhase::PullingGitRepository).unwrap();
        assert_eq!(json, "\"pullingGitRepository\"");
        let json = serde_json::to_string(&ContainerBuildState::Succeeded).unwrap();
        assert_eq!(json, "\"succeeded\"");
    }
}
