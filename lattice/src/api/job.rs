//! Job objects

use serde::{Deserialize, Serialize};

use crate::api::container_build::WorkloadContainerBuildArtifacts;
use crate::definition::component;
use crate::definition::tree::Path;
use crate::store::meta::ObjectMeta;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Deleting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub path: Path,

    pub definition: component::Job,

    pub artifacts: WorkloadContainerBuildArtifacts,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    #[serde(default)]
    pub observed_generation: u64,

    #[serde(default)]
    pub state: JobState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Run of the current generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub metadata: ObjectMeta,

    pub spec: JobSpec,

    #[serde(default)]
    pub status: JobStatus,
}

crate::impl_object!(Job, "Job", JobSpec, JobStatus);
