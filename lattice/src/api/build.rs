//! Build objects

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::container_build::ContainerBuildStatus;
use crate::definition::resolution::ResolutionTree;
use crate::definition::tree::Path;
use crate::store::meta::ObjectMeta;

/// Build lifecycle states
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildState {
    #[default]
    Pending,
    Accepted,
    Running,
    Succeeded,
    Failed,
}

impl BuildState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BuildState::Succeeded | BuildState::Failed)
    }
}

/// What to build: a whole system version, or one path of the deployed version
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Path>,
}

impl BuildSpec {
    /// Whether only part of the system is built
    pub fn is_partial(&self) -> bool {
        self.path.as_ref().map_or(false, |path| !path.is_root())
    }
}

/// Container builds backing one workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadContainerBuilds {
    pub main_container: String,

    #[serde(default)]
    pub sidecars: BTreeMap<String, String>,
}

impl WorkloadContainerBuilds {
    /// Every container build id this workload depends on
    pub fn ids(&self) -> impl Iterator<Item = &String> {
        std::iter::once(&self.main_container).chain(self.sidecars.values())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStatus {
    #[serde(default)]
    pub state: BuildState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_timestamp: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_timestamp: Option<DateTime<Utc>>,

    /// Resolved definition, keyed relative to `path`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<ResolutionTree>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Path>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Container builds per workload, keyed by absolute path
    #[serde(default)]
    pub workloads: BTreeMap<Path, WorkloadContainerBuilds>,

    #[serde(default)]
    pub container_build_statuses: BTreeMap<String, ContainerBuildStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Build {
    pub metadata: ObjectMeta,

    pub spec: BuildSpec,

    #[serde(default)]
    pub status: BuildStatus,
}

crate::impl_object!(Build, "Build", BuildSpec, BuildStatus);
