//! API models

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Error body returned with every non-2xx response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

// =============================== SYSTEMS ================================== //

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSystemRequest {
    pub id: String,
    pub definition_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct System {
    pub id: String,
    pub definition_url: String,
    pub state: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Deployed definition version, once a deploy has bound a build
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Keyed by service path
    #[serde(default)]
    pub services: BTreeMap<String, SystemWorkload>,

    /// Keyed by job path
    #[serde(default)]
    pub jobs: BTreeMap<String, SystemWorkload>,

    /// Keyed by `path:name`
    #[serde(default)]
    pub node_pools: BTreeMap<String, SystemWorkload>,
}

/// Rolled-up state of one object owned by a system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemWorkload {
    pub id: String,
    pub state: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// =============================== BUILDS ================================== //

/// Exactly one of `version` or `path`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateBuildRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Build {
    pub id: String,
    pub state: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_timestamp: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_timestamp: Option<DateTime<Utc>>,

    /// Keyed by workload path
    #[serde(default)]
    pub workloads: BTreeMap<String, WorkloadBuild>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadBuild {
    pub main_container: ContainerBuild,

    #[serde(default)]
    pub sidecars: BTreeMap<String, ContainerBuild>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerBuild {
    pub id: String,
    pub state: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_observed_phase: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_image_fqn: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildLogsQuery {
    pub path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sidecar: Option<String>,
}

// =============================== DEPLOYS ================================== //

/// Exactly one of `build`, `path` or `version`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateDeployRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deploy {
    pub id: String,
    pub state: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_timestamp: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_timestamp: Option<DateTime<Utc>>,
}

// =============================== TEARDOWNS ================================== //

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Teardown {
    pub id: String,
    pub state: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_timestamp: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_timestamp: Option<DateTime<Utc>>,
}

// =============================== SECRETS ================================== //

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    /// `path:name`
    pub path: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetSecretRequest {
    pub value: String,
}

// =============================== SERVICES ================================== //

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub path: String,
    pub state: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    pub num_instances: u32,
    pub available_instances: u32,
    pub updated_instances: u32,
    pub stale_instances: u32,

    #[serde(default)]
    pub instances: Vec<String>,
}
