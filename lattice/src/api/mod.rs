//! Object kinds managed by the controllers

pub mod build;
pub mod container_build;
pub mod deploy;
pub mod instance;
pub mod job;
pub mod labels;
pub mod node_pool;
pub mod secret;
pub mod service;
pub mod system;
pub mod teardown;
pub mod template;

pub use build::{Build, BuildSpec, BuildState, BuildStatus, WorkloadContainerBuilds};
pub use container_build::{
    ContainerBuild, ContainerBuildArtifacts, ContainerBuildFailureInfo, ContainerBuildPhase,
    ContainerBuildSpec, ContainerBuildState, ContainerBuildStatus, WorkloadContainerBuildArtifacts,
};
pub use deploy::{Deploy, DeploySpec, DeployState, DeployStatus};
pub use instance::{Instance, InstanceContainer, InstanceSpec, InstanceState, InstanceStatus};
pub use job::{Job, JobSpec, JobState, JobStatus};
pub use node_pool::{NodePool, NodePoolSpec, NodePoolState, NodePoolStatus};
pub use secret::{Secret, SecretSpec};
pub use service::{Service, ServiceSpec, ServiceState, ServiceStatus};
pub use system::{System, SystemSpec, SystemState, SystemStatus};
pub use teardown::{Teardown, TeardownSpec, TeardownState, TeardownStatus};
pub use template::{GitTemplate, GitTemplateSpec, Template, TemplateSpec};

use serde::{Deserialize, Serialize};

/// Status of kinds that have none
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoStatus {}

/// Namespace holding the System objects themselves
pub fn internal_namespace(prefix: &str) -> String {
    format!("{}-internal", prefix)
}

/// Namespace holding everything that belongs to one system
pub fn system_namespace(prefix: &str, system_id: &str) -> String {
    format!("{}-system-{}", prefix, system_id)
}

/// Inverse of [`system_namespace`]
pub fn system_id_from_namespace<'a>(prefix: &str, namespace: &'a str) -> Option<&'a str> {
    namespace
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix("-system-"))
        .filter(|id| !id.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_round_trip() {
        let ns = system_namespace("lattice", "petflix");
        assert_eq!(ns, "lattice-system-petflix");
        assert_eq!(system_id_from_namespace("lattice", &ns), Some("petflix"));
        assert_eq!(system_id_from_namespace("lattice", "lattice-internal"), None);
        assert_eq!(system_id_from_namespace("lattice", "lattice-system-"), None);
    }
}
