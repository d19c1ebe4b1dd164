//! Conversions from stored objects to API models

use secrecy::ExposeSecret;
use serde::Serialize;

use crate::api::{self, labels};
use lattice_api as models;

/// Wire name of a state enum, as serde writes it
fn state_name<S: Serialize>(state: &S) -> String {
    serde_json::to_value(state)
        .ok()
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_default()
}

impl From<&api::System> for models::System {
    fn from(system: &api::System) -> Self {
        let status = &system.status;
        Self {
            id: system.metadata.name.clone(),
            definition_url: system.spec.definition_url.clone(),
            state: state_name(&system.effective_state()),
            message: status.message.clone(),
            version: system
                .metadata
                .label(labels::SYSTEM_DEFINITION_VERSION)
                .map(str::to_string),
            services: status
                .services
                .iter()
                .map(|(path, service)| {
                    let workload = models::SystemWorkload {
                        id: service.name.clone(),
                        state: state_name(&service.state),
                        message: service.message.clone(),
                    };
                    (path.to_string(), workload)
                })
                .collect(),
            jobs: status
                .jobs
                .iter()
                .map(|(path, job)| {
                    let workload = models::SystemWorkload {
                        id: job.name.clone(),
                        state: state_name(&job.state),
                        message: job.message.clone(),
                    };
                    (path.to_string(), workload)
                })
                .collect(),
            node_pools: status
                .node_pools
                .iter()
                .map(|(subcomponent, pool)| {
                    let workload = models::SystemWorkload {
                        id: pool.name.clone(),
                        state: state_name(&pool.state),
                        message: None,
                    };
                    (subcomponent.clone(), workload)
                })
                .collect(),
        }
    }
}

fn container_build(build: &api::Build, id: &str) -> models::ContainerBuild {
    match build.status.container_build_statuses.get(id) {
        Some(status) => models::ContainerBuild {
            id: id.to_string(),
            state: state_name(&status.state),
            last_observed_phase: status.last_observed_phase.as_ref().map(state_name),
            failure_message: status.failure_info.as_ref().map(|info| info.message.clone()),
            docker_image_fqn: status
                .artifacts
                .as_ref()
                .map(|artifacts| artifacts.docker_image_fqn.clone()),
        },
        None => models::ContainerBuild {
            id: id.to_string(),
            state: state_name(&api::ContainerBuildState::Pending),
            last_observed_phase: None,
            failure_message: None,
            docker_image_fqn: None,
        },
    }
}

impl From<&api::Build> for models::Build {
    fn from(build: &api::Build) -> Self {
        let status = &build.status;
        Self {
            id: build.metadata.name.clone(),
            state: state_name(&status.state),
            message: status.message.clone(),
            version: status.version.clone().or_else(|| build.spec.version.clone()),
            path: status
                .path
                .as_ref()
                .or(build.spec.path.as_ref())
                .map(|path| path.to_string()),
            start_timestamp: status.start_timestamp,
            completion_timestamp: status.completion_timestamp,
            workloads: status
                .workloads
                .iter()
                .map(|(path, workload)| {
                    let workload = models::WorkloadBuild {
                        main_container: container_build(build, &workload.main_container),
                        sidecars: workload
                            .sidecars
                            .iter()
                            .map(|(name, id)| (name.clone(), container_build(build, id)))
                            .collect(),
                    };
                    (path.to_string(), workload)
                })
                .collect(),
        }
    }
}

impl From<&api::Deploy> for models::Deploy {
    fn from(deploy: &api::Deploy) -> Self {
        let status = &deploy.status;
        Self {
            id: deploy.metadata.name.clone(),
            state: state_name(&status.state),
            message: status.message.clone(),
            build_id: status.build_id.clone().or_else(|| deploy.spec.build.clone()),
            path: status
                .path
                .as_ref()
                .or(deploy.spec.path.as_ref())
                .map(|path| path.to_string()),
            version: status.version.clone().or_else(|| deploy.spec.version.clone()),
            start_timestamp: status.start_timestamp,
            completion_timestamp: status.completion_timestamp,
        }
    }
}

impl From<&api::Teardown> for models::Teardown {
    fn from(teardown: &api::Teardown) -> Self {
        let status = &teardown.status;
        Self {
            id: teardown.metadata.name.clone(),
            state: state_name(&status.state),
            message: status.message.clone(),
            start_timestamp: status.start_timestamp,
            completion_timestamp: status.completion_timestamp,
        }
    }
}

impl From<&api::Secret> for models::Secret {
    fn from(secret: &api::Secret) -> Self {
        Self {
            path: secret.spec.path.to_string(),
            value: secret.spec.value.expose_secret().to_string(),
        }
    }
}

/// Service model listing the names of its instances
pub fn service(service: &api::Service, instances: &[api::Instance]) -> models::Service {
    let status = &service.status;
    models::Service {
        id: service.metadata.name.clone(),
        path: service.spec.path.to_string(),
        state: state_name(&status.state),
        message: status.message.clone(),
        num_instances: service.spec.definition.num_instances,
        available_instances: status.available_instances,
        updated_instances: status.updated_instances,
        stale_instances: status.stale_instances,
        instances: instances
            .iter()
            .map(|instance| instance.metadata.name.clone())
            .collect(),
    }
}
