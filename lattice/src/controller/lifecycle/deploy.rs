//! Deploy controller
//!
//! Binds a successful build onto the system: the build's definition and artifacts replace the
//! system spec at the build's path, and the deploy completes once the system converges.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use crate::api::labels;
use crate::api::{
    Build, BuildSpec, BuildState, ContainerBuildArtifacts, Deploy, DeployState, SystemState,
    WorkloadContainerBuildArtifacts,
};
use crate::controller::worker::Reconciler;
use crate::controller::ControllerContext;
use crate::definition::tree::{Path, Tree};
use crate::errors::LatticeError;
use crate::store::{LabelSelector, Object, ObjectKey, ObjectMeta};

pub struct DeployController {
    ctx: Arc<ControllerContext>,
}

impl DeployController {
    pub fn new(ctx: Arc<ControllerContext>) -> Self {
        Self { ctx }
    }

    fn handle_pending(&self, system_id: &str, deploy: Deploy) -> Result<(), LatticeError> {
        let store = &self.ctx.store;
        let namespace = deploy.metadata.namespace.clone();
        let spec = deploy.spec.clone();

        // 1. Validate
        let given = [spec.build.is_some(), spec.path.is_some(), spec.version.is_some()]
            .iter()
            .filter(|given| **given)
            .count();
        if given == 0 {
            return self.fail(system_id, deploy, "must specify build, path, or version".to_string(), None);
        }
        if given > 1 {
            return self.fail(
                system_id,
                deploy,
                "must only specify one of build, path, or version".to_string(),
                None,
            );
        }

        if let Some(build_id) = &spec.build {
            match store.builds.try_get(&namespace, build_id) {
                None => {
                    let message = format!("build {} does not exist", build_id);
                    return self.fail(system_id, deploy, message, None);
                }
                Some(build) if build.spec.is_partial() => {
                    let message = format!(
                        "cannot deploy using a build id ({}) since it is only a partial system build",
                        build_id
                    );
                    return self.fail(system_id, deploy, message, None);
                }
                Some(_) => {}
            }
        }
        let path = spec.path.clone().unwrap_or_else(Path::root);

        // 2. Lock
        if let Err(e) = self
            .ctx
            .locks
            .acquire_deploy(system_id, &deploy.metadata.name, &path)
        {
            return self.fail(system_id, deploy, e.to_string(), None);
        }

        // 3. Build to deploy, creating one for path and version deploys
        let build_id = match &spec.build {
            Some(build_id) => build_id.clone(),
            None => {
                let build_id = deploy.metadata.uid.clone();
                let build = Build {
                    metadata: ObjectMeta::new(namespace.clone(), build_id.clone()),
                    spec: BuildSpec {
                        version: spec.version.clone(),
                        path: spec.path.clone(),
                    },
                    status: Default::default(),
                };
                match store.builds.create(build) {
                    Ok(created) => info!("Created {} for {}", created.describe(), deploy.describe()),
                    Err(LatticeError::AlreadyExists(_)) => {}
                    Err(e) => return Err(e),
                }
                build_id
            }
        };

        info!("Accepted {} of build {} at {}", deploy.describe(), build_id, path);
        let mut status = deploy.status.clone();
        status.state = DeployState::Accepted;
        status.build_id = Some(build_id);
        status.path = Some(path);
        status.version = spec.version;
        status.start_timestamp = Some(Utc::now());
        store.deploys.update_status(Deploy { status, ..deploy })?;
        Ok(())
    }

    fn handle_accepted(&self, system_id: &str, deploy: Deploy) -> Result<(), LatticeError> {
        let build_id = match deploy.status.build_id.clone() {
            Some(build_id) => build_id,
            None => {
                let err = LatticeError::InvariantViolation(format!(
                    "{} was accepted without a build",
                    deploy.describe()
                ));
                return self.fail(system_id, deploy, err.public_message(), Some(err.to_string()));
            }
        };

        let build = match self
            .ctx
            .store
            .builds
            .try_get(&deploy.metadata.namespace, &build_id)
        {
            Some(build) => build,
            None => {
                let message = format!("build {} does not exist", build_id);
                return self.fail(system_id, deploy, message, None);
            }
        };

        match build.status.state {
            BuildState::Failed => {
                let message = format!("build {} failed", build_id);
                self.fail(system_id, deploy, message, None)
            }
            BuildState::Succeeded => match self.bind(system_id, &deploy, &build) {
                Ok(()) => {
                    info!("{} bound build {}, waiting for the system", deploy.describe(), build_id);
                    let mut status = deploy.status.clone();
                    status.state = DeployState::InProgress;
                    self.ctx.store.deploys.update_status(Deploy { status, ..deploy })?;
                    Ok(())
                }
                Err(e @ LatticeError::InvariantViolation(_)) => {
                    self.fail(system_id, deploy, e.public_message(), Some(e.to_string()))
                }
                Err(e) => Err(e),
            },
            _ => Ok(()),
        }
    }

    /// Replace the system definition and artifacts at the build's path
    fn bind(&self, system_id: &str, deploy: &Deploy, build: &Build) -> Result<(), LatticeError> {
        let definition = build.status.definition.clone().ok_or_else(|| {
            LatticeError::InvariantViolation(format!("{} has no definition", build.describe()))
        })?;
        let path = build.status.path.clone().unwrap_or_else(Path::root);

        let mut artifacts = Tree::new();
        for (workload_path, workload) in &build.status.workloads {
            let relative = workload_path.strip_prefix(&path).ok_or_else(|| {
                LatticeError::InvariantViolation(format!(
                    "workload {} of {} is outside of {}",
                    workload_path,
                    build.describe(),
                    path
                ))
            })?;
            let mut sidecars = std::collections::BTreeMap::new();
            for (name, id) in &workload.sidecars {
                sidecars.insert(name.clone(), container_build_artifacts(build, id)?);
            }
            artifacts.insert(
                relative,
                WorkloadContainerBuildArtifacts {
                    main_container: container_build_artifacts(build, &workload.main_container)?,
                    sidecars,
                },
            );
        }

        let mut system = self.ctx.system(system_id)?;
        system.spec.definition.replace_prefix(&path, &definition);
        system
            .spec
            .workload_build_artifacts
            .replace_prefix(&path, &artifacts);

        let system_labels = &mut system.metadata.labels;
        if let Some(version) = &build.status.version {
            system_labels.insert(labels::SYSTEM_DEFINITION_VERSION.to_string(), version.clone());
        }
        system_labels.insert(labels::DEPLOY_ID.to_string(), deploy.metadata.name.clone());
        system_labels.insert(labels::BUILD_ID.to_string(), build.metadata.name.clone());

        self.ctx.store.systems.update(system)?;
        Ok(())
    }

    fn handle_in_progress(&self, system_id: &str, deploy: Deploy) -> Result<(), LatticeError> {
        let system = self.ctx.system(system_id)?;
        if system.status.observed_generation < system.metadata.generation {
            return Ok(());
        }

        match system.status.state {
            SystemState::Stable => {
                info!("{} succeeded", deploy.describe());
                self.ctx.locks.release_deploy(system_id, &deploy.metadata.name);
                let mut status = deploy.status.clone();
                status.state = DeployState::Succeeded;
                status.message = None;
                status.completion_timestamp = Some(Utc::now());
                self.ctx.store.deploys.update_status(Deploy { status, ..deploy })?;
                Ok(())
            }
            SystemState::Degraded => {
                self.fail(system_id, deploy, "system is degraded".to_string(), None)
            }
            SystemState::Failed => {
                self.fail(system_id, deploy, "system has failed".to_string(), None)
            }
            _ => Ok(()),
        }
    }

    fn fail(
        &self,
        system_id: &str,
        deploy: Deploy,
        message: String,
        internal_error: Option<String>,
    ) -> Result<(), LatticeError> {
        warn!("{} failed: {}", deploy.describe(), message);
        self.ctx.locks.release_deploy(system_id, &deploy.metadata.name);
        let mut status = deploy.status.clone();
        status.state = DeployState::Failed;
        status.message = Some(message);
        status.internal_error = internal_error;
        status.completion_timestamp = Some(Utc::now());
        self.ctx.store.deploys.update_status(Deploy { status, ..deploy })?;
        Ok(())
    }
}

fn container_build_artifacts(build: &Build, id: &str) -> Result<ContainerBuildArtifacts, LatticeError> {
    build
        .status
        .container_build_statuses
        .get(id)
        .and_then(|status| status.artifacts.clone())
        .ok_or_else(|| {
            LatticeError::InvariantViolation(format!(
                "container build {} of {} has no artifacts",
                id,
                build.describe()
            ))
        })
}

/// Deploys waiting on a build
pub fn deploys_for_build(ctx: &ControllerContext, build: &Build) -> Vec<ObjectKey> {
    ctx.store
        .deploys
        .list(Some(&build.metadata.namespace), &LabelSelector::everything())
        .iter()
        .filter(|deploy| deploy.status.build_id.as_deref() == Some(build.metadata.name.as_str()))
        .map(Object::key)
        .collect()
}

#[async_trait]
impl Reconciler for DeployController {
    fn name(&self) -> &'static str {
        "deploy"
    }

    fn resync_keys(&self) -> Vec<ObjectKey> {
        self.ctx
            .store
            .deploys
            .list(None, &LabelSelector::everything())
            .iter()
            .map(Object::key)
            .collect()
    }

    async fn reconcile(&self, key: &ObjectKey) -> Result<(), LatticeError> {
        let system_id = self.ctx.system_id(&key.namespace)?.to_string();
        let deploy = match self.ctx.store.deploys.try_get(&key.namespace, &key.name) {
            Some(deploy) => deploy,
            None => {
                self.ctx.locks.release_deploy(&system_id, &key.name);
                return Ok(());
            }
        };

        match deploy.status.state {
            DeployState::Pending => self.handle_pending(&system_id, deploy),
            DeployState::Accepted => self.handle_accepted(&system_id, deploy),
            DeployState::InProgress => self.handle_in_progress(&system_id, deploy),
            DeployState::Succeeded | DeployState::Failed => {
                self.ctx.locks.release_deploy(&system_id, &deploy.metadata.name);
                Ok(())
            }
        }
    }
}
