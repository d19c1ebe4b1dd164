//! Build controller
//!
//! Drives a Build from `pending` to a terminal state: resolve the definition, bind one container
//! build per unique container definition, then follow the container builds until they finish.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::api::labels;
use crate::api::{
    Build, BuildState, BuildStatus, ContainerBuild, ContainerBuildSpec, ContainerBuildState,
    ContainerBuildStatus, WorkloadContainerBuilds,
};
use crate::controller::worker::Reconciler;
use crate::controller::{add_finalizer, remove_finalizer, ControllerContext};
use crate::definition::component;
use crate::definition::resolution::{self, hydrate_container_build, source_ssh_key, ResolutionInfo};
use crate::definition::tree::Path;
use crate::errors::LatticeError;
use crate::resolver::DEPTH_INFINITE;
use crate::store::{LabelSelector, Object, ObjectKey, ObjectMeta};
use crate::utils::{generate_uuid, json_sha1};

const INTERNAL_FAILURE_MESSAGE: &str = "failed due to an internal error";

pub struct BuildController {
    ctx: Arc<ControllerContext>,
    // container builds are bound one build at a time so a definition hash is only created once
    binding: Mutex<()>,
}

impl BuildController {
    pub fn new(ctx: Arc<ControllerContext>) -> Self {
        Self {
            ctx,
            binding: Mutex::new(()),
        }
    }

    async fn handle_pending(&self, build: Build) -> Result<(), LatticeError> {
        let system_id = self.ctx.system_id(&build.metadata.namespace)?.to_string();
        let system = self.ctx.system(&system_id)?;

        let mut status = build.status.clone();
        status.start_timestamp = Some(Utc::now());

        let path = build.spec.path.clone().unwrap_or_else(Path::root);
        let version = match (&build.spec.version, &build.spec.path) {
            (Some(version), _) => version.clone(),
            (None, Some(_)) => match system.metadata.label(labels::SYSTEM_DEFINITION_VERSION) {
                Some(version) => version.to_string(),
                None => {
                    let message = format!(
                        "system {} has no deployed version to build {} from",
                        system_id, path
                    );
                    return self.fail(build, status, message, None);
                }
            },
            (None, None) => {
                return self.fail(build, status, "must specify version or path".to_string(), None)
            }
        };

        let resolver = &self.ctx.resolver;
        let url = &system.spec.definition_url;
        let result = if path.is_root() {
            resolver
                .resolve_version(&system_id, url, &version, DEPTH_INFINITE)
                .await
        } else {
            resolver.resolve_path(&system_id, url, &version, &path).await
        };

        let definition = match result {
            Ok(definition) => definition,
            Err(e) => {
                warn!("Failed to resolve {}: {}", build.describe(), e);
                let message = format!("error resolving definition: {}", e);
                return self.fail(build, status, message, None);
            }
        };

        info!(
            "Accepted {} ({} components at {} of version {})",
            build.describe(),
            definition.len(),
            path,
            version
        );
        status.state = BuildState::Accepted;
        status.definition = Some(definition);
        status.path = Some(path);
        status.version = Some(version);
        status.message = None;
        self.ctx.store.builds.update_status(Build { status, ..build })?;
        Ok(())
    }

    fn handle_running(&self, build: Build) -> Result<(), LatticeError> {
        let store = &self.ctx.store;
        let namespace = build.metadata.namespace.clone();
        let description = build.describe();
        let definition = build.status.definition.clone().ok_or_else(|| {
            LatticeError::InvariantViolation(format!("{} has no definition", build.describe()))
        })?;
        let base = build.status.path.clone().unwrap_or_else(Path::root);
        let mut status = build.status.clone();

        // 1. Bind every workload container that has no container build yet
        {
            let _guard = self.binding.lock().unwrap_or_else(|e| e.into_inner());
            for (path, workload, info) in resolution::workloads(&definition) {
                let workload_path = base.join(path);
                if status.workloads.contains_key(&workload_path) {
                    continue;
                }

                let main_container = self.bind_container(&build, &workload.container().build, info)?;
                let mut sidecars = BTreeMap::new();
                for (name, sidecar) in workload.sidecars() {
                    sidecars.insert(name.clone(), self.bind_container(&build, &sidecar.build, info)?);
                }
                debug!("Bound {} of {} to {}", workload_path, build.describe(), main_container);
                status.workloads.insert(
                    workload_path,
                    WorkloadContainerBuilds {
                        main_container,
                        sidecars,
                    },
                );
            }
        }

        // 2. Observe the container builds
        let container_builds: BTreeMap<String, ContainerBuild> = store
            .container_builds
            .list(Some(&namespace), &LabelSelector::everything())
            .into_iter()
            .map(|cb| (cb.metadata.name.clone(), cb))
            .collect();

        let bound = status.workloads.len();
        status
            .workloads
            .retain(|_, workload| workload.ids().all(|id| container_builds.contains_key(id)));
        let lost = bound - status.workloads.len();

        status.container_build_statuses = status
            .workloads
            .values()
            .flat_map(|workload| workload.ids())
            .filter_map(|id| {
                container_builds
                    .get(id)
                    .map(|cb| (id.clone(), cb.status.clone()))
            })
            .collect();

        // 3. Derive the build state
        if lost > 0 {
            warn!("{} lost {} container builds, binding them again", description, lost);
            status.state = BuildState::Running;
        } else {
            apply_container_build_statuses(&mut status);
        }

        if status != build.status {
            if status.state != build.status.state {
                info!(
                    "{} is now {:?}{}",
                    description,
                    status.state,
                    status
                        .message
                        .as_ref()
                        .map(|m| format!(": {}", m))
                        .unwrap_or_default()
                );
            }
            store.builds.update_status(Build { status, ..build })?;
        }

        if lost > 0 {
            return Err(LatticeError::Conflict(format!(
                "container builds of {} disappeared",
                description
            )));
        }
        Ok(())
    }

    /// Id of a container build for `container`, reusing a live one with the same definition hash
    fn bind_container(
        &self,
        build: &Build,
        container: &component::ContainerBuild,
        info: &ResolutionInfo,
    ) -> Result<String, LatticeError> {
        let store = &self.ctx.store;
        let namespace = &build.metadata.namespace;
        let hydrated = hydrate_container_build(container, info);
        let hash = json_sha1(&hydrated)?;

        let selector = LabelSelector::everything().eq(labels::CONTAINER_BUILD_DEFINITION_HASH, &hash);
        let reusable = store
            .container_builds
            .list(Some(namespace), &selector)
            .into_iter()
            .find(|cb| cb.status.state != ContainerBuildState::Failed && !cb.metadata.is_deleting());

        if let Some(existing) = reusable {
            let id = existing.metadata.name.clone();
            if !existing.metadata.is_owned_by(&build.metadata.uid) {
                let mut owned = existing;
                owned.metadata.owner_references.push(build.owner_reference());
                store.container_builds.update(owned)?;
            }
            debug!("Reusing container build {} for {}", id, build.describe());
            return Ok(id);
        }

        let mut cb_labels = BTreeMap::new();
        cb_labels.insert(labels::CONTAINER_BUILD_DEFINITION_HASH.to_string(), hash);
        let created = store.container_builds.create(ContainerBuild {
            metadata: ObjectMeta::new(namespace.clone(), generate_uuid())
                .with_labels(cb_labels)
                .with_owner(build.owner_reference()),
            spec: ContainerBuildSpec {
                ssh_key_secret: source_ssh_key(&hydrated, info),
                build: hydrated,
            },
            status: ContainerBuildStatus::default(),
        })?;
        info!("Created {} for {}", created.describe(), build.describe());
        Ok(created.metadata.name)
    }

    fn fail(
        &self,
        build: Build,
        mut status: BuildStatus,
        message: String,
        internal_error: Option<String>,
    ) -> Result<(), LatticeError> {
        warn!("{} failed: {}", build.describe(), message);
        status.state = BuildState::Failed;
        status.message = Some(message);
        status.internal_error = internal_error;
        status.completion_timestamp = Some(Utc::now());
        self.ctx.store.builds.update_status(Build { status, ..build })?;
        Ok(())
    }

    /// Release every container build the build owns, then let the build go
    fn finalize(&self, build: Build) -> Result<(), LatticeError> {
        if !build.metadata.has_finalizer(labels::BUILD_FINALIZER) {
            return Ok(());
        }

        let store = &self.ctx.store;
        let uid = build.metadata.uid.clone();
        for cb in store
            .container_builds
            .list(Some(&build.metadata.namespace), &LabelSelector::everything())
        {
            if !cb.metadata.is_owned_by(&uid) {
                continue;
            }
            let mut released = cb;
            released.metadata.owner_references.retain(|owner| owner.uid != uid);
            match store.container_builds.update(released) {
                Ok(_) | Err(LatticeError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        info!("Finalized {}", build.describe());
        remove_finalizer(&store.builds, build, labels::BUILD_FINALIZER)
    }
}

/// Fold the observed container build states into the build's state and message
fn apply_container_build_statuses(status: &mut BuildStatus) {
    let mut failed = Vec::new();
    let mut internal = Vec::new();
    let mut building = Vec::new();

    for (path, workload) in &status.workloads {
        let mut containers = vec![("main container".to_string(), &workload.main_container)];
        containers.extend(
            workload
                .sidecars
                .iter()
                .map(|(name, id)| (format!("{} sidecar", name), id)),
        );

        let mut failures = Vec::new();
        let mut active = false;
        for (container, id) in containers {
            let cb_status = match status.container_build_statuses.get(id) {
                Some(cb_status) => cb_status,
                None => continue,
            };
            match cb_status.state {
                ContainerBuildState::Failed => {
                    let message = match &cb_status.failure_info {
                        Some(info) if info.internal => {
                            internal.push(format!("{} {}: {}", path, container, info.message));
                            INTERNAL_FAILURE_MESSAGE.to_string()
                        }
                        Some(info) => info.message.clone(),
                        None => "failed".to_string(),
                    };
                    failures.push(format!("{}: {}", container, message));
                }
                state if state.is_active() => active = true,
                _ => {}
            }
        }

        if !failures.is_empty() {
            failed.push(format!("{} ({})", path, failures.join(", ")));
        } else if active {
            building.push(path.to_string());
        }
    }

    if !failed.is_empty() {
        status.state = BuildState::Failed;
        status.message = Some(format!(
            "the following components failed to build: {}",
            failed.join(", ")
        ));
        if !internal.is_empty() {
            status.internal_error = Some(internal.join("; "));
        }
        status.completion_timestamp = Some(Utc::now());
    } else if !building.is_empty() {
        status.state = BuildState::Running;
        status.message = Some(format!(
            "the following components are still building: {}",
            building.join(", ")
        ));
    } else {
        status.state = BuildState::Succeeded;
        status.message = None;
        status.completion_timestamp = Some(Utc::now());
    }
}

#[async_trait]
impl Reconciler for BuildController {
    fn name(&self) -> &'static str {
        "build"
    }

    fn resync_keys(&self) -> Vec<ObjectKey> {
        self.ctx
            .store
            .builds
            .list(None, &LabelSelector::everything())
            .iter()
            .map(Object::key)
            .collect()
    }

    async fn reconcile(&self, key: &ObjectKey) -> Result<(), LatticeError> {
        let build = match self.ctx.store.builds.try_get(&key.namespace, &key.name) {
            Some(build) => build,
            None => return Ok(()),
        };

        if build.metadata.is_deleting() {
            return self.finalize(build);
        }
        if build.status.state.is_terminal() {
            return Ok(());
        }

        let build = add_finalizer(&self.ctx.store.builds, build, labels::BUILD_FINALIZER)?;
        match build.status.state {
            BuildState::Pending => self.handle_pending(build).await,
            BuildState::Accepted | BuildState::Running => self.handle_running(build),
            BuildState::Succeeded | BuildState::Failed => Ok(()),
        }
    }
}

/// Keys of the builds owning a container build
pub fn container_build_owners(cb: &ContainerBuild) -> Vec<ObjectKey> {
    cb.metadata
        .owner_references
        .iter()
        .filter(|owner| owner.kind == Build::KIND)
        .map(|owner| ObjectKey::new(cb.metadata.namespace.clone(), owner.name.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ContainerBuildFailureInfo;

    fn p(s: &str) -> Path {
        Path::new(s).unwrap()
    }

    fn cb_status(state: ContainerBuildState, failure: Option<(&str, bool)>) -> ContainerBuildStatus {
        ContainerBuildStatus {
            state,
            failure_info: failure.map(|(message, internal)| ContainerBuildFailureInfo {
                message: message.to_string(),
                internal,
                timed_out: false,
            }),
            ..Default::default()
        }
    }

    fn status_with(entries: &[(&str, &str, ContainerBuildStatus)]) -> BuildStatus {
        let mut status = BuildStatus {
            state: BuildState::Running,
            ..Default::default()
        };
        for (path, id, cb) in entries {
            status.workloads.insert(
                p(path),
                WorkloadContainerBuilds {
                    main_container: id.to_string(),
                    sidecars: BTreeMap::new(),
                },
            );
            status.container_build_statuses.insert(id.to_string(), cb.clone());
        }
        status
    }

    #[test]
    fn test_failures_are_listed_in_path_order() {
        let mut status = status_with(&[
            ("/b", "2", cb_status(ContainerBuildState::Failed, Some(("disk full", true)))),
            ("/a", "1", cb_status(ContainerBuildState::Failed, Some(("exit status 1", false)))),
            ("/c", "3", cb_status(ContainerBuildState::Running, None)),
        ]);
        apply_container_build_statuses(&mut status);

        assert_eq!(status.state, BuildState::Failed);
        assert_eq!(
            status.message.as_deref(),
            Some(
                "the following components failed to build: /a (main container: exit status 1), \
                 /b (main container: failed due to an internal error)"
            )
        );
        assert_eq!(
            status.internal_error.as_deref(),
            Some("/b main container: disk full")
        );
        assert!(status.completion_timestamp.is_some());
    }

    #[test]
    fn test_sidecar_failure_is_named() {
        let mut status = status_with(&[("/api", "1", cb_status(ContainerBuildState::Succeeded, None))]);
        status
            .workloads
            .get_mut(&p("/api"))
            .unwrap()
            .sidecars
            .insert("proxy".to_string(), "2".to_string());
        status.container_build_statuses.insert(
            "2".to_string(),
            cb_status(ContainerBuildState::Failed, Some(("no such image", false))),
        );
        apply_container_build_statuses(&mut status);

        assert_eq!(
            status.message.as_deref(),
            Some("the following components failed to build: /api (proxy sidecar: no such image)")
        );
    }

    #[test]
    fn test_running_lists_building_workloads() {
        let mut status = status_with(&[
            ("/a", "1", cb_status(ContainerBuildState::Queued, None)),
            ("/b", "2", cb_status(ContainerBuildState::Succeeded, None)),
        ]);
        apply_container_build_statuses(&mut status);
        assert_eq!(status.state, BuildState::Running);
        assert_eq!(
            status.message.as_deref(),
            Some("the following components are still building: /a")
        );
    }

    #[test]
    fn test_all_succeeded() {
        let mut status = status_with(&[("/a", "1", cb_status(ContainerBuildState::Succeeded, None))]);
        apply_container_build_statuses(&mut status);
        assert_eq!(status.state, BuildState::Succeeded);
        assert!(status.message.is_none());
        assert!(status.completion_timestamp.is_some());
    }
}
