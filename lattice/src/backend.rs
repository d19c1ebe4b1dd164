//! Operations behind the public API
//!
//! Every call translates into object store reads and writes; the controllers do the rest.

use std::sync::Arc;

use tracing::info;

use crate::api::{
    self, Build, BuildSpec, Deploy, DeploySpec, Instance, Secret, Service, System, SystemSpec,
    SystemState, Teardown, TeardownSpec,
};
use crate::containerbuild::BuildLogs;
use crate::definition::tree::{Path, PathSubcomponent};
use crate::errors::LatticeError;
use crate::resolver::{secret_name, ObjectSecretStore};
use crate::runtime::InstanceRuntime;
use crate::store::{LabelSelector, ObjectMeta, Store};
use crate::utils::generate_uuid;

/// Longest accepted system id; ids end up in namespace names
pub const MAX_SYSTEM_ID_LEN: usize = 63;

/// System ids are lowercase DNS labels
pub fn validate_system_id(id: &str) -> Result<(), LatticeError> {
    let valid = !id.is_empty()
        && id.len() <= MAX_SYSTEM_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !id.starts_with('-')
        && !id.ends_with('-');
    if valid {
        Ok(())
    } else {
        Err(LatticeError::InvalidId(id.to_string()))
    }
}

pub struct Backend {
    store: Arc<Store>,
    secrets: Arc<ObjectSecretStore>,
    logs: Arc<BuildLogs>,
    runtime: Arc<dyn InstanceRuntime>,
    namespace_prefix: String,
}

impl Backend {
    pub fn new(
        store: Arc<Store>,
        secrets: Arc<ObjectSecretStore>,
        logs: Arc<BuildLogs>,
        runtime: Arc<dyn InstanceRuntime>,
        namespace_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            secrets,
            logs,
            runtime,
            namespace_prefix: namespace_prefix.into(),
        }
    }

    fn internal_namespace(&self) -> String {
        api::internal_namespace(&self.namespace_prefix)
    }

    fn system_namespace(&self, system_id: &str) -> String {
        api::system_namespace(&self.namespace_prefix, system_id)
    }

    // =============================== SYSTEMS ================================== //

    pub fn create_system(&self, id: &str, definition_url: &str) -> Result<System, LatticeError> {
        validate_system_id(id)?;
        if definition_url.trim().is_empty() {
            return Err(LatticeError::ValidationError(
                "definition url must not be empty".to_string(),
            ));
        }

        let system = self.store.systems.create(System {
            metadata: ObjectMeta::new(self.internal_namespace(), id),
            spec: SystemSpec::new(definition_url),
            status: Default::default(),
        })?;
        info!("Created system {} from {}", id, definition_url);
        Ok(system)
    }

    pub fn list_systems(&self) -> Vec<System> {
        self.store
            .systems
            .list(Some(&self.internal_namespace()), &LabelSelector::everything())
    }

    pub fn get_system(&self, id: &str) -> Result<System, LatticeError> {
        self.store.systems.get(&self.internal_namespace(), id)
    }

    pub fn delete_system(&self, id: &str) -> Result<(), LatticeError> {
        info!("Deleting system {}", id);
        self.store.systems.delete(&self.internal_namespace(), id)
    }

    /// System that accepts new builds, deploys and teardowns
    fn usable_system(&self, id: &str) -> Result<System, LatticeError> {
        let system = self.get_system(id)?;
        if system.metadata.is_deleting() {
            return Err(LatticeError::SystemDeleting(id.to_string()));
        }
        match system.effective_state() {
            SystemState::Pending => Err(LatticeError::SystemPending(id.to_string())),
            SystemState::Failed => Err(LatticeError::SystemFailed(id.to_string())),
            SystemState::Deleting => Err(LatticeError::SystemDeleting(id.to_string())),
            _ => Ok(system),
        }
    }

    // =============================== BUILDS ================================== //

    pub fn create_build(
        &self,
        system_id: &str,
        version: Option<String>,
        path: Option<Path>,
    ) -> Result<Build, LatticeError> {
        if version.is_some() == path.is_some() {
            return Err(LatticeError::ValidationError(
                "must specify exactly one of version or path".to_string(),
            ));
        }
        self.usable_system(system_id)?;

        let build = self.store.builds.create(Build {
            metadata: ObjectMeta::new(self.system_namespace(system_id), generate_uuid()),
            spec: BuildSpec { version, path },
            status: Default::default(),
        })?;
        info!("Created build {} in system {}", build.metadata.name, system_id);
        Ok(build)
    }

    pub fn list_builds(&self, system_id: &str) -> Result<Vec<Build>, LatticeError> {
        self.get_system(system_id)?;
        Ok(self
            .store
            .builds
            .list(Some(&self.system_namespace(system_id)), &LabelSelector::everything()))
    }

    pub fn get_build(&self, system_id: &str, build_id: &str) -> Result<Build, LatticeError> {
        self.get_system(system_id)?;
        self.store
            .builds
            .get(&self.system_namespace(system_id), build_id)
    }

    /// Log of the container build behind one container of a workload
    pub fn build_logs(
        &self,
        system_id: &str,
        build_id: &str,
        path: &Path,
        sidecar: Option<&str>,
    ) -> Result<Option<String>, LatticeError> {
        let build = self.get_build(system_id, build_id)?;
        let workload = build.status.workloads.get(path).ok_or_else(|| {
            LatticeError::NotFound(format!("workload {} in build {}", path, build_id))
        })?;
        let container_build = match sidecar {
            Some(sidecar) => workload.sidecars.get(sidecar).ok_or_else(|| {
                LatticeError::NotFound(format!("sidecar {} of workload {}", sidecar, path))
            })?,
            None => &workload.main_container,
        };
        Ok(self.logs.get(container_build))
    }

    // =============================== DEPLOYS ================================== //

    pub fn create_deploy(&self, system_id: &str, spec: DeploySpec) -> Result<Deploy, LatticeError> {
        self.usable_system(system_id)?;
        let deploy = self.store.deploys.create(Deploy {
            metadata: ObjectMeta::new(self.system_namespace(system_id), generate_uuid()),
            spec,
            status: Default::default(),
        })?;
        info!("Created deploy {} in system {}", deploy.metadata.name, system_id);
        Ok(deploy)
    }

    pub fn list_deploys(&self, system_id: &str) -> Result<Vec<Deploy>, LatticeError> {
        self.get_system(system_id)?;
        Ok(self
            .store
            .deploys
            .list(Some(&self.system_namespace(system_id)), &LabelSelector::everything()))
    }

    pub fn get_deploy(&self, system_id: &str, deploy_id: &str) -> Result<Deploy, LatticeError> {
        self.get_system(system_id)?;
        self.store
            .deploys
            .get(&self.system_namespace(system_id), deploy_id)
    }

    // =============================== TEARDOWNS ================================== //

    pub fn create_teardown(&self, system_id: &str) -> Result<Teardown, LatticeError> {
        self.usable_system(system_id)?;
        let teardown = self.store.teardowns.create(Teardown {
            metadata: ObjectMeta::new(self.system_namespace(system_id), generate_uuid()),
            spec: TeardownSpec::default(),
            status: Default::default(),
        })?;
        info!("Created teardown {} in system {}", teardown.metadata.name, system_id);
        Ok(teardown)
    }

    pub fn list_teardowns(&self, system_id: &str) -> Result<Vec<Teardown>, LatticeError> {
        self.get_system(system_id)?;
        Ok(self
            .store
            .teardowns
            .list(Some(&self.system_namespace(system_id)), &LabelSelector::everything()))
    }

    pub fn get_teardown(&self, system_id: &str, teardown_id: &str) -> Result<Teardown, LatticeError> {
        self.get_system(system_id)?;
        self.store
            .teardowns
            .get(&self.system_namespace(system_id), teardown_id)
    }

    // =============================== SECRETS ================================== //

    pub fn list_secrets(&self, system_id: &str) -> Result<Vec<Secret>, LatticeError> {
        self.get_system(system_id)?;
        Ok(self.secrets.list(system_id))
    }

    pub fn get_secret(&self, system_id: &str, path: &PathSubcomponent) -> Result<Secret, LatticeError> {
        self.get_system(system_id)?;
        let secret = self
            .store
            .secrets
            .get(&self.system_namespace(system_id), &secret_name(path))?;
        if &secret.spec.path != path {
            return Err(LatticeError::NotFound(format!("secret {}", path)));
        }
        Ok(secret)
    }

    pub fn set_secret(
        &self,
        system_id: &str,
        path: &PathSubcomponent,
        value: String,
    ) -> Result<(), LatticeError> {
        let system = self.get_system(system_id)?;
        if system.metadata.is_deleting() {
            return Err(LatticeError::SystemDeleting(system_id.to_string()));
        }
        info!("Setting secret {} in system {}", path, system_id);
        self.secrets.set(system_id, path, value)
    }

    pub fn unset_secret(&self, system_id: &str, path: &PathSubcomponent) -> Result<(), LatticeError> {
        self.get_system(system_id)?;
        info!("Unsetting secret {} in system {}", path, system_id);
        self.secrets.unset(system_id, path)
    }

    // =============================== SERVICES ================================== //

    pub fn list_services(&self, system_id: &str) -> Result<Vec<Service>, LatticeError> {
        self.get_system(system_id)?;
        Ok(self
            .store
            .services
            .list(Some(&self.system_namespace(system_id)), &LabelSelector::everything()))
    }

    pub fn get_service(&self, system_id: &str, service_id: &str) -> Result<Service, LatticeError> {
        self.get_system(system_id)?;
        self.store
            .services
            .get(&self.system_namespace(system_id), service_id)
    }

    /// Service found by its path in the system
    pub fn get_service_by_path(&self, system_id: &str, path: &Path) -> Result<Service, LatticeError> {
        self.list_services(system_id)?
            .into_iter()
            .find(|service| &service.spec.path == path && !service.metadata.is_deleting())
            .ok_or_else(|| LatticeError::NotFound(format!("service {} in system {}", path, system_id)))
    }

    pub fn service_instances(&self, system_id: &str, service_id: &str) -> Result<Vec<Instance>, LatticeError> {
        let service = self.get_service(system_id, service_id)?;
        Ok(self.store.instances.list(
            Some(&service.metadata.namespace),
            &LabelSelector::everything().eq(api::labels::SERVICE_ID, &service.metadata.name),
        ))
    }

    /// Output of every instance of the service, one block per instance
    pub async fn service_logs(&self, system_id: &str, service_id: &str) -> Result<String, LatticeError> {
        let mut blocks = Vec::new();
        for instance in self.service_instances(system_id, service_id)? {
            if let Some(logs) = self.runtime.logs(&instance).await? {
                blocks.push(format!("==> instance {}\n{}", instance.metadata.name, logs));
            }
        }
        Ok(blocks.join("\n"))
    }
}
