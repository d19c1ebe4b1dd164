//! Service controller
//!
//! Places a service on its node pool and rolls its instances over to the current generation:
//! missing up-to-date instances are created and started, and stale ones are only stopped once
//! enough new ones are running.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::api::instance::{sidecar_container_name, MAIN_CONTAINER};
use crate::api::labels;
use crate::api::service::ServiceFailureInfo;
use crate::api::{
    Instance, InstanceContainer, InstanceSpec, InstanceState, NodePool, NodePoolSpec,
    NodePoolState, Service, ServiceState, ServiceStatus, WorkloadContainerBuildArtifacts,
};
use crate::controller::worker::Reconciler;
use crate::controller::{add_finalizer, delete_if_present, remove_finalizer, ControllerContext};
use crate::definition::component::{Container, EnvValue, Workload};
use crate::errors::LatticeError;
use crate::store::{LabelSelector, Object, ObjectKey, ObjectMeta};
use crate::utils::{generate_uuid, json_sha1};

/// Instance type of dedicated node pools whose service does not name one
pub const DEFAULT_INSTANCE_TYPE: &str = "default";

/// Inputs that force new instances when they change
#[derive(Serialize)]
struct GenerationInputs<'a> {
    artifacts: &'a WorkloadContainerBuildArtifacts,
    env: BTreeMap<String, &'a BTreeMap<String, EnvValue>>,
    num_instances: u32,
}

/// Hash identifying the instances a workload asks for
pub fn workload_generation_hash<W: Workload>(
    workload: &W,
    artifacts: &WorkloadContainerBuildArtifacts,
    num_instances: u32,
) -> Result<String, LatticeError> {
    let mut env = BTreeMap::new();
    env.insert(MAIN_CONTAINER.to_string(), &workload.container().env);
    for (name, sidecar) in workload.sidecars() {
        env.insert(sidecar_container_name(name), &sidecar.env);
    }
    json_sha1(&GenerationInputs {
        artifacts,
        env,
        num_instances,
    })
}

/// Hash identifying the instances a service spec asks for
pub fn generation_hash(service: &Service) -> Result<String, LatticeError> {
    let definition = &service.spec.definition;
    workload_generation_hash(definition, &service.spec.artifacts, definition.num_instances)
}

fn instance_container(container: &Container, image: &str) -> InstanceContainer {
    InstanceContainer {
        image: image.to_string(),
        exec: container.exec.clone(),
        env: container.env.clone(),
    }
}

/// `main` and sidecar containers of a workload, running its built images
pub fn instance_containers<W: Workload>(
    workload: &W,
    artifacts: &WorkloadContainerBuildArtifacts,
) -> BTreeMap<String, InstanceContainer> {
    let mut containers = BTreeMap::new();
    containers.insert(
        MAIN_CONTAINER.to_string(),
        instance_container(workload.container(), &artifacts.main_container.docker_image_fqn),
    );
    for (name, sidecar) in workload.sidecars() {
        let image = artifacts
            .sidecars
            .get(name)
            .map(|a| a.docker_image_fqn.clone())
            .unwrap_or_default();
        containers.insert(sidecar_container_name(name), instance_container(sidecar, &image));
    }
    containers
}

pub struct ServiceController {
    ctx: Arc<ControllerContext>,
}

impl ServiceController {
    pub fn new(ctx: Arc<ControllerContext>) -> Self {
        Self { ctx }
    }

    /// Shared pool named by the service, or its dedicated pool, created on demand
    fn node_pool(&self, service: &Service) -> Result<Option<NodePool>, LatticeError> {
        let store = &self.ctx.store;
        let namespace = &service.metadata.namespace;

        let (selector, description) = match &service.spec.definition.node_pool {
            Some(shared) => (
                LabelSelector::everything().eq(labels::NODE_POOL_SYSTEM_SHARED_PATH, shared.to_domain()),
                format!("shared node pool {}", shared),
            ),
            None => (
                LabelSelector::everything().eq(labels::NODE_POOL_SERVICE_DEDICATED_ID, &service.metadata.name),
                format!("dedicated node pool of {}", service.describe()),
            ),
        };
        let mut pools: Vec<NodePool> = store
            .node_pools
            .list(Some(namespace), &selector)
            .into_iter()
            .filter(|np| !np.metadata.is_deleting())
            .collect();
        if pools.len() > 1 {
            return Err(LatticeError::InvariantViolation(format!(
                "found {} matches for the {}",
                pools.len(),
                description
            )));
        }

        if service.spec.definition.node_pool.is_some() {
            return Ok(pools.pop());
        }

        let spec = NodePoolSpec {
            num_instances: 1,
            instance_type: service
                .spec
                .definition
                .instance_type
                .clone()
                .unwrap_or_else(|| DEFAULT_INSTANCE_TYPE.to_string()),
        };
        let pool = match pools.pop() {
            Some(pool) if pool.spec == spec => pool,
            Some(pool) => store.node_pools.update(NodePool { spec, ..pool })?,
            None => {
                let mut pool_labels = BTreeMap::new();
                pool_labels.insert(
                    labels::NODE_POOL_SERVICE_DEDICATED_ID.to_string(),
                    service.metadata.name.clone(),
                );
                let created = store.node_pools.create(NodePool {
                    metadata: ObjectMeta::new(namespace.clone(), generate_uuid())
                        .with_labels(pool_labels)
                        .with_owner(service.owner_reference()),
                    spec,
                    status: Default::default(),
                })?;
                info!("Created {} for {}", created.describe(), service.describe());
                created
            }
        };
        Ok(Some(pool))
    }

    fn new_instance(&self, service: &Service, generation: &str, node_pool: &str) -> Instance {
        let containers = instance_containers(&service.spec.definition, &service.spec.artifacts);

        let mut instance_labels = BTreeMap::new();
        instance_labels.insert(labels::SERVICE_ID.to_string(), service.metadata.name.clone());
        instance_labels.insert(labels::INSTANCE_GENERATION.to_string(), generation.to_string());

        Instance {
            metadata: ObjectMeta::new(service.metadata.namespace.clone(), generate_uuid())
                .with_labels(instance_labels)
                .with_owner(service.owner_reference()),
            spec: InstanceSpec {
                workload: service.metadata.name.clone(),
                run_to_completion: false,
                generation: generation.to_string(),
                node_pool: Some(node_pool.to_string()),
                containers,
            },
            status: Default::default(),
        }
    }

    async fn start(&self, instance: Instance) -> Result<Instance, LatticeError> {
        let mut status = instance.status.clone();
        match self.ctx.runtime.start(&instance).await {
            Ok(()) => {
                status.state = InstanceState::Running;
                status.message = None;
            }
            Err(e) if e.is_retryable() => return Err(e),
            Err(e) => {
                warn!("Failed to start instance {}: {}", instance.metadata.name, e);
                status.state = InstanceState::Failed;
                status.message = Some(e.public_message());
            }
        }
        self.ctx.store.instances.update_status(Instance { status, ..instance })
    }

    async fn remove(&self, instance: &Instance) -> Result<(), LatticeError> {
        self.ctx.runtime.stop(instance).await?;
        delete_if_present(&self.ctx.store.instances, instance)
    }

    async fn sync(&self, service: &Service) -> Result<ServiceStatus, LatticeError> {
        let store = &self.ctx.store;
        let namespace = &service.metadata.namespace;
        let wanted = service.spec.definition.num_instances as usize;
        let mut status = ServiceStatus {
            observed_generation: service.metadata.generation,
            ..service.status.clone()
        };

        // 1. Node pool
        let node_pool = match self.node_pool(service)? {
            Some(pool) if pool.status.state == NodePoolState::Stable => pool,
            pool => {
                status.state = ServiceState::Pending;
                status.message = Some("node pool is pending".to_string());
                status.node_pool = pool.map(|p| p.metadata.name);
                return Ok(status);
            }
        };
        status.node_pool = Some(node_pool.metadata.name.clone());

        // 2. Split instances by generation
        let generation = generation_hash(service)?;
        let (mut current, mut stale): (Vec<Instance>, Vec<Instance>) = store
            .instances
            .list(
                Some(namespace),
                &LabelSelector::everything().eq(labels::SERVICE_ID, &service.metadata.name),
            )
            .into_iter()
            .partition(|i| i.metadata.label(labels::INSTANCE_GENERATION) == Some(generation.as_str()));

        // 3. Scale current instances to the wanted count
        while current.len() < wanted {
            let created = store
                .instances
                .create(self.new_instance(service, &generation, &node_pool.metadata.name))?;
            debug!("Created instance {} of {}", created.metadata.name, service.describe());
            current.push(created);
        }
        while current.len() > wanted {
            if let Some(extra) = current.pop() {
                self.remove(&extra).await?;
            }
        }

        let mut started = Vec::with_capacity(current.len());
        for instance in current {
            if instance.status.state == InstanceState::Pending {
                started.push(self.start(instance).await?);
            } else {
                started.push(instance);
            }
        }
        let current = started;

        // 4. Retire stale instances once the new ones are up
        let ready = current
            .iter()
            .filter(|i| i.status.state == InstanceState::Running)
            .count();
        if ready >= wanted && !stale.is_empty() {
            info!("Retiring {} stale instances of {}", stale.len(), service.describe());
            for instance in &stale {
                self.remove(instance).await?;
            }
            stale.clear();
        }

        // 5. Status
        let failed = current.iter().find(|i| i.status.state == InstanceState::Failed);
        status.updated_instances = ready as u32;
        status.stale_instances = stale.len() as u32;
        status.available_instances = (ready
            + stale
                .iter()
                .filter(|i| i.status.state == InstanceState::Running)
                .count()) as u32;

        if let Some(instance) = failed {
            status.state = ServiceState::Failed;
            let message = format!(
                "instance {} failed: {}",
                instance.metadata.name,
                instance.status.message.clone().unwrap_or_default()
            );
            status.message = Some(message.clone());
            status.failure_info = Some(ServiceFailureInfo {
                message,
                internal: false,
            });
        } else if !stale.is_empty() {
            status.state = ServiceState::Updating;
            status.message = Some("instances are updating".to_string());
            status.failure_info = None;
        } else if ready < wanted {
            status.state = ServiceState::Scaling;
            status.message = Some("instances are scaling".to_string());
            status.failure_info = None;
        } else {
            status.state = ServiceState::Stable;
            status.message = None;
            status.failure_info = None;
        }
        Ok(status)
    }

    async fn finalize(&self, service: Service) -> Result<(), LatticeError> {
        let store = &self.ctx.store;
        let namespace = service.metadata.namespace.clone();

        let service = if service.status.state != ServiceState::Deleting {
            store
                .services
                .mutate_status(&namespace, &service.metadata.name, |status| {
                    status.state = ServiceState::Deleting;
                    status.message = None;
                })?
        } else {
            service
        };

        let instances = store.instances.list(
            Some(&namespace),
            &LabelSelector::everything().eq(labels::SERVICE_ID, &service.metadata.name),
        );
        for instance in &instances {
            self.remove(instance).await?;
        }

        // the dedicated pool goes last; its deletion event brings the service back here
        let dedicated =
            LabelSelector::everything().eq(labels::NODE_POOL_SERVICE_DEDICATED_ID, &service.metadata.name);
        let pools = store.node_pools.list(Some(&namespace), &dedicated);
        if !pools.is_empty() {
            for pool in pools.iter().filter(|pool| !pool.metadata.is_deleting()) {
                delete_if_present(&store.node_pools, pool)?;
            }
            return Ok(());
        }

        info!("Released {}", service.describe());
        remove_finalizer(&store.services, service, labels::SERVICE_FINALIZER)
    }
}

/// Services affected by a node pool event
pub fn services_for_node_pool(ctx: &ControllerContext, pool: &NodePool) -> Vec<ObjectKey> {
    if let Some(service) = pool.metadata.label(labels::NODE_POOL_SERVICE_DEDICATED_ID) {
        return vec![ObjectKey::new(&pool.metadata.namespace, service)];
    }
    ctx.store
        .services
        .list(Some(&pool.metadata.namespace), &LabelSelector::everything())
        .iter()
        .map(Object::key)
        .collect()
}

#[async_trait]
impl Reconciler for ServiceController {
    fn name(&self) -> &'static str {
        "service"
    }

    fn resync_keys(&self) -> Vec<ObjectKey> {
        self.ctx
            .store
            .services
            .list(None, &LabelSelector::everything())
            .iter()
            .map(Object::key)
            .collect()
    }

    async fn reconcile(&self, key: &ObjectKey) -> Result<(), LatticeError> {
        let store = &self.ctx.store;
        let service = match store.services.try_get(&key.namespace, &key.name) {
            Some(service) => service,
            None => return Ok(()),
        };
        if service.metadata.is_deleting() {
            return self.finalize(service).await;
        }

        let service = add_finalizer(&store.services, service, labels::SERVICE_FINALIZER)?;
        let status = match self.sync(&service).await {
            Ok(status) => status,
            Err(e) if e.is_retryable() => return Err(e),
            Err(e) => {
                warn!("{} failed: {}", service.describe(), e);
                let internal = matches!(
                    e,
                    LatticeError::InvariantViolation(_) | LatticeError::Internal(_)
                );
                ServiceStatus {
                    observed_generation: service.metadata.generation,
                    state: ServiceState::Failed,
                    message: Some(e.public_message()),
                    failure_info: Some(ServiceFailureInfo {
                        message: e.to_string(),
                        internal,
                    }),
                    ..service.status.clone()
                }
            }
        };

        if status != service.status {
            debug!("{} is {:?}", service.describe(), status.state);
            store.services.update_status(Service { status, ..service })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ContainerBuildArtifacts, ServiceSpec};
    use crate::definition::component::{self, ContainerBuild, DockerImage};
    use crate::definition::tree::Path;

    fn service(image: &str, num_instances: u32) -> Service {
        let container = Container {
            build: ContainerBuild::DockerImage(DockerImage {
                registry: None,
                repository: "library/nginx".to_string(),
                tag: "1".to_string(),
            }),
            exec: None,
            env: BTreeMap::new(),
            ports: BTreeMap::new(),
        };
        Service {
            metadata: ObjectMeta::new("lattice-system-petflix", "api"),
            spec: ServiceSpec {
                path: Path::new("/api").unwrap(),
                definition: component::Service {
                    description: None,
                    container,
                    sidecars: BTreeMap::new(),
                    num_instances,
                    node_pool: None,
                    instance_type: None,
                },
                artifacts: WorkloadContainerBuildArtifacts {
                    main_container: ContainerBuildArtifacts {
                        docker_image_fqn: image.to_string(),
                    },
                    sidecars: BTreeMap::new(),
                },
            },
            status: Default::default(),
        }
    }

    #[test]
    fn test_generation_hash_tracks_inputs() {
        let base = generation_hash(&service("nginx:1", 1)).unwrap();
        assert_eq!(base, generation_hash(&service("nginx:1", 1)).unwrap());
        assert_ne!(base, generation_hash(&service("nginx:2", 1)).unwrap());
        assert_ne!(base, generation_hash(&service("nginx:1", 2)).unwrap());

        let mut with_env = service("nginx:1", 1);
        with_env
            .spec
            .definition
            .container
            .env
            .insert("PORT".to_string(), EnvValue::Value("8080".to_string()));
        assert_ne!(base, generation_hash(&with_env).unwrap());
    }

    #[test]
    fn test_generation_hash_ignores_description() {
        let mut described = service("nginx:1", 1);
        described.spec.definition.description = Some("frontend".to_string());
        assert_eq!(
            generation_hash(&described).unwrap(),
            generation_hash(&service("nginx:1", 1)).unwrap()
        );
    }
}
