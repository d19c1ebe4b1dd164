//! System controller
//!
//! Keeps the Service, Job and shared NodePool objects of a system in line with its spec tree,
//! rolls their states up into the system state, and empties the namespace on deletion.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::api::labels;
use crate::api::system::{SystemJobStatus, SystemNodePoolStatus, SystemServiceStatus};
use crate::api::{
    Job, JobSpec, JobState, NodePool, NodePoolSpec, NodePoolState, Service, ServiceSpec,
    ServiceState, System, SystemState, SystemStatus,
};
use crate::controller::worker::Reconciler;
use crate::controller::{add_finalizer, delete_if_present, remove_finalizer, ControllerContext};
use crate::definition::component::Component;
use crate::definition::tree::{Path, PathSubcomponent};
use crate::errors::LatticeError;
use crate::store::{LabelSelector, Object, ObjectKey, ObjectMeta, ObjectStore};
use crate::utils::generate_uuid;

type WorkloadStatuses = (
    BTreeMap<Path, SystemServiceStatus>,
    BTreeMap<Path, SystemJobStatus>,
);

pub struct SystemController {
    ctx: Arc<ControllerContext>,
}

/// Components holding the system back from `stable`, by reason
#[derive(Debug, Default)]
struct Rollup {
    degraded: Vec<String>,
    updating: Vec<String>,
    scaling: Vec<String>,
}

impl Rollup {
    fn state(&self) -> (SystemState, Option<String>) {
        if !self.degraded.is_empty() {
            let message = format!("the following components have failed: {}", self.degraded.join(", "));
            (SystemState::Degraded, Some(message))
        } else if !self.updating.is_empty() {
            let message = format!("the following components are updating: {}", self.updating.join(", "));
            (SystemState::Updating, Some(message))
        } else if !self.scaling.is_empty() {
            let message = format!("the following components are scaling: {}", self.scaling.join(", "));
            (SystemState::Scaling, Some(message))
        } else {
            (SystemState::Stable, None)
        }
    }
}

impl SystemController {
    pub fn new(ctx: Arc<ControllerContext>) -> Self {
        Self { ctx }
    }

    fn sync(&self, system: &System) -> Result<SystemStatus, LatticeError> {
        let namespace = self.ctx.system_namespace(&system.metadata.name);
        let mut rollup = Rollup::default();

        let node_pools = self.sync_node_pools(system, &namespace, &mut rollup)?;
        let (services, jobs) = self.sync_workloads(system, &namespace, &mut rollup)?;

        let (state, message) = rollup.state();
        Ok(SystemStatus {
            observed_generation: system.metadata.generation,
            state,
            message,
            services,
            jobs,
            node_pools,
        })
    }

    fn sync_node_pools(
        &self,
        system: &System,
        namespace: &str,
        rollup: &mut Rollup,
    ) -> Result<BTreeMap<String, SystemNodePoolStatus>, LatticeError> {
        let store = &self.ctx.store;
        let existing = store.node_pools.list(
            Some(namespace),
            &LabelSelector::everything().exists(labels::NODE_POOL_SYSTEM_SHARED_PATH),
        );

        let mut statuses = BTreeMap::new();
        let mut wanted = BTreeSet::new();
        for (path, info) in system.spec.definition.iter() {
            let declared = match info.component.as_system() {
                Some(declaring) => &declaring.node_pools,
                None => continue,
            };
            for (name, pool) in declared {
                let subcomponent = PathSubcomponent::from_parts(path.clone(), name)?;
                let domain = subcomponent.to_domain();
                let spec = NodePoolSpec {
                    num_instances: pool.num_instances,
                    instance_type: pool.instance_type.clone(),
                };

                let current = existing.iter().find(|np| {
                    !np.metadata.is_deleting()
                        && np.metadata.label(labels::NODE_POOL_SYSTEM_SHARED_PATH) == Some(domain.as_str())
                });
                let node_pool = match current {
                    Some(np) if np.spec == spec => np.clone(),
                    Some(np) => {
                        info!("Updating shared {} ({})", np.describe(), subcomponent);
                        store.node_pools.update(NodePool {
                            spec,
                            ..np.clone()
                        })?
                    }
                    None => {
                        let mut pool_labels = BTreeMap::new();
                        pool_labels.insert(labels::NODE_POOL_SYSTEM_SHARED_PATH.to_string(), domain.clone());
                        let created = store.node_pools.create(NodePool {
                            metadata: ObjectMeta::new(namespace, generate_uuid()).with_labels(pool_labels),
                            spec,
                            status: Default::default(),
                        })?;
                        info!("Created shared {} ({})", created.describe(), subcomponent);
                        created
                    }
                };

                let description = subcomponent.to_string();
                if node_pool.status.state == NodePoolState::Failed {
                    rollup.degraded.push(description.clone());
                } else if node_pool.status.observed_generation < node_pool.metadata.generation {
                    rollup.updating.push(description.clone());
                } else if matches!(node_pool.status.state, NodePoolState::Pending | NodePoolState::Scaling) {
                    rollup.scaling.push(description.clone());
                }

                wanted.insert(domain);
                statuses.insert(
                    description,
                    SystemNodePoolStatus {
                        name: node_pool.metadata.name.clone(),
                        state: node_pool.status.state,
                    },
                );
            }
        }

        for stale in existing {
            let domain = stale.metadata.label(labels::NODE_POOL_SYSTEM_SHARED_PATH).unwrap_or_default();
            if !wanted.contains(domain) && !stale.metadata.is_deleting() {
                info!("Deleting shared {}, it is no longer declared", stale.describe());
                delete_if_present(&store.node_pools, &stale)?;
            }
        }

        Ok(statuses)
    }

    fn sync_workloads(
        &self,
        system: &System,
        namespace: &str,
        rollup: &mut Rollup,
    ) -> Result<WorkloadStatuses, LatticeError> {
        let store = &self.ctx.store;
        let all = LabelSelector::everything();
        let existing_services = store.services.list(Some(namespace), &all);
        let existing_jobs = store.jobs.list(Some(namespace), &all);

        let mut services = BTreeMap::new();
        let mut jobs = BTreeMap::new();
        for (path, info) in system.spec.definition.iter() {
            let workload_labels = |key: &str| {
                let mut workload_labels = BTreeMap::new();
                workload_labels.insert(key.to_string(), path.to_domain());
                workload_labels
            };

            match &info.component {
                Component::Service(definition) => {
                    let artifacts = system.spec.workload_build_artifacts.get(path).cloned().ok_or_else(|| {
                        LatticeError::InvariantViolation(format!("service {} has no build artifacts", path))
                    })?;
                    let spec = ServiceSpec {
                        path: path.clone(),
                        definition: definition.clone(),
                        artifacts,
                    };
                    let current = existing_services
                        .iter()
                        .find(|s| !s.metadata.is_deleting() && s.spec.path == *path);
                    let service = match current {
                        Some(s) if s.spec == spec => s.clone(),
                        Some(s) => {
                            info!("Updating {} at {}", s.describe(), path);
                            store.services.update(Service { spec, ..s.clone() })?
                        }
                        None => {
                            let created = store.services.create(Service {
                                metadata: ObjectMeta::new(namespace, generate_uuid())
                                    .with_labels(workload_labels(labels::SERVICE_PATH)),
                                spec,
                                status: Default::default(),
                            })?;
                            info!("Created {} at {}", created.describe(), path);
                            created
                        }
                    };

                    let description = path.to_string();
                    if service.status.state == ServiceState::Failed {
                        rollup.degraded.push(description);
                    } else if service.status.observed_generation < service.metadata.generation
                        || service.status.state == ServiceState::Updating
                    {
                        rollup.updating.push(description);
                    } else if matches!(service.status.state, ServiceState::Pending | ServiceState::Scaling) {
                        rollup.scaling.push(description);
                    }

                    services.insert(
                        path.clone(),
                        SystemServiceStatus {
                            name: service.metadata.name.clone(),
                            state: service.status.state,
                            message: service.status.message.clone(),
                        },
                    );
                }
                Component::Job(definition) => {
                    let artifacts = system.spec.workload_build_artifacts.get(path).cloned().ok_or_else(|| {
                        LatticeError::InvariantViolation(format!("job {} has no build artifacts", path))
                    })?;
                    let spec = JobSpec {
                        path: path.clone(),
                        definition: definition.clone(),
                        artifacts,
                    };
                    let current = existing_jobs
                        .iter()
                        .find(|j| !j.metadata.is_deleting() && j.spec.path == *path);
                    let job = match current {
                        Some(j) if j.spec == spec => j.clone(),
                        Some(j) => {
                            info!("Updating {} at {}", j.describe(), path);
                            store.jobs.update(Job { spec, ..j.clone() })?
                        }
                        None => {
                            let created = store.jobs.create(Job {
                                metadata: ObjectMeta::new(namespace, generate_uuid())
                                    .with_labels(workload_labels(labels::JOB_PATH)),
                                spec,
                                status: Default::default(),
                            })?;
                            info!("Created {} at {}", created.describe(), path);
                            created
                        }
                    };

                    let description = path.to_string();
                    if job.status.state == JobState::Failed {
                        rollup.degraded.push(description);
                    } else if job.status.observed_generation < job.metadata.generation
                        || job.status.state == JobState::Running
                    {
                        rollup.updating.push(description);
                    } else if job.status.state == JobState::Pending {
                        rollup.scaling.push(description);
                    }

                    jobs.insert(
                        path.clone(),
                        SystemJobStatus {
                            name: job.metadata.name.clone(),
                            state: job.status.state,
                            message: job.status.message.clone(),
                        },
                    );
                }
                _ => {}
            }
        }

        // 2. Remove workloads that left the tree; the system is updating until they are gone
        for service in existing_services {
            if services.get(&service.spec.path).map(|s| &s.name) == Some(&service.metadata.name) {
                continue;
            }
            if !service.metadata.is_deleting() {
                info!("Deleting {}, {} is no longer deployed", service.describe(), service.spec.path);
                delete_if_present(&store.services, &service)?;
            }
            rollup.updating.push(service.spec.path.to_string());
        }
        for job in existing_jobs {
            if jobs.get(&job.spec.path).map(|j| &j.name) == Some(&job.metadata.name) {
                continue;
            }
            if !job.metadata.is_deleting() {
                info!("Deleting {}, {} is no longer deployed", job.describe(), job.spec.path);
                delete_if_present(&store.jobs, &job)?;
            }
            rollup.updating.push(job.spec.path.to_string());
        }

        Ok((services, jobs))
    }

    fn finalize(&self, system: System) -> Result<(), LatticeError> {
        let store = &self.ctx.store;
        let system_id = system.metadata.name.clone();
        let namespace = self.ctx.system_namespace(&system_id);

        let system = if system.status.state != SystemState::Deleting {
            info!("Deleting {}", system.describe());
            store.systems.mutate_status(&system.metadata.namespace, &system_id, |status| {
                status.state = SystemState::Deleting;
                status.message = None;
            })?
        } else {
            system
        };

        delete_all(&store.deploys, &namespace)?;
        delete_all(&store.teardowns, &namespace)?;
        delete_all(&store.builds, &namespace)?;
        delete_all(&store.container_builds, &namespace)?;
        delete_all(&store.services, &namespace)?;
        delete_all(&store.jobs, &namespace)?;
        delete_all(&store.node_pools, &namespace)?;
        delete_all(&store.instances, &namespace)?;
        delete_all(&store.secrets, &namespace)?;
        delete_all(&store.templates, &namespace)?;
        delete_all(&store.git_templates, &namespace)?;

        let remaining = store.namespace_object_count(&namespace);
        if remaining > 0 {
            debug!("{} waiting for {} objects to be reclaimed", system.describe(), remaining);
            return Ok(());
        }

        info!("Namespace {} is empty, releasing {}", namespace, system.describe());
        self.ctx.locks.release_system(&system_id);
        remove_finalizer(&store.systems, system, labels::SYSTEM_FINALIZER)
    }
}

fn delete_all<T: Object>(store: &ObjectStore<T>, namespace: &str) -> Result<(), LatticeError> {
    for obj in store.list(Some(namespace), &LabelSelector::everything()) {
        if !obj.meta().is_deleting() {
            delete_if_present(store, &obj)?;
        }
    }
    Ok(())
}

#[async_trait]
impl Reconciler for SystemController {
    fn name(&self) -> &'static str {
        "system"
    }

    fn resync_keys(&self) -> Vec<ObjectKey> {
        self.ctx
            .store
            .systems
            .list(Some(&self.ctx.internal_namespace()), &LabelSelector::everything())
            .iter()
            .map(Object::key)
            .collect()
    }

    async fn reconcile(&self, key: &ObjectKey) -> Result<(), LatticeError> {
        let store = &self.ctx.store;
        let system = match store.systems.try_get(&key.namespace, &key.name) {
            Some(system) => system,
            None => return Ok(()),
        };
        if system.metadata.is_deleting() {
            return self.finalize(system);
        }

        let system = add_finalizer(&store.systems, system, labels::SYSTEM_FINALIZER)?;
        let status = match self.sync(&system) {
            Ok(status) => status,
            Err(e) if e.is_retryable() => return Err(e),
            Err(e) => {
                warn!("{} failed: {}", system.describe(), e);
                SystemStatus {
                    observed_generation: system.metadata.generation,
                    state: SystemState::Failed,
                    message: Some(e.public_message()),
                    ..system.status.clone()
                }
            }
        };

        if status != system.status {
            debug!("{} is {:?}", system.describe(), status.state);
            store.systems.update_status(System { status, ..system })?;
        }
        Ok(())
    }
}
