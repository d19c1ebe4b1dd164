//! Job controller
//!
//! Each generation of a job gets exactly one run, an Instance labelled with the job's id that
//! the runtime executes to completion. Runs of older generations are stopped and removed.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::api::labels;
use crate::api::{Instance, InstanceSpec, InstanceState, Job, JobState, JobStatus, NodePoolState};
use crate::controller::service::{instance_containers, workload_generation_hash};
use crate::controller::worker::Reconciler;
use crate::controller::{add_finalizer, delete_if_present, remove_finalizer, ControllerContext};
use crate::errors::LatticeError;
use crate::store::{LabelSelector, Object, ObjectKey, ObjectMeta};
use crate::utils::generate_uuid;

pub struct JobController {
    ctx: Arc<ControllerContext>,
}

impl JobController {
    pub fn new(ctx: Arc<ControllerContext>) -> Self {
        Self { ctx }
    }

    fn runs(&self, job: &Job) -> Vec<Instance> {
        self.ctx.store.instances.list(
            Some(&job.metadata.namespace),
            &LabelSelector::everything().eq(labels::JOB_ID, &job.metadata.name),
        )
    }

    /// Name of the shared node pool the job runs on, `Ok(None)` while it is not stable
    fn node_pool(&self, job: &Job) -> Result<Option<Option<String>>, LatticeError> {
        let shared = match &job.spec.definition.node_pool {
            Some(shared) => shared,
            None => return Ok(Some(None)),
        };
        let selector =
            LabelSelector::everything().eq(labels::NODE_POOL_SYSTEM_SHARED_PATH, shared.to_domain());
        let mut pools: Vec<_> = self
            .ctx
            .store
            .node_pools
            .list(Some(&job.metadata.namespace), &selector)
            .into_iter()
            .filter(|np| !np.metadata.is_deleting())
            .collect();
        if pools.len() > 1 {
            return Err(LatticeError::InvariantViolation(format!(
                "found {} matches for the shared node pool {}",
                pools.len(),
                shared
            )));
        }
        Ok(match pools.pop() {
            Some(pool) if pool.status.state == NodePoolState::Stable => Some(Some(pool.metadata.name)),
            _ => None,
        })
    }

    fn new_run(&self, job: &Job, generation: &str, node_pool: Option<String>) -> Instance {
        let mut run_labels = BTreeMap::new();
        run_labels.insert(labels::JOB_ID.to_string(), job.metadata.name.clone());
        run_labels.insert(labels::JOB_PATH.to_string(), job.spec.path.to_domain());
        run_labels.insert(labels::INSTANCE_GENERATION.to_string(), generation.to_string());

        Instance {
            metadata: ObjectMeta::new(job.metadata.namespace.clone(), generate_uuid())
                .with_labels(run_labels)
                .with_owner(job.owner_reference()),
            spec: InstanceSpec {
                workload: job.metadata.name.clone(),
                run_to_completion: true,
                generation: generation.to_string(),
                node_pool,
                containers: instance_containers(&job.spec.definition, &job.spec.artifacts),
            },
            status: Default::default(),
        }
    }

    /// Start a pending run, or pick up the outcome of a started one
    async fn advance(&self, run: Instance) -> Result<Instance, LatticeError> {
        let runtime = &self.ctx.runtime;
        let mut status = run.status.clone();

        if run.status.state == InstanceState::Pending {
            if let Err(e) = runtime.start(&run).await {
                if e.is_retryable() {
                    return Err(e);
                }
                warn!("Failed to start job run {}: {}", run.metadata.name, e);
                status.state = InstanceState::Failed;
                status.message = Some(e.public_message());
                return self.ctx.store.instances.update_status(Instance { status, ..run });
            }
            status.state = InstanceState::Running;
        }

        if status.state == InstanceState::Running {
            match runtime.state(&run).await? {
                InstanceState::Succeeded => status.state = InstanceState::Succeeded,
                InstanceState::Failed => {
                    status.state = InstanceState::Failed;
                    status.message = Some("exited with a non-zero status".to_string());
                }
                _ => {}
            }
        }

        if status == run.status {
            return Ok(run);
        }
        debug!("Job run {} is {:?}", run.metadata.name, status.state);
        self.ctx.store.instances.update_status(Instance { status, ..run })
    }

    async fn remove(&self, run: &Instance) -> Result<(), LatticeError> {
        self.ctx.runtime.stop(run).await?;
        delete_if_present(&self.ctx.store.instances, run)
    }

    async fn sync(&self, job: &Job) -> Result<JobStatus, LatticeError> {
        let mut status = JobStatus {
            observed_generation: job.metadata.generation,
            ..job.status.clone()
        };

        let node_pool = match self.node_pool(job)? {
            Some(node_pool) => node_pool,
            None => {
                status.state = JobState::Pending;
                status.message = Some("node pool is pending".to_string());
                return Ok(status);
            }
        };

        let generation =
            workload_generation_hash(&job.spec.definition, &job.spec.artifacts, 1)?;
        let (mut current, stale): (Vec<Instance>, Vec<Instance>) = self
            .runs(job)
            .into_iter()
            .partition(|r| r.metadata.label(labels::INSTANCE_GENERATION) == Some(generation.as_str()));

        for run in &stale {
            info!("Removing stale run {} of {}", run.metadata.name, job.describe());
            self.remove(run).await?;
        }
        while current.len() > 1 {
            if let Some(extra) = current.pop() {
                self.remove(&extra).await?;
            }
        }

        let run = match current.pop() {
            Some(run) => run,
            None => {
                let created = self
                    .ctx
                    .store
                    .instances
                    .create(self.new_run(job, &generation, node_pool))?;
                info!("Created run {} of {}", created.metadata.name, job.describe());
                created
            }
        };
        let run = self.advance(run).await?;

        status.run = Some(run.metadata.name.clone());
        match run.status.state {
            InstanceState::Pending | InstanceState::Running => {
                status.state = JobState::Running;
                status.message = None;
            }
            InstanceState::Succeeded => {
                status.state = JobState::Succeeded;
                status.message = None;
            }
            InstanceState::Failed => {
                status.state = JobState::Failed;
                status.message = Some(format!(
                    "run {} failed: {}",
                    run.metadata.name,
                    run.status.message.clone().unwrap_or_default()
                ));
            }
        }
        Ok(status)
    }

    async fn finalize(&self, job: Job) -> Result<(), LatticeError> {
        let store = &self.ctx.store;
        let job = if job.status.state != JobState::Deleting {
            store
                .jobs
                .mutate_status(&job.metadata.namespace, &job.metadata.name, |status| {
                    status.state = JobState::Deleting;
                    status.message = None;
                })?
        } else {
            job
        };

        for run in self.runs(&job) {
            self.remove(&run).await?;
        }

        info!("Released {}", job.describe());
        remove_finalizer(&store.jobs, job, labels::JOB_FINALIZER)
    }
}

/// Job owning a run, if the instance is one
pub fn job_for_run(run: &Instance) -> Option<ObjectKey> {
    run.metadata
        .label(labels::JOB_ID)
        .map(|job| ObjectKey::new(&run.metadata.namespace, job))
}

#[async_trait]
impl Reconciler for JobController {
    fn name(&self) -> &'static str {
        "job"
    }

    fn resync_keys(&self) -> Vec<ObjectKey> {
        self.ctx
            .store
            .jobs
            .list(None, &LabelSelector::everything())
            .iter()
            .map(Object::key)
            .collect()
    }

    async fn reconcile(&self, key: &ObjectKey) -> Result<(), LatticeError> {
        let store = &self.ctx.store;
        let job = match store.jobs.try_get(&key.namespace, &key.name) {
            Some(job) => job,
            None => return Ok(()),
        };
        if job.metadata.is_deleting() {
            return self.finalize(job).await;
        }

        let job = add_finalizer(&store.jobs, job, labels::JOB_FINALIZER)?;
        let status = match self.sync(&job).await {
            Ok(status) => status,
            Err(e) if e.is_retryable() => return Err(e),
            Err(e) => {
                warn!("{} failed: {}", job.describe(), e);
                JobStatus {
                    observed_generation: job.metadata.generation,
                    state: JobState::Failed,
                    message: Some(e.public_message()),
                    ..job.status.clone()
                }
            }
        };

        if status != job.status {
            debug!("{} is {:?}", job.describe(), status.state);
            store.jobs.update_status(Job { status, ..job })?;
        }
        Ok(())
    }
}
