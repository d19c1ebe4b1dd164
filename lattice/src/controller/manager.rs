//! Controller manager
//!
//! Starts one worker pool per object kind together with the informers that feed its queue, and
//! stops them all when the shutdown signal fires.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::api::labels;
use crate::api::{Build, ContainerBuild, Deploy, Instance, Job, NodePool, Service, System, Teardown};
use crate::controller::build::{container_build_owners, BuildController};
use crate::controller::container_build::ContainerBuildController;
use crate::controller::job::{job_for_run, JobController};
use crate::controller::lifecycle::deploy::deploys_for_build;
use crate::controller::lifecycle::{restore_locks, DeployController, TeardownController};
use crate::controller::node_pool::NodePoolController;
use crate::controller::queue::{self, WorkQueue};
use crate::controller::service::{services_for_node_pool, ServiceController};
use crate::controller::system::SystemController;
use crate::controller::worker::{self, Reconciler};
use crate::controller::{informer, ControllerContext};
use crate::store::{LabelSelector, Object, ObjectKey, ObjectStore, WatchEvent};

type ShutdownSignal = Pin<Box<dyn Future<Output = ()> + Send>>;

struct Spawner<'a> {
    options: &'a worker::Options,
    queue_options: &'a queue::Options,
    shutdown_tx: &'a broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
}

impl Spawner<'_> {
    fn shutdown_signal(&self) -> ShutdownSignal {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        Box::pin(async move {
            let _ = shutdown_rx.recv().await;
        })
    }

    fn queue(&self, name: &str) -> Arc<WorkQueue> {
        WorkQueue::new(name, self.queue_options.clone())
    }

    fn informer<T, M, R>(
        &mut self,
        events: broadcast::Receiver<WatchEvent<T>>,
        queue: &Arc<WorkQueue>,
        map: M,
        reconciler: &Arc<R>,
    ) where
        T: Object,
        M: Fn(&T) -> Vec<ObjectKey> + Send + 'static,
        R: Reconciler,
    {
        let reconciler = reconciler.clone();
        let handle = tokio::spawn(informer::run(
            events,
            queue.clone(),
            map,
            move || reconciler.resync_keys(),
            self.shutdown_signal(),
        ));
        self.handles.push(handle);
    }

    fn controller<R: Reconciler>(&mut self, queue: Arc<WorkQueue>, reconciler: Arc<R>) {
        let options = self.options.clone();
        let shutdown_signal = self.shutdown_signal();
        let handle = tokio::spawn(async move {
            worker::run(&options, queue, reconciler, tokio::time::sleep, shutdown_signal).await;
        });
        self.handles.push(handle);
    }
}

/// Keys of every object of a kind in a namespace
fn keys_in<T: Object>(store: &ObjectStore<T>, namespace: &str) -> Vec<ObjectKey> {
    store
        .list(Some(namespace), &LabelSelector::everything())
        .iter()
        .map(Object::key)
        .collect()
}

/// Run every controller until the shutdown signal fires
pub async fn run(
    options: &worker::Options,
    queue_options: &queue::Options,
    ctx: Arc<ControllerContext>,
    shutdown_signal: impl Future<Output = ()> + Send,
) {
    info!("Controller manager starting...");
    restore_locks(&ctx);

    let (shutdown_tx, _shutdown_rx) = broadcast::channel(1);
    let mut spawner = Spawner {
        options,
        queue_options,
        shutdown_tx: &shutdown_tx,
        handles: Vec::new(),
    };
    let store = ctx.store.clone();

    // 1. Builds follow their container builds
    let build_queue = spawner.queue("build");
    let builds = Arc::new(BuildController::new(ctx.clone()));
    spawner.informer(store.builds.watch(), &build_queue, |b: &Build| vec![b.key()], &builds);
    spawner.informer(
        store.container_builds.watch(),
        &build_queue,
        container_build_owners,
        &builds,
    );
    spawner.controller(build_queue, builds);

    // 2. Container builds
    let cb_queue = spawner.queue("container-build");
    let cbs = Arc::new(ContainerBuildController::new(ctx.clone()));
    spawner.informer(
        store.container_builds.watch(),
        &cb_queue,
        |cb: &ContainerBuild| vec![cb.key()],
        &cbs,
    );
    spawner.controller(cb_queue, cbs);

    // 3. Deploys follow their build and the system
    let deploy_queue = spawner.queue("deploy");
    let deploys = Arc::new(DeployController::new(ctx.clone()));
    spawner.informer(store.deploys.watch(), &deploy_queue, |d: &Deploy| vec![d.key()], &deploys);
    let deploy_ctx = ctx.clone();
    spawner.informer(
        store.builds.watch(),
        &deploy_queue,
        move |b: &Build| deploys_for_build(&deploy_ctx, b),
        &deploys,
    );
    let deploy_ctx = ctx.clone();
    spawner.informer(
        store.systems.watch(),
        &deploy_queue,
        move |s: &System| {
            let namespace = deploy_ctx.system_namespace(&s.metadata.name);
            keys_in(&deploy_ctx.store.deploys, &namespace)
        },
        &deploys,
    );
    spawner.controller(deploy_queue, deploys);

    // 4. Teardowns follow the system
    let teardown_queue = spawner.queue("teardown");
    let teardowns = Arc::new(TeardownController::new(ctx.clone()));
    spawner.informer(
        store.teardowns.watch(),
        &teardown_queue,
        |t: &Teardown| vec![t.key()],
        &teardowns,
    );
    let teardown_ctx = ctx.clone();
    spawner.informer(
        store.systems.watch(),
        &teardown_queue,
        move |s: &System| {
            let namespace = teardown_ctx.system_namespace(&s.metadata.name);
            keys_in(&teardown_ctx.store.teardowns, &namespace)
        },
        &teardowns,
    );
    spawner.controller(teardown_queue, teardowns);

    // 5. Systems roll up everything in their namespace
    let system_queue = spawner.queue("system");
    let systems = Arc::new(SystemController::new(ctx.clone()));
    spawner.informer(store.systems.watch(), &system_queue, |s: &System| vec![s.key()], &systems);
    macro_rules! owned_by_system {
        ($store:ident, $ty:ty) => {{
            let system_ctx = ctx.clone();
            spawner.informer(
                store.$store.watch(),
                &system_queue,
                move |obj: &$ty| system_ctx.system_key(&obj.metadata.namespace).into_iter().collect(),
                &systems,
            );
        }};
    }
    owned_by_system!(services, Service);
    owned_by_system!(jobs, Job);
    owned_by_system!(node_pools, NodePool);
    owned_by_system!(builds, Build);
    owned_by_system!(container_builds, ContainerBuild);
    owned_by_system!(deploys, Deploy);
    owned_by_system!(teardowns, Teardown);
    owned_by_system!(instances, Instance);
    spawner.controller(system_queue, systems);

    // 6. Services follow their instances and node pools
    let service_queue = spawner.queue("service");
    let services = Arc::new(ServiceController::new(ctx.clone()));
    spawner.informer(store.services.watch(), &service_queue, |s: &Service| vec![s.key()], &services);
    spawner.informer(
        store.instances.watch(),
        &service_queue,
        |i: &Instance| {
            i.metadata
                .label(labels::SERVICE_ID)
                .map(|service| ObjectKey::new(&i.metadata.namespace, service))
                .into_iter()
                .collect()
        },
        &services,
    );
    let service_ctx = ctx.clone();
    spawner.informer(
        store.node_pools.watch(),
        &service_queue,
        move |np: &NodePool| services_for_node_pool(&service_ctx, np),
        &services,
    );
    spawner.controller(service_queue, services);

    // 7. Jobs follow their runs; node pools
    let job_queue = spawner.queue("job");
    let jobs = Arc::new(JobController::new(ctx.clone()));
    spawner.informer(store.jobs.watch(), &job_queue, |j: &Job| vec![j.key()], &jobs);
    spawner.informer(
        store.instances.watch(),
        &job_queue,
        |i: &Instance| job_for_run(i).into_iter().collect(),
        &jobs,
    );
    spawner.controller(job_queue, jobs);

    let node_pool_queue = spawner.queue("node-pool");
    let node_pools = Arc::new(NodePoolController::new(ctx.clone()));
    spawner.informer(
        store.node_pools.watch(),
        &node_pool_queue,
        |np: &NodePool| vec![np.key()],
        &node_pools,
    );
    spawner.controller(node_pool_queue, node_pools);

    let handles = std::mem::take(&mut spawner.handles);
    info!("Controller manager started {} tasks", handles.len());

    shutdown_signal.await;
    info!("Controller manager shutting down...");
    drop(spawner);
    drop(shutdown_tx);

    for handle in handles {
        if let Err(e) = handle.await {
            warn!("Controller task exited abnormally: {}", e);
        }
    }
    info!("Controller manager shut down");
}
