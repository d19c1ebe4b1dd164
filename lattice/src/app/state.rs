//! Application state management

use std::sync::Arc;

use secrecy::SecretString;
use tracing::info;

use crate::app::options::AppOptions;
use crate::backend::Backend;
use crate::containerbuild::{
    BuildLogs, ContainerBuildExecutor, DockerCliBuilder, DockerCliOptions, ImageBuilder,
    RegistryLogin,
};
use crate::controller::lifecycle::LifecycleLocks;
use crate::controller::ControllerContext;
use crate::git::{CliGitResolver, GitResolver};
use crate::resolver::{ComponentResolver, ObjectSecretStore, ObjectTemplateStore};
use crate::runtime::{InstanceRuntime, NoopRuntime};
use crate::store::Store;

pub const ENV_REGISTRY_USERNAME: &str = "LATTICE_REGISTRY_USERNAME";
pub const ENV_REGISTRY_PASSWORD: &str = "LATTICE_REGISTRY_PASSWORD";

/// The outside world the daemon talks to
pub struct Dependencies {
    pub git: Arc<dyn GitResolver>,
    pub builder: Arc<dyn ImageBuilder>,
    pub runtime: Arc<dyn InstanceRuntime>,
}

impl Dependencies {
    /// `git` and `docker` command lines; registry credentials come from the environment
    pub fn from_options(options: &AppOptions) -> Self {
        let work_dir = options.work_dir();
        let login = match (
            std::env::var(ENV_REGISTRY_USERNAME),
            std::env::var(ENV_REGISTRY_PASSWORD),
        ) {
            (Ok(username), Ok(password)) => Some(RegistryLogin {
                username,
                password: SecretString::from(password),
            }),
            _ => None,
        };

        let builder = DockerCliBuilder::new(DockerCliOptions {
            registry: options.executor.registry.clone(),
            repository: options.executor.repository_prefix.clone(),
            push: options.executor.push,
            work_dir: work_dir.join("container-builds"),
            login,
        });

        Self {
            git: Arc::new(CliGitResolver::new(work_dir.join("git"))),
            builder: Arc::new(builder),
            runtime: Arc::new(NoopRuntime::new()),
        }
    }
}

/// Main application state
pub struct AppState {
    pub store: Arc<Store>,

    pub secrets: Arc<ObjectSecretStore>,

    /// Shared by the controllers
    pub controller_ctx: Arc<ControllerContext>,

    /// Operations behind the HTTP API
    pub backend: Arc<Backend>,
}

impl AppState {
    /// Initialize application state
    pub fn new(options: &AppOptions, deps: Dependencies) -> Self {
        info!("Initializing application state...");
        let prefix = options.namespace_prefix.clone();

        // 1. Object store and the stores layered on it
        let store = Store::new();
        let secrets = Arc::new(ObjectSecretStore::new(store.clone(), prefix.clone()));
        let templates = Arc::new(ObjectTemplateStore::new(store.clone(), prefix.clone()));

        // 2. Resolver and container build executor
        let resolver = Arc::new(ComponentResolver::new(
            deps.git,
            templates,
            secrets.clone(),
            options.resolver.clone(),
        ));
        let logs = Arc::new(BuildLogs::default());
        let executor = ContainerBuildExecutor::new(
            store.clone(),
            deps.builder,
            secrets.clone(),
            prefix.clone(),
            logs.clone(),
            options.executor.executor.clone(),
        );

        // 3. Controllers and API
        let controller_ctx = Arc::new(ControllerContext {
            store: store.clone(),
            resolver,
            executor,
            runtime: deps.runtime.clone(),
            locks: Arc::new(LifecycleLocks::new()),
            namespace_prefix: prefix.clone(),
        });
        let backend = Arc::new(Backend::new(
            store.clone(),
            secrets.clone(),
            logs,
            deps.runtime,
            prefix,
        ));

        Self {
            store,
            secrets,
            controller_ctx,
            backend,
        }
    }
}
