//! Application configuration options

use std::path::PathBuf;
use std::time::Duration;

use crate::containerbuild::executor;
use crate::controller::{queue, worker};
use crate::resolver::ResolverOptions;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage layout paths
    pub layout: StorageLayout,

    /// Git checkouts and build contexts; the layout's work dir when unset
    pub work_dir: Option<PathBuf>,

    /// Enable the HTTP API
    pub enable_server: bool,

    /// Server configuration
    pub server: ServerOptions,

    pub controllers: ControllerOptions,

    pub executor: ExecutorOptions,

    pub resolver: ResolverOptions,

    /// Prefix of every namespace the daemon creates
    pub namespace_prefix: String,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            layout: StorageLayout::default(),
            work_dir: None,
            enable_server: true,
            server: ServerOptions::default(),
            controllers: ControllerOptions::default(),
            executor: ExecutorOptions::default(),
            resolver: ResolverOptions::default(),
            namespace_prefix: "lattice".to_string(),
        }
    }
}

impl AppOptions {
    /// Project the settings file onto the runtime options
    pub fn from_settings(settings: &Settings, layout: StorageLayout) -> Self {
        let builds = &settings.container_builds;
        Self {
            layout,
            work_dir: settings.work_dir.clone(),
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            controllers: ControllerOptions {
                worker: worker::Options {
                    workers: settings.controllers.workers,
                    resync_interval: Duration::from_secs(settings.controllers.resync_interval_secs),
                },
                queue: queue::Options::default(),
            },
            executor: ExecutorOptions {
                executor: executor::Options {
                    concurrency: builds.concurrency,
                    timeout: Duration::from_secs(builds.timeout_secs),
                },
                registry: builds.registry.clone(),
                repository_prefix: builds.repository_prefix.clone(),
                push: builds.push,
            },
            resolver: ResolverOptions {
                max_depth_guard: settings.resolver.max_depth_guard,
            },
            namespace_prefix: settings.namespace_prefix.clone(),
            ..Default::default()
        }
    }

    pub fn work_dir(&self) -> PathBuf {
        self.work_dir
            .clone()
            .unwrap_or_else(|| self.layout.work_dir().path().to_path_buf())
    }
}

/// Lifecycle options for the daemon
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// HTTP API options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ControllerOptions {
    pub worker: worker::Options,
    pub queue: queue::Options,
}

#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    pub executor: executor::Options,

    /// Registry command build images are pushed to
    pub registry: Option<String>,

    pub repository_prefix: String,

    pub push: bool,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            executor: executor::Options::default(),
            registry: None,
            repository_prefix: "lattice".to_string(),
            push: true,
        }
    }
}
