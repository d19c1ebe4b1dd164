//! Shared harness: an in-memory daemon with fake git and image builders

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use lattice::app::options::AppOptions;
use lattice::app::state::{AppState, Dependencies};
use lattice::containerbuild::FakeImageBuilder;
use lattice::controller::{manager, worker};
use lattice::git::StaticGitResolver;
use lattice::runtime::NoopRuntime;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub const ROOT: &str = "https://example.com/petflix.git";
pub const API: &str = "https://example.com/api.git";

pub const SERVICE: &str = r#"
type: v1/service
container:
  build:
    command_build:
      base_docker_image:
        repository: library/node
        tag: "10"
      command: ["npm", "install"]
"#;

pub const JOB: &str = r#"
type: v1/job
container:
  build:
    command_build:
      base_docker_image:
        repository: library/node
        tag: "10"
      command: ["npm", "install"]
  exec: ["./migrate.sh"]
"#;

/// Job running `exec` to completion
pub fn job_with_exec(exec: &str) -> String {
    format!(
        "type: v1/job\ncontainer:\n  build:\n    command_build:\n      base_docker_image:\n        repository: library/node\n        tag: \"10\"\n      command: [\"npm\", \"install\"]\n  exec: [\"{}\"]\n",
        exec
    )
}

/// Service whose build command contains `marker`
pub fn service_with_command(marker: &str) -> String {
    format!(
        "type: v1/service\ncontainer:\n  build:\n    command_build:\n      base_docker_image:\n        repository: library/node\n        tag: \"10\"\n      command: [\"{}\"]\n",
        marker
    )
}

/// System whose components are all defined inline
pub fn system_of(components: &[(&str, &str)]) -> String {
    let mut yaml = String::from("type: v1/system\ncomponents:\n");
    for (name, body) in components {
        yaml.push_str(&format!("  {}:\n", name));
        for line in body.trim().lines() {
            yaml.push_str(&format!("    {}\n", line));
        }
    }
    yaml
}

pub struct Harness {
    pub state: Arc<AppState>,
    pub git: Arc<StaticGitResolver>,
    pub builder: Arc<FakeImageBuilder>,
    pub runtime: Arc<NoopRuntime>,
    options: AppOptions,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Harness {
    pub fn start() -> Self {
        Self::start_with(FakeImageBuilder::new())
    }

    pub fn start_with(builder: FakeImageBuilder) -> Self {
        let mut h = Self::idle_with(builder);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let ctx = h.state.controller_ctx.clone();
        let controllers = h.options.controllers.clone();
        h.handle = Some(tokio::spawn(async move {
            manager::run(&controllers.worker, &controllers.queue, ctx, async move {
                let _ = shutdown_rx.await;
            })
            .await;
        }));
        h.shutdown_tx = Some(shutdown_tx);
        h
    }

    /// Daemon state with no controllers running
    pub fn idle() -> Self {
        Self::idle_with(FakeImageBuilder::new())
    }

    fn idle_with(builder: FakeImageBuilder) -> Self {
        let git = Arc::new(StaticGitResolver::new());
        let builder = Arc::new(builder);
        let runtime = Arc::new(NoopRuntime::new());

        let mut options = AppOptions::default();
        options.enable_server = false;
        options.controllers.worker = worker::Options {
            workers: 4,
            resync_interval: Duration::from_millis(100),
        };

        let state = Arc::new(AppState::new(
            &options,
            Dependencies {
                git: git.clone(),
                builder: builder.clone(),
                runtime: runtime.clone(),
            },
        ));

        Self {
            state,
            git,
            builder,
            runtime,
            options,
            shutdown_tx: None,
            handle: None,
        }
    }

    /// Create a system and wait for the controllers to pick it up
    pub async fn create_system(&self, id: &str) {
        self.state.backend.create_system(id, ROOT).unwrap();
        let backend = self.state.backend.clone();
        let id = id.to_string();
        eventually("system to leave pending", || {
            let backend = backend.clone();
            let id = id.clone();
            async move {
                let system = backend.get_system(&id).ok()?;
                (system.status.observed_generation > 0).then_some(())
            }
        })
        .await;
    }

    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }
    }
}

/// Poll `check` until it yields a value, panicking after ten seconds
pub async fn eventually<T, F, Fut>(what: &str, mut check: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(value) = check().await {
            return value;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
