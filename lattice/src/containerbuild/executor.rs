//! Runs container builds in the background and publishes their status

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use secrecy::SecretString;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::api::{
    system_id_from_namespace, ContainerBuild, ContainerBuildArtifacts, ContainerBuildFailureInfo,
    ContainerBuildPhase, ContainerBuildState,
};
use crate::containerbuild::builder::ImageBuilder;
use crate::containerbuild::logs::BuildLogs;
use crate::errors::LatticeError;
use crate::resolver::SecretStore;
use crate::store::{Object, Store};

/// Container build executor options
#[derive(Debug, Clone)]
pub struct Options {
    /// Builds running at the same time
    pub concurrency: usize,

    /// Wall-clock limit per build
    pub timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            concurrency: 4,
            timeout: Duration::from_secs(3600),
        }
    }
}

pub struct ContainerBuildExecutor {
    store: Arc<Store>,
    builder: Arc<dyn ImageBuilder>,
    secrets: Arc<dyn SecretStore>,
    namespace_prefix: String,
    logs: Arc<BuildLogs>,
    permits: Arc<Semaphore>,
    options: Options,
}

impl ContainerBuildExecutor {
    pub fn new(
        store: Arc<Store>,
        builder: Arc<dyn ImageBuilder>,
        secrets: Arc<dyn SecretStore>,
        namespace_prefix: impl Into<String>,
        logs: Arc<BuildLogs>,
        options: Options,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            builder,
            secrets,
            namespace_prefix: namespace_prefix.into(),
            logs,
            permits: Arc::new(Semaphore::new(options.concurrency.max(1))),
            options,
        })
    }

    pub fn logs(&self) -> &Arc<BuildLogs> {
        &self.logs
    }

    /// Queue a pending container build and run it in the background.
    ///
    /// The build is moved to `queued` with the caller's resource version, so a container build is
    /// only ever picked up once.
    pub fn submit(self: &Arc<Self>, build: &ContainerBuild) -> Result<(), LatticeError> {
        if build.status.state != ContainerBuildState::Pending {
            return Ok(());
        }

        let mut queued = build.clone();
        queued.status.state = ContainerBuildState::Queued;
        let queued = self.store.container_builds.update_status(queued)?;
        info!("Queued {}", queued.describe());

        let executor = self.clone();
        tokio::spawn(async move {
            executor.execute(queued).await;
        });
        Ok(())
    }

    /// SSH key for the build's source, read from the secrets of the system owning the build
    fn ssh_key(&self, build: &ContainerBuild) -> Result<Option<SecretString>, LatticeError> {
        let secret = match &build.spec.ssh_key_secret {
            Some(secret) => secret,
            None => return Ok(None),
        };
        let system_id = system_id_from_namespace(&self.namespace_prefix, &build.metadata.namespace)
            .ok_or_else(|| {
                LatticeError::ContainerBuildInternal(format!(
                    "{} is not in a system namespace",
                    build.describe()
                ))
            })?;
        match self.secrets.get(system_id, secret) {
            Ok(Some(key)) => Ok(Some(key)),
            Ok(None) => Err(LatticeError::ContainerBuildUser(format!(
                "ssh key secret {} does not exist",
                secret
            ))),
            Err(e) => Err(LatticeError::ContainerBuildInternal(e.to_string())),
        }
    }

    async fn execute(&self, build: ContainerBuild) {
        let namespace = build.metadata.namespace.clone();
        let name = build.metadata.name.clone();
        let builds = &self.store.container_builds;

        let _permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                warn!("Executor closed before {} could run", build.describe());
                return;
            }
        };

        // 1. Running
        if let Err(e) = builds.mutate_status(&namespace, &name, |status| {
            status.state = ContainerBuildState::Running;
            status.start_timestamp = Some(Utc::now());
        }) {
            warn!("Unable to start {}: {}", build.describe(), e);
            return;
        }
        self.logs.append(&name, &format!("==> building {}", build.describe()));

        // 2. Build, publishing phase transitions as they happen
        let on_phase = |phase: ContainerBuildPhase| {
            debug!("Container build {} entered phase {:?}", name, phase);
            if let Err(e) = builds.mutate_status(&namespace, &name, |status| {
                status.last_observed_phase = Some(phase);
            }) {
                warn!("Failed to record phase {:?} of container build {}: {}", phase, name, e);
            }
        };
        let result = match self.ssh_key(&build) {
            Ok(ssh_key) => {
                tokio::time::timeout(
                    self.options.timeout,
                    self.builder.build(
                        &name,
                        &build.spec.build,
                        ssh_key.as_ref(),
                        &on_phase,
                        &self.logs,
                    ),
                )
                .await
            }
            Err(e) => Ok(Err(e)),
        };

        let outcome: Result<ContainerBuildArtifacts, ContainerBuildFailureInfo> = match result {
            Ok(Ok(artifacts)) => Ok(artifacts),
            Ok(Err(e)) => Err(failure_info(e)),
            Err(_) => Err(ContainerBuildFailureInfo {
                message: format!("timed out after {}", format_duration(self.options.timeout)),
                internal: false,
                timed_out: true,
            }),
        };

        // 3. Terminal state
        match &outcome {
            Ok(artifacts) => info!(
                "Container build {}/{} succeeded: {}",
                namespace, name, artifacts.docker_image_fqn
            ),
            Err(failure) => {
                self.logs.append(&name, &failure.message);
                error!(
                    "Container build {}/{} failed (internal: {}): {}",
                    namespace, name, failure.internal, failure.message
                );
            }
        }
        if let Err(e) = builds.mutate_status(&namespace, &name, |status| {
            match &outcome {
                Ok(artifacts) => {
                    status.state = ContainerBuildState::Succeeded;
                    status.artifacts = Some(artifacts.clone());
                }
                Err(failure) => {
                    status.state = ContainerBuildState::Failed;
                    status.failure_info = Some(failure.clone());
                }
            }
            status.completion_timestamp = Some(Utc::now());
        }) {
            warn!("Unable to record result of container build {}/{}: {}", namespace, name, e);
        }
    }
}

fn failure_info(err: LatticeError) -> ContainerBuildFailureInfo {
    match err {
        LatticeError::ContainerBuildUser(message) => ContainerBuildFailureInfo {
            message,
            internal: false,
            timed_out: false,
        },
        LatticeError::ContainerBuildInternal(message) => ContainerBuildFailureInfo {
            message,
            internal: true,
            timed_out: false,
        },
        other => ContainerBuildFailureInfo {
            message: other.to_string(),
            internal: true,
            timed_out: false,
        },
    }
}

/// Whole seconds when the duration has no fractional part, milliseconds otherwise
fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis % 1000 == 0 {
        format!("{}s", millis / 1000)
    } else {
        format!("{}ms", millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ContainerBuildSpec;
    use crate::containerbuild::builder::FakeImageBuilder;
    use crate::definition::component::{self, CommandBuild, DockerImage, GitCommit};
    use crate::definition::tree::PathSubcomponent;
    use crate::resolver::ObjectSecretStore;
    use crate::store::{ObjectMeta, WatchEvent};
    use std::collections::BTreeMap;

    fn command_build(command: &str) -> ContainerBuild {
        ContainerBuild {
            metadata: ObjectMeta::new("ns", "cb1"),
            spec: ContainerBuildSpec {
                ssh_key_secret: None,
                build: component::ContainerBuild::CommandBuild(CommandBuild {
                    source: Some(GitCommit {
                        url: "https://example.com/s.git".to_string(),
                        commit: "abc".to_string(),
                    }),
                    base_docker_image: DockerImage {
                        registry: None,
                        repository: "library/node".to_string(),
                        tag: "10".to_string(),
                    },
                    command: command.split(' ').map(str::to_string).collect(),
                    env: BTreeMap::new(),
                }),
            },
            status: Default::default(),
        }
    }

    fn new_executor(
        store: Arc<Store>,
        builder: Arc<FakeImageBuilder>,
        logs: Arc<BuildLogs>,
        options: Options,
    ) -> Arc<ContainerBuildExecutor> {
        let secrets = Arc::new(ObjectSecretStore::new(store.clone(), "lattice"));
        ContainerBuildExecutor::new(store, builder, secrets, "lattice", logs, options)
    }

    async fn wait_terminal(store: &Store, namespace: &str) -> ContainerBuild {
        for _ in 0..200 {
            let cb = store.container_builds.get(namespace, "cb1").unwrap();
            if matches!(
                cb.status.state,
                ContainerBuildState::Succeeded | ContainerBuildState::Failed
            ) {
                return cb;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("container build did not finish");
    }

    #[tokio::test]
    async fn test_successful_build_reports_phases() {
        let store = Store::new();
        let builder = Arc::new(FakeImageBuilder::new());
        let executor = new_executor(
            store.clone(),
            builder.clone(),
            Arc::new(BuildLogs::default()),
            Options::default(),
        );
        let mut events = store.container_builds.watch();

        let cb = store.container_builds.create(command_build("npm install")).unwrap();
        executor.submit(&cb).unwrap();
        let cb = wait_terminal(&store, "ns").await;

        assert_eq!(cb.status.state, ContainerBuildState::Succeeded);
        assert_eq!(
            cb.status.artifacts.unwrap().docker_image_fqn,
            "registry.local/lattice/builds:cb1"
        );
        assert!(cb.status.start_timestamp.is_some());
        assert!(cb.status.completion_timestamp.is_some());

        let mut phases = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let WatchEvent::Modified(obj) = event {
                if let Some(phase) = obj.status.last_observed_phase {
                    if phases.last() != Some(&phase) {
                        phases.push(phase);
                    }
                }
            }
        }
        assert_eq!(
            phases,
            vec![
                ContainerBuildPhase::PullingGitRepository,
                ContainerBuildPhase::BuildingDockerImage,
                ContainerBuildPhase::PushingDockerImage,
            ]
        );
        assert_eq!(builder.executions(), 1);
    }

    #[tokio::test]
    async fn test_user_failure_is_reported_verbatim() {
        let store = Store::new();
        let builder = Arc::new(FakeImageBuilder::new());
        builder.fail_command("exit 1", "command exited with status 1: boom");
        let logs = Arc::new(BuildLogs::default());
        let executor =
            new_executor(store.clone(), builder, logs.clone(), Options::default());

        let cb = store.container_builds.create(command_build("sh -c exit 1")).unwrap();
        executor.submit(&cb).unwrap();
        let cb = wait_terminal(&store, "ns").await;

        assert_eq!(cb.status.state, ContainerBuildState::Failed);
        let failure = cb.status.failure_info.unwrap();
        assert!(!failure.internal);
        assert_eq!(failure.message, "command exited with status 1: boom");
        assert!(logs.get("cb1").unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_timeout() {
        let store = Store::new();
        let builder = Arc::new(FakeImageBuilder::new().with_delay(Duration::from_secs(5)));
        let executor = new_executor(
            store.clone(),
            builder,
            Arc::new(BuildLogs::default()),
            Options {
                concurrency: 1,
                timeout: Duration::from_millis(50),
            },
        );

        let cb = store.container_builds.create(command_build("npm install")).unwrap();
        executor.submit(&cb).unwrap();
        let cb = wait_terminal(&store, "ns").await;

        let failure = cb.status.failure_info.unwrap();
        assert_eq!(failure.message, "timed out after 50ms");
        assert!(failure.timed_out);
        assert!(!failure.internal);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(3600)), "3600s");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1500ms");
        assert_eq!(format_duration(Duration::from_millis(50)), "50ms");
    }

    #[tokio::test]
    async fn test_private_source_uses_system_ssh_key() {
        let store = Store::new();
        let builder = Arc::new(FakeImageBuilder::new());
        builder.require_ssh_key("https://example.com/s.git", "deploy-key-contents");
        let executor = new_executor(
            store.clone(),
            builder.clone(),
            Arc::new(BuildLogs::default()),
            Options::default(),
        );
        let key = PathSubcomponent::parse("/:deploy-key").unwrap();
        let namespace = "lattice-system-petflix";

        // 1. Missing secret
        let mut cb = command_build("npm install");
        cb.metadata = ObjectMeta::new(namespace, "cb1");
        cb.spec.ssh_key_secret = Some(key.clone());
        let created = store.container_builds.create(cb.clone()).unwrap();
        executor.submit(&created).unwrap();
        let failed = wait_terminal(&store, namespace).await;
        let failure = failed.status.failure_info.unwrap();
        assert!(!failure.internal);
        assert_eq!(failure.message, "ssh key secret /:deploy-key does not exist");
        store.container_builds.delete(namespace, "cb1").unwrap();

        // 2. With the secret the source can be fetched
        ObjectSecretStore::new(store.clone(), "lattice")
            .set("petflix", &key, "deploy-key-contents".to_string())
            .unwrap();
        let created = store.container_builds.create(cb).unwrap();
        executor.submit(&created).unwrap();
        let done = wait_terminal(&store, namespace).await;
        assert_eq!(done.status.state, ContainerBuildState::Succeeded);
    }

    #[tokio::test]
    async fn test_only_pending_builds_are_submitted() {
        let store = Store::new();
        let builder = Arc::new(FakeImageBuilder::new());
        let executor = new_executor(
            store.clone(),
            builder.clone(),
            Arc::new(BuildLogs::default()),
            Options::default(),
        );

        let cb = store.container_builds.create(command_build("npm install")).unwrap();
        executor.submit(&cb).unwrap();
        // a stale copy loses the race
        assert!(matches!(executor.submit(&cb), Err(LatticeError::Conflict(_))));
        wait_terminal(&store, "ns").await;

        let done = store.container_builds.get("ns", "cb1").unwrap();
        executor.submit(&done).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(builder.executions(), 1);
    }
}
