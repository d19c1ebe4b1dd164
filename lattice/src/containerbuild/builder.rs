//! Image builder seam and an in-memory implementation

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::api::{ContainerBuildArtifacts, ContainerBuildPhase};
use crate::containerbuild::logs::BuildLogs;
use crate::definition::component::{ContainerBuild, DockerImage};
use crate::errors::LatticeError;

/// Called whenever the builder enters a new phase
pub type PhaseCallback<'a> = &'a (dyn Fn(ContainerBuildPhase) + Send + Sync);

/// Turns a container build definition into a published image
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Build the image for container build `id`, fetching private sources with `ssh_key`.
    ///
    /// Failures are [`LatticeError::ContainerBuildUser`] when caused by the definition or its
    /// source, and [`LatticeError::ContainerBuildInternal`] otherwise.
    async fn build(
        &self,
        id: &str,
        build: &ContainerBuild,
        ssh_key: Option<&SecretString>,
        on_phase: PhaseCallback<'_>,
        logs: &BuildLogs,
    ) -> Result<ContainerBuildArtifacts, LatticeError>;
}

/// Image name a command build is published under
pub fn artifact_image(registry: Option<&str>, repository: &str, id: &str) -> DockerImage {
    DockerImage {
        registry: registry.map(str::to_string),
        repository: repository.to_string(),
        tag: id.to_string(),
    }
}

enum ScriptedFailure {
    User(String),
    Internal(String),
}

/// Builder that walks through the phases without doing any work.
///
/// Failures can be scripted by matching a substring of the build command.
pub struct FakeImageBuilder {
    registry: Option<String>,
    repository: String,
    delay: Duration,
    failures: RwLock<Vec<(String, ScriptedFailure)>>,
    ssh_keys: RwLock<HashMap<String, String>>,
    executions: AtomicUsize,
}

impl Default for FakeImageBuilder {
    fn default() -> Self {
        Self {
            registry: Some("registry.local".to_string()),
            repository: "lattice/builds".to_string(),
            delay: Duration::ZERO,
            failures: RwLock::new(Vec::new()),
            ssh_keys: RwLock::new(HashMap::new()),
            executions: AtomicUsize::new(0),
        }
    }
}

impl FakeImageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long in each phase
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail builds whose command contains `pattern` with a user error
    pub fn fail_command(&self, pattern: &str, message: &str) {
        let mut failures = self.failures.write().unwrap_or_else(|e| e.into_inner());
        failures.push((pattern.to_string(), ScriptedFailure::User(message.to_string())));
    }

    /// Fail builds whose command contains `pattern` with an internal error
    pub fn fail_command_internally(&self, pattern: &str, message: &str) {
        let mut failures = self.failures.write().unwrap_or_else(|e| e.into_inner());
        failures.push((
            pattern.to_string(),
            ScriptedFailure::Internal(message.to_string()),
        ));
    }

    /// Refuse to fetch sources from `url` without `key`
    pub fn require_ssh_key(&self, url: &str, key: &str) {
        let mut ssh_keys = self.ssh_keys.write().unwrap_or_else(|e| e.into_inner());
        ssh_keys.insert(url.to_string(), key.to_string());
    }

    /// Number of builds started
    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    fn scripted_failure(&self, command: &str) -> Option<LatticeError> {
        let failures = self.failures.read().unwrap_or_else(|e| e.into_inner());
        failures
            .iter()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, failure)| match failure {
                ScriptedFailure::User(msg) => LatticeError::ContainerBuildUser(msg.clone()),
                ScriptedFailure::Internal(msg) => LatticeError::ContainerBuildInternal(msg.clone()),
            })
    }

    fn check_access(&self, url: &str, ssh_key: Option<&SecretString>) -> Result<(), LatticeError> {
        let ssh_keys = self.ssh_keys.read().unwrap_or_else(|e| e.into_inner());
        match ssh_keys.get(url) {
            Some(expected) if ssh_key.map(|k| k.expose_secret()) != Some(expected.as_str()) => Err(
                LatticeError::ContainerBuildUser(format!("git clone {}: Permission denied (publickey)", url)),
            ),
            _ => Ok(()),
        }
    }

    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[async_trait]
impl ImageBuilder for FakeImageBuilder {
    async fn build(
        &self,
        id: &str,
        build: &ContainerBuild,
        ssh_key: Option<&SecretString>,
        on_phase: PhaseCallback<'_>,
        logs: &BuildLogs,
    ) -> Result<ContainerBuildArtifacts, LatticeError> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        let image = artifact_image(self.registry.as_deref(), &self.repository, id);

        match build {
            ContainerBuild::CommandBuild(command_build) => {
                on_phase(ContainerBuildPhase::PullingGitRepository);
                self.pause().await;
                if let Some(source) = &command_build.source {
                    if let Err(err) = self.check_access(&source.url, ssh_key) {
                        logs.append(id, &err.to_string());
                        return Err(err);
                    }
                }

                on_phase(ContainerBuildPhase::BuildingDockerImage);
                let command = command_build.command.join(" ");
                logs.append(id, &format!("RUN {}", command));
                self.pause().await;
                if let Some(err) = self.scripted_failure(&command) {
                    logs.append(id, &err.to_string());
                    return Err(err);
                }

                on_phase(ContainerBuildPhase::PushingDockerImage);
                self.pause().await;
            }
            ContainerBuild::DockerImage(upstream) => {
                on_phase(ContainerBuildPhase::PullingDockerImage);
                logs.append(id, &format!("pull {}", upstream.fqn()));
                self.pause().await;

                on_phase(ContainerBuildPhase::PushingDockerImage);
                self.pause().await;
            }
        }
        Ok(ContainerBuildArtifacts {
            docker_image_fqn: image.fqn(),
        })
    }
}
