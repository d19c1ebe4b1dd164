//! Image builder that shells out to `git` and `docker`

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::api::{ContainerBuildArtifacts, ContainerBuildPhase};
use crate::containerbuild::builder::{artifact_image, ImageBuilder, PhaseCallback};
use crate::containerbuild::logs::BuildLogs;
use crate::definition::component::{CommandBuild, ContainerBuild, DockerImage};
use crate::errors::LatticeError;
use crate::filesys::ScratchDir;

/// Name of the key file inside its scratch directory
const KEY_FILE: &str = "id";

/// Registry credentials used for `docker login`
pub struct RegistryLogin {
    pub username: String,
    pub password: SecretString,
}

pub struct DockerCliOptions {
    /// Registry command build images are pushed to
    pub registry: Option<String>,

    /// Repository command build images are pushed to, tagged by container build id
    pub repository: String,

    pub push: bool,

    /// Scratch space for source checkouts
    pub work_dir: PathBuf,

    pub login: Option<RegistryLogin>,
}

pub struct DockerCliBuilder {
    options: DockerCliOptions,
}

impl DockerCliBuilder {
    pub fn new(options: DockerCliOptions) -> Self {
        Self { options }
    }

    async fn command_build(
        &self,
        id: &str,
        build: &CommandBuild,
        ssh_key: Option<&SecretString>,
        on_phase: PhaseCallback<'_>,
        logs: &BuildLogs,
    ) -> Result<ContainerBuildArtifacts, LatticeError> {
        let source = build.source.as_ref().ok_or_else(|| {
            LatticeError::ContainerBuildInternal("command build has no source".to_string())
        })?;
        let fqn = artifact_image(self.options.registry.as_deref(), &self.options.repository, id).fqn();

        // removed on drop, including when the build times out
        let checkout = ScratchDir::create(&self.options.work_dir, "container-build")
            .await
            .map_err(internal)?;

        // 1. Source
        on_phase(ContainerBuildPhase::PullingGitRepository);
        let key_dir = match ssh_key {
            Some(key) => Some(self.write_key(key).await?),
            None => None,
        };
        let target = checkout.path().to_string_lossy().to_string();
        let mut clone = Command::new("git");
        clone
            .args(["clone", source.url.as_str(), target.as_str()])
            .env("GIT_TERMINAL_PROMPT", "0");
        if let Some(key_dir) = &key_dir {
            clone.env(
                "GIT_SSH_COMMAND",
                format!(
                    "ssh -i {} -o IdentitiesOnly=yes -o StrictHostKeyChecking=no",
                    key_dir.file(KEY_FILE).path().display()
                ),
            );
        }
        run(id, logs, "git clone", &mut clone).await?;
        drop(key_dir);
        run(
            id,
            logs,
            "git checkout",
            Command::new("git")
                .current_dir(checkout.path())
                .args(["checkout", source.commit.as_str()]),
        )
        .await?;

        // 2. Image
        on_phase(ContainerBuildPhase::BuildingDockerImage);
        checkout
            .file("Dockerfile.lattice")
            .write_string(&dockerfile(build))
            .await
            .map_err(internal)?;
        run(
            id,
            logs,
            "docker build",
            Command::new("docker").current_dir(checkout.path()).args([
                "build",
                "-f",
                "Dockerfile.lattice",
                "-t",
                fqn.as_str(),
                ".",
            ]),
        )
        .await?;

        // 3. Publish
        self.push(id, &fqn, on_phase, logs).await?;
        Ok(ContainerBuildArtifacts { docker_image_fqn: fqn })
    }

    /// Pull an upstream image and republish it under the container build's own name
    async fn docker_image(
        &self,
        id: &str,
        image: &DockerImage,
        on_phase: PhaseCallback<'_>,
        logs: &BuildLogs,
    ) -> Result<ContainerBuildArtifacts, LatticeError> {
        on_phase(ContainerBuildPhase::PullingDockerImage);
        let upstream = image.fqn();
        run(id, logs, "docker pull", Command::new("docker").args(["pull", upstream.as_str()])).await?;

        let fqn = artifact_image(self.options.registry.as_deref(), &self.options.repository, id).fqn();
        run(
            id,
            logs,
            "docker tag",
            Command::new("docker").args(["tag", upstream.as_str(), fqn.as_str()]),
        )
        .await?;

        self.push(id, &fqn, on_phase, logs).await?;
        Ok(ContainerBuildArtifacts { docker_image_fqn: fqn })
    }

    async fn push(
        &self,
        id: &str,
        fqn: &str,
        on_phase: PhaseCallback<'_>,
        logs: &BuildLogs,
    ) -> Result<(), LatticeError> {
        if !self.options.push {
            return Ok(());
        }
        on_phase(ContainerBuildPhase::PushingDockerImage);
        self.login(id, logs).await?;
        run(id, logs, "docker push", Command::new("docker").args(["push", fqn])).await
    }

    /// Scratch directory holding the key as a 0600 file
    async fn write_key(&self, key: &SecretString) -> Result<ScratchDir, LatticeError> {
        let dir = ScratchDir::create(&self.options.work_dir, "ssh-key")
            .await
            .map_err(internal)?;
        let file = dir.file(KEY_FILE);
        file.write_string(key.expose_secret()).await.map_err(internal)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|e| LatticeError::ContainerBuildInternal(format!("failed to restrict ssh key: {}", e)))?;
        }
        Ok(dir)
    }

    async fn login(&self, id: &str, logs: &BuildLogs) -> Result<(), LatticeError> {
        let login = match &self.options.login {
            Some(login) => login,
            None => return Ok(()),
        };

        debug!("Logging in to registry {:?}", self.options.registry);
        let mut args = vec!["login", "-u", login.username.as_str(), "--password-stdin"];
        if let Some(registry) = self.options.registry.as_deref() {
            args.push(registry);
        }

        let mut child = Command::new("docker")
            .args(&args)
            .kill_on_drop(true)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| LatticeError::ContainerBuildInternal(format!("failed to run docker login: {}", e)))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(login.password.expose_secret().as_bytes())
                .await
                .map_err(|e| LatticeError::ContainerBuildInternal(e.to_string()))?;
        }
        let output = child
            .wait_with_output()
            .await
            .map_err(|e| LatticeError::ContainerBuildInternal(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            logs.append(id, &stderr);
            return Err(LatticeError::ContainerBuildUser(format!(
                "docker login failed: {}",
                stderr
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ImageBuilder for DockerCliBuilder {
    async fn build(
        &self,
        id: &str,
        build: &ContainerBuild,
        ssh_key: Option<&SecretString>,
        on_phase: PhaseCallback<'_>,
        logs: &BuildLogs,
    ) -> Result<ContainerBuildArtifacts, LatticeError> {
        info!("Building container build {}", id);
        match build {
            ContainerBuild::CommandBuild(command_build) => {
                self.command_build(id, command_build, ssh_key, on_phase, logs).await
            }
            ContainerBuild::DockerImage(image) => self.docker_image(id, image, on_phase, logs).await,
        }
    }
}

fn internal(err: LatticeError) -> LatticeError {
    LatticeError::ContainerBuildInternal(err.to_string())
}

/// Dockerfile running the build command over the checked out source
pub fn dockerfile(build: &CommandBuild) -> String {
    let mut contents = format!(
        "FROM {}\n\nRUN mkdir -p /usr/src/app\nWORKDIR /usr/src/app\n\nCOPY . /usr/src/app\n\n",
        build.base_docker_image.fqn()
    );
    for (key, value) in &build.env {
        contents.push_str(&format!("ENV {}={:?}\n", key, value));
    }
    if !build.env.is_empty() {
        contents.push('\n');
    }
    contents.push_str(&format!("RUN {}", build.command.join(" ")));
    contents
}

/// Run a build step, keeping its output in the build log.
///
/// A non-zero exit is a user failure carrying stderr; failing to run the command at all is internal.
pub(crate) async fn run(id: &str, logs: &BuildLogs, step: &str, command: &mut Command) -> Result<(), LatticeError> {
    debug!("Container build {}: {}", id, step);
    logs.append(id, &format!("==> {}", step));

    let output = command
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| LatticeError::ContainerBuildInternal(format!("failed to run {}: {}", step, e)))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    logs.append(id, &stdout);
    logs.append(id, &stderr);

    if !output.status.success() {
        return Err(LatticeError::ContainerBuildUser(format!(
            "{} failed ({}): {}",
            step,
            output.status,
            stderr.trim()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn build(env: BTreeMap<String, String>) -> CommandBuild {
        CommandBuild {
            source: None,
            base_docker_image: DockerImage {
                registry: None,
                repository: "library/node".to_string(),
                tag: "10".to_string(),
            },
            command: vec!["npm".to_string(), "install".to_string()],
            env,
        }
    }

    #[test]
    fn test_dockerfile() {
        assert_eq!(
            dockerfile(&build(BTreeMap::new())),
            "FROM library/node:10\n\nRUN mkdir -p /usr/src/app\nWORKDIR /usr/src/app\n\nCOPY . /usr/src/app\n\nRUN npm install"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_step_killed_when_build_is_cancelled() {
        let root = tempfile::tempdir().unwrap();
        let marker = root.path().join("marker");
        let script = format!("sleep 1; touch {}", marker.display());
        let logs = BuildLogs::default();

        let result = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            run("cb1", &logs, "slow step", Command::new("sh").args(["-c", script.as_str()])),
        )
        .await;
        assert!(result.is_err());

        tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_step_is_a_user_error() {
        let logs = BuildLogs::default();
        let err = run(
            "cb1",
            &logs,
            "make",
            Command::new("sh").args(["-c", "echo missing Makefile >&2; exit 2"]),
        )
        .await
        .unwrap_err();
        match err {
            LatticeError::ContainerBuildUser(message) => assert!(message.contains("missing Makefile")),
            other => panic!("unexpected error {}", other),
        }
        assert!(logs.get("cb1").unwrap().contains("==> make"));
    }

    #[test]
    fn test_dockerfile_env() {
        let mut env = BTreeMap::new();
        env.insert("NODE_ENV".to_string(), "production".to_string());
        let contents = dockerfile(&build(env));
        assert!(contents.contains("ENV NODE_ENV=\"production\"\n\nRUN npm install"));
    }
}
