//! Git resolver backed by the `git` command line
//!
//! Every repository is mirrored once under the work directory, in a folder named by the SHA-256 of
//! its URL. Operations on the same URL are serialised.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::errors::GitError;
use crate::git::{GitRef, GitResolver};
use crate::utils::{generate_uuid, sha256_hex};

const AUTH_FAILURE_MARKERS: [&str; 4] = [
    "Authentication failed",
    "Permission denied",
    "could not read Username",
    "Host key verification failed",
];

/// Output of a git invocation
struct GitOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

pub struct CliGitResolver {
    work_dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl CliGitResolver {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn repo_dir(&self, url: &str) -> PathBuf {
        self.work_dir.join("repos").join(sha256_hex(url.as_bytes()))
    }

    fn lock_for(&self, url: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(url.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Clone the repository if needed, otherwise fetch updates
    async fn sync(&self, url: &str, ssh_key: Option<&SecretString>) -> Result<PathBuf, GitError> {
        let dir = self.repo_dir(url);

        let output = if dir.join("HEAD").exists() {
            debug!("Fetching updates for {}", url);
            self.run(Some(&dir), &["remote", "update", "--prune"], ssh_key)
                .await?
        } else {
            info!("Cloning {} into {}", url, dir.display());
            if let Some(parent) = dir.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| GitError::Command(format!("failed to create {}: {}", parent.display(), e)))?;
            }
            let target = dir.to_string_lossy().to_string();
            self.run(None, &["clone", "--mirror", url, target.as_str()], ssh_key)
                .await?
        };

        if !output.success {
            return Err(classify_failure(url, &output.stderr));
        }
        Ok(dir)
    }

    async fn has_commit(&self, dir: &Path, commit: &str) -> Result<bool, GitError> {
        let object = format!("{}^{{commit}}", commit);
        let output = self.run(Some(dir), &["cat-file", "-e", object.as_str()], None).await?;
        Ok(output.success)
    }

    async fn run(
        &self,
        dir: Option<&Path>,
        args: &[&str],
        ssh_key: Option<&SecretString>,
    ) -> Result<GitOutput, GitError> {
        let key_file = match ssh_key {
            Some(key) => Some(self.write_key(key).await?),
            None => None,
        };

        let mut command = Command::new("git");
        command
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = dir {
            command.current_dir(dir);
        }
        if let Some(key_file) = &key_file {
            command.env(
                "GIT_SSH_COMMAND",
                format!(
                    "ssh -i {} -o IdentitiesOnly=yes -o StrictHostKeyChecking=no",
                    key_file.display()
                ),
            );
        }

        let result = command.output().await;

        if let Some(key_file) = &key_file {
            if let Err(e) = tokio::fs::remove_file(key_file).await {
                warn!("Failed to remove ssh key file {}: {}", key_file.display(), e);
            }
        }

        let output = result.map_err(|e| GitError::Command(format!("failed to run git: {}", e)))?;
        Ok(GitOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    async fn write_key(&self, key: &SecretString) -> Result<PathBuf, GitError> {
        let dir = self.work_dir.join("keys");
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| GitError::Command(format!("failed to create key directory: {}", e)))?;

        let path = dir.join(generate_uuid());
        tokio::fs::write(&path, key.expose_secret().as_bytes())
            .await
            .map_err(|e| GitError::Command(format!("failed to write ssh key: {}", e)))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|e| GitError::Command(format!("failed to restrict ssh key: {}", e)))?;
        }

        Ok(path)
    }
}

#[async_trait]
impl GitResolver for CliGitResolver {
    async fn resolve_ref(
        &self,
        url: &str,
        reference: &GitRef,
        ssh_key: Option<&SecretString>,
    ) -> Result<String, GitError> {
        let lock = self.lock_for(url);
        let _guard = lock.lock().await;

        let dir = self.sync(url, ssh_key).await?;
        let object = match reference {
            GitRef::Commit(commit) => format!("{}^{{commit}}", commit),
            GitRef::Branch(branch) => format!("refs/heads/{}^{{commit}}", branch),
            GitRef::Tag(tag) => format!("refs/tags/{}^{{commit}}", tag),
        };

        let output = self
            .run(Some(&dir), &["rev-parse", "--verify", "--quiet", object.as_str()], None)
            .await?;
        if !output.success {
            return Err(GitError::RefNotFound {
                url: url.to_string(),
                reference: reference.to_string(),
            });
        }

        let commit = output.stdout.trim().to_string();
        debug!("Resolved {} of {} to {}", reference, url, commit);
        Ok(commit)
    }

    async fn file_contents(
        &self,
        url: &str,
        commit: &str,
        file: &str,
        ssh_key: Option<&SecretString>,
    ) -> Result<Vec<u8>, GitError> {
        let lock = self.lock_for(url);
        let _guard = lock.lock().await;

        let mut dir = self.repo_dir(url);
        if !dir.join("HEAD").exists() || !self.has_commit(&dir, commit).await? {
            dir = self.sync(url, ssh_key).await?;
        }
        if !self.has_commit(&dir, commit).await? {
            return Err(GitError::RefNotFound {
                url: url.to_string(),
                reference: format!("commit {}", commit),
            });
        }

        let object = format!("{}:{}", commit, file.trim_start_matches('/'));
        let output = self.run(Some(&dir), &["show", object.as_str()], None).await?;
        if !output.success {
            return Err(GitError::FileMissing {
                commit: commit.to_string(),
                file: file.to_string(),
            });
        }
        Ok(output.stdout.into_bytes())
    }

    async fn tags(&self, url: &str, ssh_key: Option<&SecretString>) -> Result<Vec<String>, GitError> {
        let lock = self.lock_for(url);
        let _guard = lock.lock().await;

        let dir = self.sync(url, ssh_key).await?;
        let output = self.run(Some(&dir), &["tag", "--list"], None).await?;
        if !output.success {
            return Err(GitError::Command(output.stderr));
        }

        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}

fn classify_failure(url: &str, stderr: &str) -> GitError {
    if AUTH_FAILURE_MARKERS
        .iter()
        .any(|marker| stderr.contains(marker))
    {
        return GitError::AuthRequired(url.to_string());
    }
    GitError::Command(stderr.to_string())
}
