//! In-memory git resolver for tests and embedding

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::errors::GitError;
use crate::git::{GitRef, GitResolver};

#[derive(Default)]
struct StaticRepository {
    commits: HashMap<String, HashMap<String, Vec<u8>>>,
    branches: HashMap<String, String>,
    tags: BTreeMap<String, String>,
    ssh_key: Option<String>,
}

/// Repositories, refs and files declared up front
#[derive(Default)]
pub struct StaticGitResolver {
    repositories: RwLock<HashMap<String, StaticRepository>>,
    file_reads: AtomicUsize,
}

impl StaticGitResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a commit holding `files`
    pub fn add_commit(&self, url: &str, commit: &str, files: &[(&str, &str)]) {
        let mut repositories = self.repositories.write().unwrap_or_else(|e| e.into_inner());
        let repository = repositories.entry(url.to_string()).or_default();
        let contents = files
            .iter()
            .map(|(name, body)| (name.to_string(), body.as_bytes().to_vec()))
            .collect();
        repository.commits.insert(commit.to_string(), contents);
    }

    pub fn set_branch(&self, url: &str, branch: &str, commit: &str) {
        let mut repositories = self.repositories.write().unwrap_or_else(|e| e.into_inner());
        repositories
            .entry(url.to_string())
            .or_default()
            .branches
            .insert(branch.to_string(), commit.to_string());
    }

    pub fn set_tag(&self, url: &str, tag: &str, commit: &str) {
        let mut repositories = self.repositories.write().unwrap_or_else(|e| e.into_inner());
        repositories
            .entry(url.to_string())
            .or_default()
            .tags
            .insert(tag.to_string(), commit.to_string());
    }

    /// Make the repository private, readable only with this key
    pub fn require_ssh_key(&self, url: &str, key: &str) {
        let mut repositories = self.repositories.write().unwrap_or_else(|e| e.into_inner());
        repositories.entry(url.to_string()).or_default().ssh_key = Some(key.to_string());
    }

    /// Number of file reads served
    pub fn file_reads(&self) -> usize {
        self.file_reads.load(Ordering::SeqCst)
    }

    fn with_repository<R>(
        &self,
        url: &str,
        ssh_key: Option<&SecretString>,
        f: impl FnOnce(&StaticRepository) -> Result<R, GitError>,
    ) -> Result<R, GitError> {
        let repositories = self.repositories.read().unwrap_or_else(|e| e.into_inner());
        let repository = repositories
            .get(url)
            .ok_or_else(|| GitError::Command(format!("repository {} not found", url)))?;

        if let Some(expected) = &repository.ssh_key {
            let authorized = ssh_key.map_or(false, |key| key.expose_secret() == expected.as_str());
            if !authorized {
                return Err(GitError::AuthRequired(url.to_string()));
            }
        }
        f(repository)
    }
}

#[async_trait]
impl GitResolver for StaticGitResolver {
    async fn resolve_ref(
        &self,
        url: &str,
        reference: &GitRef,
        ssh_key: Option<&SecretString>,
    ) -> Result<String, GitError> {
        self.with_repository(url, ssh_key, |repository| {
            let commit = match reference {
                GitRef::Commit(commit) => repository
                    .commits
                    .contains_key(commit)
                    .then(|| commit.clone()),
                GitRef::Branch(branch) => repository.branches.get(branch).cloned(),
                GitRef::Tag(tag) => repository.tags.get(tag).cloned(),
            };
            commit.ok_or_else(|| GitError::RefNotFound {
                url: url.to_string(),
                reference: reference.to_string(),
            })
        })
    }

    async fn file_contents(
        &self,
        url: &str,
        commit: &str,
        file: &str,
        ssh_key: Option<&SecretString>,
    ) -> Result<Vec<u8>, GitError> {
        self.file_reads.fetch_add(1, Ordering::SeqCst);
        self.with_repository(url, ssh_key, |repository| {
            let files = repository
                .commits
                .get(commit)
                .ok_or_else(|| GitError::RefNotFound {
                    url: url.to_string(),
                    reference: format!("commit {}", commit),
                })?;
            files
                .get(file.trim_start_matches('/'))
                .cloned()
                .ok_or_else(|| GitError::FileMissing {
                    commit: commit.to_string(),
                    file: file.to_string(),
                })
        })
    }

    async fn tags(&self, url: &str, ssh_key: Option<&SecretString>) -> Result<Vec<String>, GitError> {
        self.with_repository(url, ssh_key, |repository| {
            Ok(repository.tags.keys().cloned().collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_resolver() {
        let git = StaticGitResolver::new();
        git.add_commit("repo", "c1", &[("lattice.yaml", "type: v1/system")]);
        git.set_tag("repo", "v1.0.0", "c1");
        git.set_branch("repo", "main", "c1");

        let commit = git
            .resolve_ref("repo", &GitRef::Tag("v1.0.0".to_string()), None)
            .await
            .unwrap();
        assert_eq!(commit, "c1");
        assert_eq!(
            git.resolve_ref("repo", &GitRef::Branch("main".to_string()), None)
                .await
                .unwrap(),
            "c1"
        );
        assert!(matches!(
            git.resolve_ref("repo", &GitRef::Tag("v2".to_string()), None).await,
            Err(GitError::RefNotFound { .. })
        ));
        assert!(matches!(
            git.file_contents("repo", "c1", "missing.yaml", None).await,
            Err(GitError::FileMissing { .. })
        ));
        assert_eq!(git.tags("repo", None).await.unwrap(), vec!["v1.0.0"]);
    }

    #[tokio::test]
    async fn test_private_repository_requires_key() {
        let git = StaticGitResolver::new();
        git.add_commit("private", "c1", &[("lattice.yaml", "")]);
        git.require_ssh_key("private", "key");

        assert!(matches!(
            git.file_contents("private", "c1", "lattice.yaml", None).await,
            Err(GitError::AuthRequired(_))
        ));
        let key = SecretString::from("key".to_string());
        assert!(git
            .file_contents("private", "c1", "lattice.yaml", Some(&key))
            .await
            .is_ok());
    }
}
