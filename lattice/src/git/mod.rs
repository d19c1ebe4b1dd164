//! Git fetch layer: bind references to commits, read files, list tags

pub mod cli;
pub mod fake;
pub mod tags;

use std::fmt;

use async_trait::async_trait;
use secrecy::SecretString;

pub use cli::CliGitResolver;
pub use fake::StaticGitResolver;

use crate::errors::GitError;

/// Symbolic or concrete git reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitRef {
    Commit(String),
    Branch(String),
    Tag(String),
}

impl fmt::Display for GitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GitRef::Commit(commit) => write!(f, "commit {}", commit),
            GitRef::Branch(branch) => write!(f, "branch {}", branch),
            GitRef::Tag(tag) => write!(f, "tag {}", tag),
        }
    }
}

/// Access to remote repositories
#[async_trait]
pub trait GitResolver: Send + Sync {
    /// Bind a reference to the commit it currently points at
    async fn resolve_ref(
        &self,
        url: &str,
        reference: &GitRef,
        ssh_key: Option<&SecretString>,
    ) -> Result<String, GitError>;

    /// Contents of `file` at `commit`
    async fn file_contents(
        &self,
        url: &str,
        commit: &str,
        file: &str,
        ssh_key: Option<&SecretString>,
    ) -> Result<Vec<u8>, GitError>;

    /// Every tag in the repository
    async fn tags(&self, url: &str, ssh_key: Option<&SecretString>) -> Result<Vec<String>, GitError>;
}
