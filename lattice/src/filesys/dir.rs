//! Directories the daemon owns

use std::ops::Deref;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::warn;

use crate::errors::LatticeError;
use crate::filesys::file::File;
use crate::utils::generate_uuid;

#[derive(Debug, Clone)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn exists(&self) -> bool {
        matches!(fs::metadata(&self.path).await, Ok(meta) if meta.is_dir())
    }

    /// Create the directory and any missing parents
    pub async fn create(&self) -> Result<(), LatticeError> {
        fs::create_dir_all(&self.path).await?;
        Ok(())
    }

    /// Remove the directory with everything in it; a missing directory is not an error
    pub async fn delete(&self) -> Result<(), LatticeError> {
        match fs::remove_dir_all(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn file(&self, name: &str) -> File {
        File::new(self.path.join(name))
    }
}

/// Fresh `<prefix>-<uuid>` directory that is removed when dropped.
///
/// Removal also happens when the future holding it is cancelled, e.g. by a build timeout.
#[derive(Debug)]
pub struct ScratchDir {
    dir: Dir,
}

impl ScratchDir {
    pub async fn create(parent: &Path, prefix: &str) -> Result<Self, LatticeError> {
        let dir = Dir::new(parent.join(format!("{}-{}", prefix, generate_uuid())));
        dir.create().await?;
        Ok(Self { dir })
    }
}

impl Deref for ScratchDir {
    type Target = Dir;

    fn deref(&self) -> &Dir {
        &self.dir
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(&self.dir.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", self.dir.path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_delete_dir() {
        let root = tempfile::tempdir().unwrap();
        let dir = Dir::new(root.path().join("checkouts"));
        dir.create().await.unwrap();
        dir.file("Dockerfile").write_string("FROM scratch").await.unwrap();

        dir.delete().await.unwrap();
        assert!(!dir.exists().await);
        // deleting twice is fine
        dir.delete().await.unwrap();
    }

    #[tokio::test]
    async fn test_scratch_dir_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::create(root.path(), "container-build").await.unwrap();
        let path = scratch.path().to_path_buf();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("container-build-"));
        scratch.file("Dockerfile").write_string("FROM scratch").await.unwrap();

        drop(scratch);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_scratch_dir_removed_when_cancelled() {
        let root = tempfile::tempdir().unwrap();
        let parent = root.path().to_path_buf();
        let (tx, rx) = tokio::sync::oneshot::channel();

        let cancelled = tokio::time::timeout(Duration::from_millis(50), async move {
            let scratch = ScratchDir::create(&parent, "container-build").await.unwrap();
            let _ = tx.send(scratch.path().to_path_buf());
            tokio::time::sleep(Duration::from_secs(5)).await;
        })
        .await;

        assert!(cancelled.is_err());
        let path = rx.await.unwrap();
        assert!(!path.exists());
    }
}
