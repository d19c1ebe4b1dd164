//! Files the daemon reads and writes

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::errors::LatticeError;

#[derive(Debug, Clone)]
pub struct File {
    path: PathBuf,
}

impl File {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn exists(&self) -> bool {
        fs::try_exists(&self.path).await.unwrap_or(false)
    }

    pub async fn read_json<T: DeserializeOwned>(&self) -> Result<T, LatticeError> {
        let bytes = fs::read(&self.path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Replace the file's contents.
    ///
    /// The data goes to a sibling `.tmp` file that is renamed over the target, so readers never
    /// see a partial write. Missing parent directories are created.
    pub async fn write_string(&self, contents: &str) -> Result<(), LatticeError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let staging = self.path.with_extension("tmp");

        let mut file = fs::File::create(&staging).await?;
        file.write_all(contents.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&staging, &self.path).await?;
        Ok(())
    }
}
