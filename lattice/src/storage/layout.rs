//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::LatticeError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// On-disk layout of the daemon
#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub base_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Scratch space for git checkouts and build contexts
    pub fn work_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("work"))
    }

    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Create the directories
    pub async fn setup(&self) -> Result<(), LatticeError> {
        self.work_dir().create().await?;
        self.logs_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        #[cfg(target_os = "linux")]
        let base_dir = PathBuf::from("/var/lib/lattice");

        #[cfg(not(target_os = "linux"))]
        let base_dir = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".lattice");

        Self::new(base_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_setup_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path());
        layout.setup().await.unwrap();
        assert!(layout.work_dir().exists().await);
        assert!(layout.logs_dir().exists().await);
        assert_eq!(layout.settings_file().path(), dir.path().join("settings.json"));
    }
}
