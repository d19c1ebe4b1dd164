//! Settings file management

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::LatticeError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Daemon settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log as JSON lines instead of human readable text
    #[serde(default)]
    pub log_json: bool,

    /// Directory for daily rolling log files
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    #[serde(default)]
    pub server: ServerSettings,

    /// Directory for git checkouts and build contexts; defaults to the storage layout's
    #[serde(default)]
    pub work_dir: Option<PathBuf>,

    #[serde(default)]
    pub controllers: ControllerSettings,

    #[serde(default)]
    pub container_builds: ContainerBuildSettings,

    #[serde(default)]
    pub resolver: ResolverSettings,

    /// Prefix of every namespace the daemon creates
    #[serde(default = "default_namespace_prefix")]
    pub namespace_prefix: String,
}

fn default_namespace_prefix() -> String {
    "lattice".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_dir: None,
            server: ServerSettings::default(),
            work_dir: None,
            controllers: ControllerSettings::default(),
            container_builds: ContainerBuildSettings::default(),
            resolver: ResolverSettings::default(),
            namespace_prefix: default_namespace_prefix(),
        }
    }
}

impl Settings {
    /// Read settings from a file; a missing file yields the defaults
    pub async fn load(file: &File) -> Result<Self, LatticeError> {
        if !file.exists().await {
            return Ok(Self::default());
        }
        file.read_json().await
    }
}

/// HTTP API listener
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerSettings {
    /// Reconcile workers per controller
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_resync_interval")]
    pub resync_interval_secs: u64,
}

fn default_workers() -> usize {
    2
}

fn default_resync_interval() -> u64 {
    30
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            resync_interval_secs: default_resync_interval(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerBuildSettings {
    /// Registry images are pushed to; local images only when absent
    #[serde(default)]
    pub registry: Option<String>,

    /// Repository prefix of pushed images
    #[serde(default = "default_repository_prefix")]
    pub repository_prefix: String,

    #[serde(default = "default_build_timeout")]
    pub timeout_secs: u64,

    /// Container builds running at the same time
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_true")]
    pub push: bool,
}

fn default_repository_prefix() -> String {
    "lattice".to_string()
}

fn default_build_timeout() -> u64 {
    3600
}

fn default_concurrency() -> usize {
    4
}

fn default_true() -> bool {
    true
}

impl Default for ContainerBuildSettings {
    fn default() -> Self {
        Self {
            registry: None,
            repository_prefix: default_repository_prefix(),
            timeout_secs: default_build_timeout(),
            concurrency: default_concurrency(),
            push: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolverSettings {
    /// Maximum nesting of references before resolution gives up
    #[serde(default = "default_max_depth_guard")]
    pub max_depth_guard: u32,
}

fn default_max_depth_guard() -> u32 {
    50
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            max_depth_guard: default_max_depth_guard(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let settings: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.namespace_prefix, "lattice");
        assert_eq!(settings.container_builds.timeout_secs, 3600);
    }

    #[test]
    fn test_partial_sections() {
        let settings: Settings = serde_json::from_str(
            r#"{"log_level": "debug", "server": {"port": 9000}, "container_builds": {"registry": "registry.example.com", "push": false}}"#,
        )
        .unwrap();
        assert_eq!(settings.log_level, LogLevel::Debug);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.container_builds.registry.as_deref(), Some("registry.example.com"));
        assert!(!settings.container_builds.push);
        assert_eq!(settings.container_builds.concurrency, 4);
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&File::new(dir.path().join("settings.json")))
            .await
            .unwrap();
        assert_eq!(settings, Settings::default());
    }
}
