//! Component definitions
//!
//! Components are decoded from JSON or YAML documents and dispatched on their `type` field
//! (`v1/system`, `v1/service`, `v1/job`, `v1/reference`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::definition::tree::PathSubcomponent;
use crate::errors::ResolutionError;

/// File looked up in a repository when a reference does not name one
pub const DEFAULT_DEFINITION_FILE: &str = "lattice.yaml";

/// A node of the definition tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Component {
    #[serde(rename = "v1/system")]
    System(System),

    #[serde(rename = "v1/service")]
    Service(Service),

    #[serde(rename = "v1/job")]
    Job(Job),

    #[serde(rename = "v1/reference")]
    Reference(Reference),
}

impl Component {
    /// Short kind name used in messages
    pub fn kind(&self) -> &'static str {
        match self {
            Component::System(_) => "system",
            Component::Service(_) => "service",
            Component::Job(_) => "job",
            Component::Reference(_) => "reference",
        }
    }

    pub fn as_system(&self) -> Option<&System> {
        match self {
            Component::System(system) => Some(system),
            _ => None,
        }
    }

    pub fn as_workload(&self) -> Option<&dyn Workload> {
        match self {
            Component::Service(service) => Some(service),
            Component::Job(job) => Some(job),
            _ => None,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Component::Reference(_))
    }

    /// Decode a component from a file body, choosing the format from the file extension
    pub fn parse(file: &str, data: &[u8]) -> Result<Self, ResolutionError> {
        let extension = std::path::Path::new(file)
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_lowercase();

        match extension.as_str() {
            "json" => serde_json::from_slice(data)
                .map_err(|e| ResolutionError::TemplateParse(format!("{}: {}", file, e))),
            "yaml" | "yml" => serde_yaml::from_slice(data)
                .map_err(|e| ResolutionError::TemplateParse(format!("{}: {}", file, e))),
            other => Err(ResolutionError::TemplateParse(format!(
                "{}: unsupported file extension '{}'",
                file, other
            ))),
        }
    }
}

/// Root of a component tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct System {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub components: BTreeMap<String, Component>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_pools: BTreeMap<String, NodePool>,
}

/// Long-running workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub container: Container,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sidecars: BTreeMap<String, Container>,

    #[serde(default = "default_num_instances")]
    pub num_instances: u32,

    /// Shared node pool (`path:name`); a dedicated pool is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_pool: Option<PathSubcomponent>,

    /// Instance type of the dedicated node pool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,
}

fn default_num_instances() -> u32 {
    1
}

/// Run-to-completion workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub container: Container,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sidecars: BTreeMap<String, Container>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_pool: Option<PathSubcomponent>,
}

/// Anything that runs containers
pub trait Workload: Send + Sync {
    fn container(&self) -> &Container;

    fn sidecars(&self) -> &BTreeMap<String, Container>;

    fn node_pool(&self) -> Option<&PathSubcomponent>;
}

impl Workload for Service {
    fn container(&self) -> &Container {
        &self.container
    }

    fn sidecars(&self) -> &BTreeMap<String, Container> {
        &self.sidecars
    }

    fn node_pool(&self) -> Option<&PathSubcomponent> {
        self.node_pool.as_ref()
    }
}

impl Workload for Job {
    fn container(&self) -> &Container {
        &self.container
    }

    fn sidecars(&self) -> &BTreeMap<String, Container> {
        &self.sidecars
    }

    fn node_pool(&self) -> Option<&PathSubcomponent> {
        self.node_pool.as_ref()
    }
}

/// Pointer to a component defined elsewhere
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    /// Component in another repository
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_repository: Option<GitRepositoryReference>,

    /// Component file relative to the referencing component's repository and commit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

/// Repository location plus exactly one of commit, branch, tag or version
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitRepositoryReference {
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    /// Tag name, or a semver range matched against the repository's tags
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,

    /// Semver range matched against the repository's tags
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key: Option<SecretRef>,
}

/// Reference to a secret in the system's secret namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRef {
    pub secret: PathSubcomponent,
}

/// Container of a workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub build: ContainerBuild,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, EnvValue>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ports: BTreeMap<String, ContainerPort>,
}

/// Exposed container port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerPort {
    #[serde(default = "default_protocol")]
    pub protocol: String,

    #[serde(default)]
    pub public: bool,
}

fn default_protocol() -> String {
    "HTTP".to_string()
}

/// Environment value: either literal or pulled from a secret
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvValue {
    Value(String),
    Secret { secret: PathSubcomponent },
}

/// How a container image is produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerBuild {
    /// Run a command over a source checkout on top of a base image
    CommandBuild(CommandBuild),

    /// Use an existing image as-is
    DockerImage(DockerImage),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandBuild {
    /// Source checkout; defaults to the defining component's repository and commit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<GitCommit>,

    pub base_docker_image: DockerImage,

    pub command: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

/// Concrete commit of a repository
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GitCommit {
    pub url: String,
    pub commit: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerImage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,

    pub repository: String,

    pub tag: String,
}

impl DockerImage {
    /// Fully qualified image name, `registry/repository:tag`
    pub fn fqn(&self) -> String {
        match self.registry.as_deref() {
            Some(registry) if !registry.is_empty() => {
                format!("{}/{}:{}", registry, self.repository, self.tag)
            }
            _ => format!("{}:{}", self.repository, self.tag),
        }
    }
}

/// Group of machines workloads are scheduled on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePool {
    pub num_instances: u32,

    pub instance_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SYSTEM_YAML: &str = r#"
type: v1/system
description: example
node_pools:
  default:
    num_instances: 2
    instance_type: t2.small
components:
  api:
    type: v1/service
    num_instances: 3
    node_pool: "/:default"
    container:
      build:
        command_build:
          base_docker_image:
            repository: library/node
            tag: "10"
          command: ["npm", "install"]
      env:
        PORT: "8080"
        PASSWORD:
          secret: "/:db-password"
      ports:
        "8080":
          protocol: HTTP
          public: true
  db:
    type: v1/reference
    git_repository:
      url: https://example.com/db.git
      tag: ">=1.2.0 <2.0.0"
"#;

    #[test]
    fn test_parse_yaml_system() {
        let component = Component::parse("lattice.yaml", SYSTEM_YAML.as_bytes()).unwrap();
        let system = component.as_system().unwrap();
        assert_eq!(system.components.len(), 2);
        assert_eq!(system.node_pools["default"].num_instances, 2);

        let api = match &system.components["api"] {
            Component::Service(service) => service,
            other => panic!("unexpected component {:?}", other),
        };
        assert_eq!(api.num_instances, 3);
        assert_eq!(api.node_pool.as_ref().unwrap().name(), "default");
        assert!(matches!(
            api.container.env["PASSWORD"],
            EnvValue::Secret { .. }
        ));
        assert!(matches!(api.container.build, ContainerBuild::CommandBuild(_)));
        assert!(system.components["db"].is_reference());
    }

    #[test]
    fn test_parse_json_round_trip() {
        let component = Component::parse("lattice.yaml", SYSTEM_YAML.as_bytes()).unwrap();
        let json = serde_json::to_vec(&component).unwrap();
        let back = Component::parse("lattice.json", &json).unwrap();
        assert_eq!(back, component);
    }

    #[test]
    fn test_parse_rejects_unknown_extension() {
        let err = Component::parse("lattice.toml", b"").unwrap_err();
        assert!(matches!(err, ResolutionError::TemplateParse(_)));
    }

    #[test]
    fn test_parse_rejects_unknown_type() {
        let err = Component::parse("a.json", br#"{"type":"v2/system"}"#).unwrap_err();
        assert!(matches!(err, ResolutionError::TemplateParse(_)));
    }

    #[test]
    fn test_docker_image_fqn() {
        let mut image = DockerImage {
            registry: Some("registry.example.com".to_string()),
            repository: "lattice/api".to_string(),
            tag: "abc".to_string(),
        };
        assert_eq!(image.fqn(), "registry.example.com/lattice/api:abc");
        image.registry = None;
        assert_eq!(image.fqn(), "lattice/api:abc");
    }
}
