//! Resolved component trees

use serde::{Deserialize, Serialize};

use crate::definition::component::{
    CommandBuild, Component, ContainerBuild, GitCommit, System, Workload,
};
use crate::definition::tree::{Path, PathSubcomponent, Tree};

/// Everything known about a resolved node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionInfo {
    /// Concrete component at the node
    pub component: Component,

    /// Repository and commit the component was read from
    pub commit: GitCommit,

    /// SSH key used to fetch the component, if the repository is private
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key_secret: Option<PathSubcomponent>,
}

/// Tree of resolved components, keyed by path relative to the resolution root
pub type ResolutionTree = Tree<ResolutionInfo>;

/// A tree holding only an empty root system
pub fn empty_system_tree() -> ResolutionTree {
    let mut tree = ResolutionTree::new();
    tree.insert(
        Path::root(),
        ResolutionInfo {
            component: Component::System(System::default()),
            commit: GitCommit::default(),
            ssh_key_secret: None,
        },
    );
    tree
}

/// Every workload in the tree, in lexical path order
pub fn workloads(tree: &ResolutionTree) -> Vec<(&Path, &dyn Workload, &ResolutionInfo)> {
    tree.iter()
        .filter_map(|(path, info)| {
            info.component
                .as_workload()
                .map(|workload| (path, workload, info))
        })
        .collect()
}

/// Container build with every implicit input made explicit.
///
/// A command build without a source is bound to the repository and commit of the component that
/// declared it, so that the same source at the same commit always hydrates identically.
pub fn hydrate_container_build(build: &ContainerBuild, info: &ResolutionInfo) -> ContainerBuild {
    match build {
        ContainerBuild::CommandBuild(command_build) if command_build.source.is_none() => {
            ContainerBuild::CommandBuild(CommandBuild {
                source: Some(info.commit.clone()),
                ..command_build.clone()
            })
        }
        other => other.clone(),
    }
}

/// Secret of the SSH key that fetches a hydrated build's source.
///
/// Only sources in the repository the component came from are fetched with its key.
pub fn source_ssh_key(build: &ContainerBuild, info: &ResolutionInfo) -> Option<PathSubcomponent> {
    match build {
        ContainerBuild::CommandBuild(CommandBuild {
            source: Some(source), ..
        }) if source.url == info.commit.url => info.ssh_key_secret.clone(),
        _ => None,
    }
}
