//! Component resolver
//!
//! Expands references in a component tree until every node holds a concrete component, recording
//! the repository and commit each node was read from.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use secrecy::SecretString;
use tracing::{debug, info, warn};

use crate::definition::component::{
    Component, GitCommit, GitRepositoryReference, Reference, DEFAULT_DEFINITION_FILE,
};
use crate::definition::resolution::{ResolutionInfo, ResolutionTree};
use crate::definition::tree::{Path, PathSubcomponent};
use crate::errors::ResolutionError;
use crate::git::tags::TagRange;
use crate::git::{GitRef, GitResolver};
use crate::resolver::secret_store::SecretStore;
use crate::resolver::template_store::{TemplateSource, TemplateStore};

/// Resolve every reference, however deep
pub const DEPTH_INFINITE: i32 = -1;

/// Options for the component resolver
#[derive(Debug, Clone)]
pub struct ResolverOptions {
    /// Maximum nesting of references and systems before giving up
    pub max_depth_guard: u32,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            max_depth_guard: 50,
        }
    }
}

/// Commit and credentials a component was read with
#[derive(Debug, Clone, Default)]
struct ResolutionContext {
    commit: GitCommit,
    ssh_key_secret: Option<PathSubcomponent>,
}

pub struct ComponentResolver {
    git: Arc<dyn GitResolver>,
    templates: Arc<dyn TemplateStore>,
    secrets: Arc<dyn SecretStore>,
    options: ResolverOptions,
}

impl ComponentResolver {
    pub fn new(
        git: Arc<dyn GitResolver>,
        templates: Arc<dyn TemplateStore>,
        secrets: Arc<dyn SecretStore>,
        options: ResolverOptions,
    ) -> Self {
        Self {
            git,
            templates,
            secrets,
            options,
        }
    }

    /// Resolve the definition of a system at a version (tag or semver range)
    pub async fn resolve_version(
        &self,
        system_id: &str,
        definition_url: &str,
        version: &str,
        depth: i32,
    ) -> Result<ResolutionTree, ResolutionError> {
        info!("Resolving system {} at version {}", system_id, version);
        let reference = Component::Reference(Reference {
            git_repository: Some(GitRepositoryReference {
                url: definition_url.to_string(),
                tag: Some(version.to_string()),
                ..Default::default()
            }),
            file: None,
        });
        self.resolve(system_id, reference, depth).await
    }

    /// Resolve a component in the context of a system; the result is keyed relative to it
    pub async fn resolve(
        &self,
        system_id: &str,
        component: Component,
        depth: i32,
    ) -> Result<ResolutionTree, ResolutionError> {
        let tree = self
            .resolve_component(
                system_id,
                Path::root(),
                ResolutionContext::default(),
                component,
                depth,
                0,
            )
            .await?;

        if !tree.contains(&Path::root()) {
            return Err(ResolutionError::Other(
                "resolution produced no root component".to_string(),
            ));
        }
        Ok(tree)
    }

    /// Resolve the system at `version` and return the subtree at `path`, rebased to the root
    pub async fn resolve_path(
        &self,
        system_id: &str,
        definition_url: &str,
        version: &str,
        path: &Path,
    ) -> Result<ResolutionTree, ResolutionError> {
        let tree = self
            .resolve_version(system_id, definition_url, version, DEPTH_INFINITE)
            .await?;
        if !tree.contains(path) {
            return Err(ResolutionError::Other(format!(
                "path {} does not exist in version {}",
                path, version
            )));
        }
        Ok(tree.subtree(path))
    }

    fn resolve_component<'a>(
        &'a self,
        system_id: &'a str,
        path: Path,
        ctx: ResolutionContext,
        component: Component,
        depth: i32,
        level: u32,
    ) -> BoxFuture<'a, Result<ResolutionTree, ResolutionError>> {
        async move {
            if level > self.options.max_depth_guard {
                return Err(ResolutionError::DepthExceeded(path.to_string()));
            }

            match component {
                Component::Reference(reference) if depth != 0 => {
                    let (resolved, next_ctx) = self.resolve_reference(system_id, &path, &reference, &ctx).await?;
                    self.resolve_component(system_id, path, next_ctx, resolved, depth, level + 1)
                        .await
                }
                Component::System(mut system) if depth != 0 => {
                    let children = std::mem::take(&mut system.components);
                    let mut tree = ResolutionTree::new();
                    tree.insert(Path::root(), info(Component::System(system), &ctx));

                    let child_depth = if depth < 0 { depth } else { depth - 1 };
                    for (name, child) in children {
                        let relative = Path::root()
                            .child(&name)
                            .map_err(|e| ResolutionError::InvalidReference(e.to_string()))?;
                        let absolute = path
                            .child(&name)
                            .map_err(|e| ResolutionError::InvalidReference(e.to_string()))?;
                        let subtree = self
                            .resolve_component(
                                system_id,
                                absolute,
                                ctx.clone(),
                                child,
                                child_depth,
                                level + 1,
                            )
                            .await?;
                        tree.replace_prefix(&relative, &subtree);
                    }
                    Ok(tree)
                }
                other => {
                    let mut tree = ResolutionTree::new();
                    tree.insert(Path::root(), info(other, &ctx));
                    Ok(tree)
                }
            }
        }
        .boxed()
    }

    async fn resolve_reference(
        &self,
        system_id: &str,
        path: &Path,
        reference: &Reference,
        ctx: &ResolutionContext,
    ) -> Result<(Component, ResolutionContext), ResolutionError> {
        match (&reference.git_repository, &reference.file) {
            (Some(_), Some(_)) => Err(ResolutionError::InvalidReference(format!(
                "reference at {} cannot contain both git_repository and file",
                path
            ))),
            (None, None) => Err(ResolutionError::InvalidReference(format!(
                "reference at {} must contain git_repository or file",
                path
            ))),
            (None, Some(file)) => {
                if ctx.commit.url.is_empty() {
                    return Err(ResolutionError::InvalidReference(format!(
                        "file reference at {} has no repository to be relative to",
                        path
                    )));
                }
                let key = self.ssh_key(system_id, ctx.ssh_key_secret.as_ref())?;
                let component = self
                    .load(system_id, &ctx.commit.url, &ctx.commit.commit, file, key.as_ref())
                    .await?;
                Ok((component, ctx.clone()))
            }
            (Some(repository), None) => {
                let ssh_key_secret = repository
                    .ssh_key
                    .as_ref()
                    .map(|key| key.secret.clone())
                    .or_else(|| ctx.ssh_key_secret.clone());
                let key = self.ssh_key(system_id, ssh_key_secret.as_ref())?;

                let commit = self.resolve_commit(repository, key.as_ref()).await?;
                let file = repository
                    .file
                    .as_deref()
                    .unwrap_or(DEFAULT_DEFINITION_FILE);
                debug!(
                    "Resolved reference at {} to {}@{}:{}",
                    path, repository.url, commit, file
                );

                let component = self
                    .load(system_id, &repository.url, &commit, file, key.as_ref())
                    .await?;
                let next = ResolutionContext {
                    commit: GitCommit {
                        url: repository.url.clone(),
                        commit,
                    },
                    ssh_key_secret,
                };
                Ok((component, next))
            }
        }
    }

    async fn resolve_commit(
        &self,
        repository: &GitRepositoryReference,
        key: Option<&SecretString>,
    ) -> Result<String, ResolutionError> {
        let set = [
            repository.commit.is_some(),
            repository.branch.is_some(),
            repository.tag.is_some(),
            repository.version.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count();

        if set == 0 {
            return Err(ResolutionError::InvalidReference(
                "git_repository reference must contain commit, branch, or tag".to_string(),
            ));
        }
        if set > 1 {
            return Err(ResolutionError::InvalidReference(
                "git_repository reference must only contain one of commit, branch, tag, or version"
                    .to_string(),
            ));
        }

        let url = repository.url.as_str();
        if let Some(commit) = &repository.commit {
            return Ok(self
                .git
                .resolve_ref(url, &GitRef::Commit(commit.clone()), key)
                .await?);
        }
        if let Some(branch) = &repository.branch {
            return Ok(self
                .git
                .resolve_ref(url, &GitRef::Branch(branch.clone()), key)
                .await?);
        }
        if let Some(tag) = &repository.tag {
            let tag = match TagRange::parse(tag) {
                Some(range) => self.select_tag(url, tag, &range, key).await?,
                None => tag.clone(),
            };
            return Ok(self.git.resolve_ref(url, &GitRef::Tag(tag), key).await?);
        }

        let version = repository.version.as_deref().unwrap_or_default();
        let range = TagRange::parse(version).ok_or_else(|| {
            ResolutionError::InvalidReference(format!("invalid semver range {}", version))
        })?;
        let tag = self.select_tag(url, version, &range, key).await?;
        Ok(self.git.resolve_ref(url, &GitRef::Tag(tag), key).await?)
    }

    async fn select_tag(
        &self,
        url: &str,
        raw: &str,
        range: &TagRange,
        key: Option<&SecretString>,
    ) -> Result<String, ResolutionError> {
        let tags = self.git.tags(url, key).await?;
        match range.select(&tags) {
            Some(tag) => {
                debug!("Range {} of {} selected tag {}", raw, url, tag);
                Ok(tag.to_string())
            }
            None => Err(ResolutionError::NoMatchingVersion(raw.to_string())),
        }
    }

    fn ssh_key(
        &self,
        system_id: &str,
        secret: Option<&PathSubcomponent>,
    ) -> Result<Option<SecretString>, ResolutionError> {
        let secret = match secret {
            Some(secret) => secret,
            None => return Ok(None),
        };

        match self.secrets.get(system_id, secret) {
            Ok(Some(key)) => Ok(Some(key)),
            Ok(None) => Err(ResolutionError::Secret(format!(
                "ssh key secret {} does not exist",
                secret
            ))),
            Err(e) => Err(ResolutionError::Secret(e.to_string())),
        }
    }

    /// Read and decode a template, going through the template cache for public repositories
    async fn load(
        &self,
        system_id: &str,
        url: &str,
        commit: &str,
        file: &str,
        key: Option<&SecretString>,
    ) -> Result<Component, ResolutionError> {
        let source = TemplateSource {
            url: url.to_string(),
            commit: commit.to_string(),
            file: file.to_string(),
        };
        let cacheable = key.is_none();

        if cacheable {
            match self.templates.get(system_id, &source) {
                Ok(Some(component)) => return Ok(component),
                Ok(None) => {}
                Err(e) => warn!("Template cache lookup for {}@{}:{} failed: {}", url, commit, file, e),
            }
        }

        let data = self.git.file_contents(url, commit, file, key).await?;
        let component = Component::parse(file, &data)?;

        if cacheable {
            if let Err(e) = self.templates.put(system_id, &source, &component) {
                warn!("Failed to cache template {}@{}:{}: {}", url, commit, file, e);
            }
        }
        Ok(component)
    }
}

fn info(component: Component, ctx: &ResolutionContext) -> ResolutionInfo {
    ResolutionInfo {
        component,
        commit: ctx.commit.clone(),
        ssh_key_secret: ctx.ssh_key_secret.clone(),
    }
}
