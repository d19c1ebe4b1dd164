//! Content-addressed cache of parsed templates
//!
//! Template bodies are stored once per system under the SHA-1 of their JSON encoding. A separate
//! index entry, labelled by `(url hash, commit, file hash)`, points at the body's digest.

use std::sync::Arc;

use tracing::debug;

use crate::api::{labels, GitTemplate, GitTemplateSpec, NoStatus, Template, TemplateSpec};
use crate::definition::component::Component;
use crate::errors::LatticeError;
use crate::store::{LabelSelector, Object, ObjectMeta, Store};
use crate::utils::{json_sha1, sha1_hex};

/// Location a template was read from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TemplateSource {
    pub url: String,
    pub commit: String,
    pub file: String,
}

impl TemplateSource {
    fn index_selector(&self) -> LabelSelector {
        LabelSelector::everything()
            .eq(labels::TEMPLATE_REPOSITORY_URL_HASH, sha1_hex(self.url.as_bytes()))
            .eq(labels::TEMPLATE_COMMIT, self.commit.clone())
            .eq(labels::TEMPLATE_FILE_HASH, sha1_hex(self.file.as_bytes()))
    }

    fn index_name(&self) -> String {
        sha1_hex(format!("{}\n{}\n{}", self.url, self.commit, self.file).as_bytes())
    }
}

/// Cache of templates keyed by where they were read from
pub trait TemplateStore: Send + Sync {
    fn get(&self, system_id: &str, source: &TemplateSource) -> Result<Option<Component>, LatticeError>;

    /// Store a template; concurrent puts of the same template all succeed
    fn put(&self, system_id: &str, source: &TemplateSource, component: &Component) -> Result<(), LatticeError>;
}

/// [`TemplateStore`] kept in the object store, in each system's namespace
pub struct ObjectTemplateStore {
    store: Arc<Store>,
    namespace_prefix: String,
}

impl ObjectTemplateStore {
    pub fn new(store: Arc<Store>, namespace_prefix: impl Into<String>) -> Self {
        Self {
            store,
            namespace_prefix: namespace_prefix.into(),
        }
    }

    fn namespace(&self, system_id: &str) -> String {
        crate::api::system_namespace(&self.namespace_prefix, system_id)
    }
}

impl TemplateStore for ObjectTemplateStore {
    fn get(&self, system_id: &str, source: &TemplateSource) -> Result<Option<Component>, LatticeError> {
        let namespace = self.namespace(system_id);
        let entries: Vec<GitTemplate> = self
            .store
            .git_templates
            .list(Some(&namespace), &source.index_selector())
            .into_iter()
            .filter(|entry| {
                entry.spec.url == source.url
                    && entry.spec.commit == source.commit
                    && entry.spec.file == source.file
            })
            .collect();

        let entry = match entries.as_slice() {
            [] => return Ok(None),
            [entry] => entry,
            _ => {
                return Err(LatticeError::InvariantViolation(format!(
                    "found {} template index entries for {}@{}:{}",
                    entries.len(),
                    source.url,
                    source.commit,
                    source.file
                )))
            }
        };

        match self
            .store
            .templates
            .try_get(&namespace, &entry.spec.template_digest)
        {
            Some(template) => Ok(Some(template.spec.component)),
            None => Err(LatticeError::InvariantViolation(format!(
                "template index {} points at missing template {}",
                entry.meta().name,
                entry.spec.template_digest
            ))),
        }
    }

    fn put(&self, system_id: &str, source: &TemplateSource, component: &Component) -> Result<(), LatticeError> {
        let namespace = self.namespace(system_id);
        let digest = json_sha1(component)?;

        // 1. Body, content addressed
        let template = Template {
            metadata: ObjectMeta::new(&namespace, &digest),
            spec: TemplateSpec {
                component: component.clone(),
            },
            status: NoStatus::default(),
        };
        match self.store.templates.create(template) {
            Ok(_) | Err(LatticeError::AlreadyExists(_)) => {}
            Err(e) => return Err(e),
        }

        // 2. Index entry
        let mut metadata = ObjectMeta::new(&namespace, source.index_name());
        metadata.labels.insert(
            labels::TEMPLATE_REPOSITORY_URL_HASH.to_string(),
            sha1_hex(source.url.as_bytes()),
        );
        metadata
            .labels
            .insert(labels::TEMPLATE_COMMIT.to_string(), source.commit.clone());
        metadata.labels.insert(
            labels::TEMPLATE_FILE_HASH.to_string(),
            sha1_hex(source.file.as_bytes()),
        );
        let index = GitTemplate {
            metadata,
            spec: GitTemplateSpec {
                url: source.url.clone(),
                commit: source.commit.clone(),
                file: source.file.clone(),
                template_digest: digest.clone(),
            },
            status: NoStatus::default(),
        };
        match self.store.git_templates.create(index) {
            Ok(_) | Err(LatticeError::AlreadyExists(_)) => {}
            Err(e) => return Err(e),
        }

        debug!(
            "Cached template {}@{}:{} as {}",
            source.url, source.commit, source.file, digest
        );
        Ok(())
    }
}
