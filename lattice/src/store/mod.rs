//! Object store: typed CRUD, optimistic concurrency, label selection and watch

pub mod meta;
pub mod object_store;
pub mod selector;

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

pub use meta::{Object, ObjectKey, ObjectMeta, OwnerReference};
pub use object_store::{ObjectStore, WatchEvent};
pub use selector::LabelSelector;

use crate::api;

/// One store per object kind, sharing a resource version counter
pub struct Store {
    pub systems: ObjectStore<api::System>,
    pub builds: ObjectStore<api::Build>,
    pub container_builds: ObjectStore<api::ContainerBuild>,
    pub deploys: ObjectStore<api::Deploy>,
    pub teardowns: ObjectStore<api::Teardown>,
    pub services: ObjectStore<api::Service>,
    pub jobs: ObjectStore<api::Job>,
    pub node_pools: ObjectStore<api::NodePool>,
    pub instances: ObjectStore<api::Instance>,
    pub secrets: ObjectStore<api::Secret>,
    pub templates: ObjectStore<api::Template>,
    pub git_templates: ObjectStore<api::GitTemplate>,
}

impl Default for Store {
    fn default() -> Self {
        let versions = Arc::new(AtomicU64::new(0));
        Self {
            systems: ObjectStore::new(versions.clone()),
            builds: ObjectStore::new(versions.clone()),
            container_builds: ObjectStore::new(versions.clone()),
            deploys: ObjectStore::new(versions.clone()),
            teardowns: ObjectStore::new(versions.clone()),
            services: ObjectStore::new(versions.clone()),
            jobs: ObjectStore::new(versions.clone()),
            node_pools: ObjectStore::new(versions.clone()),
            instances: ObjectStore::new(versions.clone()),
            secrets: ObjectStore::new(versions.clone()),
            templates: ObjectStore::new(versions.clone()),
            git_templates: ObjectStore::new(versions),
        }
    }
}

impl Store {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of objects of any system-scoped kind left in a namespace
    pub fn namespace_object_count(&self, namespace: &str) -> usize {
        let all = LabelSelector::everything();
        let ns = Some(namespace);
        self.builds.list(ns, &all).len()
            + self.container_builds.list(ns, &all).len()
            + self.deploys.list(ns, &all).len()
            + self.teardowns.list(ns, &all).len()
            + self.services.list(ns, &all).len()
            + self.jobs.list(ns, &all).len()
            + self.node_pools.list(ns, &all).len()
            + self.instances.list(ns, &all).len()
            + self.secrets.list(ns, &all).len()
            + self.templates.list(ns, &all).len()
            + self.git_templates.list(ns, &all).len()
    }
}
