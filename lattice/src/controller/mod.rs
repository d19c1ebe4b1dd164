//! Controllers reconciling the object store toward each object's desired state

pub mod build;
pub mod container_build;
pub mod informer;
pub mod job;
pub mod lifecycle;
pub mod manager;
pub mod node_pool;
pub mod queue;
pub mod service;
pub mod system;
pub mod worker;

use std::sync::Arc;

use crate::api::{self, System};
use crate::containerbuild::ContainerBuildExecutor;
use crate::controller::lifecycle::lock::LifecycleLocks;
use crate::errors::LatticeError;
use crate::resolver::ComponentResolver;
use crate::runtime::InstanceRuntime;
use crate::store::{Object, ObjectKey, ObjectStore, Store};

pub use worker::Reconciler;

/// Everything the controllers share
pub struct ControllerContext {
    pub store: Arc<Store>,
    pub resolver: Arc<ComponentResolver>,
    pub executor: Arc<ContainerBuildExecutor>,
    pub runtime: Arc<dyn InstanceRuntime>,
    pub locks: Arc<LifecycleLocks>,
    pub namespace_prefix: String,
}

impl ControllerContext {
    /// Namespace holding the System objects
    pub fn internal_namespace(&self) -> String {
        api::internal_namespace(&self.namespace_prefix)
    }

    pub fn system_namespace(&self, system_id: &str) -> String {
        api::system_namespace(&self.namespace_prefix, system_id)
    }

    /// Id of the system owning a per-system namespace
    pub fn system_id<'a>(&self, namespace: &'a str) -> Result<&'a str, LatticeError> {
        api::system_id_from_namespace(&self.namespace_prefix, namespace).ok_or_else(|| {
            LatticeError::InvariantViolation(format!("{} is not a system namespace", namespace))
        })
    }

    /// Key of the System object owning a per-system namespace
    pub fn system_key(&self, namespace: &str) -> Option<ObjectKey> {
        api::system_id_from_namespace(&self.namespace_prefix, namespace)
            .map(|id| ObjectKey::new(self.internal_namespace(), id))
    }

    pub fn system(&self, system_id: &str) -> Result<System, LatticeError> {
        self.store.systems.get(&self.internal_namespace(), system_id)
    }
}

/// Add a finalizer if the object does not carry it yet
pub(crate) fn add_finalizer<T: Object>(
    store: &ObjectStore<T>,
    obj: T,
    finalizer: &str,
) -> Result<T, LatticeError> {
    if obj.meta().has_finalizer(finalizer) {
        return Ok(obj);
    }
    let mut next = obj;
    next.meta_mut().finalizers.push(finalizer.to_string());
    store.update(next)
}

/// Remove a finalizer; the store reclaims the object if it was the last one
pub(crate) fn remove_finalizer<T: Object>(
    store: &ObjectStore<T>,
    obj: T,
    finalizer: &str,
) -> Result<(), LatticeError> {
    if !obj.meta().has_finalizer(finalizer) {
        return Ok(());
    }
    let mut next = obj;
    next.meta_mut().finalizers.retain(|f| f != finalizer);
    store.update(next)?;
    Ok(())
}

/// Request deletion, ignoring objects that are already gone
pub(crate) fn delete_if_present<T: Object>(store: &ObjectStore<T>, obj: &T) -> Result<(), LatticeError> {
    match store.delete(&obj.meta().namespace, &obj.meta().name) {
        Ok(()) | Err(LatticeError::NotFound(_)) => Ok(()),
        Err(e) => Err(e),
    }
}
