//! Typed in-memory object store with optimistic concurrency and watch

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::debug;

use crate::errors::LatticeError;
use crate::store::meta::{Object, ObjectKey};
use crate::store::selector::LabelSelector;
use crate::utils::generate_uuid;

const WATCH_CAPACITY: usize = 1024;

/// Change notification delivered to watchers
#[derive(Debug, Clone)]
pub enum WatchEvent<T> {
    Added(T),
    Modified(T),
    Deleted(T),
}

impl<T: Object> WatchEvent<T> {
    pub fn object(&self) -> &T {
        match self {
            WatchEvent::Added(obj) | WatchEvent::Modified(obj) | WatchEvent::Deleted(obj) => obj,
        }
    }
}

/// Store for a single object kind.
///
/// Every read hands out a copy; callers mutate their copy and write it back with the
/// `resource_version` they read, so a concurrent write makes the second writer fail with
/// [`LatticeError::Conflict`].
pub struct ObjectStore<T: Object> {
    objects: RwLock<BTreeMap<ObjectKey, T>>,
    versions: Arc<AtomicU64>,
    events: broadcast::Sender<WatchEvent<T>>,
}

impl<T: Object> ObjectStore<T> {
    pub fn new(versions: Arc<AtomicU64>) -> Self {
        let (events, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            objects: RwLock::new(BTreeMap::new()),
            versions,
            events,
        }
    }

    fn next_version(&self) -> u64 {
        self.versions.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn publish(&self, event: WatchEvent<T>) {
        // no receivers is fine
        let _ = self.events.send(event);
    }

    /// Subscribe to changes made after this call
    pub fn watch(&self) -> broadcast::Receiver<WatchEvent<T>> {
        self.events.subscribe()
    }

    /// Create an object; the store assigns uid, resource version, generation and creation time
    pub fn create(&self, mut obj: T) -> Result<T, LatticeError> {
        let key = obj.key();
        if key.name.is_empty() || key.namespace.is_empty() {
            return Err(LatticeError::ValidationError(format!(
                "{} must have a name and namespace",
                T::KIND
            )));
        }

        let created = {
            let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
            if objects.contains_key(&key) {
                return Err(LatticeError::AlreadyExists(format!("{} {}", T::KIND, key)));
            }

            let meta = obj.meta_mut();
            meta.uid = generate_uuid();
            meta.resource_version = self.next_version();
            meta.generation = 1;
            meta.creation_timestamp = Some(Utc::now());
            meta.deletion_timestamp = None;

            objects.insert(key.clone(), obj.clone());
            obj
        };

        debug!("created {} {}", T::KIND, key);
        self.publish(WatchEvent::Added(created.clone()));
        Ok(created)
    }

    pub fn get(&self, namespace: &str, name: &str) -> Result<T, LatticeError> {
        self.try_get(namespace, name)
            .ok_or_else(|| LatticeError::NotFound(format!("{} {}/{}", T::KIND, namespace, name)))
    }

    pub fn try_get(&self, namespace: &str, name: &str) -> Option<T> {
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        objects.get(&ObjectKey::new(namespace, name)).cloned()
    }

    /// Objects matching the selector, optionally limited to one namespace, in key order
    pub fn list(&self, namespace: Option<&str>, selector: &LabelSelector) -> Vec<T> {
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        objects
            .iter()
            .filter(|(key, _)| namespace.map_or(true, |ns| key.namespace == ns))
            .filter(|(_, obj)| selector.matches(&obj.meta().labels))
            .map(|(_, obj)| obj.clone())
            .collect()
    }

    /// Replace metadata and spec, conditional on the caller's resource version.
    ///
    /// The status sub-resource is left untouched. The generation is bumped when the spec changed.
    /// An object that is being deleted and has no finalizers left is reclaimed.
    pub fn update(&self, obj: T) -> Result<T, LatticeError> {
        let key = obj.key();
        let (event, result) = {
            let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
            let current = objects
                .get(&key)
                .ok_or_else(|| LatticeError::NotFound(format!("{} {}", T::KIND, key)))?;
            check_version(current, &obj)?;

            let mut next = current.clone();
            let spec_changed = next.spec() != obj.spec();
            {
                let meta = next.meta_mut();
                meta.labels = obj.meta().labels.clone();
                meta.finalizers = obj.meta().finalizers.clone();
                meta.owner_references = obj.meta().owner_references.clone();
                meta.resource_version = self.next_version();
                if spec_changed {
                    meta.generation += 1;
                }
            }
            *next.spec_mut() = obj.spec().clone();

            if next.meta().is_deleting() && next.meta().finalizers.is_empty() {
                objects.remove(&key);
                (WatchEvent::Deleted(next.clone()), next)
            } else {
                objects.insert(key.clone(), next.clone());
                (WatchEvent::Modified(next.clone()), next)
            }
        };

        self.publish(event);
        Ok(result)
    }

    /// Replace the status sub-resource, conditional on the caller's resource version
    pub fn update_status(&self, obj: T) -> Result<T, LatticeError> {
        let key = obj.key();
        let result = {
            let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
            let current = objects
                .get(&key)
                .ok_or_else(|| LatticeError::NotFound(format!("{} {}", T::KIND, key)))?;
            check_version(current, &obj)?;

            let mut next = current.clone();
            next.meta_mut().resource_version = self.next_version();
            *next.status_mut() = obj.status().clone();
            objects.insert(key, next.clone());
            next
        };

        self.publish(WatchEvent::Modified(result.clone()));
        Ok(result)
    }

    /// Apply `f` to a fresh copy of the object's status and write it back, retrying on conflicts
    pub fn mutate_status<F>(&self, namespace: &str, name: &str, mut f: F) -> Result<T, LatticeError>
    where
        F: FnMut(&mut T::Status),
    {
        const ATTEMPTS: usize = 5;

        let mut last_err = None;
        for _ in 0..ATTEMPTS {
            let mut obj = self.get(namespace, name)?;
            f(obj.status_mut());
            match self.update_status(obj) {
                Ok(updated) => return Ok(updated),
                Err(LatticeError::Conflict(msg)) => last_err = Some(LatticeError::Conflict(msg)),
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            LatticeError::Conflict(format!("{} {}/{}", T::KIND, namespace, name))
        }))
    }

    /// Request deletion.
    ///
    /// Objects without finalizers are removed right away. Otherwise the deletion timestamp is set
    /// and the object is reclaimed once its last finalizer is removed through [`Self::update`].
    pub fn delete(&self, namespace: &str, name: &str) -> Result<(), LatticeError> {
        self.delete_checked(namespace, name, None)
    }

    /// Request deletion of `obj` only if it is still at the resource version it was read at
    pub fn delete_unchanged(&self, obj: &T) -> Result<(), LatticeError> {
        self.delete_checked(&obj.meta().namespace, &obj.meta().name, Some(obj))
    }

    fn delete_checked(&self, namespace: &str, name: &str, expected: Option<&T>) -> Result<(), LatticeError> {
        let key = ObjectKey::new(namespace, name);
        let event = {
            let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
            let current = objects
                .get(&key)
                .ok_or_else(|| LatticeError::NotFound(format!("{} {}", T::KIND, key)))?;
            if let Some(expected) = expected {
                check_version(current, expected)?;
            }

            if current.meta().finalizers.is_empty() {
                objects.remove(&key).map(WatchEvent::Deleted)
            } else if current.meta().is_deleting() {
                None
            } else {
                let mut next = current.clone();
                next.meta_mut().deletion_timestamp = Some(Utc::now());
                next.meta_mut().resource_version = self.next_version();
                objects.insert(key.clone(), next.clone());
                Some(WatchEvent::Modified(next))
            }
        };

        if let Some(event) = event {
            debug!("deleting {} {}", T::KIND, key);
            self.publish(event);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.objects.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn check_version<T: Object>(current: &T, obj: &T) -> Result<(), LatticeError> {
    if current.meta().resource_version != obj.meta().resource_version {
        return Err(LatticeError::Conflict(format!(
            "{} {} has been modified (have {}, stored {})",
            T::KIND,
            obj.key(),
            obj.meta().resource_version,
            current.meta().resource_version
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::meta::ObjectMeta;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Widget {
        metadata: ObjectMeta,
        spec: u32,
        status: String,
    }

    crate::impl_object!(Widget, "Widget", u32, String);

    fn widget(name: &str, spec: u32) -> Widget {
        Widget {
            metadata: ObjectMeta::new("ns", name),
            spec,
            status: String::new(),
        }
    }

    fn store() -> ObjectStore<Widget> {
        ObjectStore::new(Arc::new(AtomicU64::new(0)))
    }

    #[test]
    fn test_create_assigns_metadata() {
        let store = store();
        let created = store.create(widget("a", 1)).unwrap();
        assert!(!created.metadata.uid.is_empty());
        assert_eq!(created.metadata.generation, 1);
        assert!(created.metadata.creation_timestamp.is_some());
        assert!(matches!(
            store.create(widget("a", 1)),
            Err(LatticeError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_update_requires_current_version() {
        let store = store();
        let created = store.create(widget("a", 1)).unwrap();

        let mut first = created.clone();
        first.spec = 2;
        let updated = store.update(first).unwrap();
        assert_eq!(updated.metadata.generation, 2);

        let mut stale = created;
        stale.spec = 3;
        assert!(matches!(store.update(stale), Err(LatticeError::Conflict(_))));
    }

    #[test]
    fn test_status_is_a_subresource() {
        let store = store();
        let created = store.create(widget("a", 1)).unwrap();

        let mut with_status = created.clone();
        with_status.status = "ready".to_string();
        with_status.spec = 9;
        let updated = store.update_status(with_status).unwrap();
        assert_eq!(updated.status, "ready");
        assert_eq!(updated.spec, 1);
        assert_eq!(updated.metadata.generation, 1);

        // spec updates keep the stored status
        let mut spec_change = updated.clone();
        spec_change.status = String::new();
        spec_change.spec = 5;
        let updated = store.update(spec_change).unwrap();
        assert_eq!(updated.status, "ready");
        assert_eq!(updated.spec, 5);
    }

    #[test]
    fn test_delete_waits_for_finalizers() {
        let store = store();
        let mut w = widget("a", 1);
        w.metadata.finalizers.push("test".to_string());
        store.create(w).unwrap();

        store.delete("ns", "a").unwrap();
        let deleting = store.get("ns", "a").unwrap();
        assert!(deleting.metadata.is_deleting());

        let mut finalized = deleting;
        finalized.metadata.finalizers.clear();
        store.update(finalized).unwrap();
        assert!(store.try_get("ns", "a").is_none());
    }

    #[test]
    fn test_delete_unchanged_rejects_stale_copy() {
        let store = store();
        let read = store.create(widget("a", 1)).unwrap();

        // someone else writes between our read and our delete
        let mut claimed = read.clone();
        claimed.metadata.labels.insert("owner".to_string(), "uid-b".to_string());
        store.update(claimed).unwrap();

        assert!(matches!(store.delete_unchanged(&read), Err(LatticeError::Conflict(_))));
        let kept = store.get("ns", "a").unwrap();
        assert_eq!(kept.metadata.label("owner"), Some("uid-b"));

        store.delete_unchanged(&kept).unwrap();
        assert!(store.try_get("ns", "a").is_none());
    }

    #[test]
    fn test_list_filters_namespace_and_labels() {
        let store = store();
        let mut a = widget("a", 1);
        a.metadata.labels.insert("k".to_string(), "v".to_string());
        store.create(a).unwrap();
        store.create(widget("b", 1)).unwrap();
        let mut other = widget("c", 1);
        other.metadata.namespace = "other".to_string();
        store.create(other).unwrap();

        assert_eq!(store.list(None, &LabelSelector::everything()).len(), 3);
        assert_eq!(store.list(Some("ns"), &LabelSelector::everything()).len(), 2);
        let labelled = store.list(Some("ns"), &LabelSelector::everything().eq("k", "v"));
        assert_eq!(labelled.len(), 1);
        assert_eq!(labelled[0].metadata.name, "a");
    }

    #[tokio::test]
    async fn test_watch_delivers_events() {
        let store = store();
        let mut rx = store.watch();
        store.create(widget("a", 1)).unwrap();
        store.delete("ns", "a").unwrap();

        assert!(matches!(rx.recv().await.unwrap(), WatchEvent::Added(_)));
        assert!(matches!(rx.recv().await.unwrap(), WatchEvent::Deleted(_)));
    }
}
