//! Object metadata shared by every stored kind

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Namespace and name of an object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Non-blocking reference from an object to one of its owners
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerReference {
    pub kind: String,

    pub name: String,

    pub uid: String,
}

/// Metadata carried by every object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,

    pub namespace: String,

    /// Assigned by the store on create
    #[serde(default)]
    pub uid: String,

    /// Opaque optimistic-concurrency token, bumped on every write
    #[serde(default)]
    pub resource_version: u64,

    /// Bumped whenever the spec changes
    #[serde(default)]
    pub generation: u64,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    pub finalizers: Vec<String>,

    #[serde(default)]
    pub owner_references: Vec<OwnerReference>,

    #[serde(default)]
    pub creation_timestamp: Option<DateTime<Utc>>,

    /// Set when deletion was requested while finalizers were present
    #[serde(default)]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_owner(mut self, owner: OwnerReference) -> Self {
        self.owner_references.push(owner);
        self
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }

    pub fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    pub fn is_owned_by(&self, uid: &str) -> bool {
        self.owner_references.iter().any(|owner| owner.uid == uid)
    }
}

/// A stored object kind: metadata, a spec and a status sub-resource
pub trait Object: Clone + fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Kind name used in owner references and messages
    const KIND: &'static str;

    type Spec: Clone + fmt::Debug + PartialEq + Send + Sync;

    type Status: Clone + fmt::Debug + Default + PartialEq + Send + Sync;

    fn from_parts(metadata: ObjectMeta, spec: Self::Spec, status: Self::Status) -> Self;

    fn meta(&self) -> &ObjectMeta;

    fn meta_mut(&mut self) -> &mut ObjectMeta;

    fn spec(&self) -> &Self::Spec;

    fn spec_mut(&mut self) -> &mut Self::Spec;

    fn status(&self) -> &Self::Status;

    fn status_mut(&mut self) -> &mut Self::Status;

    fn key(&self) -> ObjectKey {
        self.meta().key()
    }

    /// Human readable description, e.g. `build default/1234`
    fn describe(&self) -> String {
        format!("{} {}", Self::KIND.to_lowercase(), self.key())
    }

    /// Reference that marks this object as an owner of another
    fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            kind: Self::KIND.to_string(),
            name: self.meta().name.clone(),
            uid: self.meta().uid.clone(),
        }
    }
}

/// Implement [`Object`] for a struct with `metadata`, `spec` and `status` fields
#[macro_export]
macro_rules! impl_object {
    ($ty:ty, $kind:expr, $spec:ty, $status:ty) => {
        impl $crate::store::meta::Object for $ty {
            const KIND: &'static str = $kind;

            type Spec = $spec;

            type Status = $status;

            fn from_parts(
                metadata: $crate::store::meta::ObjectMeta,
                spec: $spec,
                status: $status,
            ) -> Self {
                Self {
                    metadata,
                    spec,
                    status,
                }
            }

            fn meta(&self) -> &$crate::store::meta::ObjectMeta {
                &self.metadata
            }

            fn meta_mut(&mut self) -> &mut $crate::store::meta::ObjectMeta {
                &mut self.metadata
            }

            fn spec(&self) -> &$spec {
                &self.spec
            }

            fn spec_mut(&mut self) -> &mut $spec {
                &mut self.spec
            }

            fn status(&self) -> &$status {
                &self.status
            }

            fn status_mut(&mut self) -> &mut $status {
                &mut self.status
            }
        }
    };
}
