//! Secret objects

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::api::NoStatus;
use crate::definition::tree::PathSubcomponent;
use crate::store::meta::ObjectMeta;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretSpec {
    pub path: PathSubcomponent,

    /// Redacted in `Debug` output
    #[serde(serialize_with = "serialize_secret", deserialize_with = "deserialize_secret")]
    pub value: SecretString,
}

impl PartialEq for SecretSpec {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && self.value.expose_secret() == other.value.expose_secret()
    }
}

impl Eq for SecretSpec {}

fn serialize_secret<S: Serializer>(value: &SecretString, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(value.expose_secret())
}

fn deserialize_secret<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SecretString, D::Error> {
    String::deserialize(deserializer).map(SecretString::from)
}

/// A system secret; named by the SHA-1 of its path subcomponent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Secret {
    pub metadata: ObjectMeta,

    pub spec: SecretSpec,

    #[serde(default)]
    pub status: NoStatus,
}

crate::impl_object!(Secret, "Secret", SecretSpec, NoStatus);
