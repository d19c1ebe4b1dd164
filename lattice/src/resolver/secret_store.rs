//! System-scoped secrets

use std::sync::Arc;

use secrecy::SecretString;

use crate::api::{labels, system_namespace, NoStatus, Secret, SecretSpec};
use crate::definition::tree::PathSubcomponent;
use crate::errors::LatticeError;
use crate::store::{LabelSelector, ObjectMeta, Store};
use crate::utils::sha1_hex;

/// Object name of the secret stored at `path`
pub fn secret_name(path: &PathSubcomponent) -> String {
    sha1_hex(path.to_string().as_bytes())
}

/// Read access to a system's secrets
pub trait SecretStore: Send + Sync {
    fn get(&self, system_id: &str, path: &PathSubcomponent) -> Result<Option<SecretString>, LatticeError>;
}

/// Secrets kept in the object store, in each system's namespace
pub struct ObjectSecretStore {
    store: Arc<Store>,
    namespace_prefix: String,
}

impl ObjectSecretStore {
    pub fn new(store: Arc<Store>, namespace_prefix: impl Into<String>) -> Self {
        Self {
            store,
            namespace_prefix: namespace_prefix.into(),
        }
    }

    fn namespace(&self, system_id: &str) -> String {
        system_namespace(&self.namespace_prefix, system_id)
    }

    fn lookup(&self, system_id: &str, path: &PathSubcomponent) -> Result<Option<Secret>, LatticeError> {
        let secret = match self
            .store
            .secrets
            .try_get(&self.namespace(system_id), &secret_name(path))
        {
            Some(secret) => secret,
            None => return Ok(None),
        };

        if &secret.spec.path != path {
            return Err(LatticeError::InvariantViolation(format!(
                "secret name collision between {} and {}",
                path, secret.spec.path
            )));
        }
        Ok(Some(secret))
    }

    /// Every secret of the system, ordered by path
    pub fn list(&self, system_id: &str) -> Vec<Secret> {
        let mut secrets = self.store.secrets.list(
            Some(&self.namespace(system_id)),
            &LabelSelector::everything().exists(labels::SECRET_PATH),
        );
        secrets.sort_by(|a, b| a.spec.path.to_string().cmp(&b.spec.path.to_string()));
        secrets
    }

    /// Create or replace the secret at `path`
    pub fn set(&self, system_id: &str, path: &PathSubcomponent, value: String) -> Result<(), LatticeError> {
        match self.lookup(system_id, path)? {
            Some(mut secret) => {
                secret.spec.value = SecretString::from(value);
                self.store.secrets.update(secret)?;
            }
            None => {
                let mut metadata = ObjectMeta::new(self.namespace(system_id), secret_name(path));
                metadata
                    .labels
                    .insert(labels::SECRET_PATH.to_string(), path.to_domain());
                self.store.secrets.create(Secret {
                    metadata,
                    spec: SecretSpec {
                        path: path.clone(),
                        value: SecretString::from(value),
                    },
                    status: NoStatus::default(),
                })?;
            }
        }
        Ok(())
    }

    pub fn unset(&self, system_id: &str, path: &PathSubcomponent) -> Result<(), LatticeError> {
        match self.lookup(system_id, path)? {
            Some(_) => self
                .store
                .secrets
                .delete(&self.namespace(system_id), &secret_name(path)),
            None => Err(LatticeError::NotFound(format!("secret {}", path))),
        }
    }
}

impl SecretStore for ObjectSecretStore {
    fn get(&self, system_id: &str, path: &PathSubcomponent) -> Result<Option<SecretString>, LatticeError> {
        Ok(self
            .lookup(system_id, path)?
            .map(|secret| secret.spec.value))
    }
}
