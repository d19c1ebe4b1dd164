//! Lifecycle locks serialising deploys and teardowns of a system
//!
//! A deploy holds an intention-exclusive lock on every ancestor of its path and an exclusive lock
//! on the path itself. A teardown holds an exclusive lock on the root. Two deploys therefore only
//! conflict when one path covers the other.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use thiserror::Error;
use tracing::debug;

use crate::definition::tree::Path;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("unable to acquire lifecycle lock: locked by deploys {0}")]
    Deploys(String),

    #[error("unable to acquire lifecycle lock: locked by teardown {0}")]
    Teardown(String),
}

#[derive(Default)]
struct SystemLocks {
    deploys: BTreeMap<String, Path>,
    teardown: Option<String>,
}

impl SystemLocks {
    fn is_empty(&self) -> bool {
        self.deploys.is_empty() && self.teardown.is_none()
    }
}

/// Locks held per system, keyed by system id
#[derive(Default)]
pub struct LifecycleLocks {
    systems: Mutex<HashMap<String, SystemLocks>>,
}

impl LifecycleLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock `path` for a deploy. Re-acquiring a lock the deploy already holds succeeds.
    pub fn acquire_deploy(&self, system_id: &str, deploy_id: &str, path: &Path) -> Result<(), LockError> {
        let mut systems = self.systems.lock().unwrap_or_else(|e| e.into_inner());
        let locks = systems.entry(system_id.to_string()).or_default();

        if let Some(teardown) = &locks.teardown {
            return Err(LockError::Teardown(teardown.clone()));
        }

        let conflicting: Vec<&str> = locks
            .deploys
            .iter()
            .filter(|(id, _)| id.as_str() != deploy_id)
            .filter(|(_, held)| held.has_prefix(path) || path.has_prefix(held))
            .map(|(id, _)| id.as_str())
            .collect();
        if !conflicting.is_empty() {
            return Err(LockError::Deploys(conflicting.join(", ")));
        }

        debug!("deploy {} locked {} in system {}", deploy_id, path, system_id);
        locks.deploys.insert(deploy_id.to_string(), path.clone());
        Ok(())
    }

    pub fn release_deploy(&self, system_id: &str, deploy_id: &str) {
        let mut systems = self.systems.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(locks) = systems.get_mut(system_id) {
            if locks.deploys.remove(deploy_id).is_some() {
                debug!("deploy {} released its lock in system {}", deploy_id, system_id);
            }
            if locks.is_empty() {
                systems.remove(system_id);
            }
        }
    }

    /// Lock the whole system for a teardown
    pub fn acquire_teardown(&self, system_id: &str, teardown_id: &str) -> Result<(), LockError> {
        let mut systems = self.systems.lock().unwrap_or_else(|e| e.into_inner());
        let locks = systems.entry(system_id.to_string()).or_default();

        match &locks.teardown {
            Some(held) if held != teardown_id => return Err(LockError::Teardown(held.clone())),
            _ => {}
        }
        if !locks.deploys.is_empty() {
            let ids: Vec<&str> = locks.deploys.keys().map(String::as_str).collect();
            return Err(LockError::Deploys(ids.join(", ")));
        }

        debug!("teardown {} locked system {}", teardown_id, system_id);
        locks.teardown = Some(teardown_id.to_string());
        Ok(())
    }

    pub fn release_teardown(&self, system_id: &str, teardown_id: &str) {
        let mut systems = self.systems.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(locks) = systems.get_mut(system_id) {
            if locks.teardown.as_deref() == Some(teardown_id) {
                locks.teardown = None;
                debug!("teardown {} released system {}", teardown_id, system_id);
            }
            if locks.is_empty() {
                systems.remove(system_id);
            }
        }
    }

    /// Drop every lock held in a system
    pub fn release_system(&self, system_id: &str) {
        let mut systems = self.systems.lock().unwrap_or_else(|e| e.into_inner());
        systems.remove(system_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> Path {
        Path::new(s).unwrap()
    }

    #[test]
    fn test_disjoint_deploys_share_ancestors() {
        let locks = LifecycleLocks::new();
        locks.acquire_deploy("s", "d1", &p("/a/b")).unwrap();
        locks.acquire_deploy("s", "d2", &p("/a/c")).unwrap();
        // re-acquire is idempotent
        locks.acquire_deploy("s", "d1", &p("/a/b")).unwrap();
    }

    #[test]
    fn test_covering_deploys_conflict() {
        let locks = LifecycleLocks::new();
        locks.acquire_deploy("s", "d1", &p("/a/b")).unwrap();
        locks.acquire_deploy("s", "d2", &p("/a/c")).unwrap();

        let err = locks.acquire_deploy("s", "d3", &p("/a")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "unable to acquire lifecycle lock: locked by deploys d1, d2"
        );
        assert!(locks.acquire_deploy("s", "d4", &p("/a/b/c")).is_err());
        // other systems are unaffected
        locks.acquire_deploy("t", "d5", &p("/")).unwrap();
    }

    #[test]
    fn test_teardown_excludes_deploys() {
        let locks = LifecycleLocks::new();
        locks.acquire_deploy("s", "d1", &p("/a")).unwrap();
        assert_eq!(
            locks.acquire_teardown("s", "t1").unwrap_err(),
            LockError::Deploys("d1".to_string())
        );

        locks.release_deploy("s", "d1");
        locks.acquire_teardown("s", "t1").unwrap();
        assert_eq!(
            locks.acquire_deploy("s", "d2", &p("/b")).unwrap_err().to_string(),
            "unable to acquire lifecycle lock: locked by teardown t1"
        );

        locks.release_teardown("s", "t1");
        locks.acquire_deploy("s", "d2", &p("/b")).unwrap();
    }
}
