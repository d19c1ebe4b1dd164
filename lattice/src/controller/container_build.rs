//! Container build controller
//!
//! Hands pending container builds to the executor and deletes container builds no build owns.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::api::ContainerBuildState;
use crate::controller::worker::Reconciler;
use crate::controller::ControllerContext;
use crate::errors::LatticeError;
use crate::store::{LabelSelector, Object, ObjectKey};

pub struct ContainerBuildController {
    ctx: Arc<ControllerContext>,
}

impl ContainerBuildController {
    pub fn new(ctx: Arc<ControllerContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Reconciler for ContainerBuildController {
    fn name(&self) -> &'static str {
        "container-build"
    }

    fn resync_keys(&self) -> Vec<ObjectKey> {
        self.ctx
            .store
            .container_builds
            .list(None, &LabelSelector::everything())
            .iter()
            .map(Object::key)
            .collect()
    }

    async fn reconcile(&self, key: &ObjectKey) -> Result<(), LatticeError> {
        let store = &self.ctx.store;
        let cb = match store.container_builds.try_get(&key.namespace, &key.name) {
            Some(cb) => cb,
            None => return Ok(()),
        };
        if cb.metadata.is_deleting() {
            return Ok(());
        }

        // a build may claim it after this read, so only delete the version that had no owners
        if cb.metadata.owner_references.is_empty() {
            info!("Deleting {}, no build references it", cb.describe());
            return match store.container_builds.delete_unchanged(&cb) {
                Ok(()) | Err(LatticeError::NotFound(_)) => Ok(()),
                Err(e) => Err(e),
            };
        }

        if cb.status.state == ContainerBuildState::Pending {
            self.ctx.executor.submit(&cb)?;
        }
        Ok(())
    }
}
