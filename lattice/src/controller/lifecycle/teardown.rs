//! Teardown controller

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use crate::api::labels;
use crate::api::{SystemState, Teardown, TeardownState};
use crate::controller::worker::Reconciler;
use crate::controller::ControllerContext;
use crate::definition::resolution::empty_system_tree;
use crate::definition::tree::Tree;
use crate::errors::LatticeError;
use crate::store::{LabelSelector, Object, ObjectKey};

pub struct TeardownController {
    ctx: Arc<ControllerContext>,
}

impl TeardownController {
    pub fn new(ctx: Arc<ControllerContext>) -> Self {
        Self { ctx }
    }

    fn handle_pending(&self, system_id: &str, teardown: Teardown) -> Result<(), LatticeError> {
        if let Err(e) = self
            .ctx
            .locks
            .acquire_teardown(system_id, &teardown.metadata.name)
        {
            return self.fail(system_id, teardown, e.to_string());
        }

        // an empty root system leaves nothing for the system controller to run
        let mut system = self.ctx.system(system_id)?;
        system.spec.definition = empty_system_tree();
        system.spec.workload_build_artifacts = Tree::new();
        system.metadata.labels.remove(labels::DEPLOY_ID);
        system.metadata.labels.remove(labels::BUILD_ID);
        self.ctx.store.systems.update(system)?;

        info!("{} is tearing down system {}", teardown.describe(), system_id);
        let mut status = teardown.status.clone();
        status.state = TeardownState::InProgress;
        status.start_timestamp = Some(Utc::now());
        self.ctx.store.teardowns.update_status(Teardown { status, ..teardown })?;
        Ok(())
    }

    fn handle_in_progress(&self, system_id: &str, teardown: Teardown) -> Result<(), LatticeError> {
        let system = self.ctx.system(system_id)?;
        if system.status.observed_generation < system.metadata.generation {
            return Ok(());
        }

        match system.status.state {
            SystemState::Stable => {
                info!("{} succeeded", teardown.describe());
                self.ctx.locks.release_teardown(system_id, &teardown.metadata.name);
                let mut status = teardown.status.clone();
                status.state = TeardownState::Succeeded;
                status.message = None;
                status.completion_timestamp = Some(Utc::now());
                self.ctx.store.teardowns.update_status(Teardown { status, ..teardown })?;
                Ok(())
            }
            SystemState::Degraded => self.fail(system_id, teardown, "system is degraded".to_string()),
            SystemState::Failed => self.fail(system_id, teardown, "system has failed".to_string()),
            _ => Ok(()),
        }
    }

    fn fail(&self, system_id: &str, teardown: Teardown, message: String) -> Result<(), LatticeError> {
        warn!("{} failed: {}", teardown.describe(), message);
        self.ctx.locks.release_teardown(system_id, &teardown.metadata.name);
        let mut status = teardown.status.clone();
        status.state = TeardownState::Failed;
        status.message = Some(message);
        status.completion_timestamp = Some(Utc::now());
        self.ctx.store.teardowns.update_status(Teardown { status, ..teardown })?;
        Ok(())
    }
}

#[async_trait]
impl Reconciler for TeardownController {
    fn name(&self) -> &'static str {
        "teardown"
    }

    fn resync_keys(&self) -> Vec<ObjectKey> {
        self.ctx
            .store
            .teardowns
            .list(None, &LabelSelector::everything())
            .iter()
            .map(Object::key)
            .collect()
    }

    async fn reconcile(&self, key: &ObjectKey) -> Result<(), LatticeError> {
        let system_id = self.ctx.system_id(&key.namespace)?.to_string();
        let teardown = match self.ctx.store.teardowns.try_get(&key.namespace, &key.name) {
            Some(teardown) => teardown,
            None => {
                self.ctx.locks.release_teardown(&system_id, &key.name);
                return Ok(());
            }
        };

        match teardown.status.state {
            TeardownState::Pending => self.handle_pending(&system_id, teardown),
            TeardownState::InProgress => self.handle_in_progress(&system_id, teardown),
            TeardownState::Succeeded | TeardownState::Failed => {
                self.ctx.locks.release_teardown(&system_id, &teardown.metadata.name);
                Ok(())
            }
        }
    }
}
