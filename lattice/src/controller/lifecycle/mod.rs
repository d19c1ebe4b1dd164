//! Deploy and teardown lifecycle

pub mod deploy;
pub mod lock;
pub mod teardown;

use tracing::warn;

use crate::api::{DeployState, TeardownState};
use crate::controller::ControllerContext;
use crate::definition::tree::Path;
use crate::store::LabelSelector;

pub use deploy::DeployController;
pub use lock::{LifecycleLocks, LockError};
pub use teardown::TeardownController;

/// Take the locks of every deploy and teardown that is still running
pub fn restore_locks(ctx: &ControllerContext) {
    let all = LabelSelector::everything();

    for deploy in ctx.store.deploys.list(None, &all) {
        if !matches!(deploy.status.state, DeployState::Accepted | DeployState::InProgress) {
            continue;
        }
        let system_id = match ctx.system_id(&deploy.metadata.namespace) {
            Ok(system_id) => system_id,
            Err(_) => continue,
        };
        let path = deploy.status.path.clone().unwrap_or_else(Path::root);
        if let Err(e) = ctx.locks.acquire_deploy(system_id, &deploy.metadata.name, &path) {
            warn!("Unable to restore lock of deploy {}: {}", deploy.metadata.name, e);
        }
    }

    for teardown in ctx.store.teardowns.list(None, &all) {
        if teardown.status.state != TeardownState::InProgress {
            continue;
        }
        let system_id = match ctx.system_id(&teardown.metadata.namespace) {
            Ok(system_id) => system_id,
            Err(_) => continue,
        };
        if let Err(e) = ctx.locks.acquire_teardown(system_id, &teardown.metadata.name) {
            warn!("Unable to restore lock of teardown {}: {}", teardown.metadata.name, e);
        }
    }
}
