//! Node pool controller
//!
//! Node pools are bookkeeping only: the pool is reported at its requested size once observed.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::api::labels;
use crate::api::{NodePool, NodePoolState, NodePoolStatus};
use crate::controller::worker::Reconciler;
use crate::controller::{add_finalizer, remove_finalizer, ControllerContext};
use crate::errors::LatticeError;
use crate::store::{LabelSelector, Object, ObjectKey};

pub struct NodePoolController {
    ctx: Arc<ControllerContext>,
}

impl NodePoolController {
    pub fn new(ctx: Arc<ControllerContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Reconciler for NodePoolController {
    fn name(&self) -> &'static str {
        "node-pool"
    }

    fn resync_keys(&self) -> Vec<ObjectKey> {
        self.ctx
            .store
            .node_pools
            .list(None, &LabelSelector::everything())
            .iter()
            .map(Object::key)
            .collect()
    }

    async fn reconcile(&self, key: &ObjectKey) -> Result<(), LatticeError> {
        let store = &self.ctx.store;
        let pool = match store.node_pools.try_get(&key.namespace, &key.name) {
            Some(pool) => pool,
            None => return Ok(()),
        };

        if pool.metadata.is_deleting() {
            info!("Released {}", pool.describe());
            return remove_finalizer(&store.node_pools, pool, labels::NODE_POOL_FINALIZER);
        }

        let pool = add_finalizer(&store.node_pools, pool, labels::NODE_POOL_FINALIZER)?;
        let status = NodePoolStatus {
            observed_generation: pool.metadata.generation,
            state: NodePoolState::Stable,
            num_instances: pool.spec.num_instances,
            message: None,
        };
        if status != pool.status {
            debug!("{} is stable with {} instances", pool.describe(), status.num_instances);
            store.node_pools.update_status(NodePool { status, ..pool })?;
        }
        Ok(())
    }
}
