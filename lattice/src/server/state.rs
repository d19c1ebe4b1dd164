//! Server state

use std::sync::Arc;

use crate::backend::Backend;

/// Server state shared across handlers
pub struct ServerState {
    pub backend: Arc<Backend>,
}

impl ServerState {
    pub fn new(backend: Arc<Backend>) -> Self {
        Self { backend }
    }
}
