//! Systems API client

use crate::errors::LatticeError;
use crate::http::client::ApiClient;
use lattice_api::{CreateSystemRequest, System};

impl ApiClient {
    pub async fn create_system(&self, id: &str, definition_url: &str) -> Result<System, LatticeError> {
        let request = CreateSystemRequest {
            id: id.to_string(),
            definition_url: definition_url.to_string(),
        };
        self.post("/systems", &request).await
    }

    pub async fn list_systems(&self) -> Result<Vec<System>, LatticeError> {
        self.get("/systems").await
    }

    pub async fn get_system(&self, id: &str) -> Result<System, LatticeError> {
        self.get(&format!("/systems/{}", id)).await
    }

    /// Request deletion; the system goes away once everything it owns is gone
    pub async fn delete_system(&self, id: &str) -> Result<(), LatticeError> {
        self.delete(&format!("/systems/{}", id)).await
    }
}
