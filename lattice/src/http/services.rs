//! Services API client

use crate::errors::LatticeError;
use crate::http::client::ApiClient;
use lattice_api::Service;

impl ApiClient {
    pub async fn list_services(&self, system_id: &str) -> Result<Vec<Service>, LatticeError> {
        self.get(&format!("/systems/{}/services", system_id)).await
    }

    pub async fn get_service(&self, system_id: &str, service_id: &str) -> Result<Service, LatticeError> {
        self.get(&format!("/systems/{}/services/{}", system_id, service_id))
            .await
    }

    /// Output of every instance of a service
    pub async fn service_logs(&self, system_id: &str, service_id: &str) -> Result<String, LatticeError> {
        self.get_text(&format!("/systems/{}/services/{}/logs", system_id, service_id), &[])
            .await
    }
}
