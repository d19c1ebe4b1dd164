//! Deploys and teardowns API client

use crate::errors::LatticeError;
use crate::http::client::ApiClient;
use lattice_api::{CreateDeployRequest, Deploy, Teardown};

impl ApiClient {
    async fn create_deploy(&self, system_id: &str, request: CreateDeployRequest) -> Result<Deploy, LatticeError> {
        self.post(&format!("/systems/{}/deploys", system_id), &request)
            .await
    }

    pub async fn create_deploy_from_build(&self, system_id: &str, build_id: &str) -> Result<Deploy, LatticeError> {
        let request = CreateDeployRequest {
            build: Some(build_id.to_string()),
            ..Default::default()
        };
        self.create_deploy(system_id, request).await
    }

    pub async fn create_deploy_from_path(&self, system_id: &str, path: &str) -> Result<Deploy, LatticeError> {
        let request = CreateDeployRequest {
            path: Some(path.to_string()),
            ..Default::default()
        };
        self.create_deploy(system_id, request).await
    }

    pub async fn create_deploy_from_version(&self, system_id: &str, version: &str) -> Result<Deploy, LatticeError> {
        let request = CreateDeployRequest {
            version: Some(version.to_string()),
            ..Default::default()
        };
        self.create_deploy(system_id, request).await
    }

    pub async fn list_deploys(&self, system_id: &str) -> Result<Vec<Deploy>, LatticeError> {
        self.get(&format!("/systems/{}/deploys", system_id)).await
    }

    pub async fn get_deploy(&self, system_id: &str, deploy_id: &str) -> Result<Deploy, LatticeError> {
        self.get(&format!("/systems/{}/deploys/{}", system_id, deploy_id))
            .await
    }

    pub async fn create_teardown(&self, system_id: &str) -> Result<Teardown, LatticeError> {
        self.post(&format!("/systems/{}/teardowns", system_id), &serde_json::json!({}))
            .await
    }

    pub async fn list_teardowns(&self, system_id: &str) -> Result<Vec<Teardown>, LatticeError> {
        self.get(&format!("/systems/{}/teardowns", system_id)).await
    }

    pub async fn get_teardown(&self, system_id: &str, teardown_id: &str) -> Result<Teardown, LatticeError> {
        self.get(&format!("/systems/{}/teardowns/{}", system_id, teardown_id))
            .await
    }
}
