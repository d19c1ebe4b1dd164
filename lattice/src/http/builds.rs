//! Builds API client

use crate::errors::LatticeError;
use crate::http::client::ApiClient;
use lattice_api::{Build, CreateBuildRequest};

impl ApiClient {
    /// Build every workload of a system version
    pub async fn create_build_from_version(
        &self,
        system_id: &str,
        version: &str,
    ) -> Result<Build, LatticeError> {
        let request = CreateBuildRequest {
            version: Some(version.to_string()),
            path: None,
        };
        self.post(&format!("/systems/{}/builds", system_id), &request)
            .await
    }

    /// Build the workloads under one path of the deployed version
    pub async fn create_build_from_path(&self, system_id: &str, path: &str) -> Result<Build, LatticeError> {
        let request = CreateBuildRequest {
            version: None,
            path: Some(path.to_string()),
        };
        self.post(&format!("/systems/{}/builds", system_id), &request)
            .await
    }

    pub async fn list_builds(&self, system_id: &str) -> Result<Vec<Build>, LatticeError> {
        self.get(&format!("/systems/{}/builds", system_id)).await
    }

    pub async fn get_build(&self, system_id: &str, build_id: &str) -> Result<Build, LatticeError> {
        self.get(&format!("/systems/{}/builds/{}", system_id, build_id))
            .await
    }

    /// Log of the main container, or of a sidecar, of the workload at `path`
    pub async fn build_logs(
        &self,
        system_id: &str,
        build_id: &str,
        path: &str,
        sidecar: Option<&str>,
    ) -> Result<String, LatticeError> {
        let mut query = vec![("path", path)];
        if let Some(sidecar) = sidecar {
            query.push(("sidecar", sidecar));
        }
        self.get_text(
            &format!("/systems/{}/builds/{}/logs", system_id, build_id),
            &query,
        )
        .await
    }
}
