//! Secrets API client

use url::form_urlencoded::byte_serialize;

use crate::errors::LatticeError;
use crate::http::client::ApiClient;
use lattice_api::{Secret, SetSecretRequest};

/// `/systems/{id}/secrets/{path:name}` with the secret path as one encoded segment
fn secret_url(system_id: &str, secret: &str) -> String {
    let encoded: String = byte_serialize(secret.as_bytes()).collect();
    format!("/systems/{}/secrets/{}", system_id, encoded)
}

impl ApiClient {
    pub async fn list_secrets(&self, system_id: &str) -> Result<Vec<Secret>, LatticeError> {
        self.get(&format!("/systems/{}/secrets", system_id)).await
    }

    /// Secret at `path:name`
    pub async fn get_secret(&self, system_id: &str, secret: &str) -> Result<Secret, LatticeError> {
        self.get(&secret_url(system_id, secret)).await
    }

    pub async fn set_secret(&self, system_id: &str, secret: &str, value: &str) -> Result<(), LatticeError> {
        let request = SetSecretRequest {
            value: value.to_string(),
        };
        self.put(&secret_url(system_id, secret), &request).await
    }

    pub async fn unset_secret(&self, system_id: &str, secret: &str) -> Result<(), LatticeError> {
        self.delete(&secret_url(system_id, secret)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_url_encodes_path() {
        assert_eq!(
            secret_url("petflix", "/a/b:password"),
            "/systems/petflix/secrets/%2Fa%2Fb%3Apassword"
        );
    }
}
