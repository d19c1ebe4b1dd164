//! HTTP client implementation

use reqwest::{Client, Method, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error};

use crate::errors::LatticeError;
use lattice_api::ErrorResponse;

/// Client of a lattice daemon's API
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Create a new client for a daemon, e.g. `http://127.0.0.1:8080`
    pub fn new(base_url: &str) -> Result<Self, LatticeError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1{}", self.base_url, path)
    }

    async fn send<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<Response, LatticeError> {
        let url = self.url(path);
        debug!("{} {}", method, url);

        let mut request = self.client.request(method.clone(), &url);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        error!("HTTP {} {} failed: {} - {}", method, url, status, body);
        Err(error_from_response(status, &body))
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, LatticeError> {
        let response = self.send::<()>(Method::GET, path, &[], None).await?;
        Ok(response.json().await?)
    }

    /// Make a GET request for a plain text body
    pub async fn get_text(&self, path: &str, query: &[(&str, &str)]) -> Result<String, LatticeError> {
        let response = self.send::<()>(Method::GET, path, query, None).await?;
        Ok(response.text().await?)
    }

    /// Make a POST request
    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, LatticeError> {
        let response = self.send(Method::POST, path, &[], Some(body)).await?;
        Ok(response.json().await?)
    }

    /// Make a PUT request whose response has no body
    pub async fn put<B: Serialize>(&self, path: &str, body: &B) -> Result<(), LatticeError> {
        self.send(Method::PUT, path, &[], Some(body)).await?;
        Ok(())
    }

    /// Make a DELETE request
    pub async fn delete(&self, path: &str) -> Result<(), LatticeError> {
        self.send::<()>(Method::DELETE, path, &[], None).await?;
        Ok(())
    }
}

/// Rebuild the server-side error from an error response
pub fn error_from_response(status: StatusCode, body: &str) -> LatticeError {
    let Ok(response) = serde_json::from_str::<ErrorResponse>(body) else {
        return LatticeError::ServerError(format!("{}: {}", status, body));
    };
    let message = response.message;
    match response.code.as_str() {
        "invalid-id" => LatticeError::InvalidId(message),
        "invalid-path" => LatticeError::InvalidPath(message),
        "invalid-subcomponent" => LatticeError::InvalidSubcomponent(message),
        "invalid-request" => LatticeError::ValidationError(message),
        "not-found" => LatticeError::NotFound(message),
        "conflict" => LatticeError::Conflict(message),
        "system-pending" => LatticeError::SystemPending(message),
        "system-failed" => LatticeError::SystemFailed(message),
        "system-deleting" => LatticeError::SystemDeleting(message),
        _ => LatticeError::ServerError(message),
    }
}
