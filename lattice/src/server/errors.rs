//! Error responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::error;

use crate::errors::LatticeError;
use lattice_api::ErrorResponse;

/// A [`LatticeError`] rendered as `{code, message}`
#[derive(Debug)]
pub struct ApiError(pub LatticeError);

impl From<LatticeError> for ApiError {
    fn from(e: LatticeError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            LatticeError::InvalidId(_)
            | LatticeError::InvalidPath(_)
            | LatticeError::InvalidSubcomponent(_)
            | LatticeError::ValidationError(_) => StatusCode::BAD_REQUEST,
            LatticeError::NotFound(_) => StatusCode::NOT_FOUND,
            LatticeError::AlreadyExists(_)
            | LatticeError::Conflict(_)
            | LatticeError::SystemPending(_)
            | LatticeError::SystemFailed(_)
            | LatticeError::SystemDeleting(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }
        let body = ErrorResponse {
            code: self.0.code().to_string(),
            message: self.0.public_message(),
        };
        (status, Json(body)).into_response()
    }
}
