//! Error types for the Lattice controller

use thiserror::Error;

/// Failures raised by the git fetch layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GitError {
    #[error("reference {reference} not found in {url}")]
    RefNotFound { url: String, reference: String },

    #[error("authentication required for {0}")]
    AuthRequired(String),

    #[error("file {file} does not exist at commit {commit}")]
    FileMissing { commit: String, file: String },

    #[error("git command failed: {0}")]
    Command(String),
}

/// Failures raised while hydrating a component tree
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("reference not found: {0}")]
    RefNotFound(String),

    #[error("authentication required: {0}")]
    AuthRequired(String),

    #[error("file missing: {0}")]
    FileMissing(String),

    #[error("no tags match {0}")]
    NoMatchingVersion(String),

    #[error("resolution depth exceeded at {0}")]
    DepthExceeded(String),

    #[error("unable to parse template: {0}")]
    TemplateParse(String),

    #[error("invalid reference: {0}")]
    InvalidReference(String),

    #[error("secret error: {0}")]
    Secret(String),

    #[error("{0}")]
    Other(String),
}

impl From<GitError> for ResolutionError {
    fn from(err: GitError) -> Self {
        match err {
            GitError::RefNotFound { .. } => ResolutionError::RefNotFound(err.to_string()),
            GitError::AuthRequired(_) => ResolutionError::AuthRequired(err.to_string()),
            GitError::FileMissing { .. } => ResolutionError::FileMissing(err.to_string()),
            GitError::Command(msg) => ResolutionError::Other(msg),
        }
    }
}

/// Main error type for Lattice
#[derive(Error, Debug)]
pub enum LatticeError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("invalid id: {0}")]
    InvalidId(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid subcomponent: {0}")]
    InvalidSubcomponent(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("resolution failure: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("{0}")]
    ContainerBuildUser(String),

    #[error("container build internal error: {0}")]
    ContainerBuildInternal(String),

    #[error("system {0} is pending")]
    SystemPending(String),

    #[error("system {0} has failed")]
    SystemFailed(String),

    #[error("system {0} is being deleted")]
    SystemDeleting(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LatticeError {
    /// Stable discriminant exposed to API callers
    pub fn code(&self) -> &'static str {
        match self {
            LatticeError::InvalidId(_) => "invalid-id",
            LatticeError::InvalidPath(_) => "invalid-path",
            LatticeError::InvalidSubcomponent(_) => "invalid-subcomponent",
            LatticeError::ValidationError(_) => "invalid-request",
            LatticeError::NotFound(_) => "not-found",
            LatticeError::AlreadyExists(_) => "conflict",
            LatticeError::Conflict(_) => "conflict",
            LatticeError::InvariantViolation(_) => "internal-error",
            LatticeError::Resolution(_) => "resolution-failure",
            LatticeError::ContainerBuildUser(_) => "container-build-failure",
            LatticeError::ContainerBuildInternal(_) => "container-build-failure",
            LatticeError::SystemPending(_) => "system-pending",
            LatticeError::SystemFailed(_) => "system-failed",
            LatticeError::SystemDeleting(_) => "system-deleting",
            _ => "internal-error",
        }
    }

    /// Whether a reconcile that hit this error should simply be retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LatticeError::Conflict(_)
                | LatticeError::AlreadyExists(_)
                | LatticeError::IoError(_)
                | LatticeError::HttpError(_)
        )
    }

    /// Message safe to hand back to a caller
    pub fn public_message(&self) -> String {
        match self {
            LatticeError::ContainerBuildInternal(_) => "failed due to an internal error".to_string(),
            LatticeError::InvariantViolation(_) | LatticeError::Internal(_) => {
                "internal error".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<GitError> for LatticeError {
    fn from(err: GitError) -> Self {
        LatticeError::Resolution(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_errors_map_to_resolution_kinds() {
        let err: ResolutionError = GitError::AuthRequired("git@example.com:s.git".to_string()).into();
        assert!(matches!(err, ResolutionError::AuthRequired(_)));

        let err: ResolutionError = GitError::FileMissing {
            commit: "abc".to_string(),
            file: "lattice.yaml".to_string(),
        }
        .into();
        assert!(matches!(err, ResolutionError::FileMissing(_)));
    }

    #[test]
    fn test_internal_errors_are_collapsed() {
        let err = LatticeError::ContainerBuildInternal("disk full".to_string());
        assert_eq!(err.public_message(), "failed due to an internal error");

        let err = LatticeError::ContainerBuildUser("exit status 1".to_string());
        assert_eq!(err.public_message(), "exit status 1");
    }
}
