//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use crate::api::DeploySpec;
use crate::definition::tree::{self, PathSubcomponent};
use crate::errors::LatticeError;
use crate::server::errors::ApiError;
use crate::server::models;
use crate::server::state::ServerState;
use crate::utils::version_info;
use lattice_api::{
    BuildLogsQuery, CreateBuildRequest, CreateDeployRequest, CreateSystemRequest, HealthResponse,
    SetSecretRequest, VersionResponse,
};

type ApiResult<T> = Result<T, ApiError>;

fn parse_path(path: Option<String>) -> Result<Option<tree::Path>, LatticeError> {
    path.map(|p| p.parse::<tree::Path>()).transpose()
}

/// Secret paths arrive either percent-encoded or as the tail of the url
fn parse_secret_path(raw: &str) -> Result<PathSubcomponent, LatticeError> {
    if raw.starts_with('/') {
        raw.parse()
    } else {
        format!("/{}", raw).parse()
    }
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "latticed".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

// =============================== SYSTEMS ================================== //

pub async fn create_system(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<CreateSystemRequest>,
) -> ApiResult<impl IntoResponse> {
    let system = state
        .backend
        .create_system(&request.id, &request.definition_url)?;
    Ok((StatusCode::CREATED, Json(lattice_api::System::from(&system))))
}

pub async fn list_systems(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let systems: Vec<lattice_api::System> =
        state.backend.list_systems().iter().map(Into::into).collect();
    Json(systems)
}

pub async fn get_system(
    State(state): State<Arc<ServerState>>,
    Path(system_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let system = state.backend.get_system(&system_id)?;
    Ok(Json(lattice_api::System::from(&system)))
}

pub async fn delete_system(
    State(state): State<Arc<ServerState>>,
    Path(system_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.backend.delete_system(&system_id)?;
    Ok(StatusCode::ACCEPTED)
}

// =============================== BUILDS ================================== //

pub async fn create_build(
    State(state): State<Arc<ServerState>>,
    Path(system_id): Path<String>,
    Json(request): Json<CreateBuildRequest>,
) -> ApiResult<impl IntoResponse> {
    let path = parse_path(request.path)?;
    let build = state.backend.create_build(&system_id, request.version, path)?;
    Ok((StatusCode::CREATED, Json(lattice_api::Build::from(&build))))
}

pub async fn list_builds(
    State(state): State<Arc<ServerState>>,
    Path(system_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let builds: Vec<lattice_api::Build> = state
        .backend
        .list_builds(&system_id)?
        .iter()
        .map(Into::into)
        .collect();
    Ok(Json(builds))
}

pub async fn get_build(
    State(state): State<Arc<ServerState>>,
    Path((system_id, build_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let build = state.backend.get_build(&system_id, &build_id)?;
    Ok(Json(lattice_api::Build::from(&build)))
}

pub async fn build_logs(
    State(state): State<Arc<ServerState>>,
    Path((system_id, build_id)): Path<(String, String)>,
    Query(query): Query<BuildLogsQuery>,
) -> ApiResult<String> {
    let path: tree::Path = query.path.parse()?;
    state
        .backend
        .build_logs(&system_id, &build_id, &path, query.sidecar.as_deref())?
        .ok_or_else(|| {
            ApiError(LatticeError::NotFound(format!(
                "logs of {} in build {}",
                path, build_id
            )))
        })
}

// =============================== DEPLOYS ================================== //

pub async fn create_deploy(
    State(state): State<Arc<ServerState>>,
    Path(system_id): Path<String>,
    Json(request): Json<CreateDeployRequest>,
) -> ApiResult<impl IntoResponse> {
    let spec = DeploySpec {
        build: request.build,
        path: parse_path(request.path)?,
        version: request.version,
    };
    let deploy = state.backend.create_deploy(&system_id, spec)?;
    Ok((StatusCode::CREATED, Json(lattice_api::Deploy::from(&deploy))))
}

pub async fn list_deploys(
    State(state): State<Arc<ServerState>>,
    Path(system_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let deploys: Vec<lattice_api::Deploy> = state
        .backend
        .list_deploys(&system_id)?
        .iter()
        .map(Into::into)
        .collect();
    Ok(Json(deploys))
}

pub async fn get_deploy(
    State(state): State<Arc<ServerState>>,
    Path((system_id, deploy_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let deploy = state.backend.get_deploy(&system_id, &deploy_id)?;
    Ok(Json(lattice_api::Deploy::from(&deploy)))
}

// =============================== TEARDOWNS ================================== //

pub async fn create_teardown(
    State(state): State<Arc<ServerState>>,
    Path(system_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let teardown = state.backend.create_teardown(&system_id)?;
    Ok((StatusCode::CREATED, Json(lattice_api::Teardown::from(&teardown))))
}

pub async fn list_teardowns(
    State(state): State<Arc<ServerState>>,
    Path(system_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let teardowns: Vec<lattice_api::Teardown> = state
        .backend
        .list_teardowns(&system_id)?
        .iter()
        .map(Into::into)
        .collect();
    Ok(Json(teardowns))
}

pub async fn get_teardown(
    State(state): State<Arc<ServerState>>,
    Path((system_id, teardown_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let teardown = state.backend.get_teardown(&system_id, &teardown_id)?;
    Ok(Json(lattice_api::Teardown::from(&teardown)))
}

// =============================== SECRETS ================================== //

pub async fn list_secrets(
    State(state): State<Arc<ServerState>>,
    Path(system_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let secrets: Vec<lattice_api::Secret> = state
        .backend
        .list_secrets(&system_id)?
        .iter()
        .map(Into::into)
        .collect();
    Ok(Json(secrets))
}

pub async fn get_secret(
    State(state): State<Arc<ServerState>>,
    Path((system_id, secret)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let path = parse_secret_path(&secret)?;
    let secret = state.backend.get_secret(&system_id, &path)?;
    Ok(Json(lattice_api::Secret::from(&secret)))
}

pub async fn set_secret(
    State(state): State<Arc<ServerState>>,
    Path((system_id, secret)): Path<(String, String)>,
    Json(request): Json<SetSecretRequest>,
) -> ApiResult<impl IntoResponse> {
    let path = parse_secret_path(&secret)?;
    state.backend.set_secret(&system_id, &path, request.value)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn unset_secret(
    State(state): State<Arc<ServerState>>,
    Path((system_id, secret)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let path = parse_secret_path(&secret)?;
    state.backend.unset_secret(&system_id, &path)?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================== SERVICES ================================== //

#[derive(Debug, Default, Deserialize)]
pub struct ServicesQuery {
    /// Only the service at this path
    pub path: Option<String>,
}

pub async fn list_services(
    State(state): State<Arc<ServerState>>,
    Path(system_id): Path<String>,
    Query(query): Query<ServicesQuery>,
) -> ApiResult<impl IntoResponse> {
    let services = match parse_path(query.path)? {
        Some(path) => vec![state.backend.get_service_by_path(&system_id, &path)?],
        None => state.backend.list_services(&system_id)?,
    };
    let mut listed = Vec::with_capacity(services.len());
    for service in &services {
        let instances = state
            .backend
            .service_instances(&system_id, &service.metadata.name)?;
        listed.push(models::service(service, &instances));
    }
    Ok(Json(listed))
}

pub async fn get_service(
    State(state): State<Arc<ServerState>>,
    Path((system_id, service_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let service = state.backend.get_service(&system_id, &service_id)?;
    let instances = state.backend.service_instances(&system_id, &service_id)?;
    Ok(Json(models::service(&service, &instances)))
}

pub async fn service_logs(
    State(state): State<Arc<ServerState>>,
    Path((system_id, service_id)): Path<(String, String)>,
) -> ApiResult<String> {
    Ok(state.backend.service_logs(&system_id, &service_id).await?)
}
