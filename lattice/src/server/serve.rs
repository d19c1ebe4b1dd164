//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, put},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::LatticeError;
use crate::server::handlers::{
    build_logs, create_build, create_deploy, create_system, create_teardown, delete_system,
    get_build, get_deploy, get_secret, get_service, get_system, get_teardown, health_handler,
    list_builds, list_deploys, list_secrets, list_services, list_systems, list_teardowns,
    service_logs, set_secret, unset_secret, version_handler,
};
use crate::server::state::ServerState;

/// Routes of the v1 API
pub fn router(state: Arc<ServerState>) -> Router {
    let v1 = Router::new()
        // Systems
        .route("/systems", get(list_systems).post(create_system))
        .route("/systems/{id}", get(get_system).delete(delete_system))
        // Builds
        .route("/systems/{id}/builds", get(list_builds).post(create_build))
        .route("/systems/{id}/builds/{build_id}", get(get_build))
        .route("/systems/{id}/builds/{build_id}/logs", get(build_logs))
        // Deploys
        .route("/systems/{id}/deploys", get(list_deploys).post(create_deploy))
        .route("/systems/{id}/deploys/{deploy_id}", get(get_deploy))
        // Teardowns
        .route("/systems/{id}/teardowns", get(list_teardowns).post(create_teardown))
        .route("/systems/{id}/teardowns/{teardown_id}", get(get_teardown))
        // Secrets
        .route("/systems/{id}/secrets", get(list_secrets))
        .route(
            "/systems/{id}/secrets/{*secret}",
            put(set_secret).get(get_secret).delete(unset_secret),
        )
        // Services
        .route("/systems/{id}/services", get(list_services))
        .route("/systems/{id}/services/{service_id}", get(get_service))
        .route("/systems/{id}/services/{service_id}/logs", get(service_logs));

    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .nest("/v1", v1)
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), LatticeError>>, LatticeError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| LatticeError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| LatticeError::ServerError(e.to_string()))
    });

    Ok(handle)
}
