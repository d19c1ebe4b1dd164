//! HTTP API tests against a live router

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use lattice::errors::LatticeError;
use lattice::http::ApiClient;
use lattice::server::{router, ServerState};
use tokio::net::TcpListener;
use tower::ServiceExt;

use crate::common::{eventually, system_of, Harness, ROOT, SERVICE};

/// Serve the harness' API on an ephemeral port
async fn serve(h: &Harness) -> ApiClient {
    let app = router(Arc::new(ServerState::new(h.state.backend.clone())));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    ApiClient::new(&format!("http://{}", addr)).unwrap()
}

#[tokio::test]
async fn test_health_and_unknown_system() {
    let h = Harness::idle();
    let app = router(Arc::new(ServerState::new(h.state.backend.clone())));

    let response = app
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(Request::get("/v1/systems/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024).await.unwrap();
    let error: lattice_api::ErrorResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(error.code, "not-found");
}

#[tokio::test]
async fn test_client_errors_map_back() {
    let h = Harness::idle();
    let client = serve(&h).await;

    let err = client.create_system("Not_Valid", ROOT).await.unwrap_err();
    assert!(matches!(err, LatticeError::InvalidId(_)), "{}", err);

    client.create_system("petflix", ROOT).await.unwrap();
    let err = client.create_system("petflix", ROOT).await.unwrap_err();
    assert!(matches!(err, LatticeError::Conflict(_)), "{}", err);

    // nothing reconciles the system, so it stays pending
    let err = client
        .create_build_from_version("petflix", "v1.0.0")
        .await
        .unwrap_err();
    assert!(matches!(err, LatticeError::SystemPending(_)), "{}", err);

    let err = client.get_build("petflix", "missing").await.unwrap_err();
    assert!(matches!(err, LatticeError::NotFound(_)), "{}", err);
}

#[tokio::test]
async fn test_secrets_round_trip() {
    let h = Harness::idle();
    let client = serve(&h).await;
    client.create_system("petflix", ROOT).await.unwrap();

    client
        .set_secret("petflix", "/api:password", "hunter2")
        .await
        .unwrap();
    let secret = client.get_secret("petflix", "/api:password").await.unwrap();
    assert_eq!(secret.value, "hunter2");
    assert_eq!(client.list_secrets("petflix").await.unwrap().len(), 1);

    client.unset_secret("petflix", "/api:password").await.unwrap();
    let err = client.get_secret("petflix", "/api:password").await.unwrap_err();
    assert!(matches!(err, LatticeError::NotFound(_)), "{}", err);

    let err = client
        .set_secret("petflix", "no-colon", "x")
        .await
        .unwrap_err();
    assert!(matches!(err, LatticeError::InvalidSubcomponent(_) | LatticeError::InvalidPath(_)), "{}", err);
}

#[tokio::test]
async fn test_build_through_client() {
    let h = Harness::start();
    h.git.add_commit(ROOT, "c1", &[("lattice.yaml", &system_of(&[("api", SERVICE)]))]);
    h.git.set_tag(ROOT, "v1.0.0", "c1");
    let client = serve(&h).await;

    client.create_system("petflix", ROOT).await.unwrap();
    let client = Arc::new(client);
    let c = client.clone();
    eventually("system to be stable", || {
        let c = c.clone();
        async move {
            let system = c.get_system("petflix").await.ok()?;
            (system.state == "stable").then_some(())
        }
    })
    .await;

    let build = client
        .create_build_from_version("petflix", "v1.0.0")
        .await
        .unwrap();
    let c = client.clone();
    let id = build.id.clone();
    let build = eventually("build to succeed", || {
        let c = c.clone();
        let id = id.clone();
        async move {
            let build = c.get_build("petflix", &id).await.ok()?;
            (build.state == "succeeded" || build.state == "failed").then_some(build)
        }
    })
    .await;
    assert_eq!(build.state, "succeeded", "{:?}", build.message);

    let workload = &build.workloads["/api"];
    assert_eq!(workload.main_container.state, "succeeded");
    assert_eq!(
        workload.main_container.last_observed_phase.as_deref(),
        Some("pushingDockerImage")
    );

    let logs = client
        .build_logs("petflix", &build.id, "/api", None)
        .await
        .unwrap();
    assert!(logs.contains("RUN npm install"), "{}", logs);
    h.stop().await;
}
