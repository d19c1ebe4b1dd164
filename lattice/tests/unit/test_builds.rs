//! Build lifecycle tests

use lattice::api::{BuildState, ContainerBuildPhase, ContainerBuildState};
use lattice::definition::tree::{Path, PathSubcomponent};
use lattice::store::LabelSelector;

use crate::common::{eventually, service_with_command, system_of, Harness, API, ROOT, SERVICE};

async fn wait_for_build(h: &Harness, system: &str, build_id: &str) -> lattice::api::Build {
    let backend = h.state.backend.clone();
    eventually("build to finish", || {
        let backend = backend.clone();
        async move {
            let build = backend.get_build(system, build_id).ok()?;
            build.status.state.is_terminal().then_some(build)
        }
    })
    .await
}

#[tokio::test]
async fn test_build_single_service() {
    let h = Harness::start();
    h.git.add_commit(ROOT, "c1", &[("lattice.yaml", &system_of(&[("api", SERVICE)]))]);
    h.git.set_tag(ROOT, "v1.0.0", "c1");
    h.create_system("petflix").await;

    let build = h
        .state
        .backend
        .create_build("petflix", Some("v1.0.0".to_string()), None)
        .unwrap();
    let build = wait_for_build(&h, "petflix", &build.metadata.name).await;

    assert_eq!(build.status.state, BuildState::Succeeded);
    assert_eq!(build.status.version.as_deref(), Some("v1.0.0"));
    assert!(build.status.start_timestamp.is_some());
    assert!(build.status.completion_timestamp.is_some());

    let api = Path::new("/api").unwrap();
    let workload = &build.status.workloads[&api];
    let cb_status = &build.status.container_build_statuses[&workload.main_container];
    assert_eq!(cb_status.state, ContainerBuildState::Succeeded);
    assert_eq!(
        cb_status.last_observed_phase,
        Some(ContainerBuildPhase::PushingDockerImage)
    );

    let container_builds = h
        .state
        .store
        .container_builds
        .list(None, &LabelSelector::everything());
    assert_eq!(container_builds.len(), 1);
    h.stop().await;
}

#[tokio::test]
async fn test_build_expands_references() {
    let h = Harness::start();
    let root = format!(
        "type: v1/system\ncomponents:\n  api:\n    type: v1/reference\n    git_repository:\n      url: {}\n      tag: v2.3.1\n      file: api.yaml\n",
        API
    );
    h.git.add_commit(ROOT, "c1", &[("lattice.yaml", &root)]);
    h.git.set_tag(ROOT, "v1.0.0", "c1");
    h.git.add_commit(API, "a231", &[("api.yaml", SERVICE)]);
    h.git.set_tag(API, "v2.3.1", "a231");
    h.create_system("petflix").await;

    let build = h
        .state
        .backend
        .create_build("petflix", Some("v1.0.0".to_string()), None)
        .unwrap();
    let build = wait_for_build(&h, "petflix", &build.metadata.name).await;
    assert_eq!(build.status.state, BuildState::Succeeded);

    let definition = build.status.definition.unwrap();
    let api = definition.get(&Path::new("/api").unwrap()).unwrap();
    assert_eq!(api.commit.url, API);
    assert_eq!(api.commit.commit, "a231");
    assert!(definition.iter().all(|(_, info)| !info.component.is_reference()));
    h.stop().await;
}

#[tokio::test]
async fn test_build_picks_highest_tag_in_range() {
    let h = Harness::start();
    let root = format!(
        "type: v1/system\ncomponents:\n  api:\n    type: v1/reference\n    git_repository:\n      url: {}\n      tag: \">=1.2.0 <2.0.0\"\n      file: api.yaml\n",
        API
    );
    h.git.add_commit(ROOT, "c1", &[("lattice.yaml", &root)]);
    h.git.set_tag(ROOT, "v1.0.0", "c1");
    for (tag, commit) in [("v1.1.0", "a110"), ("v1.2.0", "a120"), ("v1.3.1", "a131"), ("v2.0.0", "a200")] {
        h.git.add_commit(API, commit, &[("api.yaml", SERVICE)]);
        h.git.set_tag(API, tag, commit);
    }
    h.create_system("petflix").await;

    let build = h
        .state
        .backend
        .create_build("petflix", Some("v1.0.0".to_string()), None)
        .unwrap();
    let build = wait_for_build(&h, "petflix", &build.metadata.name).await;
    assert_eq!(build.status.state, BuildState::Succeeded);

    let definition = build.status.definition.unwrap();
    let api = definition.get(&Path::new("/api").unwrap()).unwrap();
    assert_eq!(api.commit.commit, "a131");
    h.stop().await;
}

#[tokio::test]
async fn test_identical_containers_share_a_build() {
    let h = Harness::start();
    h.git.add_commit(
        ROOT,
        "c1",
        &[("lattice.yaml", &system_of(&[("a", SERVICE), ("b", SERVICE)]))],
    );
    h.git.set_tag(ROOT, "v1.0.0", "c1");
    h.create_system("petflix").await;

    let first = h
        .state
        .backend
        .create_build("petflix", Some("v1.0.0".to_string()), None)
        .unwrap();
    let first = wait_for_build(&h, "petflix", &first.metadata.name).await;
    assert_eq!(first.status.state, BuildState::Succeeded);

    let a = &first.status.workloads[&Path::new("/a").unwrap()];
    let b = &first.status.workloads[&Path::new("/b").unwrap()];
    assert_eq!(a.main_container, b.main_container);
    let store = &h.state.store;
    assert_eq!(store.container_builds.len(), 1);
    assert_eq!(h.builder.executions(), 1);

    // building the same version again reuses the container build
    let second = h
        .state
        .backend
        .create_build("petflix", Some("v1.0.0".to_string()), None)
        .unwrap();
    let second = wait_for_build(&h, "petflix", &second.metadata.name).await;
    assert_eq!(second.status.state, BuildState::Succeeded);
    assert_eq!(store.container_builds.len(), 1);
    assert_eq!(h.builder.executions(), 1);

    let shared = store
        .container_builds
        .list(None, &LabelSelector::everything())
        .remove(0);
    assert_eq!(shared.metadata.owner_references.len(), 2);
    h.stop().await;
}

#[tokio::test]
async fn test_user_build_failure() {
    let h = Harness::start();
    h.builder.fail_command("make-fail", "exit status 2: missing Makefile");
    h.git.add_commit(
        ROOT,
        "c1",
        &[("lattice.yaml", &system_of(&[("api", &service_with_command("make-fail"))]))],
    );
    h.git.set_tag(ROOT, "v1.0.0", "c1");
    h.create_system("petflix").await;

    let build = h
        .state
        .backend
        .create_build("petflix", Some("v1.0.0".to_string()), None)
        .unwrap();
    let build = wait_for_build(&h, "petflix", &build.metadata.name).await;

    assert_eq!(build.status.state, BuildState::Failed);
    let message = build.status.message.unwrap();
    assert!(message.contains("/api"), "{}", message);
    assert!(message.contains("missing Makefile"), "{}", message);
    assert!(build.status.internal_error.is_none());

    let workload = &build.status.workloads[&Path::new("/api").unwrap()];
    let failure = build.status.container_build_statuses[&workload.main_container]
        .failure_info
        .clone()
        .unwrap();
    assert!(!failure.internal);

    let logs = h
        .state
        .backend
        .build_logs("petflix", &build.metadata.name, &Path::new("/api").unwrap(), None)
        .unwrap()
        .unwrap();
    assert!(logs.contains("RUN make-fail"), "{}", logs);
    h.stop().await;
}

#[tokio::test]
async fn test_unknown_version_fails_build() {
    let h = Harness::start();
    h.git.add_commit(ROOT, "c1", &[("lattice.yaml", "type: v1/system\n")]);
    h.git.set_tag(ROOT, "v1.0.0", "c1");
    h.create_system("petflix").await;

    let build = h
        .state
        .backend
        .create_build("petflix", Some("v9.9.9".to_string()), None)
        .unwrap();
    let build = wait_for_build(&h, "petflix", &build.metadata.name).await;
    assert_eq!(build.status.state, BuildState::Failed);
    assert!(build.status.message.is_some());
    h.stop().await;
}

#[tokio::test]
async fn test_deleted_build_releases_container_builds_first() {
    let h = Harness::start();
    h.git.add_commit(ROOT, "c1", &[("lattice.yaml", &system_of(&[("api", SERVICE)]))]);
    h.git.set_tag(ROOT, "v1.0.0", "c1");
    h.create_system("petflix").await;

    let build = h
        .state
        .backend
        .create_build("petflix", Some("v1.0.0".to_string()), None)
        .unwrap();
    let build = wait_for_build(&h, "petflix", &build.metadata.name).await;
    let uid = build.metadata.uid.clone();
    let store = h.state.store.clone();

    let mut events = store.builds.watch();
    store
        .builds
        .delete(&build.metadata.namespace, &build.metadata.name)
        .unwrap();

    // by the time the build is gone no container build may still reference it
    loop {
        let event = tokio::time::timeout(std::time::Duration::from_secs(10), events.recv())
            .await
            .expect("build was never removed")
            .unwrap();
        if let lattice::store::WatchEvent::Deleted(deleted) = event {
            if deleted.metadata.uid == uid {
                break;
            }
        }
    }
    for cb in store.container_builds.list(None, &LabelSelector::everything()) {
        assert!(cb.metadata.owner_references.iter().all(|o| o.uid != uid));
    }

    // orphaned container builds are reclaimed
    let store_ref = store.clone();
    eventually("orphaned container builds to be deleted", || {
        let store = store_ref.clone();
        async move { store.container_builds.is_empty().then_some(()) }
    })
    .await;
    h.stop().await;
}

#[tokio::test]
async fn test_private_source_built_with_system_key() {
    let h = Harness::start();
    let root = format!(
        "type: v1/system\ncomponents:\n  inner:\n    type: v1/reference\n    git_repository:\n      url: {}\n      commit: p1\n      ssh_key:\n        secret: \"/:deploy-key\"\n",
        API
    );
    let private_system = "type: v1/system\ncomponents:\n  svc:\n    type: v1/reference\n    file: svc.yaml\n";
    h.git.add_commit(ROOT, "c1", &[("lattice.yaml", &root)]);
    h.git.set_tag(ROOT, "v1.0.0", "c1");
    h.git.add_commit(API, "p1", &[("lattice.yaml", private_system), ("svc.yaml", SERVICE)]);
    h.git.require_ssh_key(API, "private-key");
    h.builder.require_ssh_key(API, "private-key");
    h.create_system("petflix").await;

    let key = PathSubcomponent::parse("/:deploy-key").unwrap();
    h.state
        .backend
        .set_secret("petflix", &key, "private-key".to_string())
        .unwrap();

    let build = h
        .state
        .backend
        .create_build("petflix", Some("v1.0.0".to_string()), None)
        .unwrap();
    let build = wait_for_build(&h, "petflix", &build.metadata.name).await;
    assert_eq!(build.status.state, BuildState::Succeeded, "{:?}", build.status.message);

    let container_builds = h
        .state
        .store
        .container_builds
        .list(None, &LabelSelector::everything());
    assert_eq!(container_builds.len(), 1);
    assert_eq!(container_builds[0].spec.ssh_key_secret, Some(key));
    h.stop().await;
}
