//! Deploy, teardown and system deletion tests

use std::collections::BTreeSet;
use std::time::Duration;

use lattice::api::{
    self, labels, DeploySpec, DeployState, InstanceState, JobState, ServiceState, SystemState,
    TeardownState,
};
use lattice::containerbuild::FakeImageBuilder;
use lattice::definition::tree::Path;
use lattice::errors::LatticeError;
use lattice::store::LabelSelector;

use crate::common::{
    eventually, job_with_exec, service_with_command, system_of, Harness, JOB, ROOT, SERVICE,
};

async fn wait_for_deploy(h: &Harness, system: &str, id: &str) -> api::Deploy {
    let backend = h.state.backend.clone();
    eventually("deploy to finish", || {
        let backend = backend.clone();
        async move {
            let deploy = backend.get_deploy(system, id).ok()?;
            deploy.status.state.is_terminal().then_some(deploy)
        }
    })
    .await
}

async fn deploy(h: &Harness, system: &str, spec: DeploySpec) -> api::Deploy {
    let deploy = h.state.backend.create_deploy(system, spec).unwrap();
    wait_for_deploy(h, system, &deploy.metadata.name).await
}

async fn deploy_version(h: &Harness, system: &str, version: &str) -> api::Deploy {
    let spec = DeploySpec {
        version: Some(version.to_string()),
        ..Default::default()
    };
    deploy(h, system, spec).await
}

async fn wait_for_teardown(h: &Harness, system: &str, id: &str) -> api::Teardown {
    let backend = h.state.backend.clone();
    eventually("teardown to finish", || {
        let backend = backend.clone();
        async move {
            let teardown = backend.get_teardown(system, id).ok()?;
            matches!(
                teardown.status.state,
                TeardownState::Succeeded | TeardownState::Failed
            )
            .then_some(teardown)
        }
    })
    .await
}

async fn wait_for_system(h: &Harness, system: &str, state: SystemState) -> api::System {
    let backend = h.state.backend.clone();
    eventually("system state", || {
        let backend = backend.clone();
        async move {
            let found = backend.get_system(system).ok()?;
            (found.effective_state() == state).then_some(found)
        }
    })
    .await
}

#[tokio::test]
async fn test_deploy_version_runs_services() {
    let h = Harness::start();
    h.git.add_commit(ROOT, "c1", &[("lattice.yaml", &system_of(&[("api", SERVICE)]))]);
    h.git.set_tag(ROOT, "v1.0.0", "c1");
    h.create_system("petflix").await;

    let deploy = deploy_version(&h, "petflix", "v1.0.0").await;
    assert_eq!(deploy.status.state, DeployState::Succeeded, "{:?}", deploy.status.message);
    assert!(deploy.status.build_id.is_some());
    assert_eq!(deploy.status.version.as_deref(), Some("v1.0.0"));

    wait_for_system(&h, "petflix", SystemState::Stable).await;
    let services = h.state.backend.list_services("petflix").unwrap();
    assert_eq!(services.len(), 1);
    assert_eq!(services[0].spec.path.to_string(), "/api");
    assert_eq!(services[0].status.state, ServiceState::Stable);
    assert!(!h.runtime.running().is_empty());
    h.stop().await;
}

#[tokio::test]
async fn test_pending_system_rejects_lifecycle_actions() {
    let h = Harness::idle();
    let backend = h.state.backend.clone();
    backend.create_system("petflix", ROOT).unwrap();

    let err = backend.create_teardown("petflix").unwrap_err();
    assert!(matches!(err, LatticeError::SystemPending(_)));
    let err = backend
        .create_build("petflix", Some("v1.0.0".to_string()), None)
        .unwrap_err();
    assert!(matches!(err, LatticeError::SystemPending(_)));

    let err = backend
        .create_build("missing", Some("v1.0.0".to_string()), None)
        .unwrap_err();
    assert!(matches!(err, LatticeError::NotFound(_)));
    h.stop().await;
}

#[tokio::test]
async fn test_teardown_then_delete_system() {
    let h = Harness::start();
    h.git.add_commit(ROOT, "c1", &[("lattice.yaml", &system_of(&[("api", SERVICE)]))]);
    h.git.set_tag(ROOT, "v1.0.0", "c1");
    h.create_system("petflix").await;

    let deploy = deploy_version(&h, "petflix", "v1.0.0").await;
    assert_eq!(deploy.status.state, DeployState::Succeeded);

    // 1. Teardown empties the system
    let teardown = h.state.backend.create_teardown("petflix").unwrap();
    let teardown = wait_for_teardown(&h, "petflix", &teardown.metadata.name).await;
    assert_eq!(teardown.status.state, TeardownState::Succeeded);

    let store = h.state.store.clone();
    eventually("services to be removed", || {
        let store = store.clone();
        async move { store.services.is_empty().then_some(()) }
    })
    .await;
    assert!(h.runtime.running().is_empty());

    // 2. Deleting the system reclaims its namespace
    h.state.backend.delete_system("petflix").unwrap();
    let backend = h.state.backend.clone();
    eventually("system to be removed", || {
        let backend = backend.clone();
        async move { backend.get_system("petflix").is_err().then_some(()) }
    })
    .await;
    let namespace = api::system_namespace("lattice", "petflix");
    assert_eq!(store.namespace_object_count(&namespace), 0);
    h.stop().await;
}

#[tokio::test]
async fn test_deleting_system_rejects_new_builds() {
    let h = Harness::start();
    h.git.add_commit(ROOT, "c1", &[("lattice.yaml", &system_of(&[("api", SERVICE)]))]);
    h.git.set_tag(ROOT, "v1.0.0", "c1");
    h.create_system("petflix").await;
    deploy_version(&h, "petflix", "v1.0.0").await;

    h.state.backend.delete_system("petflix").unwrap();
    if let Ok(system) = h.state.backend.get_system("petflix") {
        assert!(system.metadata.is_deleting());
        let err = h
            .state
            .backend
            .create_build("petflix", Some("v1.0.0".to_string()), None)
            .unwrap_err();
        assert!(matches!(err, LatticeError::SystemDeleting(_)));
    }
    h.stop().await;
}

#[tokio::test]
async fn test_redeploy_rolls_instances_to_new_version() {
    let h = Harness::start();
    let v1 = system_of(&[("api", &service_with_command("serve-v1"))]);
    let v2 = system_of(&[("api", &service_with_command("serve-v2"))]);
    h.git.add_commit(ROOT, "c1", &[("lattice.yaml", &v1)]);
    h.git.set_tag(ROOT, "v1.0.0", "c1");
    h.git.add_commit(ROOT, "c2", &[("lattice.yaml", &v2)]);
    h.git.set_tag(ROOT, "v2.0.0", "c2");
    h.create_system("petflix").await;

    let first = deploy_version(&h, "petflix", "v1.0.0").await;
    assert_eq!(first.status.state, DeployState::Succeeded, "{:?}", first.status.message);
    let before: BTreeSet<String> = h.runtime.running().into_iter().collect();
    assert!(!before.is_empty());
    let service = h.state.backend.list_services("petflix").unwrap().remove(0);
    let generation = service.metadata.generation;

    let second = deploy_version(&h, "petflix", "v2.0.0").await;
    assert_eq!(second.status.state, DeployState::Succeeded, "{:?}", second.status.message);
    assert_eq!(second.status.version.as_deref(), Some("v2.0.0"));

    // Same service object, new generation; old instances replaced
    let service = h.state.backend.list_services("petflix").unwrap().remove(0);
    assert!(service.metadata.generation > generation);
    let runtime = h.runtime.clone();
    eventually("old instances to stop", || {
        let runtime = runtime.clone();
        let before = before.clone();
        async move {
            let running: BTreeSet<String> = runtime.running().into_iter().collect();
            (!running.is_empty() && running.is_disjoint(&before)).then_some(())
        }
    })
    .await;

    let backend = h.state.backend.clone();
    let service_id = service.metadata.name.clone();
    eventually("service to settle", || {
        let backend = backend.clone();
        let service_id = service_id.clone();
        async move {
            let service = backend.get_service("petflix", &service_id).ok()?;
            (service.status.state == ServiceState::Stable && service.status.stale_instances == 0)
                .then_some(())
        }
    })
    .await;
    let instances = h
        .state
        .backend
        .service_instances("petflix", &service.metadata.name)
        .unwrap();
    let names: BTreeSet<String> = instances.into_iter().map(|i| i.metadata.name).collect();
    let running: BTreeSet<String> = h.runtime.running().into_iter().collect();
    assert_eq!(names, running);

    let system = h.state.backend.get_system("petflix").unwrap();
    assert_eq!(
        system.metadata.label(labels::SYSTEM_DEFINITION_VERSION),
        Some("v2.0.0")
    );
    h.stop().await;
}

#[tokio::test]
async fn test_path_deploy_rebuilds_one_subtree() {
    let h = Harness::start();
    let definition = system_of(&[("api", SERVICE), ("web", &service_with_command("serve-web"))]);
    h.git.add_commit(ROOT, "c1", &[("lattice.yaml", &definition)]);
    h.git.set_tag(ROOT, "v1.0.0", "c1");
    h.create_system("petflix").await;

    let first = deploy_version(&h, "petflix", "v1.0.0").await;
    assert_eq!(first.status.state, DeployState::Succeeded, "{:?}", first.status.message);

    let api = Path::new("/api").unwrap();
    let partial = deploy(
        &h,
        "petflix",
        DeploySpec {
            path: Some(api.clone()),
            ..Default::default()
        },
    )
    .await;
    assert_eq!(partial.status.state, DeployState::Succeeded, "{:?}", partial.status.message);
    assert_eq!(partial.status.path.as_ref(), Some(&api));

    let build_id = partial.status.build_id.unwrap();
    let build = h.state.backend.get_build("petflix", &build_id).unwrap();
    assert_eq!(build.spec.path.as_ref(), Some(&api));
    assert_eq!(build.status.version.as_deref(), Some("v1.0.0"));

    assert_eq!(h.state.backend.list_services("petflix").unwrap().len(), 2);
    wait_for_system(&h, "petflix", SystemState::Stable).await;

    // A partial build cannot be deployed on its own
    let reuse = deploy(
        &h,
        "petflix",
        DeploySpec {
            build: Some(build_id.clone()),
            ..Default::default()
        },
    )
    .await;
    assert_eq!(reuse.status.state, DeployState::Failed);
    assert!(reuse.status.message.unwrap().contains("partial system build"));
    h.stop().await;
}

#[tokio::test]
async fn test_failed_build_fails_deploy() {
    let h = Harness::start();
    h.builder.fail_command("make-fail", "exit status 2: missing Makefile");
    h.git.add_commit(
        ROOT,
        "c1",
        &[("lattice.yaml", &system_of(&[("api", &service_with_command("make-fail"))]))],
    );
    h.git.set_tag(ROOT, "v1.0.0", "c1");
    h.create_system("petflix").await;

    let deploy = deploy_version(&h, "petflix", "v1.0.0").await;
    assert_eq!(deploy.status.state, DeployState::Failed);
    let build_id = deploy.status.build_id.clone().unwrap();
    assert_eq!(
        deploy.status.message.as_deref(),
        Some(format!("build {} failed", build_id).as_str())
    );
    assert!(deploy.status.completion_timestamp.is_some());
    assert!(h.state.backend.list_services("petflix").unwrap().is_empty());
    assert!(h.runtime.running().is_empty());
    h.stop().await;
}

#[tokio::test]
async fn test_lifecycle_lock_conflicts_fail_actions() {
    let h = Harness::start_with(FakeImageBuilder::new().with_delay(Duration::from_millis(300)));
    h.git.add_commit(ROOT, "c1", &[("lattice.yaml", &system_of(&[("api", SERVICE)]))]);
    h.git.set_tag(ROOT, "v1.0.0", "c1");
    h.create_system("petflix").await;

    let spec = DeploySpec {
        version: Some("v1.0.0".to_string()),
        ..Default::default()
    };
    let holder = h.state.backend.create_deploy("petflix", spec.clone()).unwrap();
    let holder_id = holder.metadata.name.clone();
    let backend = h.state.backend.clone();
    eventually("deploy to take its lock", || {
        let backend = backend.clone();
        let id = holder_id.clone();
        async move {
            let deploy = backend.get_deploy("petflix", &id).ok()?;
            (deploy.status.state == DeployState::Accepted).then_some(())
        }
    })
    .await;

    let blocked = deploy(&h, "petflix", spec).await;
    assert_eq!(blocked.status.state, DeployState::Failed);
    assert_eq!(
        blocked.status.message.as_deref(),
        Some(format!("unable to acquire lifecycle lock: locked by deploys {}", holder_id).as_str())
    );

    let teardown = h.state.backend.create_teardown("petflix").unwrap();
    let teardown = wait_for_teardown(&h, "petflix", &teardown.metadata.name).await;
    assert_eq!(teardown.status.state, TeardownState::Failed);
    assert_eq!(
        teardown.status.message.as_deref(),
        Some(format!("unable to acquire lifecycle lock: locked by deploys {}", holder_id).as_str())
    );

    // The holder is unaffected and releases its lock when done
    let holder = wait_for_deploy(&h, "petflix", &holder_id).await;
    assert_eq!(holder.status.state, DeployState::Succeeded, "{:?}", holder.status.message);
    let teardown = h.state.backend.create_teardown("petflix").unwrap();
    let teardown = wait_for_teardown(&h, "petflix", &teardown.metadata.name).await;
    assert_eq!(teardown.status.state, TeardownState::Succeeded);
    h.stop().await;
}

#[tokio::test]
async fn test_deploy_runs_jobs_to_completion() {
    let h = Harness::start();
    h.git.add_commit(
        ROOT,
        "c1",
        &[("lattice.yaml", &system_of(&[("api", SERVICE), ("migrate", JOB)]))],
    );
    h.git.set_tag(ROOT, "v1.0.0", "c1");
    h.create_system("petflix").await;

    let deploy = deploy_version(&h, "petflix", "v1.0.0").await;
    assert_eq!(deploy.status.state, DeployState::Succeeded, "{:?}", deploy.status.message);

    let store = h.state.store.clone();
    let job = eventually("job to succeed", || {
        let store = store.clone();
        async move {
            let job = store.jobs.list(None, &LabelSelector::everything()).pop()?;
            (job.status.state == JobState::Succeeded).then_some(job)
        }
    })
    .await;
    assert_eq!(job.spec.path.to_string(), "/migrate");

    let run_name = job.status.run.clone().unwrap();
    let runs = store.instances.list(
        None,
        &LabelSelector::everything().eq(labels::JOB_ID, &job.metadata.name),
    );
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].metadata.name, run_name);
    assert!(runs[0].spec.run_to_completion);
    assert_eq!(runs[0].status.state, InstanceState::Succeeded);

    assert_eq!(h.runtime.completed(), vec![run_name.clone()]);
    assert!(!h.runtime.running().contains(&run_name));

    let system = wait_for_system(&h, "petflix", SystemState::Stable).await;
    let job_status = &system.status.jobs[&Path::new("/migrate").unwrap()];
    assert_eq!(job_status.state, JobState::Succeeded);
    h.stop().await;
}

#[tokio::test]
async fn test_failed_job_run_fails_deploy() {
    let h = Harness::start();
    h.runtime.fail_exec("exit-1");
    h.git.add_commit(
        ROOT,
        "c1",
        &[("lattice.yaml", &system_of(&[("migrate", &job_with_exec("exit-1"))]))],
    );
    h.git.set_tag(ROOT, "v1.0.0", "c1");
    h.create_system("petflix").await;

    let deploy = deploy_version(&h, "petflix", "v1.0.0").await;
    assert_eq!(deploy.status.state, DeployState::Failed);
    assert_eq!(deploy.status.message.as_deref(), Some("system is degraded"));

    let job = h
        .state
        .store
        .jobs
        .list(None, &LabelSelector::everything())
        .pop()
        .unwrap();
    assert_eq!(job.status.state, JobState::Failed);
    let message = job.status.message.unwrap();
    assert!(message.contains("failed"), "{}", message);
    assert!(message.contains("non-zero status"), "{}", message);
    h.stop().await;
}
