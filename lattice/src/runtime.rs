//! Instance runtime seam

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::info;

use crate::api::instance::MAIN_CONTAINER;
use crate::api::{Instance, InstanceState};
use crate::errors::LatticeError;

/// Starts and stops service instances and job runs on the cluster
#[async_trait]
pub trait InstanceRuntime: Send + Sync {
    async fn start(&self, instance: &Instance) -> Result<(), LatticeError>;

    async fn stop(&self, instance: &Instance) -> Result<(), LatticeError>;

    /// Observed state of a started instance. Job runs end up `Succeeded` or `Failed`.
    async fn state(&self, instance: &Instance) -> Result<InstanceState, LatticeError>;

    /// Output of an instance, if the runtime keeps any
    async fn logs(&self, instance: &Instance) -> Result<Option<String>, LatticeError>;
}

struct Started {
    state: InstanceState,
    log: String,
}

/// Runtime that only records what it was asked to do.
///
/// Job runs complete as soon as they start, failing when their main command matches a pattern
/// registered with [`NoopRuntime::fail_exec`].
#[derive(Default)]
pub struct NoopRuntime {
    started: RwLock<HashMap<String, Started>>,
    failures: RwLock<Vec<String>>,
}

impl NoopRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail job runs whose main container command contains `pattern`
    pub fn fail_exec(&self, pattern: &str) {
        let mut failures = self.failures.write().unwrap_or_else(|e| e.into_inner());
        failures.push(pattern.to_string());
    }

    /// Instances started, not yet stopped, and still running
    pub fn running(&self) -> Vec<String> {
        let started = self.started.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = started
            .iter()
            .filter(|(_, s)| s.state == InstanceState::Running)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Job runs that ran to completion, successfully or not
    pub fn completed(&self) -> Vec<String> {
        let started = self.started.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = started
            .iter()
            .filter(|(_, s)| s.state.is_terminal())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    fn exit_state(&self, instance: &Instance) -> InstanceState {
        let command = instance
            .spec
            .containers
            .get(MAIN_CONTAINER)
            .and_then(|c| c.exec.as_ref())
            .map(|exec| exec.join(" "))
            .unwrap_or_default();
        let failures = self.failures.read().unwrap_or_else(|e| e.into_inner());
        if failures.iter().any(|pattern| command.contains(pattern.as_str())) {
            InstanceState::Failed
        } else {
            InstanceState::Succeeded
        }
    }
}

#[async_trait]
impl InstanceRuntime for NoopRuntime {
    async fn start(&self, instance: &Instance) -> Result<(), LatticeError> {
        info!("Starting instance {}", instance.metadata.name);
        let mut lines = Vec::new();
        for (name, container) in &instance.spec.containers {
            lines.push(format!("started container {} from {}", name, container.image));
        }

        let state = if instance.spec.run_to_completion {
            let state = self.exit_state(instance);
            lines.push(match state {
                InstanceState::Failed => "exited with status 1".to_string(),
                _ => "exited with status 0".to_string(),
            });
            state
        } else {
            InstanceState::Running
        };

        let mut started = self.started.write().unwrap_or_else(|e| e.into_inner());
        started.insert(
            instance.metadata.name.clone(),
            Started {
                state,
                log: lines.join("\n"),
            },
        );
        Ok(())
    }

    async fn stop(&self, instance: &Instance) -> Result<(), LatticeError> {
        info!("Stopping instance {}", instance.metadata.name);
        let mut started = self.started.write().unwrap_or_else(|e| e.into_inner());
        started.remove(&instance.metadata.name);
        Ok(())
    }

    async fn state(&self, instance: &Instance) -> Result<InstanceState, LatticeError> {
        let started = self.started.read().unwrap_or_else(|e| e.into_inner());
        Ok(started
            .get(&instance.metadata.name)
            .map(|s| s.state)
            .unwrap_or(InstanceState::Pending))
    }

    async fn logs(&self, instance: &Instance) -> Result<Option<String>, LatticeError> {
        let started = self.started.read().unwrap_or_else(|e| e.into_inner());
        Ok(started.get(&instance.metadata.name).map(|s| s.log.clone()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::api::{InstanceContainer, InstanceSpec};
    use crate::store::ObjectMeta;

    fn instance(name: &str, exec: &[&str], run_to_completion: bool) -> Instance {
        let mut containers = BTreeMap::new();
        containers.insert(
            MAIN_CONTAINER.to_string(),
            InstanceContainer {
                image: "registry.local/lattice/builds:abc".to_string(),
                exec: Some(exec.iter().map(|s| s.to_string()).collect()),
                env: BTreeMap::new(),
            },
        );
        Instance {
            metadata: ObjectMeta::new("lattice-system-petflix", name),
            spec: InstanceSpec {
                workload: "migrate".to_string(),
                run_to_completion,
                generation: "g1".to_string(),
                node_pool: None,
                containers,
            },
            status: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_job_runs_complete_on_start() {
        let runtime = NoopRuntime::new();
        runtime.fail_exec("exit 1");

        let ok = instance("run-ok", &["./migrate.sh"], true);
        let bad = instance("run-bad", &["sh", "-c", "exit 1"], true);
        let replica = instance("replica", &["./serve"], false);
        for i in [&ok, &bad, &replica] {
            runtime.start(i).await.unwrap();
        }

        assert_eq!(runtime.state(&ok).await.unwrap(), InstanceState::Succeeded);
        assert_eq!(runtime.state(&bad).await.unwrap(), InstanceState::Failed);
        assert_eq!(runtime.state(&replica).await.unwrap(), InstanceState::Running);
        assert_eq!(runtime.running(), vec!["replica".to_string()]);
        assert_eq!(runtime.completed(), vec!["run-bad".to_string(), "run-ok".to_string()]);

        runtime.stop(&ok).await.unwrap();
        assert_eq!(runtime.state(&ok).await.unwrap(), InstanceState::Pending);
    }
}
