#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use autokube::engine::JobFinished;
use autokube::exec::PipelinePlan;
use autokube::fs::mock::MockFileSystem;
use autokube::supervisor::Supervisor;
use autokube_test_utils::builders::ConfigFileBuilder;
use autokube_test_utils::fake_api::RecordingClusterApi;
use autokube_test_utils::fake_runner::ScriptedRunner;
use autokube_test_utils::{init_tracing, with_timeout};

/// A supervisor wired to a scripted runner, an in-memory filesystem and a
/// recording cluster API.
pub struct Harness {
    pub supervisor: Supervisor,
    pub runner: ScriptedRunner,
    pub api: RecordingClusterApi,
    pub fs: MockFileSystem,
    pub plan: PipelinePlan,
    outcomes: broadcast::Receiver<JobFinished>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_api(RecordingClusterApi::new())
    }

    pub fn with_api(api: RecordingClusterApi) -> Self {
        init_tracing();
        let plan = ConfigFileBuilder::new().plan();
        let runner = ScriptedRunner::new();
        let fs = MockFileSystem::new();
        let supervisor = Supervisor::new(
            plan.clone(),
            Arc::new(runner.clone()),
            Arc::new(fs.clone()),
            Arc::new(api.clone()),
        );
        let outcomes = supervisor.subscribe_outcomes();
        Self {
            supervisor,
            runner,
            api,
            fs,
            plan,
            outcomes,
        }
    }

    /// Pretend the virtual environment already exists.
    pub fn with_existing_env(self) -> Self {
        self.fs.add_file(self.plan.env_probe_path(), "");
        self
    }

    pub async fn next_outcome(&mut self) -> JobFinished {
        with_timeout(self.outcomes.recv())
            .await
            .expect("outcome channel closed")
    }

    /// Persisted log texts of `cluster`.
    pub fn log(&self, cluster: &str) -> Vec<String> {
        self.supervisor
            .stream()
            .history(cluster)
            .expect("reading history")
            .into_iter()
            .map(|line| line.text)
            .collect()
    }

    pub async fn wait_for_step(&self, cluster: &str, step: &str) {
        let orchestrator = self.supervisor.orchestrator();
        wait_until(|| orchestrator.active_steps(cluster).iter().any(|s| *s == step)).await;
    }
}

/// Poll `cond` until it holds, failing the test after the usual timeout.
pub async fn wait_until<F>(mut cond: F)
where
    F: FnMut() -> bool,
{
    with_timeout(async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
}
