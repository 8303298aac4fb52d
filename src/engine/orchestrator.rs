// src/engine/orchestrator.rs

//! Async driver around [`PipelineCore`].
//!
//! One driver task runs per job. It feeds events into the core, executes
//! the returned commands (environment probe, process spawn, finish) and
//! turns the results back into events until the core says stop.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::engine::jobs::Launch;
use crate::engine::{
    CoreCommand, CoreStep, JobFinished, JobId, JobOutcome, JobTable, KillReport, PipelineCore,
    PipelineEvent, Step, StepFailure,
};
use crate::errors::{Result, SpawnError};
use crate::exec::{PipelinePlan, StageExit, StageRunner};
use crate::fs::FileSystem;
use crate::logs::LogStream;
use crate::types::Stage;

#[derive(Debug, Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    jobs: JobTable,
    runner: Arc<dyn StageRunner>,
    stream: LogStream,
    fs: Arc<dyn FileSystem>,
    plan: PipelinePlan,
    finished_tx: mpsc::UnboundedSender<JobFinished>,
}

impl Orchestrator {
    pub fn new(
        plan: PipelinePlan,
        runner: Arc<dyn StageRunner>,
        stream: LogStream,
        fs: Arc<dyn FileSystem>,
        finished_tx: mpsc::UnboundedSender<JobFinished>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                jobs: JobTable::new(),
                runner,
                stream,
                fs,
                plan,
                finished_tx,
            }),
        }
    }

    pub fn plan(&self) -> &PipelinePlan {
        &self.inner.plan
    }

    pub fn stream(&self) -> &LogStream {
        &self.inner.stream
    }

    /// Begin a deployment for `cluster` and return without waiting for it.
    pub fn start(&self, cluster: &str) -> Result<JobId> {
        let job_id = self.inner.jobs.acquire(cluster)?;
        info!(cluster, job_id, "deployment started");

        let this = self.clone();
        let cluster = cluster.to_string();
        tokio::spawn(async move {
            this.drive(cluster, job_id).await;
        });

        Ok(job_id)
    }

    /// Cancel the job of `cluster`, killing whatever it is running.
    pub fn kill(&self, cluster: &str) -> KillReport {
        let report = self.inner.jobs.cancel(cluster);

        match &report {
            KillReport::NothingRunning => {
                debug!(cluster, "kill requested but nothing is running");
            }
            KillReport::Killed {
                job_id,
                stage,
                processes,
            } => {
                info!(cluster, job_id, stage = %stage, killed = processes.len(), "deployment cancelled");
                for line in report.lines() {
                    self.emit(cluster, &line);
                }
            }
        }

        report
    }

    pub fn stage_of(&self, cluster: &str) -> Option<Stage> {
        self.inner.jobs.stage_of(cluster)
    }

    pub fn active_steps(&self, cluster: &str) -> Vec<&'static str> {
        self.inner.jobs.active_steps(cluster)
    }

    pub fn running(&self) -> Vec<(String, Stage)> {
        self.inner.jobs.running()
    }

    async fn drive(self, cluster: String, job_id: JobId) {
        let mut core = PipelineCore::new();
        let mut events = VecDeque::from([PipelineEvent::Start]);

        while let Some(event) = events.pop_front() {
            debug!(cluster = %cluster, job_id, ?event, "pipeline event");
            let CoreStep {
                commands,
                keep_running,
            } = core.step(event);

            if self.inner.jobs.set_stage(&cluster, job_id, core.stage()) {
                debug!(cluster = %cluster, job_id, stage = %core.stage(), "stage updated");
            }

            for command in commands {
                match command {
                    CoreCommand::ProbeEnv => events.push_back(self.probe_env(&cluster)),
                    CoreCommand::Spawn(step) => {
                        events.push_back(self.run_step(&cluster, job_id, step).await)
                    }
                    CoreCommand::Finish(outcome) => self.finish(&cluster, job_id, outcome),
                }
            }

            if !keep_running {
                break;
            }
        }

        debug!(cluster = %cluster, job_id, "pipeline driver exiting");
    }

    fn probe_env(&self, cluster: &str) -> PipelineEvent {
        let probe = self.inner.plan.env_probe_path();
        let present = self.inner.fs.is_file(&probe);
        let env_dir = self.inner.plan.env_dir();
        let line = if present {
            format!("[venv] using existing environment {}", env_dir.display())
        } else {
            format!("[venv] no environment at {}; creating it", env_dir.display())
        };
        self.emit(cluster, &line);
        PipelineEvent::EnvProbed { present }
    }

    async fn run_step(&self, cluster: &str, job_id: JobId, step: Step) -> PipelineEvent {
        let inner = &self.inner;
        let command = inner.plan.command(step, cluster);

        let launch = inner.jobs.launch(cluster, job_id, step, || {
            inner.runner.spawn(cluster, &command, &inner.stream)
        });

        let exit_rx = match launch {
            Launch::Started(rx) => rx,
            Launch::Cancelled => return PipelineEvent::Cancelled,
            Launch::SpawnFailed(err) => {
                warn!(cluster, job_id, step = step.label(), error = %err, "stage process failed to start");
                return PipelineEvent::StepFinished {
                    step,
                    result: Err(spawn_failure(step, &err)),
                };
            }
        };

        let exit = exit_rx.await;
        inner.jobs.clear_active(cluster, job_id, step);

        // A kill removes the job before the process is gone.
        if !inner.jobs.is_current(cluster, job_id) {
            return PipelineEvent::Cancelled;
        }

        let result = match exit {
            Ok(exit) => exit_result(step, exit),
            Err(_) => {
                warn!(cluster, job_id, step = step.label(), "stage runner dropped without reporting an exit");
                Err(StepFailure::Killed)
            }
        };

        PipelineEvent::StepFinished { step, result }
    }

    fn finish(&self, cluster: &str, job_id: JobId, outcome: JobOutcome) {
        match &outcome {
            JobOutcome::Done => {
                info!(cluster, job_id, "deployment finished");
                self.emit(cluster, &format!("[status] {}", Stage::Done));
            }
            JobOutcome::Failed { stage, reason } => {
                warn!(cluster, job_id, stage = %stage, reason = %reason, "deployment failed");
                self.emit(cluster, &format!("[error] {stage} failed: {reason}"));
                self.emit(cluster, &format!("[status] {}", Stage::Failed));
            }
            JobOutcome::Cancelled => {
                info!(cluster, job_id, "deployment driver observed cancellation");
                self.emit(cluster, &format!("[status] {} (cancelled)", Stage::Idle));
            }
        }

        if !self.inner.jobs.release(cluster, job_id) {
            debug!(cluster, job_id, "slot already released");
        }

        let finished = JobFinished {
            cluster_id: cluster.to_string(),
            job_id,
            outcome,
        };
        if self.inner.finished_tx.send(finished).is_err() {
            debug!(cluster, job_id, "no listener for job completion");
        }
    }

    fn emit(&self, cluster: &str, text: &str) {
        self.inner.stream.emit(cluster, text);
    }
}

/// Map a spawn error to a step failure. A missing `pip` binary is how a
/// broken environment shows up at INSTALL_DEPS.
fn spawn_failure(step: Step, err: &SpawnError) -> StepFailure {
    if step == Step::InstallDeps && err.is_not_found() {
        StepFailure::PackageManagerMissing
    } else {
        StepFailure::Spawn(err.to_string())
    }
}

fn exit_result(step: Step, exit: StageExit) -> std::result::Result<(), StepFailure> {
    match exit {
        StageExit::Exited { code: 0, .. } => Ok(()),
        StageExit::Exited {
            marker_seen: true, ..
        } if step == Step::InstallDeps => Err(StepFailure::PackageManagerMissing),
        StageExit::Exited { code, .. } => Err(StepFailure::NonZeroExit(code)),
        StageExit::Killed { .. } => Err(StepFailure::Killed),
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[test]
    fn missing_pip_binary_counts_as_missing_package_manager() {
        let err = SpawnError::new("venv/bin/pip", io::ErrorKind::NotFound.into());
        assert_eq!(
            spawn_failure(Step::InstallDeps, &err),
            StepFailure::PackageManagerMissing
        );

        let err = SpawnError::new("venv/bin/python", io::ErrorKind::NotFound.into());
        assert!(matches!(
            spawn_failure(Step::Provision, &err),
            StepFailure::Spawn(_)
        ));
    }

    #[test]
    fn marker_only_matters_for_dependency_install() {
        let exit = StageExit::Exited {
            code: 1,
            marker_seen: true,
        };
        assert_eq!(
            exit_result(Step::InstallDeps, exit),
            Err(StepFailure::PackageManagerMissing)
        );
        assert_eq!(
            exit_result(Step::Configure, exit),
            Err(StepFailure::NonZeroExit(1))
        );
    }

    #[test]
    fn zero_exit_succeeds_even_with_marker() {
        let exit = StageExit::Exited {
            code: 0,
            marker_seen: true,
        };
        assert_eq!(exit_result(Step::InstallDeps, exit), Ok(()));
        assert_eq!(
            exit_result(Step::Provision, StageExit::Killed { code: None }),
            Err(StepFailure::Killed)
        );
    }
}
