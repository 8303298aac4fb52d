// src/engine/jobs.rs

//! The per-cluster job table: single-flight slots and live process handles.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::engine::{JobId, Step};
use crate::errors::{Result, SpawnError, SupervisorError};
use crate::exec::{KillSwitch, RunningStage, StageExit};
use crate::types::{ClusterId, Stage};

/// A cluster's currently executing pipeline.
#[derive(Debug)]
pub struct ClusterJob {
    pub cluster_id: ClusterId,
    pub job_id: JobId,
    pub stage: Stage,
    /// Step label -> kill switch of its running process, in start order.
    active: IndexMap<&'static str, KillSwitch>,
}

/// One process handled by a kill request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KilledProcess {
    pub step: &'static str,
    /// False when the process had already exited on its own.
    pub signalled: bool,
}

/// Result of `kill`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KillReport {
    NothingRunning,
    Killed {
        job_id: JobId,
        stage: Stage,
        processes: Vec<KilledProcess>,
    },
}

impl KillReport {
    /// Log lines describing what the kill did.
    pub fn lines(&self) -> Vec<String> {
        match self {
            KillReport::NothingRunning => Vec::new(),
            KillReport::Killed {
                stage, processes, ..
            } => {
                let lines: Vec<String> = processes
                    .iter()
                    .filter(|p| p.signalled)
                    .map(|p| format!("[supervisor] killed {} process", p.step))
                    .collect();
                if lines.is_empty() {
                    vec![format!("[supervisor] cancelled deployment during {stage}")]
                } else {
                    lines
                }
            }
        }
    }
}

/// Outcome of trying to start a step's process.
#[derive(Debug)]
pub enum Launch {
    Started(oneshot::Receiver<StageExit>),
    SpawnFailed(SpawnError),
    /// The job was cancelled before the process could be started.
    Cancelled,
}

#[derive(Debug, Default)]
pub struct JobTable {
    jobs: Mutex<HashMap<ClusterId, ClusterJob>>,
    next_id: AtomicU64,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the single-flight slot for `cluster`.
    pub fn acquire(&self, cluster: &str) -> Result<JobId> {
        let mut jobs = self.jobs.lock();
        if jobs.contains_key(cluster) {
            return Err(SupervisorError::AlreadyRunning(cluster.to_string()));
        }

        let job_id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        jobs.insert(
            cluster.to_string(),
            ClusterJob {
                cluster_id: cluster.to_string(),
                job_id,
                stage: Stage::Idle,
                active: IndexMap::new(),
            },
        );
        Ok(job_id)
    }

    pub fn is_current(&self, cluster: &str, job_id: JobId) -> bool {
        self.jobs
            .lock()
            .get(cluster)
            .is_some_and(|job| job.job_id == job_id)
    }

    /// Record the stage reached by `job_id`. No-op for a stale job.
    pub fn set_stage(&self, cluster: &str, job_id: JobId, stage: Stage) -> bool {
        match self.jobs.lock().get_mut(cluster) {
            Some(job) if job.job_id == job_id => {
                job.stage = stage;
                true
            }
            _ => false,
        }
    }

    /// Start a step's process, but only while `job_id` still owns the slot.
    ///
    /// The ownership check, the spawn and the handle registration happen
    /// under one lock, so a concurrent `cancel` either sees the new handle
    /// or prevents the spawn.
    pub fn launch<F>(&self, cluster: &str, job_id: JobId, step: Step, spawn: F) -> Launch
    where
        F: FnOnce() -> std::result::Result<RunningStage, SpawnError>,
    {
        let mut jobs = self.jobs.lock();
        let job = match jobs.get_mut(cluster) {
            Some(job) if job.job_id == job_id => job,
            _ => {
                debug!(cluster, job_id, step = step.label(), "job gone; not spawning");
                return Launch::Cancelled;
            }
        };

        match spawn() {
            Ok(RunningStage { kill, exit }) => {
                job.active.insert(step.label(), kill);
                Launch::Started(exit)
            }
            Err(e) => Launch::SpawnFailed(e),
        }
    }

    /// Forget the handle of a step whose process has exited.
    pub fn clear_active(&self, cluster: &str, job_id: JobId, step: Step) {
        if let Some(job) = self.jobs.lock().get_mut(cluster) {
            if job.job_id == job_id {
                job.active.shift_remove(step.label());
            }
        }
    }

    /// Give up the slot. Returns false if `job_id` no longer held it.
    pub fn release(&self, cluster: &str, job_id: JobId) -> bool {
        let mut jobs = self.jobs.lock();
        match jobs.get(cluster) {
            Some(job) if job.job_id == job_id => {
                jobs.remove(cluster);
                true
            }
            _ => false,
        }
    }

    /// Remove the job of `cluster` and kill every process it recorded.
    pub fn cancel(&self, cluster: &str) -> KillReport {
        let removed = self.jobs.lock().remove(cluster);
        let Some(mut job) = removed else {
            return KillReport::NothingRunning;
        };

        let processes = job
            .active
            .iter_mut()
            .map(|(step, switch)| KilledProcess {
                step: *step,
                signalled: switch.kill(),
            })
            .collect();

        KillReport::Killed {
            job_id: job.job_id,
            stage: job.stage,
            processes,
        }
    }

    pub fn stage_of(&self, cluster: &str) -> Option<Stage> {
        self.jobs.lock().get(cluster).map(|job| job.stage)
    }

    pub fn active_steps(&self, cluster: &str) -> Vec<&'static str> {
        self.jobs
            .lock()
            .get(cluster)
            .map(|job| job.active.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn running(&self) -> Vec<(ClusterId, Stage)> {
        let mut out: Vec<_> = self
            .jobs
            .lock()
            .values()
            .map(|job| (job.cluster_id.clone(), job.stage))
            .collect();
        out.sort();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_running() -> (RunningStage, oneshot::Receiver<()>, oneshot::Sender<StageExit>) {
        let (kill, kill_rx) = KillSwitch::pair();
        let (exit_tx, exit) = oneshot::channel();
        (RunningStage { kill, exit }, kill_rx, exit_tx)
    }

    #[test]
    fn second_acquire_is_already_running() {
        let table = JobTable::new();
        table.acquire("c1").unwrap();
        assert!(matches!(
            table.acquire("c1"),
            Err(SupervisorError::AlreadyRunning(_))
        ));
        assert!(table.acquire("c2").is_ok());
    }

    #[test]
    fn stale_job_cannot_release_successor() {
        let table = JobTable::new();
        let first = table.acquire("c1").unwrap();
        table.cancel("c1");
        let second = table.acquire("c1").unwrap();

        assert!(!table.release("c1", first));
        assert!(table.is_current("c1", second));
    }

    #[test]
    fn cancel_kills_recorded_processes_in_order() {
        let table = JobTable::new();
        let job = table.acquire("c1").unwrap();
        table.set_stage("c1", job, Stage::RunConfigure);

        let (running, mut kill_rx, _exit_tx) = fake_running();
        assert!(matches!(
            table.launch("c1", job, Step::Configure, || Ok(running)),
            Launch::Started(_)
        ));
        assert_eq!(table.active_steps("c1"), vec!["ansible"]);

        let report = table.cancel("c1");

        assert_eq!(
            report,
            KillReport::Killed {
                job_id: job,
                stage: Stage::RunConfigure,
                processes: vec![KilledProcess {
                    step: "ansible",
                    signalled: true
                }],
            }
        );
        assert!(kill_rx.try_recv().is_ok());
        assert_eq!(table.stage_of("c1"), None);
    }

    #[test]
    fn launch_after_cancel_never_spawns() {
        let table = JobTable::new();
        let job = table.acquire("c1").unwrap();
        table.cancel("c1");

        let mut called = false;
        let launch = table.launch("c1", job, Step::Provision, || {
            called = true;
            Err(SpawnError::new("x", std::io::ErrorKind::Other.into()))
        });

        assert!(matches!(launch, Launch::Cancelled));
        assert!(!called);
    }

    #[test]
    fn cancel_without_job_reports_nothing_running() {
        assert_eq!(JobTable::new().cancel("nope"), KillReport::NothingRunning);
    }

    #[test]
    fn kill_lines_name_signalled_processes() {
        let report = KillReport::Killed {
            job_id: 1,
            stage: Stage::RunConfigure,
            processes: vec![
                KilledProcess {
                    step: "ansible",
                    signalled: true,
                },
                KilledProcess {
                    step: "python",
                    signalled: false,
                },
            ],
        };
        assert_eq!(report.lines(), vec!["[supervisor] killed ansible process"]);

        let between_steps = KillReport::Killed {
            job_id: 2,
            stage: Stage::EnsureEnv,
            processes: Vec::new(),
        };
        assert_eq!(
            between_steps.lines(),
            vec!["[supervisor] cancelled deployment during ENSURE_ENV"]
        );
        assert!(KillReport::NothingRunning.lines().is_empty());
    }
}
