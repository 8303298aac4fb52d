// src/supervisor.rs

//! The boundary every external caller goes through.
//!
//! `Supervisor` owns the orchestrator and the log stream and reacts to
//! finished jobs: a successful deployment is reported to the dashboard with
//! exactly one `mark_ready` call, and every terminal event is re-broadcast
//! to in-process subscribers.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::api::{ClusterApi, NodeRole};
use crate::engine::{JobFinished, JobId, JobOutcome, KillReport, Orchestrator};
use crate::errors::{Result, SupervisorError};
use crate::exec::{PipelinePlan, StageRunner};
use crate::fs::FileSystem;
use crate::logs::{LogStream, Observer, ObserverId};
use crate::types::{ClusterId, Stage};

/// How long `status` waits for the cluster record.
const RECORD_LOOKUP_TIMEOUT: Duration = Duration::from_secs(3);

const OUTCOME_CAPACITY: usize = 64;

/// Snapshot returned by [`Supervisor::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    pub cluster_id: ClusterId,
    pub stage: Stage,
    pub running: bool,
    pub active_steps: Vec<&'static str>,
    pub log_lines: usize,
    pub cluster: Option<ClusterSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSummary {
    pub name: String,
    pub nodes: usize,
    pub masters: usize,
    pub workers: usize,
}

#[derive(Debug, Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    orchestrator: Orchestrator,
    api: Arc<dyn ClusterApi>,
    outcomes: broadcast::Sender<JobFinished>,
}

impl Supervisor {
    /// Wire up the supervisor. Must be called inside a Tokio runtime: the
    /// completion listener is spawned here.
    pub fn new(
        plan: PipelinePlan,
        runner: Arc<dyn StageRunner>,
        fs: Arc<dyn FileSystem>,
        api: Arc<dyn ClusterApi>,
    ) -> Self {
        let stream = LogStream::new(fs.clone(), plan.log_dir());
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();
        let orchestrator = Orchestrator::new(plan, runner, stream.clone(), fs, finished_tx);
        let (outcomes, _) = broadcast::channel(OUTCOME_CAPACITY);

        tokio::spawn(completion_loop(
            finished_rx,
            api.clone(),
            outcomes.clone(),
            stream,
        ));

        Self {
            inner: Arc::new(Inner {
                orchestrator,
                api,
                outcomes,
            }),
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.inner.orchestrator
    }

    pub fn stream(&self) -> &LogStream {
        self.inner.orchestrator.stream()
    }

    pub fn start(&self, cluster: &str) -> Result<JobId> {
        validate_cluster_id(cluster)?;
        self.inner.orchestrator.start(cluster)
    }

    /// Replay the log of `cluster` to `observer`, then keep it attached for
    /// live lines. A job in flight is announced between the two.
    pub fn attach(&self, cluster: &str, observer: Observer) -> Result<usize> {
        validate_cluster_id(cluster)?;
        let orchestrator = &self.inner.orchestrator;
        let notice = || {
            orchestrator
                .stage_of(cluster)
                .filter(|stage| stage.is_active())
                .map(|stage| format!("[supervisor] re-attached to running stage {stage}"))
        };

        let replayed = self.stream().attach(cluster, observer, notice)?;
        debug!(cluster, replayed, "observer attached");
        Ok(replayed)
    }

    pub fn detach(&self, observer: ObserverId) {
        self.stream().detach(observer);
    }

    pub fn kill(&self, cluster: &str) -> Result<KillReport> {
        validate_cluster_id(cluster)?;
        Ok(self.inner.orchestrator.kill(cluster))
    }

    /// Truncate the log of `cluster`. A running job keeps running.
    pub fn clear_logs(&self, cluster: &str) -> Result<()> {
        validate_cluster_id(cluster)?;
        self.stream().clear(cluster)?;
        info!(cluster, "deployment log cleared");
        Ok(())
    }

    pub async fn status(&self, cluster: &str) -> Result<ClusterStatus> {
        validate_cluster_id(cluster)?;
        let orchestrator = &self.inner.orchestrator;
        let stage = orchestrator.stage_of(cluster);
        let log_lines = self.stream().history(cluster)?.len();

        let cluster_summary =
            match tokio::time::timeout(RECORD_LOOKUP_TIMEOUT, self.inner.api.fetch_cluster(cluster))
                .await
            {
                Ok(Ok(record)) => Some(ClusterSummary {
                    masters: record.count_role(NodeRole::Master),
                    workers: record.count_role(NodeRole::Worker),
                    nodes: record.nodes.len(),
                    name: record.name,
                }),
                Ok(Err(e)) => {
                    debug!(cluster, error = %e, "cluster record unavailable");
                    None
                }
                Err(_) => {
                    debug!(cluster, "cluster record lookup timed out");
                    None
                }
            };

        Ok(ClusterStatus {
            cluster_id: cluster.to_string(),
            stage: stage.unwrap_or(Stage::Idle),
            running: stage.is_some(),
            active_steps: orchestrator.active_steps(cluster),
            log_lines,
            cluster: cluster_summary,
        })
    }

    /// Terminal events of every job started after this call.
    pub fn subscribe_outcomes(&self) -> broadcast::Receiver<JobFinished> {
        self.inner.outcomes.subscribe()
    }
}

/// Cluster ids name log files and inventory directories.
pub fn validate_cluster_id(cluster: &str) -> Result<()> {
    let bad = cluster.is_empty()
        || cluster.contains(['/', '\\'])
        || cluster.contains("..")
        || cluster.chars().any(char::is_control);
    if bad {
        return Err(SupervisorError::InvalidClusterId(cluster.to_string()));
    }
    Ok(())
}

async fn completion_loop(
    mut finished_rx: mpsc::UnboundedReceiver<JobFinished>,
    api: Arc<dyn ClusterApi>,
    outcomes: broadcast::Sender<JobFinished>,
    stream: LogStream,
) {
    while let Some(finished) = finished_rx.recv().await {
        let api = api.clone();
        let outcomes = outcomes.clone();
        let stream = stream.clone();
        tokio::spawn(async move {
            if finished.outcome == JobOutcome::Done {
                report_ready(api.as_ref(), &stream, &finished).await;
            }
            if outcomes.send(finished).is_err() {
                debug!("no outcome subscribers");
            }
        });
    }
    debug!("completion loop stopped");
}

async fn report_ready(api: &dyn ClusterApi, stream: &LogStream, finished: &JobFinished) {
    let cluster = finished.cluster_id.as_str();
    match api.mark_ready(cluster).await {
        Ok(()) => {
            stream.emit(cluster, "[supervisor] cluster marked ready");
        }
        Err(e) => {
            warn!(cluster, job_id = finished.job_id, error = %e, "failed to mark cluster ready");
            stream.emit(cluster, &format!("[error] failed to mark cluster ready: {e}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_ids_cannot_escape_the_log_directory() {
        assert!(validate_cluster_id("42").is_ok());
        assert!(validate_cluster_id("cluster-a_1").is_ok());

        for bad in ["", "../etc", "a/b", "a\\b", "..", "x\ny"] {
            assert!(
                matches!(validate_cluster_id(bad), Err(SupervisorError::InvalidClusterId(_))),
                "{bad:?} should be rejected"
            );
        }
    }
}
