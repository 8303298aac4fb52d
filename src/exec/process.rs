// src/exec/process.rs

//! Real stage runner backed by `tokio::process`.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::errors::SpawnError;
use crate::exec::output::OutputTap;
use crate::exec::runner::{KillSwitch, RunningStage, SIGNAL_EXIT_CODE, StageExit, StageRunner};
use crate::exec::StageCommand;
use crate::logs::LogStream;

/// How long to keep draining output after a kill before giving up on
/// descendants that still hold the pipes.
const KILL_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Runner that spawns OS processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

impl StageRunner for ProcessRunner {
    fn spawn(
        &self,
        cluster: &str,
        command: &StageCommand,
        stream: &LogStream,
    ) -> Result<RunningStage, SpawnError> {
        info!(
            cluster,
            step = command.label(),
            cmd = %command.display(),
            "starting stage process"
        );

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .current_dir(&command.workdir)
            .envs(&command.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| SpawnError::new(command.program_display(), e))?;

        // A freshly spawned child always has both pipes.
        let tap = OutputTap::attach(
            &mut child,
            cluster,
            command.label(),
            command.failure_marker.clone(),
            stream,
        );

        let (kill, kill_rx) = KillSwitch::pair();
        let (exit_tx, exit_rx) = oneshot::channel();

        let cluster = cluster.to_string();
        let label = command.label();
        let stream = stream.clone();
        tokio::spawn(async move {
            let exit = supervise(child, tap, kill_rx, &cluster, label).await;
            stream.emit(&cluster, &closing_line(label, &exit));
            if exit_tx.send(exit).is_err() {
                debug!(cluster = %cluster, step = label, "nobody waiting for stage exit");
            }
        });

        Ok(RunningStage { kill, exit: exit_rx })
    }
}

/// Wait for the child to exit or for a kill request, then drain its output.
async fn supervise(
    mut child: Child,
    mut tap: Option<OutputTap>,
    mut kill_rx: oneshot::Receiver<()>,
    cluster: &str,
    label: &'static str,
) -> StageExit {
    // A dropped kill switch (Err) disables that branch; only an explicit
    // kill interrupts the wait.
    let waited = tokio::select! {
        status = child.wait() => Some(status),
        Ok(()) = &mut kill_rx => None,
    };

    match waited {
        Some(status) => {
            if let Some(tap) = tap.as_mut() {
                tap.finish().await;
            }
            let marker_seen = tap.as_ref().is_some_and(OutputTap::marker_seen);
            let code = match status {
                Ok(status) => status.code().unwrap_or(SIGNAL_EXIT_CODE),
                Err(e) => {
                    warn!(cluster, step = label, error = %e, "failed waiting for stage process");
                    SIGNAL_EXIT_CODE
                }
            };
            info!(cluster, step = label, exit_code = code, "stage process exited");
            StageExit::Exited { code, marker_seen }
        }
        None => {
            info!(cluster, step = label, "kill requested; killing stage process");
            if let Err(e) = child.start_kill() {
                warn!(cluster, step = label, error = %e, "failed to kill stage process");
            }
            let code = match child.wait().await {
                Ok(status) => status.code(),
                Err(_) => None,
            };
            if let Some(tap) = tap.as_mut() {
                if tokio::time::timeout(KILL_DRAIN_GRACE, tap.finish()).await.is_err() {
                    tap.abort();
                }
            }
            StageExit::Killed { code }
        }
    }
}

fn closing_line(label: &str, exit: &StageExit) -> String {
    match exit {
        StageExit::Exited { code, .. } => format!("[{label}] process exited with code {code}"),
        StageExit::Killed { code: Some(code) } => {
            format!("[{label}] process killed (exit code {code})")
        }
        StageExit::Killed { code: None } => format!("[{label}] process killed (signal)"),
    }
}
