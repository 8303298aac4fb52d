// src/exec/runner.rs

//! Pluggable stage runner abstraction.
//!
//! The orchestrator talks to a `StageRunner` instead of spawning processes
//! itself. Production uses [`ProcessRunner`](super::ProcessRunner); tests
//! provide a scripted runner that never touches the OS.

use std::fmt::Debug;

use tokio::sync::oneshot;

use crate::errors::SpawnError;
use crate::exec::StageCommand;
use crate::logs::LogStream;

/// How a stage process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageExit {
    /// The process exited by itself. `code` is [`SIGNAL_EXIT_CODE`] when
    /// it died from a signal we did not send.
    Exited { code: i32, marker_seen: bool },
    /// We killed it. `code` is whatever the OS reported, if anything.
    Killed { code: Option<i32> },
}

/// Exit code reported for a process that died from a signal.
pub const SIGNAL_EXIT_CODE: i32 = -1;

impl StageExit {
    pub fn success(&self) -> bool {
        matches!(self, StageExit::Exited { code: 0, .. })
    }
}

/// Sends the kill request to a running stage. Firing it twice is harmless.
#[derive(Debug)]
pub struct KillSwitch {
    tx: Option<oneshot::Sender<()>>,
}

impl KillSwitch {
    /// A switch and the signal the running stage listens on.
    pub fn pair() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Request the kill. Returns false when the stage had already finished.
    pub fn kill(&mut self) -> bool {
        match self.tx.take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }
}

/// A stage process that started successfully.
#[derive(Debug)]
pub struct RunningStage {
    pub kill: KillSwitch,
    /// Resolves once the process is gone and all of its output was emitted.
    pub exit: oneshot::Receiver<StageExit>,
}

/// Trait abstracting how stage commands are executed.
pub trait StageRunner: Send + Sync + Debug {
    /// Start `command` for `cluster`, streaming its output into `stream`.
    ///
    /// Must not block: the returned `RunningStage` is awaited by the caller.
    /// A process that cannot be started yields `SpawnError` immediately.
    fn spawn(
        &self,
        cluster: &str,
        command: &StageCommand,
        stream: &LogStream,
    ) -> Result<RunningStage, SpawnError>;
}
