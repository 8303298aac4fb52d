// src/types.rs

//! Small shared vocabulary types.

use std::fmt;

use serde::Serialize;

/// Opaque cluster identifier, as handed to us by the dashboard.
///
/// Everything in the supervisor (jobs, log files, observer rooms) is keyed
/// by this value.
pub type ClusterId = String;

/// Pipeline stage of a cluster job.
///
/// The declaration order is the execution order; `PartialOrd` follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Idle,
    EnsureEnv,
    InstallDeps,
    RunProvision,
    RunConfigure,
    RunAppInstall,
    Done,
    Failed,
}

impl Stage {
    /// True for the stages in which a job holds its cluster's slot.
    pub fn is_active(self) -> bool {
        !matches!(self, Stage::Idle | Stage::Done | Stage::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Idle => "IDLE",
            Stage::EnsureEnv => "ENSURE_ENV",
            Stage::InstallDeps => "INSTALL_DEPS",
            Stage::RunProvision => "RUN_PROVISION",
            Stage::RunConfigure => "RUN_CONFIGURE",
            Stage::RunAppInstall => "RUN_APP_INSTALL",
            Stage::Done => "DONE",
            Stage::Failed => "FAILED",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which pipe of a child process a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}
