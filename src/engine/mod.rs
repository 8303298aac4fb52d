// src/engine/mod.rs

//! Pipeline orchestration.
//!
//! The pure transition core lives in [`core`]; the per-cluster job table in
//! [`jobs`]; the async driver that executes the core's commands against a
//! `StageRunner` in [`orchestrator`].

use serde::Serialize;
use thiserror::Error;

use crate::types::{ClusterId, Stage};

/// Identifies one pipeline execution. Successive jobs of the same cluster
/// get distinct ids.
pub type JobId = u64;

/// One external-process step. Every step belongs to exactly one stage;
/// `BootstrapPip` is the sub-step of `INSTALL_DEPS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    CreateEnv,
    InstallDeps,
    BootstrapPip,
    Provision,
    Configure,
    AppInstall,
}

impl Step {
    pub fn stage(self) -> Stage {
        match self {
            Step::CreateEnv => Stage::EnsureEnv,
            Step::InstallDeps | Step::BootstrapPip => Stage::InstallDeps,
            Step::Provision => Stage::RunProvision,
            Step::Configure => Stage::RunConfigure,
            Step::AppInstall => Stage::RunAppInstall,
        }
    }

    /// Log tag of the step's output, and its key in a job's active process
    /// table.
    pub fn label(self) -> &'static str {
        match self {
            Step::CreateEnv => "venv",
            Step::InstallDeps => "pip",
            Step::BootstrapPip => "ensurepip",
            Step::Provision => "python",
            Step::Configure => "ansible",
            Step::AppInstall => "app",
        }
    }
}

/// Why a step did not succeed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StepFailure {
    #[error("{0}")]
    Spawn(String),

    #[error("exited with code {0}")]
    NonZeroExit(i32),

    #[error("package manager missing from environment")]
    PackageManagerMissing,

    #[error("process was killed")]
    Killed,
}

/// Events fed into [`core::PipelineCore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    Start,
    /// Result of looking for the virtual environment.
    EnvProbed { present: bool },
    StepFinished {
        step: Step,
        result: Result<(), StepFailure>,
    },
    /// The job was killed from outside.
    Cancelled,
}

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum JobOutcome {
    Done,
    Failed { stage: Stage, reason: String },
    Cancelled,
}

/// Terminal event: emitted exactly once per job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFinished {
    pub cluster_id: ClusterId,
    pub job_id: JobId,
    pub outcome: JobOutcome,
}

pub mod core;
pub mod jobs;
pub mod orchestrator;

pub use self::core::{CoreCommand, CoreStep, PipelineCore};
pub use self::jobs::{JobTable, KillReport};
pub use self::orchestrator::Orchestrator;
