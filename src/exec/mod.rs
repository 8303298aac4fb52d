// src/exec/mod.rs

//! Process execution layer.
//!
//! - [`command`] turns configuration into concrete per-step command lines.
//! - [`runner`] defines the `StageRunner` trait the orchestrator talks to.
//! - [`process`] is the production runner on top of `tokio::process`.
//! - [`output`] pumps child pipes into the log stream and owns line tagging.

pub mod command;
pub mod output;
pub mod process;
pub mod runner;

pub use command::{PipelinePlan, StageCommand};
pub use process::ProcessRunner;
pub use runner::{KillSwitch, RunningStage, SIGNAL_EXIT_CODE, StageExit, StageRunner};
