// src/engine/core.rs

//! Pure pipeline state machine.
//!
//! `PipelineCore` consumes [`PipelineEvent`]s and returns the commands the
//! async driver must execute next. It has no channels, no Tokio types and
//! performs no IO, so every transition can be unit tested directly.
//!
//! ```text
//! IDLE -> ENSURE_ENV -> INSTALL_DEPS -> RUN_PROVISION -> RUN_CONFIGURE -> RUN_APP_INSTALL -> DONE
//!            any stage: non-zero exit / spawn error -> FAILED
//!            any stage: cancel -> IDLE
//! ```

use tracing::{debug, warn};

use crate::engine::{JobOutcome, PipelineEvent, Step, StepFailure};
use crate::types::Stage;

/// Command produced by the core, to be executed by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreCommand {
    /// Check whether the virtual environment exists and report back with
    /// `PipelineEvent::EnvProbed`.
    ProbeEnv,
    /// Start this step's process and report back with `StepFinished`.
    Spawn(Step),
    /// The job reached its end; publish the outcome and release the slot.
    Finish(JobOutcome),
}

/// Decision returned by the core after handling one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreStep {
    pub commands: Vec<CoreCommand>,
    /// Whether the driver should keep waiting for further events.
    pub keep_running: bool,
}

#[derive(Debug, Clone)]
pub struct PipelineCore {
    stage: Stage,
    current: Option<Step>,
    probing: bool,
    bootstrap_attempted: bool,
}

impl Default for PipelineCore {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineCore {
    pub fn new() -> Self {
        Self {
            stage: Stage::Idle,
            current: None,
            probing: false,
            bootstrap_attempted: false,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn bootstrap_attempted(&self) -> bool {
        self.bootstrap_attempted
    }

    /// Single transition function.
    pub fn step(&mut self, event: PipelineEvent) -> CoreStep {
        match event {
            PipelineEvent::Start => self.on_start(),
            PipelineEvent::EnvProbed { present } => self.on_env_probed(present),
            PipelineEvent::StepFinished { step, result } => self.on_step_finished(step, result),
            PipelineEvent::Cancelled => self.on_cancelled(),
        }
    }

    fn on_start(&mut self) -> CoreStep {
        if self.stage != Stage::Idle {
            warn!(stage = %self.stage, "start received by a pipeline that already ran; ignoring");
            return self.ignore();
        }
        self.stage = Stage::EnsureEnv;
        self.probing = true;
        self.proceed(CoreCommand::ProbeEnv)
    }

    fn on_env_probed(&mut self, present: bool) -> CoreStep {
        if self.stage != Stage::EnsureEnv || !self.probing {
            warn!(stage = %self.stage, "unexpected environment probe result; ignoring");
            return self.ignore();
        }
        self.probing = false;

        if present {
            self.spawn(Step::InstallDeps)
        } else {
            self.spawn(Step::CreateEnv)
        }
    }

    fn on_step_finished(&mut self, step: Step, result: Result<(), StepFailure>) -> CoreStep {
        if self.current != Some(step) {
            warn!(
                ?step,
                current = ?self.current,
                "completion for a step that is not running; ignoring"
            );
            return self.ignore();
        }
        self.current = None;

        match result {
            Ok(()) => match step {
                Step::CreateEnv => self.spawn(Step::InstallDeps),
                Step::InstallDeps => self.spawn(Step::Provision),
                Step::BootstrapPip => {
                    debug!("bootstrap succeeded; retrying dependency install");
                    self.spawn(Step::InstallDeps)
                }
                Step::Provision => self.spawn(Step::Configure),
                Step::Configure => self.spawn(Step::AppInstall),
                Step::AppInstall => {
                    self.stage = Stage::Done;
                    self.finish(JobOutcome::Done)
                }
            },
            Err(StepFailure::PackageManagerMissing)
                if step == Step::InstallDeps && !self.bootstrap_attempted =>
            {
                self.bootstrap_attempted = true;
                self.spawn(Step::BootstrapPip)
            }
            Err(failure) => {
                let stage = step.stage();
                self.stage = Stage::Failed;
                self.finish(JobOutcome::Failed {
                    stage,
                    reason: failure.to_string(),
                })
            }
        }
    }

    fn on_cancelled(&mut self) -> CoreStep {
        if !self.stage.is_active() {
            return self.ignore();
        }
        self.stage = Stage::Idle;
        self.current = None;
        self.probing = false;
        self.finish(JobOutcome::Cancelled)
    }

    fn spawn(&mut self, step: Step) -> CoreStep {
        self.stage = step.stage();
        self.current = Some(step);
        self.proceed(CoreCommand::Spawn(step))
    }

    fn proceed(&self, command: CoreCommand) -> CoreStep {
        CoreStep {
            commands: vec![command],
            keep_running: true,
        }
    }

    fn finish(&self, outcome: JobOutcome) -> CoreStep {
        CoreStep {
            commands: vec![CoreCommand::Finish(outcome)],
            keep_running: false,
        }
    }

    fn ignore(&self) -> CoreStep {
        CoreStep {
            commands: Vec::new(),
            keep_running: self.stage.is_active(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(step: Step) -> PipelineEvent {
        PipelineEvent::StepFinished { step, result: Ok(()) }
    }

    fn failed(step: Step, failure: StepFailure) -> PipelineEvent {
        PipelineEvent::StepFinished {
            step,
            result: Err(failure),
        }
    }

    fn spawned(step: &CoreStep) -> Option<Step> {
        match step.commands.as_slice() {
            [CoreCommand::Spawn(s)] => Some(*s),
            _ => None,
        }
    }

    #[test]
    fn happy_path_walks_every_stage_in_order() {
        let mut core = PipelineCore::new();
        assert_eq!(core.step(PipelineEvent::Start).commands, vec![CoreCommand::ProbeEnv]);
        assert_eq!(core.stage(), Stage::EnsureEnv);

        let s = core.step(PipelineEvent::EnvProbed { present: false });
        assert_eq!(spawned(&s), Some(Step::CreateEnv));

        let mut stages = vec![core.stage()];
        for step in [Step::CreateEnv, Step::InstallDeps, Step::Provision, Step::Configure] {
            let s = core.step(ok(step));
            assert!(s.keep_running);
            stages.push(core.stage());
        }
        assert_eq!(
            stages,
            vec![
                Stage::EnsureEnv,
                Stage::InstallDeps,
                Stage::RunProvision,
                Stage::RunConfigure,
                Stage::RunAppInstall
            ]
        );

        let last = core.step(ok(Step::AppInstall));
        assert_eq!(last.commands, vec![CoreCommand::Finish(JobOutcome::Done)]);
        assert!(!last.keep_running);
        assert_eq!(core.stage(), Stage::Done);
    }

    #[test]
    fn present_environment_skips_creation() {
        let mut core = PipelineCore::new();
        core.step(PipelineEvent::Start);
        let s = core.step(PipelineEvent::EnvProbed { present: true });
        assert_eq!(spawned(&s), Some(Step::InstallDeps));
        assert_eq!(core.stage(), Stage::InstallDeps);
    }

    #[test]
    fn non_zero_exit_fails_without_spawning_anything_else() {
        let mut core = PipelineCore::new();
        core.step(PipelineEvent::Start);
        core.step(PipelineEvent::EnvProbed { present: true });
        core.step(ok(Step::InstallDeps));

        let s = core.step(failed(Step::Provision, StepFailure::NonZeroExit(2)));

        assert_eq!(
            s.commands,
            vec![CoreCommand::Finish(JobOutcome::Failed {
                stage: Stage::RunProvision,
                reason: "exited with code 2".to_string(),
            })]
        );
        assert!(!s.keep_running);
        assert_eq!(core.stage(), Stage::Failed);
    }

    #[test]
    fn environment_creation_failure_never_reaches_install() {
        let mut core = PipelineCore::new();
        core.step(PipelineEvent::Start);
        core.step(PipelineEvent::EnvProbed { present: false });

        let s = core.step(failed(Step::CreateEnv, StepFailure::Spawn("no python3".into())));

        assert!(s.commands.iter().all(|c| !matches!(c, CoreCommand::Spawn(_))));
        assert_eq!(core.stage(), Stage::Failed);
    }

    #[test]
    fn missing_package_manager_bootstraps_exactly_once() {
        let mut core = PipelineCore::new();
        core.step(PipelineEvent::Start);
        core.step(PipelineEvent::EnvProbed { present: true });

        let s = core.step(failed(Step::InstallDeps, StepFailure::PackageManagerMissing));
        assert_eq!(spawned(&s), Some(Step::BootstrapPip));
        assert_eq!(core.stage(), Stage::InstallDeps);
        assert!(core.bootstrap_attempted());

        let s = core.step(ok(Step::BootstrapPip));
        assert_eq!(spawned(&s), Some(Step::InstallDeps));

        let s = core.step(failed(Step::InstallDeps, StepFailure::PackageManagerMissing));
        assert!(matches!(
            s.commands.as_slice(),
            [CoreCommand::Finish(JobOutcome::Failed { stage: Stage::InstallDeps, .. })]
        ));
    }

    #[test]
    fn bootstrap_failure_is_fatal() {
        let mut core = PipelineCore::new();
        core.step(PipelineEvent::Start);
        core.step(PipelineEvent::EnvProbed { present: true });
        core.step(failed(Step::InstallDeps, StepFailure::PackageManagerMissing));

        let s = core.step(failed(Step::BootstrapPip, StepFailure::NonZeroExit(1)));

        assert!(!s.keep_running);
        assert_eq!(core.stage(), Stage::Failed);
    }

    #[test]
    fn cancel_returns_to_idle_and_ignores_late_completion() {
        let mut core = PipelineCore::new();
        core.step(PipelineEvent::Start);
        core.step(PipelineEvent::EnvProbed { present: true });
        core.step(ok(Step::InstallDeps));

        let s = core.step(PipelineEvent::Cancelled);
        assert_eq!(s.commands, vec![CoreCommand::Finish(JobOutcome::Cancelled)]);
        assert_eq!(core.stage(), Stage::Idle);

        let late = core.step(ok(Step::Provision));
        assert!(late.commands.is_empty());
        assert!(!late.keep_running);
    }

    #[test]
    fn stray_completion_is_ignored() {
        let mut core = PipelineCore::new();
        core.step(PipelineEvent::Start);
        core.step(PipelineEvent::EnvProbed { present: true });

        let s = core.step(ok(Step::Configure));

        assert!(s.commands.is_empty());
        assert!(s.keep_running);
        assert_eq!(core.stage(), Stage::InstallDeps);
    }
}
