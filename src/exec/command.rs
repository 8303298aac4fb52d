// src/exec/command.rs

//! Concrete command lines for each pipeline step.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::config::{ConfigFile, PipelineSection};
use crate::engine::Step;
use crate::errors::{Result, SupervisorError};

/// Everything needed to launch one step's process.
#[derive(Debug, Clone)]
pub struct StageCommand {
    pub step: Step,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub workdir: PathBuf,
    pub env: BTreeMap<String, String>,
    /// Output lines matching this are reported back in the exit status.
    pub failure_marker: Option<Regex>,
}

impl StageCommand {
    /// Log tag for this command's output, e.g. `ansible`.
    pub fn label(&self) -> &'static str {
        self.step.label()
    }

    pub fn program_display(&self) -> String {
        self.program.display().to_string()
    }

    /// Shell-ish rendering for log lines and `--dry-run`.
    pub fn display(&self) -> String {
        let mut out = self.program_display();
        for arg in &self.args {
            out.push(' ');
            out.push_str(arg);
        }
        out
    }
}

/// Resolves configuration into per-step commands.
#[derive(Debug, Clone)]
pub struct PipelinePlan {
    workdir: PathBuf,
    log_dir: PathBuf,
    venv_dir: PathBuf,
    inventory_dir: PathBuf,
    callback_url: String,
    pipeline: PipelineSection,
    missing_package_manager: Regex,
}

impl PipelinePlan {
    pub fn from_config(cfg: &ConfigFile) -> Result<Self> {
        let missing_package_manager = Regex::new(&cfg.pipeline.missing_package_manager)
            .map_err(|e| {
                SupervisorError::ConfigError(format!("invalid missing_package_manager regex: {e}"))
            })?;

        // Stage processes run inside the workdir, so every path handed to
        // them must not depend on it being relative.
        let workdir = std::path::absolute(&cfg.paths.workdir).map_err(|e| {
            SupervisorError::ConfigError(format!(
                "cannot resolve workdir {}: {e}",
                cfg.paths.workdir.display()
            ))
        })?;

        Ok(Self {
            workdir,
            log_dir: cfg.paths.log_dir.clone(),
            venv_dir: cfg.paths.venv_dir.clone(),
            inventory_dir: cfg.paths.inventory_dir.clone(),
            callback_url: cfg.server.callback_url.trim_end_matches('/').to_string(),
            pipeline: cfg.pipeline.clone(),
            missing_package_manager,
        })
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Directory holding `deploy-<cluster>.log` files.
    pub fn log_dir(&self) -> PathBuf {
        self.workdir.join(&self.log_dir)
    }

    pub fn callback_url(&self) -> &str {
        &self.callback_url
    }

    /// The file whose presence means the virtual environment exists.
    pub fn env_probe_path(&self) -> PathBuf {
        self.venv_bin("python")
    }

    pub fn env_dir(&self) -> PathBuf {
        self.workdir.join(&self.venv_dir)
    }

    /// Inventory path as passed to the playbook, relative to the workdir.
    pub fn inventory_path(&self, cluster: &str) -> PathBuf {
        self.inventory_dir.join(cluster).join("hosts")
    }

    pub fn command(&self, step: Step, cluster: &str) -> StageCommand {
        let p = &self.pipeline;
        let (program, args): (PathBuf, Vec<String>) = match step {
            Step::CreateEnv => (
                PathBuf::from(&p.python),
                vec![
                    "-m".into(),
                    "venv".into(),
                    self.env_dir().display().to_string(),
                ],
            ),
            Step::InstallDeps => (
                self.venv_bin("pip"),
                vec!["install".into(), "-r".into(), p.requirements.clone()],
            ),
            Step::BootstrapPip => (
                self.venv_bin("python"),
                vec!["-m".into(), "ensurepip".into(), "--upgrade".into()],
            ),
            Step::Provision => (
                self.venv_bin("python"),
                vec![
                    p.provision_script.clone(),
                    self.callback_url.clone(),
                    cluster.to_string(),
                ],
            ),
            Step::Configure => (
                self.venv_bin("ansible-playbook"),
                vec![
                    "-i".into(),
                    self.inventory_path(cluster).display().to_string(),
                    p.playbook.clone(),
                    "-b".into(),
                    "-v".into(),
                ],
            ),
            Step::AppInstall => (
                self.venv_bin("python"),
                vec![
                    p.app_script.clone(),
                    self.callback_url.clone(),
                    cluster.to_string(),
                ],
            ),
        };

        let mut env = p.env.clone();
        env.insert("PYTHONUNBUFFERED".into(), "1".into());
        env.insert("AUTOKUBE_CLUSTER_ID".into(), cluster.to_string());

        let failure_marker = match step {
            Step::InstallDeps => Some(self.missing_package_manager.clone()),
            _ => None,
        };

        StageCommand {
            step,
            program,
            args,
            workdir: self.workdir.clone(),
            env,
            failure_marker,
        }
    }

    fn venv_bin(&self, exe: &str) -> PathBuf {
        let bin = if cfg!(windows) { "Scripts" } else { "bin" };
        self.env_dir().join(bin).join(exe)
    }
}
