// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

/// Configuration exactly as read from the TOML file.
///
/// ```toml
/// [server]
/// bind = "0.0.0.0:3001"
/// callback_url = "http://localhost:3000"
///
/// [paths]
/// log_dir = "logs"
/// venv_dir = "venv"
///
/// [pipeline]
/// provision_script = "scripts/myscript.py"
/// playbook = "kubespray/cluster.yml"
///
/// [pipeline.env]
/// ANSIBLE_HOST_KEY_CHECKING = "False"
/// ```
///
/// All sections are optional and have defaults. Use `ConfigFile::try_from`
/// to obtain a validated configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub paths: PathsSection,

    #[serde(default)]
    pub pipeline: PipelineSection,
}

/// Validated configuration. Only constructible through `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub server: ServerSection,
    pub paths: PathsSection,
    pub pipeline: PipelineSection,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        server: ServerSection,
        paths: PathsSection,
        pipeline: PipelineSection,
    ) -> Self {
        Self {
            server,
            paths,
            pipeline,
        }
    }
}

/// `[server]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    /// Address the event-stream server listens on.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Base URL of the dashboard. Passed to the provisioning and app
    /// scripts, and used for the cluster API calls.
    #[serde(default = "default_callback_url")]
    pub callback_url: String,

    /// Name of the environment variable holding the internal API token.
    #[serde(default = "default_api_token_env")]
    pub api_token_env: String,
}

fn default_bind() -> String {
    "0.0.0.0:3001".to_string()
}

fn default_callback_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_api_token_env() -> String {
    "INTERNAL_API_TOKEN".to_string()
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            callback_url: default_callback_url(),
            api_token_env: default_api_token_env(),
        }
    }
}

/// `[paths]` section. Relative paths are resolved against `workdir`.
#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    /// Working directory of every stage process.
    #[serde(default = "default_workdir")]
    pub workdir: PathBuf,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    #[serde(default = "default_venv_dir")]
    pub venv_dir: PathBuf,

    /// Per-cluster inventories live at `<inventory_dir>/<cluster>/hosts`.
    #[serde(default = "default_inventory_dir")]
    pub inventory_dir: PathBuf,
}

fn default_workdir() -> PathBuf {
    PathBuf::from(".")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_venv_dir() -> PathBuf {
    PathBuf::from("venv")
}

fn default_inventory_dir() -> PathBuf {
    PathBuf::from("inventory")
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            workdir: default_workdir(),
            log_dir: default_log_dir(),
            venv_dir: default_venv_dir(),
            inventory_dir: default_inventory_dir(),
        }
    }
}

/// `[pipeline]` section: what each stage runs.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    /// Interpreter used to create the virtual environment.
    #[serde(default = "default_python")]
    pub python: String,

    #[serde(default = "default_requirements")]
    pub requirements: String,

    #[serde(default = "default_provision_script")]
    pub provision_script: String,

    #[serde(default = "default_playbook")]
    pub playbook: String,

    #[serde(default = "default_app_script")]
    pub app_script: String,

    /// Regex matched against dependency-install output; a match on a
    /// failed install means the package manager itself is missing.
    #[serde(default = "default_missing_package_manager")]
    pub missing_package_manager: String,

    /// Extra environment variables for every stage.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_python() -> String {
    "python3".to_string()
}

fn default_requirements() -> String {
    "requirements.txt".to_string()
}

fn default_provision_script() -> String {
    "scripts/myscript.py".to_string()
}

fn default_playbook() -> String {
    "cluster.yml".to_string()
}

fn default_app_script() -> String {
    "scripts/application.py".to_string()
}

fn default_missing_package_manager() -> String {
    "No module named pip".to_string()
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            python: default_python(),
            requirements: default_requirements(),
            provision_script: default_provision_script(),
            playbook: default_playbook(),
            app_script: default_app_script(),
            missing_package_manager: default_missing_package_manager(),
            env: BTreeMap::new(),
        }
    }
}
