#![allow(dead_code)]

use std::path::Path;

use autokube::config::{ConfigFile, RawConfigFile};
use autokube::exec::PipelinePlan;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile::default(),
        }
    }

    pub fn workdir(mut self, dir: impl AsRef<Path>) -> Self {
        self.config.paths.workdir = dir.as_ref().to_path_buf();
        self
    }

    pub fn log_dir(mut self, dir: &str) -> Self {
        self.config.paths.log_dir = dir.into();
        self
    }

    pub fn venv_dir(mut self, dir: &str) -> Self {
        self.config.paths.venv_dir = dir.into();
        self
    }

    pub fn callback_url(mut self, url: &str) -> Self {
        self.config.server.callback_url = url.to_string();
        self
    }

    pub fn python(mut self, python: &str) -> Self {
        self.config.pipeline.python = python.to_string();
        self
    }

    pub fn missing_package_manager(mut self, pattern: &str) -> Self {
        self.config.pipeline.missing_package_manager = pattern.to_string();
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.config
            .pipeline
            .env
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }

    pub fn plan(self) -> PipelinePlan {
        PipelinePlan::from_config(&self.build()).expect("Failed to build pipeline plan")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}
