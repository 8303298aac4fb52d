// src/config/validate.rs

use std::net::SocketAddr;

use regex::Regex;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{Result, SupervisorError};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = SupervisorError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.server, raw.paths, raw.pipeline))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_server(cfg)?;
    validate_pipeline(cfg)?;
    Ok(())
}

fn validate_server(cfg: &RawConfigFile) -> Result<()> {
    if cfg.server.bind.parse::<SocketAddr>().is_err() {
        return Err(SupervisorError::ConfigError(format!(
            "[server].bind is not a socket address: '{}'",
            cfg.server.bind
        )));
    }

    let url = cfg.server.callback_url.as_str();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(SupervisorError::ConfigError(format!(
            "[server].callback_url must be an http(s) URL (got '{}')",
            url
        )));
    }

    if cfg.server.api_token_env.trim().is_empty() {
        return Err(SupervisorError::ConfigError(
            "[server].api_token_env must not be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_pipeline(cfg: &RawConfigFile) -> Result<()> {
    let p = &cfg.pipeline;
    let required = [
        ("python", &p.python),
        ("requirements", &p.requirements),
        ("provision_script", &p.provision_script),
        ("playbook", &p.playbook),
        ("app_script", &p.app_script),
    ];

    for (key, value) in required {
        if value.trim().is_empty() {
            return Err(SupervisorError::ConfigError(format!(
                "[pipeline].{} must not be empty",
                key
            )));
        }
    }

    if let Err(e) = Regex::new(&p.missing_package_manager) {
        return Err(SupervisorError::ConfigError(format!(
            "[pipeline].missing_package_manager is not a valid regex: {}",
            e
        )));
    }

    Ok(())
}
