// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

use crate::types::ClusterId;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("a deployment is already running for cluster {0}")]
    AlreadyRunning(ClusterId),

    #[error("invalid cluster id {0:?}")]
    InvalidClusterId(String),

    #[error("no logs found for cluster {0}")]
    NotFound(ClusterId),

    #[error("cluster API error: {0}")]
    Api(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A stage process could not be started at all (missing binary, no exec
/// permission, bad working directory).
#[derive(Error, Debug)]
#[error("failed to start '{program}': {source}")]
pub struct SpawnError {
    pub program: String,
    #[source]
    pub source: std::io::Error,
}

impl SpawnError {
    pub fn new(program: impl Into<String>, source: std::io::Error) -> Self {
        Self {
            program: program.into(),
            source,
        }
    }

    /// The program itself does not exist.
    pub fn is_not_found(&self) -> bool {
        self.source.kind() == std::io::ErrorKind::NotFound
    }
}

impl From<reqwest::Error> for SupervisorError {
    fn from(err: reqwest::Error) -> Self {
        SupervisorError::Api(err.to_string())
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, SupervisorError>;
