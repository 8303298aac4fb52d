// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `autokube`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "autokube",
    version,
    about = "Run and stream Kubespray deployment pipelines for the Autokube dashboard.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Autokube.toml` in the current working directory. Built-in
    /// defaults are used when the default file does not exist.
    #[arg(long, value_name = "PATH", default_value = "Autokube.toml")]
    pub config: String,

    /// Address to listen on, overriding `[server].bind`.
    #[arg(long, value_name = "ADDR")]
    pub bind: Option<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `AUTOKUBE_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the stage commands, but don't listen or run
    /// anything.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_parse() {
        let args = CliArgs::parse_from([
            "autokube",
            "--config",
            "deploy.toml",
            "--bind",
            "127.0.0.1:4000",
            "--log-level",
            "debug",
            "--dry-run",
        ]);
        assert_eq!(args.config, "deploy.toml");
        assert_eq!(args.bind.as_deref(), Some("127.0.0.1:4000"));
        assert!(matches!(args.log_level, Some(LogLevel::Debug)));
        assert!(args.dry_run);
    }
}
