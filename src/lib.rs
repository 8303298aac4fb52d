// src/lib.rs

pub mod api;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod logs;
pub mod server;
pub mod supervisor;
pub mod types;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::api::HttpClusterApi;
use crate::cli::CliArgs;
use crate::config::loader::load_or_default;
use crate::config::model::ConfigFile;
use crate::engine::Step;
use crate::exec::{PipelinePlan, ProcessRunner};
use crate::fs::RealFileSystem;
use crate::supervisor::Supervisor;

/// Cluster id used to render commands in `--dry-run`.
const DRY_RUN_CLUSTER: &str = "example";

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the cluster API client
/// - supervisor (orchestrator + log stream)
/// - the socket server
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_or_default(&args.config)
        .with_context(|| format!("loading config {}", args.config))?;
    let plan = PipelinePlan::from_config(&cfg)?;

    if args.dry_run {
        print_dry_run(&cfg, &plan);
        return Ok(());
    }

    let bind = args.bind.as_deref().unwrap_or(&cfg.server.bind);
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid bind address {bind:?}"))?;

    let token = std::env::var(&cfg.server.api_token_env).ok();
    if token.is_none() {
        warn!(
            var = %cfg.server.api_token_env,
            "no API token in environment; cluster API calls will be unauthenticated"
        );
    }
    let api = Arc::new(HttpClusterApi::new(plan.callback_url(), token));

    info!(
        workdir = %plan.workdir().display(),
        log_dir = %plan.log_dir().display(),
        callback = %plan.callback_url(),
        "starting supervisor"
    );
    let supervisor = Supervisor::new(
        plan,
        Arc::new(ProcessRunner::new()),
        Arc::new(RealFileSystem),
        api,
    );

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    server::serve(listener, supervisor.clone(), shutdown_signal(supervisor)).await?;
    info!("supervisor stopped");
    Ok(())
}

/// Resolves on Ctrl-C after cancelling every running deployment.
async fn shutdown_signal(supervisor: Supervisor) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        eprintln!("failed to listen for Ctrl+C: {e}");
        return;
    }

    info!("shutdown requested");
    for (cluster, stage) in supervisor.orchestrator().running() {
        info!(cluster = %cluster, stage = %stage, "cancelling deployment for shutdown");
        supervisor.orchestrator().kill(&cluster);
    }
}

/// Simple dry-run output: print the resolved configuration and commands.
fn print_dry_run(cfg: &ConfigFile, plan: &PipelinePlan) {
    println!("autokube dry-run");
    println!("  server.bind = {}", cfg.server.bind);
    println!("  server.callback_url = {}", plan.callback_url());
    println!("  server.api_token_env = {}", cfg.server.api_token_env);
    println!("  paths.workdir = {}", plan.workdir().display());
    println!("  paths.log_dir = {}", plan.log_dir().display());
    println!("  environment probe = {}", plan.env_probe_path().display());
    println!();

    println!("stages (cluster {DRY_RUN_CLUSTER:?}):");
    for step in [
        Step::CreateEnv,
        Step::InstallDeps,
        Step::BootstrapPip,
        Step::Provision,
        Step::Configure,
        Step::AppInstall,
    ] {
        let cmd = plan.command(step, DRY_RUN_CLUSTER);
        println!("  - {} [{}]", step.stage(), step.label());
        println!("      cmd: {}", cmd.display());
        if let Some(marker) = &cmd.failure_marker {
            println!("      failure marker: {}", marker.as_str());
        }
    }
    if !cfg.pipeline.env.is_empty() {
        println!();
        println!("extra environment:");
        for (key, value) in &cfg.pipeline.env {
            println!("  {key}={value}");
        }
    }

    debug!("dry-run complete (no execution)");
}
