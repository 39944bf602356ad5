//! Compute job scheduler daemon
//!
//! The daemon owns the whole control loop: it connects to the database,
//! attaches to the configured worker nodes over SSH, dispatches queued
//! tasks, retrieves results and manages cloud capacity. It runs until
//! SIGINT/SIGTERM and then shuts the pipelines down gracefully.

use anyhow::{Context, Result};
use clap::Parser;
use scheduler::Scheduler;
use shared::config::Config;
use shared::variables;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Command-line arguments for the daemon
#[derive(Parser, Debug)]
#[command(name = "yascheduler")]
#[command(about = "Compute job scheduler daemon", long_about = None)]
struct CliArgs {
    /// Path to the configuration file (default: YASCHEDULER_CONF_PATH)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,
}

/// Keeps the non-blocking log writer alive for the process lifetime.
fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if let Some(log_path) = variables::log_path() {
        let dir = log_path.parent().unwrap_or(std::path::Path::new("."));
        let file = log_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "yascheduler.log".to_string());
        let appender = tracing_appender::rolling::never(dir, file);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false)
            .init();
        Some(guard)
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        None
    }
}

fn write_pid_file() -> Option<PathBuf> {
    let path = variables::pid_path();
    match std::fs::write(&path, std::process::id().to_string()) {
        Ok(()) => Some(path),
        Err(e) => {
            warn!("Cannot write pid file {}: {}", path.display(), e);
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    let _log_guard = init_logging();

    let config_path = args.config.unwrap_or_else(variables::config_path);
    info!("Starting scheduler with config {}", config_path.display());
    let config = Config::from_path(&config_path)
        .with_context(|| format!("cannot load config {}", config_path.display()))?;

    let pid_file = write_pid_file();
    let scheduler = Scheduler::start(config).await?;

    // Run until SIGINT or SIGTERM.
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
        .context("cannot install SIGINT handler")?;
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("cannot install SIGTERM handler")?;
    tokio::select! {
        _ = sigint.recv() => info!("Received SIGINT"),
        _ = sigterm.recv() => info!("Received SIGTERM"),
    }

    scheduler.stop().await;
    if let Some(path) = pid_file {
        std::fs::remove_file(path).ok();
    }
    info!("Scheduler shutdown complete");
    Ok(())
}
