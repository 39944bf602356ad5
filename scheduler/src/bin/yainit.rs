//! Install the OS service unit and initialize the database schema.

use anyhow::{Context, Result};
use clap::Parser;
use scheduler::service;
use shared::config::Config;
use shared::variables;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "yainit")]
#[command(about = "Install the scheduler service and initialize the database", long_about = None)]
struct CliArgs {
    /// Path to the configuration file (default: YASCHEDULER_CONF_PATH)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
    let args = CliArgs::parse();

    if let Err(e) = service::install_service() {
        // Schema init is still worth attempting without root permissions.
        eprintln!("Error: {:#}", e);
    }

    let config_path = args.config.unwrap_or_else(variables::config_path);
    let config = Config::from_path(&config_path)
        .with_context(|| format!("cannot load config {}", config_path.display()))?;
    service::init_db(&config.db).await?;
    Ok(())
}
