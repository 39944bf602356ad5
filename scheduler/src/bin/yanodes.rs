//! Print one line per node with its capacity, state and current task.

use anyhow::{Context, Result};
use clap::Parser;
use scheduler::TaskClient;
use shared::config::Config;
use shared::models::TaskStatus;
use shared::variables;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "yanodes")]
#[command(about = "Show nodes of the compute job scheduler", long_about = None)]
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
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();
    let args = CliArgs::parse();

    let config_path = args.config.unwrap_or_else(variables::config_path);
    let config = Config::from_path(&config_path)
        .with_context(|| format!("cannot load config {}", config_path.display()))?;
    let client = TaskClient::connect(config).await?;

    let running: HashMap<String, (String, i32)> = client
        .get_tasks_by_status(&[TaskStatus::Running], None)
        .await?
        .into_iter()
        .filter_map(|t| t.ip.clone().map(|ip| (ip, (t.label, t.task_id))))
        .collect();

    for node in client.store().get_all_nodes().await? {
        let (label, task_id) = running
            .get(&node.ip)
            .map(|(label, id)| (label.clone(), id.to_string()))
            .unwrap_or_else(|| ("-".to_string(), "-".to_string()));
        println!(
            "ip={} ncpus={} enabled={} occupied_by={} (task_id={}) {}",
            node.ip,
            node.ncpus
                .map(|n| n.to_string())
                .unwrap_or_else(|| "MAX".to_string()),
            node.enabled,
            label,
            task_id,
            node.cloud.as_deref().unwrap_or("")
        );
    }
    Ok(())
}
