//! Print task statuses; optionally tail the remote OUTPUT of running tasks.

use anyhow::{Context, Result};
use clap::Parser;
use scheduler::remote::machine::{MachineConfig, RemoteMachine};
use scheduler::TaskClient;
use shared::config::Config;
use shared::models::TaskStatus;
use shared::variables;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "yastatus")]
#[command(about = "Show task statuses of the compute job scheduler", long_about = None)]
struct CliArgs {
    /// Task ids to inspect; all queued and running tasks when omitted
    #[arg(short = 'j', long = "jobs", value_name = "ID", num_args = 0..)]
    jobs: Vec<i32>,

    /// Tail the remote OUTPUT file of running tasks
    #[arg(short = 'v', long = "view")]
    view: bool,

    /// Inspect calculation convergence (implies --view)
    #[arg(short = 'o', long = "convergence")]
    convergence: bool,

    /// Verbose one-line-per-task output
    #[arg(short = 'i', long = "info")]
    info: bool,

    /// Path to the configuration file (default: YASCHEDULER_CONF_PATH)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,
}

async fn view_running_tasks(client: &TaskClient, ids: &[i32]) -> Result<()> {
    let config = client.config();
    let tasks = client
        .store()
        .get_tasks_with_cloud_by_id_status(ids, TaskStatus::Running)
        .await?;

    for task in tasks {
        let Some(ip) = task.ip.clone() else {
            continue;
        };
        let Some(remote_folder) = task.remote_folder().map(str::to_string) else {
            continue;
        };
        let username = task
            .cloud
            .as_deref()
            .and_then(|c| config.cloud(c))
            .map(|c| c.username().to_string())
            .unwrap_or_else(|| config.remote.username.clone());

        println!(
            "{}ID{} {} at {}@{}:{}",
            ".".repeat(50),
            task.task_id,
            task.label,
            username,
            ip,
            remote_folder
        );

        let machine = RemoteMachine::connect(MachineConfig {
            host: ip.clone(),
            username,
            key_paths: config.local.get_private_keys(),
            jump_host: config.remote.jump_host.clone(),
            jump_username: config.remote.jump_username.clone(),
            connect_timeout: Duration::from_secs(shared::defaults::default_connect_timeout()),
            data_dir: config.remote.data_dir.clone(),
            engines_dir: config.remote.engines_dir.clone(),
            tasks_dir: config.remote.tasks_dir.clone(),
        })
        .await;
        match machine {
            Ok(machine) => {
                let cmd = format!("tail -n15 {}/OUTPUT", remote_folder);
                match machine.run(&cmd, None).await {
                    Ok(result) if result.success() => print!("{}", result.stdout),
                    _ => println!("OUTDATED TASK, SKIPPING"),
                }
                machine.close().await;
            }
            Err(e) => println!("Host {} is unreachable: {}", ip, e),
        }
    }
    Ok(())
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

    let config_path = args.config.clone().unwrap_or_else(variables::config_path);
    let config = Config::from_path(&config_path)
        .with_context(|| format!("cannot load config {}", config_path.display()))?;
    let client = TaskClient::connect(config).await?;

    let tasks = if args.jobs.is_empty() {
        client
            .get_tasks_by_status(&[TaskStatus::Running, TaskStatus::ToDo], None)
            .await?
    } else {
        client.get_tasks_by_jobs(&args.jobs).await?
    };

    if args.view || args.convergence {
        let ids: Vec<i32> = tasks.iter().map(|t| t.task_id).collect();
        view_running_tasks(&client, &ids).await?;
    } else if args.info {
        for task in &tasks {
            println!(
                "task_id={}\tstatus={}\tlabel={}\tip={}",
                task.task_id,
                task.status,
                task.label,
                task.ip.as_deref().unwrap_or("-")
            );
        }
    } else {
        for task in &tasks {
            println!("{}   {}", task.task_id, task.status);
        }
    }
    Ok(())
}
