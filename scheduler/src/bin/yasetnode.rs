//! Add or remove a worker node.
//!
//! Adding connects to the host, detects its platform and (unless skipped)
//! provisions the configured engines before inserting the row. Removal comes
//! in two flavors: `--remove-soft` only stops new assignments while a task
//! is still running; `--remove-hard` marks any running task done and drops
//! the row immediately.

use anyhow::{bail, Context, Result};
use clap::Parser;
use scheduler::remote::machine::{MachineConfig, RemoteMachine};
use scheduler::Store;
use shared::config::Config;
use shared::models::TaskStatus;
use shared::variables;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "yasetnode")]
#[command(about = "Add or remove a compute node", long_about = None)]
struct CliArgs {
    /// Host as IP[~ncpus]
    host: String,

    /// Skip node provisioning
    #[arg(long = "skip-setup")]
    skip_setup: bool,

    /// Disable the node while a task is running, remove otherwise
    #[arg(long = "remove-soft")]
    remove_soft: bool,

    /// Remove the node immediately, marking its running task done
    #[arg(long = "remove-hard")]
    remove_hard: bool,

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

    let (host, ncpus) = match args.host.split_once('~') {
        Some((host, ncpus)) => {
            let ncpus: i32 = ncpus
                .parse()
                .with_context(|| format!("bad ncpus value {:?}", ncpus))?;
            (host.to_string(), Some(ncpus))
        }
        None => (args.host.clone(), None),
    };

    let config_path = args.config.unwrap_or_else(variables::config_path);
    let config = Config::from_path(&config_path)
        .with_context(|| format!("cannot load config {}", config_path.display()))?;
    let store = Store::connect(&config.db)
        .await
        .context("cannot connect to the database")?;

    let already_there = store.has_node(&host).await?;
    let removing = args.remove_hard || args.remove_soft;

    if already_there && !removing {
        println!("Host already in DB: {}", host);
        return Ok(());
    }
    if !already_there && removing {
        println!("Host NOT in DB: {}", host);
        return Ok(());
    }

    if args.remove_hard {
        let running = store
            .get_task_ids_by_ip_and_status(&host, TaskStatus::Running)
            .await?;
        // One task is expected, but inconsistency is accounted for too.
        for task_id in running {
            store.update_task_status(task_id, TaskStatus::Done).await?;
            println!("An associated task {} at {} is now marked done!", task_id, host);
        }
        store.remove_node(&host).await?;
        println!("Removed host from scheduler: {}", host);
        return Ok(());
    }

    if args.remove_soft {
        let running = store
            .get_task_ids_by_ip_and_status(&host, TaskStatus::Running)
            .await?;
        if running.is_empty() {
            println!("No tasks associated, removing node immediately");
            store.remove_node(&host).await?;
            println!("Removed host from scheduler: {}", host);
        } else {
            println!("A task is associated, preventing new assignments");
            store.disable_node(&host).await?;
            println!("Prevented from assigning new tasks: {}", host);
        }
        return Ok(());
    }

    // Adding: make sure the host is reachable and platform-supported first.
    let machine = RemoteMachine::connect(MachineConfig {
        host: host.clone(),
        username: config.remote.username.clone(),
        key_paths: config.local.get_private_keys(),
        jump_host: config.remote.jump_host.clone(),
        jump_username: config.remote.jump_username.clone(),
        connect_timeout: Duration::from_secs(shared::defaults::default_connect_timeout()),
        data_dir: config.remote.data_dir.clone(),
        engines_dir: config.remote.engines_dir.clone(),
        tasks_dir: config.remote.tasks_dir.clone(),
    })
    .await;
    let machine = match machine {
        Ok(machine) => machine,
        Err(e) => bail!("Host {} is unreachable: {}", host, e),
    };

    if !args.skip_setup {
        println!("Setting up host...");
        let engines = config.engines.filter_platforms(machine.platforms());
        machine
            .setup_node(&engines)
            .await
            .with_context(|| format!("setup of {} failed", host))?;
    }
    machine.close().await;

    store
        .add_node(&host, &config.remote.username, ncpus, None, true)
        .await?;
    println!("Added host to scheduler: {}", host);
    Ok(())
}
