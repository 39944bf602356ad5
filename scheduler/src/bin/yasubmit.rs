//! Submit a task described by a `KEY=VALUE` script file.
//!
//! The script must define `ENGINE`; the engine's input files are read from
//! the script's directory and the new task id is printed on stdout.

use anyhow::{bail, Context, Result};
use clap::Parser;
use scheduler::TaskClient;
use serde_json::json;
use shared::config::Config;
use shared::variables;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "yasubmit")]
#[command(about = "Submit a task to the compute job scheduler", long_about = None)]
struct CliArgs {
    /// Script file with KEY=VALUE lines; ENGINE is required
    script: PathBuf,

    /// Path to the configuration file (default: YASCHEDULER_CONF_PATH)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,
}

fn parse_script(contents: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    for line in contents.lines() {
        if let Some((key, value)) = line.split_once('=') {
            params.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    params
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

    if !args.script.is_file() {
        bail!("Script parameter is not a file name");
    }
    let contents = std::fs::read_to_string(&args.script)
        .with_context(|| format!("cannot read {}", args.script.display()))?;
    let params = parse_script(&contents);

    let Some(engine_name) = params.get("ENGINE") else {
        bail!("Script has not defined an engine");
    };
    let label = params
        .get("LABEL")
        .cloned()
        .unwrap_or_else(|| "job".to_string());

    let config_path = args.config.unwrap_or_else(variables::config_path);
    let config = Config::from_path(&config_path)
        .with_context(|| format!("cannot load config {}", config_path.display()))?;

    let Some(engine) = config.engines.get(engine_name) else {
        bail!("Script refers to unknown engine {}", engine_name);
    };

    let local_folder = args
        .script
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let mut metadata = serde_json::Map::new();
    metadata.insert(
        "local_folder".to_string(),
        json!(local_folder.to_string_lossy()),
    );
    for input_file in &engine.input_files {
        let path = local_folder.join(input_file);
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Script was not supplied with required input file {}", input_file))?;
        metadata.insert(input_file.clone(), json!(content));
    }

    let engine_name = engine_name.clone();
    let client = TaskClient::connect(config).await?;
    let task = client
        .submit_task(
            &label,
            serde_json::Value::Object(metadata),
            &engine_name,
            false,
        )
        .await?;

    // Consumed by the calling workflow tool.
    println!("{}", task.task_id);
    Ok(())
}
