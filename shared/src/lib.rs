//! Shared data structures and utilities for the compute job scheduler
//!
//! This crate contains the configuration model, the engine registry and the
//! task/node data model used by both the daemon and the command-line tools.

pub mod config;
pub mod defaults;
pub mod engine;
pub mod models;
pub mod utils;
pub mod variables;

// Re-export commonly used types for convenience
pub use config::{CloudConfig, Config, DbConfig, LocalConfig, RemoteConfig};
pub use engine::{Deploy, Engine, EngineRepository};
pub use models::{NodeModel, TaskModel, TaskStatus};

/// Result type alias used throughout the shared crate
pub type Result<T> = anyhow::Result<T>;

/// Errors raised while loading and validating the configuration file.
/// Every variant is fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Cannot parse config file: {0}")]
    Parse(String),

    #[error("Engine {engine} has unknown template placeholder `{placeholder}` in spawn command")]
    BadSpawnPlaceholder { engine: String, placeholder: String },

    #[error("Engine {0} has no check_cmd or check_pname set")]
    NoLivenessCheck(String),

    #[error("Engine {engine} has no {field} config set")]
    EmptyEngineField { engine: String, field: String },

    #[error("Cloud provider {provider}: missing required key {key}")]
    MissingCloudKey { provider: String, key: String },

    #[error("Cloud provider {provider}: {message}")]
    BadCloudValue { provider: String, message: String },
}

#[cfg(test)]
mod tests;
