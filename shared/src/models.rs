//! Task and node data model shared between the daemon and the CLIs.
//!
//! These mirror the two database tables. A task's `metadata` is a structured
//! JSON bag with well-known keys; the accessors here keep the key names in
//! one place so no component silently drops or misspells them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Task lifecycle status, stored as SMALLINT in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    ToDo = 0,
    Running = 1,
    Done = 2,
}

impl TaskStatus {
    pub fn as_i16(self) -> i16 {
        self as i16
    }

    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            0 => Some(TaskStatus::ToDo),
            1 => Some(TaskStatus::Running),
            2 => Some(TaskStatus::Done),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::ToDo => "QUEUED",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Done => "FINISHED",
        };
        f.write_str(s)
    }
}

/// Well-known metadata keys.
pub mod meta_keys {
    pub const ENGINE: &str = "engine";
    pub const REMOTE_FOLDER: &str = "remote_folder";
    pub const LOCAL_FOLDER: &str = "local_folder";
    pub const ERROR: &str = "error";
    pub const WEBHOOK_URL: &str = "webhook_url";
    pub const WEBHOOK_CUSTOM_PARAMS: &str = "webhook_custom_params";
}

/// One row of `yascheduler_tasks`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskModel {
    pub task_id: i32,
    pub label: String,
    pub status: TaskStatus,
    pub ip: Option<String>,
    /// Structured metadata bag; always a JSON object.
    pub metadata: Value,
    /// Provider tag, only populated by queries joining the node table.
    #[serde(default)]
    pub cloud: Option<String>,
}

impl TaskModel {
    fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    pub fn engine_name(&self) -> Option<&str> {
        self.meta_str(meta_keys::ENGINE)
    }

    pub fn remote_folder(&self) -> Option<&str> {
        self.meta_str(meta_keys::REMOTE_FOLDER)
    }

    pub fn local_folder(&self) -> Option<&str> {
        self.meta_str(meta_keys::LOCAL_FOLDER)
    }

    pub fn webhook_url(&self) -> Option<&str> {
        self.meta_str(meta_keys::WEBHOOK_URL)
    }

    pub fn webhook_custom_params(&self) -> Value {
        self.metadata
            .get(meta_keys::WEBHOOK_CUSTOM_PARAMS)
            .cloned()
            .unwrap_or(Value::Object(serde_json::Map::new()))
    }
}

/// One row of `yascheduler_nodes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeModel {
    /// Unique key: a real address, or a `prov…` placeholder reserving
    /// provisioning capacity before the cloud returns an address.
    pub ip: String,
    /// CPU override; when absent the remote machine is queried.
    pub ncpus: Option<i32>,
    pub enabled: bool,
    /// Provider tag; `None` for statically configured nodes.
    pub cloud: Option<String>,
    /// SSH login.
    pub username: String,
}

impl NodeModel {
    /// Whether this row carries a real, connectable address.
    pub fn has_real_ip(&self) -> bool {
        is_real_ip(&self.ip)
    }
}

/// Placeholder rows carry opaque `prov…` names; real addresses always contain
/// a dot.
pub fn is_real_ip(ip: &str) -> bool {
    ip.contains('.')
}

/// Prefix of placeholder node names.
pub const PLACEHOLDER_PREFIX: &str = "prov";
