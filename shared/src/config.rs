//! Configuration types and validation for the job scheduler
//!
//! This module defines the configuration structures used by the daemon and the
//! command-line tools. The file keeps the classic section layout: `[db]`,
//! `[local]`, `[remote]`, `[clouds]` (provider-prefixed keys like
//! `hetzner_token`) and one `[engine.<name>]` table per computing engine.
//! Unknown keys in any section are warned about, never rejected.

use crate::defaults::*;
use crate::engine::{Engine, EngineRepository, EngineSection};
use crate::ConfigError;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::warn;

/// `[db]` section: PostgreSQL connection parameters.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DbConfig {
    #[serde(default = "default_db_user")]
    pub user: String,
    #[serde(default = "default_db_password")]
    pub password: String,
    #[serde(default = "default_db_database")]
    pub database: String,
    #[serde(default = "default_db_host")]
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    #[serde(flatten, default)]
    extra: HashMap<String, toml::Value>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            user: default_db_user(),
            password: default_db_password(),
            database: default_db_database(),
            host: default_db_host(),
            port: default_db_port(),
            extra: HashMap::new(),
        }
    }
}

/// `[local]` section: on-disk layout of the daemon plus the concurrency knobs
/// of the five pipelines.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LocalConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Defaults to `<data_dir>/tasks` when left empty.
    #[serde(default)]
    pub tasks_dir: PathBuf,
    /// Defaults to `<data_dir>/engines` when left empty.
    #[serde(default)]
    pub engines_dir: PathBuf,
    /// Defaults to `<data_dir>/keys` when left empty.
    #[serde(default)]
    pub keys_dir: PathBuf,
    /// Webhook URL applied to tasks that do not carry their own.
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_webhook_reqs_limit")]
    pub webhook_reqs_limit: usize,
    #[serde(default = "default_conn_machine_limit")]
    pub conn_machine_limit: usize,
    #[serde(default = "default_conn_machine_pending")]
    pub conn_machine_pending: usize,
    #[serde(default = "default_allocate_limit")]
    pub allocate_limit: usize,
    #[serde(default = "default_allocate_pending")]
    pub allocate_pending: usize,
    #[serde(default = "default_consume_limit")]
    pub consume_limit: usize,
    #[serde(default = "default_consume_pending")]
    pub consume_pending: usize,
    #[serde(default = "default_deallocate_limit")]
    pub deallocate_limit: usize,
    #[serde(default = "default_deallocate_pending")]
    pub deallocate_pending: usize,
    /// Seconds between pipeline producer ticks.
    #[serde(default = "default_sleep_interval")]
    pub sleep_interval: u64,
    #[serde(flatten, default)]
    extra: HashMap<String, toml::Value>,
}

impl Default for LocalConfig {
    fn default() -> Self {
        let mut cfg = Self {
            data_dir: default_data_dir(),
            tasks_dir: PathBuf::new(),
            engines_dir: PathBuf::new(),
            keys_dir: PathBuf::new(),
            webhook_url: None,
            webhook_reqs_limit: default_webhook_reqs_limit(),
            conn_machine_limit: default_conn_machine_limit(),
            conn_machine_pending: default_conn_machine_pending(),
            allocate_limit: default_allocate_limit(),
            allocate_pending: default_allocate_pending(),
            consume_limit: default_consume_limit(),
            consume_pending: default_consume_pending(),
            deallocate_limit: default_deallocate_limit(),
            deallocate_pending: default_deallocate_pending(),
            sleep_interval: default_sleep_interval(),
            extra: HashMap::new(),
        };
        cfg.normalize();
        cfg
    }
}

impl LocalConfig {
    /// Fill the directory fields that default relative to `data_dir`.
    fn normalize(&mut self) {
        if self.tasks_dir.as_os_str().is_empty() {
            self.tasks_dir = self.data_dir.join("tasks");
        }
        if self.engines_dir.as_os_str().is_empty() {
            self.engines_dir = self.data_dir.join("engines");
        }
        if self.keys_dir.as_os_str().is_empty() {
            self.keys_dir = self.data_dir.join("keys");
        }
    }

    /// List private key files under `keys_dir`, sorted by file name.
    /// A missing directory yields an empty list.
    pub fn get_private_keys(&self) -> Vec<PathBuf> {
        let mut keys: Vec<PathBuf> = std::fs::read_dir(&self.keys_dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .filter(|p| p.is_file())
                    .collect()
            })
            .unwrap_or_default();
        keys.sort();
        keys
    }
}

/// `[remote]` section: layout on the worker hosts and the default SSH login.
/// Remote directories are kept as plain strings because their path flavor
/// depends on the platform detected for each machine.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RemoteConfig {
    #[serde(default = "default_remote_data_dir")]
    pub data_dir: String,
    /// Defaults to `<data_dir>/tasks` when left empty.
    #[serde(default)]
    pub tasks_dir: String,
    /// Defaults to `<data_dir>/engines` when left empty.
    #[serde(default)]
    pub engines_dir: String,
    #[serde(default = "default_remote_user", rename = "user")]
    pub username: String,
    #[serde(default, rename = "jump_user")]
    pub jump_username: Option<String>,
    #[serde(default)]
    pub jump_host: Option<String>,
    #[serde(flatten, default)]
    extra: HashMap<String, toml::Value>,
}

fn default_remote_data_dir() -> String {
    "./data".to_string()
}

impl Default for RemoteConfig {
    fn default() -> Self {
        let mut cfg = Self {
            data_dir: default_remote_data_dir(),
            tasks_dir: String::new(),
            engines_dir: String::new(),
            username: default_remote_user(),
            jump_username: None,
            jump_host: None,
            extra: HashMap::new(),
        };
        cfg.normalize();
        cfg
    }
}

impl RemoteConfig {
    fn normalize(&mut self) {
        if self.tasks_dir.is_empty() {
            self.tasks_dir = format!("{}/tasks", self.data_dir.trim_end_matches('/'));
        }
        if self.engines_dir.is_empty() {
            self.engines_dir = format!("{}/engines", self.data_dir.trim_end_matches('/'));
        }
    }
}

/// Azure provider configuration (`az_*` keys of the `[clouds]` section).
#[derive(Debug, Clone, PartialEq)]
pub struct AzureCloudConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub subscription_id: String,
    pub resource_group: String,
    pub location: String,
    pub vnet: String,
    pub subnet: String,
    pub nsg: String,
    /// Image URN in `publisher:offer:sku:version` form.
    pub image_urn: String,
    pub vm_size: String,
    pub max_nodes: usize,
    pub username: String,
    pub priority: i32,
    pub idle_tolerance: u64,
    pub jump_username: Option<String>,
    pub jump_host: Option<String>,
}

/// Hetzner provider configuration (`hetzner_*` keys).
#[derive(Debug, Clone, PartialEq)]
pub struct HetznerCloudConfig {
    pub token: String,
    pub server_type: String,
    pub image_name: String,
    pub max_nodes: usize,
    pub username: String,
    pub priority: i32,
    pub idle_tolerance: u64,
    pub jump_username: Option<String>,
    pub jump_host: Option<String>,
}

/// Upcloud provider configuration (`upcloud_*` keys).
#[derive(Debug, Clone, PartialEq)]
pub struct UpcloudCloudConfig {
    pub login: String,
    pub password: String,
    pub max_nodes: usize,
    pub username: String,
    pub priority: i32,
    pub idle_tolerance: u64,
    pub jump_username: Option<String>,
    pub jump_host: Option<String>,
}

/// One configured cloud provider. The set of providers is closed: keys with
/// an unrecognized prefix are warned about and skipped.
#[derive(Debug, Clone, PartialEq)]
pub enum CloudConfig {
    Azure(AzureCloudConfig),
    Hetzner(HetznerCloudConfig),
    Upcloud(UpcloudCloudConfig),
}

impl CloudConfig {
    /// The provider tag used in config keys and the node table.
    pub fn prefix(&self) -> &'static str {
        match self {
            CloudConfig::Azure(_) => "az",
            CloudConfig::Hetzner(_) => "hetzner",
            CloudConfig::Upcloud(_) => "upcloud",
        }
    }

    pub fn max_nodes(&self) -> usize {
        match self {
            CloudConfig::Azure(c) => c.max_nodes,
            CloudConfig::Hetzner(c) => c.max_nodes,
            CloudConfig::Upcloud(c) => c.max_nodes,
        }
    }

    pub fn priority(&self) -> i32 {
        match self {
            CloudConfig::Azure(c) => c.priority,
            CloudConfig::Hetzner(c) => c.priority,
            CloudConfig::Upcloud(c) => c.priority,
        }
    }

    /// Seconds a node must stay idle before it becomes a deallocation candidate.
    pub fn idle_tolerance(&self) -> u64 {
        match self {
            CloudConfig::Azure(c) => c.idle_tolerance,
            CloudConfig::Hetzner(c) => c.idle_tolerance,
            CloudConfig::Upcloud(c) => c.idle_tolerance,
        }
    }

    /// SSH login for nodes created by this provider.
    pub fn username(&self) -> &str {
        match self {
            CloudConfig::Azure(c) => &c.username,
            CloudConfig::Hetzner(c) => &c.username,
            CloudConfig::Upcloud(c) => &c.username,
        }
    }

    /// Per-provider jump host override; wins over the `[remote]` default.
    pub fn jump_host(&self) -> Option<&str> {
        match self {
            CloudConfig::Azure(c) => c.jump_host.as_deref(),
            CloudConfig::Hetzner(c) => c.jump_host.as_deref(),
            CloudConfig::Upcloud(c) => c.jump_host.as_deref(),
        }
    }

    pub fn jump_username(&self) -> Option<&str> {
        match self {
            CloudConfig::Azure(c) => c.jump_username.as_deref(),
            CloudConfig::Hetzner(c) => c.jump_username.as_deref(),
            CloudConfig::Upcloud(c) => c.jump_username.as_deref(),
        }
    }
}

/// Accessor over the `[clouds]` table that resolves `<prefix>_<key>` entries
/// with type coercion (integers may be written bare or quoted).
struct CloudSection<'a> {
    prefix: &'static str,
    table: &'a toml::Table,
}

impl<'a> CloudSection<'a> {
    fn get_str(&self, key: &str) -> Option<String> {
        let v = self.table.get(&format!("{}_{}", self.prefix, key))?;
        match v {
            toml::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    fn require_str(&self, key: &str) -> Result<String, ConfigError> {
        self.get_str(key).ok_or_else(|| ConfigError::MissingCloudKey {
            provider: self.prefix.to_string(),
            key: format!("{}_{}", self.prefix, key),
        })
    }

    fn get_int(&self, key: &str) -> Result<Option<i64>, ConfigError> {
        let full = format!("{}_{}", self.prefix, key);
        let Some(v) = self.table.get(&full) else {
            return Ok(None);
        };
        let parsed = match v {
            toml::Value::Integer(i) => Some(*i),
            toml::Value::String(s) => s.parse::<i64>().ok(),
            _ => None,
        };
        match parsed {
            Some(i) => Ok(Some(i)),
            None => Err(ConfigError::BadCloudValue {
                provider: self.prefix.to_string(),
                message: format!("key {} is not an integer", full),
            }),
        }
    }

    fn get_usize(&self, key: &str, fallback: usize) -> Result<usize, ConfigError> {
        Ok(self
            .get_int(key)?
            .map(|i| i.max(0) as usize)
            .unwrap_or(fallback))
    }

    fn get_u64(&self, key: &str, fallback: u64) -> Result<u64, ConfigError> {
        Ok(self.get_int(key)?.map(|i| i.max(0) as u64).unwrap_or(fallback))
    }

    fn get_i32(&self, key: &str, fallback: i32) -> Result<i32, ConfigError> {
        Ok(self.get_int(key)?.map(|i| i as i32).unwrap_or(fallback))
    }
}

/// Recognized key suffixes per provider, used only for unknown-key warnings.
const AZ_KEYS: &[&str] = &[
    "tenant_id", "client_id", "client_secret", "subscription_id", "resource_group", "location",
    "vnet", "subnet", "nsg", "image", "size", "max_nodes", "user", "priority", "idle_tolerance",
    "jump_user", "jump_host",
];
const HETZNER_KEYS: &[&str] = &[
    "token", "server_type", "image_name", "max_nodes", "user", "priority", "idle_tolerance",
    "jump_user", "jump_host",
];
const UPCLOUD_KEYS: &[&str] = &[
    "login", "password", "max_nodes", "user", "priority", "idle_tolerance", "jump_user",
    "jump_host",
];

fn parse_clouds(
    table: &toml::Table,
    default_username: &str,
) -> Result<Vec<CloudConfig>, ConfigError> {
    let mut prefixes: Vec<&str> = Vec::new();
    for key in table.keys() {
        let prefix = key.split('_').next().unwrap_or(key.as_str());
        match prefix {
            "az" | "hetzner" | "upcloud" => {
                if !prefixes.contains(&prefix) {
                    prefixes.push(prefix);
                }
                let known = match prefix {
                    "az" => AZ_KEYS,
                    "hetzner" => HETZNER_KEYS,
                    _ => UPCLOUD_KEYS,
                };
                let suffix = key
                    .strip_prefix(prefix)
                    .and_then(|s| s.strip_prefix('_'))
                    .unwrap_or("");
                if !known.contains(&suffix) {
                    warn!("Unknown key '{}' in [clouds] section", key);
                }
            }
            _ => warn!("Unknown key '{}' in [clouds] section", key),
        }
    }

    // Fixed construction order keeps provider tie-breaking deterministic.
    let mut clouds = Vec::new();
    if prefixes.contains(&"az") {
        let sec = CloudSection { prefix: "az", table };
        let mut username = sec.get_str("user").unwrap_or_else(default_az_user);
        if username == "root" {
            // Azure refuses root logins; degrade to the stock admin user.
            warn!(
                "Root user is not supported on Azure, using '{}' instead",
                default_az_user()
            );
            username = default_az_user();
        }
        clouds.push(CloudConfig::Azure(AzureCloudConfig {
            tenant_id: sec.require_str("tenant_id")?,
            client_id: sec.require_str("client_id")?,
            client_secret: sec.require_str("client_secret")?,
            subscription_id: sec.require_str("subscription_id")?,
            resource_group: sec.get_str("resource_group").unwrap_or_else(default_az_resource_group),
            location: sec.get_str("location").unwrap_or_else(default_az_location),
            vnet: sec.get_str("vnet").unwrap_or_else(default_az_vnet),
            subnet: sec.get_str("subnet").unwrap_or_else(default_az_subnet),
            nsg: sec.get_str("nsg").unwrap_or_else(default_az_nsg),
            image_urn: sec.get_str("image").unwrap_or_else(default_az_image_urn),
            vm_size: sec.get_str("size").unwrap_or_else(default_az_vm_size),
            max_nodes: sec.get_usize("max_nodes", default_cloud_max_nodes())?,
            username,
            priority: sec.get_i32("priority", default_cloud_priority())?,
            idle_tolerance: sec.get_u64("idle_tolerance", default_az_idle_tolerance())?,
            jump_username: sec.get_str("jump_user"),
            jump_host: sec.get_str("jump_host"),
        }));
    }
    if prefixes.contains(&"hetzner") {
        let sec = CloudSection { prefix: "hetzner", table };
        clouds.push(CloudConfig::Hetzner(HetznerCloudConfig {
            token: sec.require_str("token")?,
            server_type: sec.get_str("server_type").unwrap_or_else(default_hetzner_server_type),
            image_name: sec.get_str("image_name").unwrap_or_else(default_hetzner_image_name),
            max_nodes: sec.get_usize("max_nodes", default_cloud_max_nodes())?,
            username: sec.get_str("user").unwrap_or_else(|| default_username.to_string()),
            priority: sec.get_i32("priority", default_cloud_priority())?,
            idle_tolerance: sec.get_u64("idle_tolerance", default_cloud_idle_tolerance())?,
            jump_username: sec.get_str("jump_user"),
            jump_host: sec.get_str("jump_host"),
        }));
    }
    if prefixes.contains(&"upcloud") {
        let sec = CloudSection { prefix: "upcloud", table };
        clouds.push(CloudConfig::Upcloud(UpcloudCloudConfig {
            login: sec.require_str("login")?,
            password: sec.require_str("password")?,
            max_nodes: sec.get_usize("max_nodes", default_cloud_max_nodes())?,
            username: sec.get_str("user").unwrap_or_else(|| default_username.to_string()),
            priority: sec.get_i32("priority", default_cloud_priority())?,
            idle_tolerance: sec.get_u64("idle_tolerance", default_cloud_idle_tolerance())?,
            jump_username: sec.get_str("jump_user"),
            jump_host: sec.get_str("jump_host"),
        }));
    }
    Ok(clouds)
}

/// Raw deserialization target for the whole config file.
#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    #[serde(default)]
    db: DbConfig,
    #[serde(default)]
    local: LocalConfig,
    #[serde(default)]
    remote: RemoteConfig,
    #[serde(default)]
    clouds: toml::Table,
    #[serde(default)]
    engine: BTreeMap<String, EngineSection>,
}

/// The fully loaded and validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub local: LocalConfig,
    pub remote: RemoteConfig,
    /// Providers in deterministic order (az, hetzner, upcloud).
    pub clouds: Vec<CloudConfig>,
    pub engines: EngineRepository,
}

impl Config {
    /// Load and validate the configuration from a file path.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;

        let mut local = raw.local;
        local.normalize();
        warn_unknown_keys("db", &raw.db.extra);
        warn_unknown_keys("local", &local.extra);
        let mut remote = raw.remote;
        remote.normalize();
        warn_unknown_keys("remote", &remote.extra);

        let clouds = parse_clouds(&raw.clouds, &remote.username)?;

        let mut engines = BTreeMap::new();
        for (name, section) in raw.engine {
            let engine = Engine::from_section(&name, section, &local.engines_dir)?;
            engines.insert(name, engine);
        }

        Ok(Self {
            db: raw.db,
            local,
            remote,
            clouds,
            engines: EngineRepository::new(engines),
        })
    }

    /// Find a cloud provider configuration by its tag.
    pub fn cloud(&self, prefix: &str) -> Option<&CloudConfig> {
        self.clouds.iter().find(|c| c.prefix() == prefix)
    }
}

fn warn_unknown_keys(section: &str, extra: &HashMap<String, toml::Value>) {
    for key in extra.keys() {
        warn!("Unknown key '{}' in [{}] section", key, section);
    }
}
