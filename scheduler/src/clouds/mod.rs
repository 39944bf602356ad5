//! Cloud provider management: node allocation and reclamation.
//!
//! Each configured provider is wrapped in a `CloudApi` carrying its REST
//! adapter, an operation semaphore respecting provider rate limits, and the
//! platform set it can produce machines for. The manager serializes capacity
//! decisions behind an allocation lock so the check against the store stays
//! consistent with the placeholder insert that reserves the slot.

pub mod azure;
pub mod hetzner;
pub mod keys;
pub mod upcloud;
pub mod user_data;

pub use keys::SshKey;
pub use user_data::CloudUserData;

use crate::remote::machine::{MachineConfig, RemoteMachine, RemoteMachineError};
use crate::store::{Store, StoreError};
use shared::config::{CloudConfig, Config, LocalConfig, RemoteConfig};
use shared::engine::EngineRepository;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{provider} API error: {message}")]
    Api {
        provider: &'static str,
        message: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("SSH key error: {0}")]
    Key(String),

    #[error(transparent)]
    Machine(#[from] RemoteMachineError),

    #[error(transparent)]
    Ssh(#[from] crate::ssh::SshError),

    #[error("cloud operation timed out")]
    Timeout,
}

const DEBIAN_BUSTER_PLATFORMS: &[&str] = &["debian-10", "debian", "debian-like", "linux"];
const DEBIAN_BULLSEYE_PLATFORMS: &[&str] = &["debian-11", "debian", "debian-like", "linux"];
const WINDOWS_11_PLATFORMS: &[&str] = &["windows-11", "windows"];

/// One configured provider with its adapter parameters.
pub struct CloudApi {
    config: CloudConfig,
    op_semaphore: Arc<Semaphore>,
    http: reqwest::Client,
}

impl CloudApi {
    pub(crate) fn new(config: CloudConfig, http: reqwest::Client) -> Self {
        let op_semaphore = Arc::new(Semaphore::new(Self::op_limit_for(&config)));
        Self {
            config,
            op_semaphore,
            http,
        }
    }

    fn op_limit_for(config: &CloudConfig) -> usize {
        match config {
            CloudConfig::Azure(_) => 5,
            CloudConfig::Hetzner(_) => 5,
            CloudConfig::Upcloud(_) => 1,
        }
    }

    pub fn name(&self) -> &'static str {
        self.config.prefix()
    }

    pub fn config(&self) -> &CloudConfig {
        &self.config
    }

    pub fn max_nodes(&self) -> usize {
        self.config.max_nodes()
    }

    pub fn priority(&self) -> i32 {
        self.config.priority()
    }

    pub fn username(&self) -> &str {
        self.config.username()
    }

    pub fn op_semaphore(&self) -> &Arc<Semaphore> {
        &self.op_semaphore
    }

    /// Platform tag sets this provider can satisfy.
    fn supported_platform_sets(&self) -> &'static [&'static [&'static str]] {
        match self.config {
            CloudConfig::Azure(_) => &[DEBIAN_BULLSEYE_PLATFORMS, WINDOWS_11_PLATFORMS],
            CloudConfig::Hetzner(_) => &[DEBIAN_BUSTER_PLATFORMS],
            CloudConfig::Upcloud(_) => &[DEBIAN_BUSTER_PLATFORMS],
        }
    }

    pub fn supports_platform(&self, platform: &str) -> bool {
        self.supported_platform_sets()
            .iter()
            .any(|set| set.contains(&platform))
    }

    /// SSH connect timeout against the freshly created node.
    pub fn create_node_conn_timeout(&self) -> Duration {
        Duration::from_secs(10)
    }

    /// Budget for the provider's create-node call, polling included.
    pub fn create_node_timeout(&self) -> Duration {
        match self.config {
            CloudConfig::Azure(_) => Duration::from_secs(3600),
            CloudConfig::Hetzner(_) => Duration::from_secs(600),
            CloudConfig::Upcloud(_) => Duration::from_secs(1200),
        }
    }

    /// cloud-init user-data for this provider: packages from engines
    /// compatible with at least one supported platform.
    pub fn user_data(&self, engines: &EngineRepository) -> CloudUserData {
        let filtered =
            engines.filter(|e| e.platforms.iter().any(|p| self.supports_platform(p)));
        CloudUserData::new(filtered.get_platform_packages())
    }

    pub async fn create_node(
        &self,
        key: &SshKey,
        user_data: &CloudUserData,
    ) -> Result<String, CloudError> {
        match &self.config {
            CloudConfig::Azure(cfg) => {
                azure::create_node(&self.http, cfg, key, user_data).await
            }
            CloudConfig::Hetzner(cfg) => {
                hetzner::create_node(&self.http, cfg, key, &user_data.render()).await
            }
            CloudConfig::Upcloud(cfg) => {
                upcloud::create_node(&self.http, cfg, key, &user_data.render()).await
            }
        }
    }

    pub async fn delete_node(&self, host: &str) -> Result<(), CloudError> {
        match &self.config {
            CloudConfig::Azure(cfg) => azure::delete_node(&self.http, cfg, host).await,
            CloudConfig::Hetzner(cfg) => hetzner::delete_node(&self.http, cfg, host).await,
            CloudConfig::Upcloud(cfg) => upcloud::delete_node(&self.http, cfg, host).await,
        }
    }
}

pub struct CloudApiManager {
    apis: Vec<CloudApi>,
    store: Arc<Store>,
    local: LocalConfig,
    remote: RemoteConfig,
    engines: EngineRepository,
    /// Task ids with an outstanding allocation, cleared by the scheduler.
    on_tasks: std::sync::Mutex<HashSet<i32>>,
    alloc_lock: Mutex<()>,
    key: Mutex<Option<SshKey>>,
}

impl CloudApiManager {
    pub fn new(store: Arc<Store>, config: &Config) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();

        let mut apis = Vec::new();
        for cloud in &config.clouds {
            if cloud.max_nodes() == 0 {
                warn!(
                    "Cloud provider {} has max_nodes=0, skipping",
                    cloud.prefix()
                );
                continue;
            }
            apis.push(CloudApi::new(cloud.clone(), http.clone()));
        }
        info!(
            "Active cloud APIs: {}",
            if apis.is_empty() {
                "-".to_string()
            } else {
                apis.iter().map(|a| a.name()).collect::<Vec<_>>().join(", ")
            }
        );

        Self {
            apis,
            store,
            local: config.local.clone(),
            remote: config.remote.clone(),
            engines: config.engines.clone(),
            on_tasks: std::sync::Mutex::new(HashSet::new()),
            alloc_lock: Mutex::new(()),
            key: Mutex::new(None),
        }
    }

    pub fn has_providers(&self) -> bool {
        !self.apis.is_empty()
    }

    pub fn apis(&self) -> &[CloudApi] {
        &self.apis
    }

    pub fn api(&self, name: &str) -> Option<&CloudApi> {
        self.apis.iter().find(|a| a.name() == name)
    }

    /// Idle tolerance per provider tag.
    pub fn idle_tolerances(&self) -> Vec<(String, Duration)> {
        self.apis
            .iter()
            .map(|a| {
                (
                    a.name().to_string(),
                    Duration::from_secs(a.config().idle_tolerance()),
                )
            })
            .collect()
    }

    /// Current and maximum node counts per provider.
    pub async fn get_capacity(&self) -> Result<HashMap<String, (i64, usize)>, CloudError> {
        let counts = self.store.count_nodes_clouds().await?;
        Ok(self
            .apis
            .iter()
            .map(|api| {
                let current = counts.get(api.name()).copied().unwrap_or(0);
                (api.name().to_string(), (current, api.max_nodes()))
            })
            .collect())
    }

    /// Total number of nodes that could still be created across providers.
    pub async fn free_capacity(&self) -> Result<usize, CloudError> {
        let capacity = self.get_capacity().await?;
        Ok(capacity
            .values()
            .map(|(current, max)| max.saturating_sub((*current).max(0) as usize))
            .sum())
    }

    /// Providers below capacity and compatible with the requested platforms,
    /// best priority first; ties go to configuration order.
    pub async fn select_best_provider(
        &self,
        want_platforms: Option<&[String]>,
    ) -> Result<Option<&CloudApi>, CloudError> {
        let counts = self.store.count_nodes_clouds().await?;
        let mut best: Option<&CloudApi> = None;
        for api in &self.apis {
            let current = counts.get(api.name()).copied().unwrap_or(0);
            if current >= api.max_nodes() as i64 {
                continue;
            }
            if let Some(platforms) = want_platforms {
                if !platforms.iter().any(|p| api.supports_platform(p)) {
                    continue;
                }
            }
            if best.map(|b| api.priority() > b.priority()).unwrap_or(true) {
                best = Some(api);
            }
        }
        Ok(best)
    }

    /// The provisioning key, loaded or generated once under the key lock.
    pub async fn ssh_key(&self) -> Result<SshKey, CloudError> {
        let mut guard = self.key.lock().await;
        if let Some(key) = guard.as_ref() {
            return Ok(key.clone());
        }
        let keys_dir = self.local.keys_dir.clone();
        let key = tokio::task::spawn_blocking(move || keys::load_or_generate(&keys_dir))
            .await
            .map_err(|e| CloudError::Key(e.to_string()))?
            .map_err(CloudError::Key)?;
        *guard = Some(key.clone());
        Ok(key)
    }

    /// Idempotent allocation for a task: a task with an outstanding
    /// allocation is not allocated again until the scheduler clears it.
    pub async fn allocate(
        &self,
        on_task: i32,
        want_platforms: Option<&[String]>,
    ) -> Result<Option<String>, CloudError> {
        {
            let mut tasks = self.on_tasks.lock().unwrap_or_else(|e| e.into_inner());
            if !tasks.insert(on_task) {
                return Ok(None);
            }
        }
        match self.allocate_node(want_platforms, true).await {
            Ok(Some(ip)) => Ok(Some(ip)),
            // No capacity or throttled: release the marker so the next tick
            // can try again.
            Ok(None) => {
                self.mark_task_done(on_task);
                Ok(None)
            }
            Err(e) => {
                self.mark_task_done(on_task);
                Err(e)
            }
        }
    }

    /// Remove a task's outstanding-allocation marker.
    pub fn mark_task_done(&self, task_id: i32) {
        self.on_tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&task_id);
    }

    pub fn pending_allocations(&self) -> usize {
        self.on_tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Create one node. Capacity selection and the placeholder insert happen
    /// under the allocation lock; the provider call itself runs under the
    /// provider's operation semaphore only.
    pub async fn allocate_node(
        &self,
        want_platforms: Option<&[String]>,
        throttle: bool,
    ) -> Result<Option<String>, CloudError> {
        let (api_name, placeholder) = {
            let _guard = self.alloc_lock.lock().await;
            let Some(api) = self.select_best_provider(want_platforms).await? else {
                warn!("No suitable cloud provider for platforms {:?}", want_platforms);
                return Ok(None);
            };
            if throttle && api.op_semaphore().available_permits() == 0 {
                drop(_guard);
                tokio::time::sleep(Duration::from_millis(500)).await;
                return Ok(None);
            }
            let placeholder = self
                .store
                .add_tmp_node(api.name(), api.username())
                .await?;
            (api.name(), placeholder)
        };

        // api_name always resolves: apis are never removed at runtime.
        let Some(api) = self.api(api_name) else {
            self.store.remove_node(&placeholder).await?;
            return Ok(None);
        };

        let result = self.create_and_ready(api).await;
        match result {
            Ok(ip) => {
                self.store.remove_node(&placeholder).await?;
                self.store
                    .add_node(&ip, api.username(), None, Some(api.name()), true)
                    .await?;
                info!("Allocated {} node {}", api.name(), ip);
                Ok(Some(ip))
            }
            Err(e) => {
                self.store.remove_node(&placeholder).await?;
                Err(e)
            }
        }
    }

    async fn create_and_ready(&self, api: &CloudApi) -> Result<String, CloudError> {
        let _permit = api
            .op_semaphore()
            .acquire()
            .await
            .map_err(|_| CloudError::Timeout)?;

        let key = self.ssh_key().await?;
        let user_data = api.user_data(&self.engines);
        let ip = tokio::time::timeout(
            api.create_node_timeout(),
            api.create_node(&key, &user_data),
        )
        .await
        .map_err(|_| CloudError::Timeout)??;

        if let Err(e) = self.ready_node(api, &ip).await {
            warn!("Node {} failed to become ready: {}", ip, e);
            if let Err(del) = api.delete_node(&ip).await {
                warn!("Cleanup of unready node {} failed: {}", ip, del);
            }
            return Err(e);
        }
        Ok(ip)
    }

    /// Wait for cloud-init and provision the engines over SSH. The machine
    /// handle is temporary; the connect pipeline opens the long-lived one.
    async fn ready_node(&self, api: &CloudApi, ip: &str) -> Result<(), CloudError> {
        let jump_host = api
            .config()
            .jump_host()
            .map(str::to_string)
            .or_else(|| self.remote.jump_host.clone());
        let jump_username = api
            .config()
            .jump_username()
            .map(str::to_string)
            .or_else(|| self.remote.jump_username.clone());

        let machine = RemoteMachine::connect(MachineConfig {
            host: ip.to_string(),
            username: api.username().to_string(),
            key_paths: self.local.get_private_keys(),
            jump_host,
            jump_username,
            connect_timeout: api.create_node_conn_timeout(),
            data_dir: self.remote.data_dir.clone(),
            engines_dir: self.remote.engines_dir.clone(),
            tasks_dir: self.remote.tasks_dir.clone(),
        })
        .await?;

        let result = async {
            machine.run("cloud-init status --wait", None).await?;
            let engines = self.engines.filter_platforms(machine.platforms());
            machine
                .setup_node(&engines)
                .await
                .map_err(CloudError::Machine)?;
            Ok::<(), CloudError>(())
        }
        .await;
        machine.close().await;
        result
    }

    /// Disable, destroy and forget a cloud node. A node without a cloud tag
    /// is left alone; a provider failure leaves the row disabled for a later
    /// retry.
    pub async fn deallocate(&self, ip: &str) -> Result<(), CloudError> {
        let Some(node) = self.store.get_node(ip).await? else {
            return Ok(());
        };
        let Some(cloud) = node.cloud else {
            return Ok(());
        };
        self.store.disable_node(ip).await?;
        let Some(api) = self.api(&cloud) else {
            warn!("Node {} belongs to unconfigured cloud {}", ip, cloud);
            return Ok(());
        };

        let _permit = api
            .op_semaphore()
            .acquire()
            .await
            .map_err(|_| CloudError::Timeout)?;
        api.delete_node(ip).await?;
        self.store.remove_node(ip).await?;
        info!("Deallocated {} node {}", cloud, ip);
        Ok(())
    }
}
