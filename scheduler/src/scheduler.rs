//! The scheduler control loop.
//!
//! Five pipelines run concurrently, each a producer plus a small worker pool
//! connected by a deduplicating bounded queue:
//!
//! - *connect*: enabled node rows without a live machine get an SSH
//!   connection and platform detection;
//! - *allocate*: TO_DO tasks are matched to idle machines (or a cloud
//!   allocation is requested when none fits);
//! - *consume*: RUNNING tasks are watched; when their host goes idle the
//!   results are downloaded and the task is finished;
//! - *deallocate*: cloud nodes idle past their provider's tolerance are
//!   disabled, disconnected and destroyed;
//! - *webhook*: state transitions are delivered to interested clients,
//!   bounded by a request semaphore.
//!
//! Producers tick every `sleep_interval` seconds and enumerate candidates;
//! the queues make re-enumeration idempotent, so nothing is dispatched twice
//! while an earlier message for the same task or node is still in flight. On
//! shutdown producers stop first, the queues drain, and only then are the
//! workers cancelled and the SSH connections closed.

use crate::clouds::CloudApiManager;
use crate::queue::UniqueQueue;
use crate::remote::machine::{MachineConfig, RemoteMachine};
use crate::remote::path::RemotePath;
use crate::remote::repository::{MachineFilter, RemoteMachineRepository};
use crate::shutdown::Shutdown;
use crate::store::Store;
use crate::webhook::WebhookWorker;
use anyhow::{Context, Result};
use serde_json::json;
use shared::config::Config;
use shared::engine::Engine;
use shared::models::{meta_keys, NodeModel, TaskModel, TaskStatus};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Consecutive consume ticks a RUNNING task's machine may be missing before
/// the task is declared lost.
pub(crate) const GONE_NODE_PASSES: u32 = 20;

/// Stats logging period.
const STATS_INTERVAL: Duration = Duration::from_secs(10);

pub struct Scheduler {
    inner: Arc<SchedulerInner>,
    producers: Vec<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

struct SchedulerInner {
    config: Config,
    store: Arc<Store>,
    repository: RwLock<RemoteMachineRepository>,
    clouds: Arc<CloudApiManager>,
    webhooks: WebhookWorker,
    shutdown: Shutdown,
    connect_queue: UniqueQueue<String, NodeModel>,
    allocate_queue: UniqueQueue<i32, TaskModel>,
    consume_queue: UniqueQueue<i32, TaskModel>,
    deallocate_queue: UniqueQueue<String, ()>,
    /// Per-task counters of consume ticks with a missing machine.
    gone_counters: std::sync::Mutex<HashMap<i32, u32>>,
}

impl Scheduler {
    /// Connect to the store and launch every pipeline.
    pub async fn start(config: Config) -> Result<Self> {
        let store = Arc::new(
            Store::connect(&config.db)
                .await
                .context("cannot connect to the database")?,
        );
        let clouds = Arc::new(CloudApiManager::new(store.clone(), &config));
        let webhooks = WebhookWorker::new(
            config.local.webhook_reqs_limit,
            config.local.webhook_url.clone(),
        );

        info!(
            "Available computing engines: {}",
            config
                .engines
                .names()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        );

        let local = &config.local;
        let inner = Arc::new(SchedulerInner {
            connect_queue: UniqueQueue::new("connect", local.conn_machine_pending),
            allocate_queue: UniqueQueue::new("allocate", local.allocate_pending),
            consume_queue: UniqueQueue::new("consume", local.consume_pending),
            deallocate_queue: UniqueQueue::new("deallocate", local.deallocate_pending),
            repository: RwLock::new(RemoteMachineRepository::new()),
            shutdown: Shutdown::new(),
            gone_counters: std::sync::Mutex::new(HashMap::new()),
            webhooks,
            clouds,
            store,
            config,
        });

        let mut scheduler = Self {
            inner,
            producers: Vec::new(),
            workers: Vec::new(),
        };
        scheduler.spawn_pipelines();
        Ok(scheduler)
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.inner.shutdown.clone()
    }

    /// Client-facing store handle (used by tests and the CLIs via the lib).
    pub fn store(&self) -> Arc<Store> {
        self.inner.store.clone()
    }

    fn spawn_pipelines(&mut self) {
        let tick = Duration::from_secs(self.inner.config.local.sleep_interval);
        let local = &self.inner.config.local;

        // Producers observe the cancellation signal between ticks.
        self.producers.push(spawn_producer(
            self.inner.clone(),
            tick,
            "connect",
            |inner| async move { inner.produce_connect().await },
        ));
        self.producers.push(spawn_producer(
            self.inner.clone(),
            tick,
            "allocate",
            |inner| async move { inner.produce_allocate().await },
        ));
        self.producers.push(spawn_producer(
            self.inner.clone(),
            tick,
            "consume",
            |inner| async move { inner.produce_consume().await },
        ));
        self.producers.push(spawn_producer(
            self.inner.clone(),
            tick,
            "deallocate",
            |inner| async move { inner.produce_deallocate().await },
        ));

        // Consumers run until aborted; the queues are drained before that.
        for _ in 0..local.conn_machine_limit {
            let inner = self.inner.clone();
            self.workers.push(tokio::spawn(async move {
                loop {
                    let (ip, node) = inner.connect_queue.get().await;
                    inner.consume_connect(node).await;
                    inner.connect_queue.task_done(&ip);
                }
            }));
        }
        for _ in 0..local.allocate_limit {
            let inner = self.inner.clone();
            self.workers.push(tokio::spawn(async move {
                loop {
                    let (task_id, task) = inner.allocate_queue.get().await;
                    if let Err(e) = inner.consume_allocate(task).await {
                        warn!(task_id, "allocation failed: {:#}", e);
                    }
                    inner.allocate_queue.task_done(&task_id);
                }
            }));
        }
        for _ in 0..local.consume_limit {
            let inner = self.inner.clone();
            self.workers.push(tokio::spawn(async move {
                loop {
                    let (task_id, task) = inner.consume_queue.get().await;
                    if let Err(e) = inner.consume_task(task).await {
                        warn!(task_id, "consumption failed: {:#}", e);
                    }
                    inner.consume_queue.task_done(&task_id);
                }
            }));
        }
        for _ in 0..local.deallocate_limit {
            let inner = self.inner.clone();
            self.workers.push(tokio::spawn(async move {
                loop {
                    let (ip, ()) = inner.deallocate_queue.get().await;
                    if let Err(e) = inner.clouds.deallocate(&ip).await {
                        warn!(ip = %ip, "deallocation failed: {:#}", e);
                    }
                    inner.deallocate_queue.task_done(&ip);
                }
            }));
        }

        // Periodic stats.
        let inner = self.inner.clone();
        self.workers.push(tokio::spawn(async move {
            loop {
                if !inner.shutdown.sleep(STATS_INTERVAL).await {
                    break;
                }
                inner.log_stats().await;
            }
        }));
    }

    /// Graceful shutdown: stop producers, drain the queues, cancel workers,
    /// close every SSH connection.
    pub async fn stop(self) {
        info!("Shutting down scheduler");
        self.inner.shutdown.trigger();
        for producer in self.producers {
            producer.await.ok();
        }

        self.inner.connect_queue.join().await;
        self.inner.allocate_queue.join().await;
        self.inner.consume_queue.join().await;
        self.inner.deallocate_queue.join().await;

        for worker in &self.workers {
            worker.abort();
        }
        for worker in self.workers {
            worker.await.ok();
        }

        self.inner.repository.write().await.disconnect_all().await;
        info!("Scheduler stopped");
    }
}

fn spawn_producer<F, Fut>(
    inner: Arc<SchedulerInner>,
    tick: Duration,
    name: &'static str,
    produce: F,
) -> JoinHandle<()>
where
    F: Fn(Arc<SchedulerInner>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            if inner.shutdown.is_triggered() {
                break;
            }
            if let Err(e) = produce(inner.clone()).await {
                error!("{} producer failed: {:#}", name, e);
            }
            if !inner.shutdown.sleep(tick).await {
                break;
            }
        }
        debug!("{} producer stopped", name);
    })
}

impl SchedulerInner {
    /// Per-cloud jump host override wins over the `[remote]` default.
    fn jump_for(&self, cloud: Option<&str>) -> (Option<String>, Option<String>) {
        let api = cloud.and_then(|c| self.clouds.api(c));
        let host = api
            .and_then(|a| a.config().jump_host().map(str::to_string))
            .or_else(|| self.config.remote.jump_host.clone());
        let username = api
            .and_then(|a| a.config().jump_username().map(str::to_string))
            .or_else(|| self.config.remote.jump_username.clone());
        (host, username)
    }

    fn machine_config(&self, node: &NodeModel) -> MachineConfig {
        let (jump_host, jump_username) = self.jump_for(node.cloud.as_deref());
        MachineConfig {
            host: node.ip.clone(),
            username: node.username.clone(),
            key_paths: self.config.local.get_private_keys(),
            jump_host,
            jump_username,
            connect_timeout: Duration::from_secs(shared::defaults::default_connect_timeout()),
            data_dir: self.config.remote.data_dir.clone(),
            engines_dir: self.config.remote.engines_dir.clone(),
            tasks_dir: self.config.remote.tasks_dir.clone(),
        }
    }

    fn fire_webhook(self: &Arc<Self>, task: TaskModel) {
        let inner = self.clone();
        tokio::spawn(async move {
            inner.webhooks.send(&task).await;
        });
    }

    // ---- connect pipeline ----

    async fn produce_connect(self: Arc<Self>) -> Result<()> {
        let enabled = self.store.get_enabled_nodes().await?;
        let known: HashSet<String> = {
            let repo = self.repository.read().await;
            repo.keys().into_iter().collect()
        };

        // Drop live machines whose node row was removed entirely. Disabled
        // rows keep their machine until the deallocate pipeline takes over.
        let all_ips: HashSet<String> = self
            .store
            .get_all_nodes()
            .await?
            .into_iter()
            .map(|n| n.ip)
            .collect();
        let stale: Vec<String> = known
            .iter()
            .filter(|ip| !all_ips.contains(*ip))
            .cloned()
            .collect();
        if !stale.is_empty() {
            self.repository.write().await.disconnect_many(&stale).await;
        }

        for node in enabled {
            if !known.contains(&node.ip) {
                self.connect_queue.put(node.ip.clone(), node).await;
            }
        }
        Ok(())
    }

    async fn consume_connect(&self, node: NodeModel) {
        debug!(ip = %node.ip, "connecting");
        match RemoteMachine::connect(self.machine_config(&node)).await {
            Ok(machine) => {
                info!(ip = %node.ip, platforms = ?machine.platforms(), "node connected");
                self.repository.write().await.add(machine);
            }
            // The next connect tick retries this node.
            Err(e) => warn!(ip = %node.ip, "cannot connect: {}", e),
        }
    }

    // ---- allocate pipeline ----

    async fn produce_allocate(self: Arc<Self>) -> Result<()> {
        let idle = {
            let repo = self.repository.read().await;
            repo.filter(&MachineFilter {
                busy: Some(false),
                ..Default::default()
            })
            .len()
        };
        let capacity = if self.clouds.has_providers() {
            self.clouds.free_capacity().await.unwrap_or(0)
        } else {
            0
        };
        let limit = 10usize.max(capacity).max(idle);
        let tasks = self
            .store
            .get_tasks_by_status(&[TaskStatus::ToDo], Some(limit as i64))
            .await?;
        for task in tasks {
            self.allocate_queue.put(task.task_id, task).await;
        }
        Ok(())
    }

    async fn consume_allocate(self: &Arc<Self>, task: TaskModel) -> Result<()> {
        let engine_name = task.engine_name().unwrap_or_default().to_string();
        let Some(engine) = self.config.engines.get(&engine_name).cloned() else {
            warn!(
                task_id = task.task_id,
                "unsupported engine {:?}, rejecting", engine_name
            );
            self.store
                .set_task_error(task.task_id, &task.metadata, &json!("unsupported engine"))
                .await?;
            self.clouds.mark_task_done(task.task_id);
            self.finish_webhook(task.task_id).await;
            return Ok(());
        };

        // Idle machines matching the engine's platforms, oldest idle first,
        // minus hosts another RUNNING task already occupies.
        let running_ips: HashSet<String> = self
            .store
            .get_tasks_by_status(&[TaskStatus::Running], None)
            .await?
            .into_iter()
            .filter_map(|t| t.ip)
            .collect();
        let candidates = {
            let repo = self.repository.read().await;
            repo.filter(&MachineFilter {
                busy: Some(false),
                platforms: Some(engine.platforms.clone()),
                ..Default::default()
            })
        };
        let candidate = candidates
            .into_iter()
            .find(|m| !running_ips.contains(m.hostname()));

        let Some(machine) = candidate else {
            if self.clouds.has_providers() {
                match self
                    .clouds
                    .allocate(task.task_id, Some(engine.platforms.as_slice()))
                    .await
                {
                    Ok(Some(ip)) => info!(task_id = task.task_id, ip = %ip, "node allocated"),
                    Ok(None) => {}
                    Err(e) => warn!(task_id = task.task_id, "cloud allocation failed: {:#}", e),
                }
            }
            return Ok(());
        };

        info!(
            task_id = task.task_id,
            label = %task.label,
            ip = %machine.hostname(),
            "submitting task"
        );
        match self.start_task_on_machine(&machine, &engine, &task).await {
            Ok(()) => {
                machine.set_busy(true);
                machine.start_occupancy_check(engine.clone());
                self.store
                    .set_task_running(task.task_id, machine.hostname())
                    .await?;
                self.clouds.mark_task_done(task.task_id);
                self.finish_webhook(task.task_id).await;
            }
            // The task stays TO_DO; the next tick tries again.
            Err(e) => warn!(
                task_id = task.task_id,
                ip = %machine.hostname(),
                "cannot start task: {:#}", e
            ),
        }
        Ok(())
    }

    /// Resolve a remote path against the machine's root unless absolute.
    async fn absolutize(&self, machine: &RemoteMachine, path: &str) -> Result<RemotePath> {
        let p = RemotePath::new(machine.flavor(), path);
        if p.is_absolute() {
            return Ok(p);
        }
        let root = machine
            .sftp_retry(|| machine.sftp().sftp_realpath(".".to_string()))
            .await?;
        Ok(RemotePath::new(machine.flavor(), &root).join(&p.sftp_form()))
    }

    async fn start_task_on_machine(
        &self,
        machine: &RemoteMachine,
        engine: &Engine,
        task: &TaskModel,
    ) -> Result<()> {
        let remote_folder = task
            .remote_folder()
            .context("task metadata has no remote_folder")?
            .to_string();
        let task_dir = self.absolutize(machine, &remote_folder).await?;
        let engine_path = self
            .absolutize(machine, &machine.engines_dir().join(&engine.name).sftp_form())
            .await?;

        machine
            .sftp_retry(|| machine.sftp().sftp_makedirs(task_dir.sftp_form()))
            .await?;
        for input_file in &engine.input_files {
            let content = task
                .metadata
                .get(input_file)
                .and_then(|v| v.as_str())
                .with_context(|| format!("input file {} missing in metadata", input_file))?;
            let remote = task_dir.join(input_file).sftp_form();
            let data = content.as_bytes().to_vec();
            machine
                .sftp_retry(|| machine.sftp().sftp_write(remote.clone(), data.clone()))
                .await?;
        }

        let node = self.store.get_node(machine.hostname()).await?;
        let ncpus = match node.and_then(|n| n.ncpus) {
            Some(n) => n.to_string(),
            None => match machine.get_cpu_cores().await {
                Ok(n) => n.to_string(),
                // Last resort: let the remote shell figure it out.
                Err(_) => "`grep -c ^processor /proc/cpuinfo`".to_string(),
            },
        };

        let command = engine.render_spawn(
            &machine.quote(&task_dir.shell_form()),
            &engine_path.shell_form(),
            &ncpus,
        );
        machine.run_bg(&command, Some(&task_dir)).await?;
        Ok(())
    }

    // ---- consume pipeline ----

    async fn produce_consume(self: Arc<Self>) -> Result<()> {
        let tasks = self
            .store
            .get_tasks_by_status(&[TaskStatus::Running], None)
            .await?;
        for task in tasks {
            self.consume_queue.put(task.task_id, task).await;
        }
        Ok(())
    }

    async fn consume_task(self: &Arc<Self>, task: TaskModel) -> Result<()> {
        let Some(ip) = task.ip.clone() else {
            warn!(task_id = task.task_id, "RUNNING task has no ip");
            return Ok(());
        };
        let machine = {
            let repo = self.repository.read().await;
            repo.get(&ip)
        };
        let Some(machine) = machine else {
            return self.count_gone(&task).await;
        };
        self.gone_counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&task.task_id);

        let engine_name = task.engine_name().unwrap_or_default().to_string();
        let Some(engine) = self.config.engines.get(&engine_name).cloned() else {
            self.store
                .set_task_error(task.task_id, &task.metadata, &json!("unsupported engine"))
                .await?;
            self.clouds.mark_task_done(task.task_id);
            self.finish_webhook(task.task_id).await;
            return Ok(());
        };

        match machine.meta().busy() {
            None => {
                // Freshly reattached host: let the checker find out.
                machine.start_occupancy_check(engine);
                Ok(())
            }
            Some(true) => Ok(()),
            Some(false) => self.collect_results(&machine, &engine, task).await,
        }
    }

    async fn count_gone(self: &Arc<Self>, task: &TaskModel) -> Result<()> {
        let misses = {
            let mut counters = self
                .gone_counters
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            register_gone_pass(&mut counters, task.task_id)
        };
        debug!(task_id = task.task_id, misses, "machine missing");
        if misses > GONE_NODE_PASSES {
            warn!(task_id = task.task_id, "node is gone, giving up on task");
            self.store
                .set_task_error(task.task_id, &task.metadata, &json!("node is gone"))
                .await?;
            self.gone_counters
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&task.task_id);
            self.clouds.mark_task_done(task.task_id);
            self.finish_webhook(task.task_id).await;
        }
        Ok(())
    }

    /// The engine stopped: download the outputs, clean up the remote folder
    /// and finish the task. Per-file download failures are collected into an
    /// `error` map; whatever was fetched stays fetched.
    async fn collect_results(
        self: &Arc<Self>,
        machine: &RemoteMachine,
        engine: &Engine,
        task: TaskModel,
    ) -> Result<()> {
        let remote_folder = task
            .remote_folder()
            .context("task metadata has no remote_folder")?
            .to_string();
        let task_dir = self.absolutize(machine, &remote_folder).await?;

        let store_folder = resolve_store_folder(
            task.local_folder(),
            machine.flavor(),
            &remote_folder,
            &self.config.local.tasks_dir,
        );
        create_store_folder(&store_folder)
            .with_context(|| format!("cannot create {}", store_folder.display()))?;

        let mut errors = serde_json::Map::new();
        for output_file in &engine.output_files {
            let remote = task_dir.join(output_file).sftp_form();
            let local = store_folder.join(output_file);
            let result = machine
                .sftp_retry(|| machine.sftp().sftp_download(remote.clone(), local.clone()))
                .await;
            if let Err(e) = result {
                warn!(task_id = task.task_id, file = %remote, "cannot fetch: {}", e);
                errors.insert(remote.clone(), json!(e.to_string()));
            }
        }

        // Best effort: a leftover folder only wastes remote disk space.
        if let Err(e) = machine.sftp().sftp_remove_dir_all(task_dir.sftp_form()).await {
            debug!(task_id = task.task_id, "cannot remove remote folder: {}", e);
        }

        let mut metadata = task.metadata.clone();
        if let Some(obj) = metadata.as_object_mut() {
            obj.insert(
                meta_keys::LOCAL_FOLDER.to_string(),
                json!(store_folder.to_string_lossy()),
            );
        }
        if errors.is_empty() {
            self.store.set_task_done(task.task_id, &metadata).await?;
        } else {
            self.store
                .set_task_error(task.task_id, &metadata, &serde_json::Value::Object(errors))
                .await?;
        }
        info!(
            task_id = task.task_id,
            label = %task.label,
            "task done, saved in {}", store_folder.display()
        );
        self.clouds.mark_task_done(task.task_id);
        self.finish_webhook(task.task_id).await;
        Ok(())
    }

    /// Re-read the task (so the webhook sees the committed state) and fire.
    async fn finish_webhook(self: &Arc<Self>, task_id: i32) {
        match self.store.get_task(task_id).await {
            Ok(Some(task)) => self.fire_webhook(task),
            Ok(None) => {}
            Err(e) => warn!(task_id, "cannot reload task for webhook: {}", e),
        }
    }

    // ---- deallocate pipeline ----

    async fn produce_deallocate(self: Arc<Self>) -> Result<()> {
        // Pass 1: disable cloud nodes idle past their provider's tolerance.
        let enabled = self.store.get_enabled_nodes().await?;
        for (cloud, tolerance) in self.clouds.idle_tolerances() {
            for node in enabled.iter().filter(|n| n.cloud.as_deref() == Some(&cloud)) {
                let idle = {
                    let repo = self.repository.read().await;
                    repo.get(&node.ip)
                        .map(|m| m.is_free_longer_than(tolerance))
                        .unwrap_or(false)
                };
                if idle {
                    info!(ip = %node.ip, cloud = %cloud, "node idle too long, disabling");
                    self.store.disable_node(&node.ip).await?;
                }
            }
        }

        // Pass 2: disconnect disabled nodes with no running work and hand
        // them to the deallocate workers.
        let running_ips: HashSet<String> = self
            .store
            .get_tasks_by_status(&[TaskStatus::Running], None)
            .await?
            .into_iter()
            .filter_map(|t| t.ip)
            .collect();
        let candidates: Vec<String> = self
            .store
            .get_disabled_nodes()
            .await?
            .into_iter()
            .filter(|n| !running_ips.contains(&n.ip))
            .map(|n| n.ip)
            .collect();
        if candidates.is_empty() {
            return Ok(());
        }

        self.repository.write().await.disconnect_many(&candidates).await;
        for ip in candidates {
            self.deallocate_queue.put(ip.clone(), ()).await;
        }
        Ok(())
    }

    // ---- stats ----

    async fn log_stats(&self) {
        let nodes = self.store.count_nodes_by_status().await.unwrap_or_default();
        let tasks = self.store.count_tasks_by_status().await.unwrap_or_default();
        let alive_tasks = tokio::runtime::Handle::current()
            .metrics()
            .num_alive_tasks();
        info!(
            "NODES enabled: {} disabled: {} | TASKS to do: {} running: {} done: {} | \
             tokio tasks: {} | queues connect: {} allocate: {} consume: {} deallocate: {} | \
             pending allocations: {}",
            nodes.get(&true).copied().unwrap_or(0),
            nodes.get(&false).copied().unwrap_or(0),
            tasks.get(&TaskStatus::ToDo).copied().unwrap_or(0),
            tasks.get(&TaskStatus::Running).copied().unwrap_or(0),
            tasks.get(&TaskStatus::Done).copied().unwrap_or(0),
            alive_tasks,
            self.connect_queue.pending(),
            self.allocate_queue.pending(),
            self.consume_queue.pending(),
            self.deallocate_queue.pending(),
            self.clouds.pending_allocations(),
        );
    }
}

/// Record one consume tick with the task's machine missing, returning the
/// consecutive-miss count. A machine reappearing resets the task's counter.
pub(crate) fn register_gone_pass(counters: &mut HashMap<i32, u32>, task_id: i32) -> u32 {
    let entry = counters.entry(task_id).or_insert(0);
    *entry += 1;
    *entry
}

/// Result destination for a finished task: an explicit client hint wins;
/// otherwise a folder named after the remote one under the local tasks dir.
pub(crate) fn resolve_store_folder(
    local_folder: Option<&str>,
    flavor: crate::remote::path::PathFlavor,
    remote_folder: &str,
    tasks_dir: &std::path::Path,
) -> std::path::PathBuf {
    match local_folder {
        Some(folder) => std::path::PathBuf::from(folder),
        None => tasks_dir.join(RemotePath::new(flavor, remote_folder).basename()),
    }
}

/// Result folders are shared with unprivileged analysis tools, hence the
/// wide-open mode.
fn create_store_folder(path: &std::path::Path) -> std::io::Result<()> {
    std::fs::create_dir_all(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o777))?;
    }
    Ok(())
}
