//! The live handle for one worker host.
//!
//! A `RemoteMachine` wraps the SSH connection with platform-specific
//! behavior: shell quoting, CPU counting, process listing, background
//! spawning and node provisioning. It also owns the host's busy-state record
//! and the background occupancy checkers that watch a running engine until
//! the host goes idle again.

use super::adapters::{detect, PlatformAdapter, PlatformFacts, SetupKind};
use super::path::{powershell_quote, sh_quote, PathFlavor, RemotePath};
use crate::shutdown::Shutdown;
use crate::ssh::{ConnectOptions, ExecResult, SshConnection, SshError};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use shared::engine::{Deploy, Engine, EngineRepository};
use shared::utils::retry_fibo;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum RemoteMachineError {
    #[error("platform detection failed for {0}")]
    PlatformGuessFailed(String),

    #[error(transparent)]
    Ssh(#[from] SshError),

    #[error("command failed with code {code}: {stderr}")]
    CommandFailed { code: i32, stderr: String },
}

impl RemoteMachineError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteMachineError::Ssh(e) if e.is_transient())
    }
}

/// One entry of the remote process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: i64,
    pub name: String,
    pub command: String,
}

/// Busy-state record of a machine. Writing `true` clears `free_since`;
/// writing `false` stamps it with the current time.
#[derive(Debug, Clone, Default)]
pub struct MachineMeta {
    busy: Option<bool>,
    free_since: Option<DateTime<Utc>>,
}

impl MachineMeta {
    pub fn busy(&self) -> Option<bool> {
        self.busy
    }

    pub fn free_since(&self) -> Option<DateTime<Utc>> {
        self.free_since
    }

    pub fn set_busy(&mut self, busy: bool) {
        if busy {
            self.busy = Some(true);
            self.free_since = None;
        } else {
            self.busy = Some(false);
            self.free_since = Some(Utc::now());
        }
    }

    pub fn is_free_longer_than(&self, delta: Duration) -> bool {
        if self.busy.unwrap_or(true) {
            return false;
        }
        match self.free_since {
            Some(since) => {
                let idle = Utc::now().signed_duration_since(since);
                idle.to_std().map(|d| d > delta).unwrap_or(false)
            }
            None => false,
        }
    }
}

/// Connection parameters for one host.
#[derive(Debug, Clone)]
pub struct MachineConfig {
    pub host: String,
    pub username: String,
    pub key_paths: Vec<PathBuf>,
    pub jump_host: Option<String>,
    pub jump_username: Option<String>,
    pub connect_timeout: Duration,
    pub data_dir: String,
    pub engines_dir: String,
    pub tasks_dir: String,
}

pub struct RemoteMachine {
    conn: SshConnection,
    adapter: &'static PlatformAdapter,
    platforms: Vec<String>,
    meta: Mutex<MachineMeta>,
    data_dir: RemotePath,
    engines_dir: RemotePath,
    tasks_dir: RemotePath,
    cancel: Shutdown,
    jobs: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl RemoteMachine {
    /// Connect, authenticate and detect the platform. Refuses to produce a
    /// machine when no adapter matches.
    pub async fn connect(config: MachineConfig) -> Result<Arc<Self>, RemoteMachineError> {
        let opts = ConnectOptions {
            host: config.host.clone(),
            username: config.username.clone(),
            key_paths: config.key_paths.clone(),
            jump_host: config.jump_host.clone(),
            jump_username: config.jump_username.clone(),
            connect_timeout: config.connect_timeout,
        };
        let conn = retry_fibo(
            || SshConnection::connect(opts.clone()),
            SshError::is_transient,
        )
        .await?;

        let facts = gather_facts(&conn).await?;
        debug!(host = %config.host, ?facts, "platform facts");
        let (adapter, platforms) = detect(&facts);
        let Some(adapter) = adapter else {
            conn.close().await;
            return Err(RemoteMachineError::PlatformGuessFailed(config.host));
        };
        info!(host = %config.host, platform = adapter.platform, "platform detected");

        let flavor = adapter.flavor;
        Ok(Arc::new(Self {
            conn,
            adapter,
            platforms,
            meta: Mutex::new(MachineMeta::default()),
            data_dir: RemotePath::new(flavor, &config.data_dir),
            engines_dir: RemotePath::new(flavor, &config.engines_dir),
            tasks_dir: RemotePath::new(flavor, &config.tasks_dir),
            cancel: Shutdown::new(),
            jobs: Mutex::new(Vec::new()),
        }))
    }

    pub fn hostname(&self) -> &str {
        self.conn.host()
    }

    pub fn username(&self) -> &str {
        self.conn.username()
    }

    pub fn adapter(&self) -> &'static PlatformAdapter {
        self.adapter
    }

    /// All platform tags the host matched during detection.
    pub fn platforms(&self) -> &[String] {
        &self.platforms
    }

    pub fn flavor(&self) -> PathFlavor {
        self.adapter.flavor
    }

    pub fn data_dir(&self) -> &RemotePath {
        &self.data_dir
    }

    pub fn engines_dir(&self) -> &RemotePath {
        &self.engines_dir
    }

    pub fn tasks_dir(&self) -> &RemotePath {
        &self.tasks_dir
    }

    pub fn meta(&self) -> MachineMeta {
        self.meta.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_busy(&self, busy: bool) {
        self.meta
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .set_busy(busy);
    }

    pub fn is_free_longer_than(&self, delta: Duration) -> bool {
        self.meta
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_free_longer_than(delta)
    }

    /// Platform-specific shell quoting.
    pub fn quote(&self, s: &str) -> String {
        match self.flavor() {
            PathFlavor::Posix => sh_quote(s),
            PathFlavor::Windows => powershell_quote(s),
        }
    }

    fn with_cwd(&self, command: &str, cwd: Option<&RemotePath>) -> String {
        match cwd {
            Some(dir) => format!("cd {}; {}", self.quote(&dir.shell_form()), command),
            None => command.to_string(),
        }
    }

    /// Run a command and wait for it, retrying the transient error set.
    pub async fn run(
        &self,
        command: &str,
        cwd: Option<&RemotePath>,
    ) -> Result<ExecResult, SshError> {
        let full = self.with_cwd(command, cwd);
        retry_fibo(|| self.conn.exec(full.clone()), SshError::is_transient).await
    }

    /// Like `run` but treats a non-zero exit status as an error.
    pub async fn run_checked(
        &self,
        command: &str,
        cwd: Option<&RemotePath>,
    ) -> Result<ExecResult, RemoteMachineError> {
        let result = self.run(command, cwd).await?;
        if !result.success() {
            return Err(RemoteMachineError::CommandFailed {
                code: result.exit_code,
                stderr: result.stderr,
            });
        }
        Ok(result)
    }

    /// Launch a detached process with its standard streams disconnected.
    pub async fn run_bg(&self, command: &str, cwd: Option<&RemotePath>) -> Result<(), SshError> {
        let full = match self.flavor() {
            PathFlavor::Posix => {
                let inner = self.with_cwd(command, cwd);
                format!(
                    "nohup sh -c {} > /dev/null 2>&1 < /dev/null &",
                    sh_quote(&inner)
                )
            }
            PathFlavor::Windows => {
                let inner = self.with_cwd(command, cwd);
                format!(
                    "Start-Process powershell -WindowStyle Hidden -ArgumentList '-Command', {}",
                    powershell_quote(&inner)
                )
            }
        };
        self.conn.exec_detached(full).await
    }

    /// Number of CPU cores, defaulting to 1 when the probe fails to parse.
    pub async fn get_cpu_cores(&self) -> Result<i32, SshError> {
        let cmd = match self.flavor() {
            PathFlavor::Posix => "getconf NPROCESSORS_ONLN 2> /dev/null || getconf _NPROCESSORS_ONLN",
            PathFlavor::Windows => "[environment]::ProcessorCount",
        };
        let result = self.run(cmd, None).await?;
        Ok(result.stdout.trim().parse().unwrap_or(1))
    }

    /// Information about all running processes.
    pub async fn list_processes(&self) -> Result<Vec<ProcessInfo>, SshError> {
        match self.flavor() {
            PathFlavor::Posix => {
                let result = self.run(PS_LIST_CMD, None).await?;
                Ok(parse_ps_output(&result.stdout))
            }
            PathFlavor::Windows => {
                let result = self.run(&windows_process_cmd(None), None).await?;
                Ok(parse_cim_output(&result.stdout))
            }
        }
    }

    /// Processes whose name (or, with `full`, name or command line) matches
    /// the pattern.
    pub async fn pgrep(&self, pattern: &str, full: bool) -> Result<Vec<ProcessInfo>, SshError> {
        match self.flavor() {
            PathFlavor::Posix => {
                let pgrep = if full {
                    format!("pgrep -f {}", sh_quote(pattern))
                } else {
                    format!("pgrep {}", sh_quote(pattern))
                };
                let cmd = format!(
                    "{} | xargs --no-run-if-empty ps -o {}",
                    pgrep, PS_COLUMNS
                );
                let result = self.run(&cmd, None).await?;
                Ok(parse_ps_output(&result.stdout))
            }
            PathFlavor::Windows => {
                let quoted = powershell_quote(pattern);
                let where_expr = if full {
                    format!("$_.Name -match {q} -or $_.CommandLine -match {q}", q = quoted)
                } else {
                    format!("$_.Name -match {}", quoted)
                };
                let result = self
                    .run(&windows_process_cmd(Some(&where_expr)), None)
                    .await?;
                Ok(parse_cim_output(&result.stdout))
            }
        }
    }

    /// True when the engine's liveness probe indicates a running task.
    pub async fn occupancy_check(&self, engine: &Engine) -> Result<bool, SshError> {
        if let Some(pname) = &engine.check_pname {
            if !self.pgrep(pname, true).await?.is_empty() {
                return Ok(true);
            }
        }
        if let Some(cmd) = &engine.check_cmd {
            let result = self.run(cmd, None).await?;
            if result.exit_code == engine.check_cmd_code {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Poll occupancy in the background until the machine transitions from
    /// busy to free, then stop; the consume pipeline notices the idle state
    /// on its own.
    pub fn start_occupancy_check(self: &Arc<Self>, engine: Engine) {
        let machine = self.clone();
        let handle = tokio::spawn(async move {
            let interval = Duration::from_secs(engine.sleep_interval);
            loop {
                if machine.cancel.is_triggered() {
                    break;
                }
                if machine.meta().busy() == Some(false) {
                    break;
                }
                match tokio::time::timeout(interval, machine.occupancy_check(&engine)).await {
                    Ok(Ok(false)) => {
                        machine.set_busy(false);
                        debug!(host = %machine.hostname(), engine = %engine.name, "host went idle");
                        break;
                    }
                    Ok(Ok(true)) => {
                        machine.set_busy(true);
                    }
                    Ok(Err(e)) => {
                        warn!(host = %machine.hostname(), "occupancy check failed: {}", e);
                    }
                    Err(_) => {
                        warn!(
                            host = %machine.hostname(),
                            engine = %engine.name,
                            "occupancy check timed out"
                        );
                    }
                }
                if !machine.cancel.sleep(interval).await {
                    break;
                }
            }
        });
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.retain(|j| !j.is_finished());
        jobs.push(handle);
    }

    /// Install OS packages (Debian-like hosts) and deploy every engine's
    /// artifacts. Deployment is idempotent: directories are created with
    /// exist-ok semantics and archives are removed after unpacking.
    pub async fn setup_node(&self, engines: &EngineRepository) -> Result<(), RemoteMachineError> {
        match self.adapter.setup {
            SetupKind::DebianLike => {
                let sudo = if self.username() == "root" { "" } else { "sudo " };
                let apt = format!("{}apt-get -o DPkg::Lock::Timeout=600 -y", sudo);
                debug!(host = %self.hostname(), "upgrading packages");
                self.run_checked(&format!("{} update", apt), None).await?;
                self.run_checked(&format!("{} upgrade", apt), None).await?;
                let packages = engines.get_platform_packages();
                if !packages.is_empty() {
                    debug!(host = %self.hostname(), "installing packages: {}", packages.join(" "));
                    self.run_checked(&format!("{} install {}", apt, packages.join(" ")), None)
                        .await?;
                }
            }
            SetupKind::LinuxGeneric | SetupKind::Windows => {}
        }
        self.deploy_engines(engines).await
    }

    async fn deploy_engines(&self, engines: &EngineRepository) -> Result<(), RemoteMachineError> {
        for engine in engines.values() {
            info!(host = %self.hostname(), engine = %engine.name, "deploying engine");
            let engine_dir = self.engines_dir.join(&engine.name);
            self.sftp_retry(|| self.conn.sftp_makedirs(engine_dir.sftp_form()))
                .await?;
            for deploy in &engine.deployable {
                match deploy {
                    Deploy::LocalFiles(files) => {
                        let uploads = files.iter().map(|local| {
                            let name = local
                                .file_name()
                                .map(|n| n.to_string_lossy().into_owned())
                                .unwrap_or_default();
                            let remote = engine_dir.join(&name).sftp_form();
                            self.sftp_retry(move || {
                                self.conn.sftp_upload(local.clone(), remote.clone())
                            })
                        });
                        futures_util::future::try_join_all(uploads).await?;
                    }
                    Deploy::LocalArchive(archive) => {
                        let name = archive
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_default();
                        let remote = engine_dir.join(&name);
                        self.sftp_retry(|| {
                            self.conn.sftp_upload(archive.clone(), remote.sftp_form())
                        })
                        .await?;
                        self.unpack_archive(&engine_dir, &name).await?;
                        self.sftp_retry(|| self.conn.sftp_remove_file(remote.sftp_form()))
                            .await?;
                    }
                    Deploy::RemoteArchive(url) => {
                        let name = match self.flavor() {
                            PathFlavor::Posix => "archive.tar.gz",
                            PathFlavor::Windows => "archive.zip",
                        };
                        let remote = engine_dir.join(name);
                        let fetch = match self.flavor() {
                            PathFlavor::Posix => {
                                format!("wget {} -O {}", sh_quote(url), sh_quote(name))
                            }
                            PathFlavor::Windows => format!(
                                "Invoke-WebRequest -Uri {} -OutFile {}",
                                powershell_quote(url),
                                powershell_quote(&remote.shell_form())
                            ),
                        };
                        self.run_checked(&fetch, Some(&engine_dir)).await?;
                        self.unpack_archive(&engine_dir, name).await?;
                        self.sftp_retry(|| self.conn.sftp_remove_file(remote.sftp_form()))
                            .await?;
                    }
                }
            }
            info!(host = %self.hostname(), engine = %engine.name, "engine deployed");
        }
        Ok(())
    }

    async fn unpack_archive(
        &self,
        engine_dir: &RemotePath,
        name: &str,
    ) -> Result<(), RemoteMachineError> {
        let cmd = match self.flavor() {
            PathFlavor::Posix => format!("tar xf {}", sh_quote(name)),
            PathFlavor::Windows => format!(
                "Expand-Archive {} -DestinationPath {} -Force",
                powershell_quote(&engine_dir.join(name).shell_form()),
                powershell_quote(&engine_dir.shell_form())
            ),
        };
        self.run_checked(&cmd, Some(engine_dir)).await?;
        Ok(())
    }

    /// SFTP operation with the standard transient retry policy.
    pub async fn sftp_retry<T, F, Fut>(&self, op: F) -> Result<T, SshError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, SshError>>,
    {
        retry_fibo(op, SshError::is_transient).await
    }

    /// Direct access to the SFTP facade for the scheduler's file transfers.
    pub fn sftp(&self) -> &SshConnection {
        &self.conn
    }

    /// Cancel background checkers and close the SSH connection.
    pub async fn close(&self) {
        self.cancel.trigger();
        let handles: Vec<_> = {
            let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
            jobs.drain(..).collect()
        };
        for handle in handles {
            handle.abort();
        }
        self.conn.close().await;
    }
}

const PS_COLUMNS: &str = "pid:255,comm:255,args:255";
const PS_LIST_CMD: &str = "ps -eo pid:255,comm:255,args:255";

/// Parse fixed-width `ps` output: columns are padded to 255 characters, so a
/// run of ten or more spaces separates fields. The header line and the
/// listing command's own entry are skipped.
pub(crate) fn parse_ps_output(output: &str) -> Vec<ProcessInfo> {
    let mut processes = Vec::new();
    for line in output.lines().skip(1) {
        let parts: Vec<&str> = line
            .split("          ")
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        if parts.len() < 3 {
            continue;
        }
        let Ok(pid) = parts[0].parse::<i64>() else {
            continue;
        };
        let command = parts[2].to_string();
        // Skip the ps invocation itself.
        if command.starts_with("ps -eo pid:255") || command.starts_with("ps -o pid:255") {
            continue;
        }
        processes.push(ProcessInfo {
            pid,
            name: parts[1].to_string(),
            command,
        });
    }
    processes
}

fn windows_process_cmd(where_expr: Option<&str>) -> String {
    let filter = where_expr
        .map(|e| format!(" | ?{{ {} }}", e))
        .unwrap_or_default();
    format!(
        "Get-CimInstance Win32_Process{} | %{{ @{{'pid' = $_.ProcessId; 'name' = $_.Name; \
         'command' = $_.CommandLine}} | ConvertTo-Json -compress }}",
        filter
    )
}

#[derive(Debug, Deserialize)]
struct CimProcess {
    pid: i64,
    name: String,
    command: Option<String>,
}

/// Parse one JSON object per line as produced by the CimInstance pipeline.
/// Broken lines and the query's own process are skipped.
pub(crate) fn parse_cim_output(output: &str) -> Vec<ProcessInfo> {
    let mut processes = Vec::new();
    for line in output.lines() {
        let Ok(proc) = serde_json::from_str::<CimProcess>(line.trim()) else {
            continue;
        };
        let command = proc.command.unwrap_or_else(|| proc.name.clone());
        if proc.name == "powershell.exe" && command.contains("Get-CimInstance Win32_Process") {
            continue;
        }
        processes.push(ProcessInfo {
            pid: proc.pid,
            name: proc.name,
            command,
        });
    }
    processes
}

async fn gather_facts(conn: &SshConnection) -> Result<PlatformFacts, SshError> {
    let mut facts = PlatformFacts::default();

    let uname = retry_fibo(|| conn.exec("uname".to_string()), SshError::is_transient).await?;
    if uname.success() && uname.stdout.trim() == "Linux" {
        facts.is_linux = true;
        let probe = conn
            .exec(
                ". /etc/os-release 2>/dev/null; echo \"$ID@@@$ID_LIKE@@@$VERSION_ID\"".to_string(),
            )
            .await?;
        if probe.success() {
            facts.apply_os_release(&probe.stdout);
        }
        return Ok(facts);
    }

    // Not a Linux host: probe for PowerShell.
    let win = conn.exec("[environment]::OSVersion".to_string()).await?;
    if win.success() {
        facts.is_windows = true;
        let caption = conn
            .exec("(Get-WmiObject -class Win32_OperatingSystem).Caption".to_string())
            .await?;
        if caption.success() {
            let trimmed = caption.stdout.trim();
            if !trimmed.is_empty() {
                facts.windows_caption = Some(trimmed.to_string());
            }
        }
    }
    Ok(facts)
}
