//! Async façade over a blocking SSH connection.
//!
//! The SSH driver is synchronous, so every operation runs inside
//! `tokio::task::spawn_blocking` while holding the session mutex; the rest of
//! the daemon only sees async methods. One connection is held per worker
//! host, with keepalives every 10 seconds, no agent forwarding, compression
//! disabled and trust-on-first-use host keys. Concurrent operations are
//! capped at 10 to respect the default OpenSSH MaxSessions.
//!
//! A jump host is supported by authenticating a second session against the
//! bastion, opening a direct-tcpip channel to the target and bridging it to a
//! loopback listener that the main session connects through.

use ssh2::{ErrorCode, OpenFlags, OpenType, Session};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Default value of MaxSessions on an OpenSSH server.
pub const MAX_SESSIONS: usize = 10;

/// Keepalive probe interval in seconds.
const KEEPALIVE_INTERVAL: u32 = 10;

/// Give up on a host after this many missed keepalives in a row.
const KEEPALIVE_MAX_MISSED: u32 = 10;

const SSH_PORT: u16 = 22;

// libssh2 error codes considered transient (connection lost, key exchange
// failed, MAC error, protocol error, timeouts, channel failures).
const TRANSIENT_SESSION_CODES: &[i32] = &[
    -3,  // BANNER_SEND
    -4,  // INVALID_MAC
    -5,  // KEX_FAILURE
    -7,  // SOCKET_SEND
    -8,  // KEY_EXCHANGE_FAILURE
    -9,  // TIMEOUT
    -13, // SOCKET_DISCONNECT
    -14, // PROTO
    -21, // CHANNEL_FAILURE
    -26, // CHANNEL_CLOSED
    -30, // SOCKET_TIMEOUT
    -37, // EAGAIN
    -43, // SOCKET_RECV
];

// SFTP status codes considered transient (EOF, generic failure, bad message,
// no connection, connection lost). Missing files and permission problems are
// real errors and are not retried.
const TRANSIENT_SFTP_CODES: &[i32] = &[1, 4, 5, 6, 7];

#[derive(Debug, thiserror::Error)]
pub enum SshError {
    #[error("SSH error: {0}")]
    Ssh(#[from] ssh2::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot resolve host {0}")]
    Resolve(String),

    #[error("authentication failed for {username}@{host}")]
    AuthFailed { username: String, host: String },

    #[error("operation timed out")]
    Timeout,
}

impl SshError {
    /// Whether the failure belongs to the transient SSH/SFTP error set that
    /// the Fibonacci-backoff retry policy applies to.
    pub fn is_transient(&self) -> bool {
        match self {
            SshError::Ssh(err) => match err.code() {
                ErrorCode::Session(code) => TRANSIENT_SESSION_CODES.contains(&code),
                ErrorCode::SFTP(code) => TRANSIENT_SFTP_CODES.contains(&(code as i32)),
            },
            SshError::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::Interrupted
            ),
            SshError::Timeout => true,
            SshError::Resolve(_) => false,
            SshError::AuthFailed { .. } => false,
        }
    }
}

/// Result of a completed remote command.
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Connection parameters resolved by the caller.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub host: String,
    pub username: String,
    pub key_paths: Vec<PathBuf>,
    pub jump_host: Option<String>,
    pub jump_username: Option<String>,
    /// TCP/handshake timeout; commands themselves are not bounded here.
    pub connect_timeout: Duration,
}

pub struct SshConnection {
    host: String,
    username: String,
    session: Arc<Mutex<Session>>,
    sessions_limit: Arc<Semaphore>,
    keepalive: Mutex<Option<tokio::task::JoinHandle<()>>>,
    _jump: Option<JumpProxy>,
}

impl SshConnection {
    /// Open and authenticate a connection. Transient handshake failures are
    /// the caller's to retry; this performs a single attempt.
    pub async fn connect(opts: ConnectOptions) -> Result<Self, SshError> {
        let opts_clone = opts.clone();
        let (session, jump) =
            tokio::task::spawn_blocking(move || connect_blocking(&opts_clone))
                .await
                .map_err(|e| SshError::Io(std::io::Error::other(e)))??;

        let session = Arc::new(Mutex::new(session));
        let conn = Self {
            host: opts.host,
            username: opts.username,
            session: session.clone(),
            sessions_limit: Arc::new(Semaphore::new(MAX_SESSIONS)),
            keepalive: Mutex::new(None),
            _jump: jump,
        };
        conn.spawn_keepalive();
        Ok(conn)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Run a blocking closure against the session from the blocking pool,
    /// bounded by the sessions semaphore.
    async fn with_session<T, F>(&self, f: F) -> Result<T, SshError>
    where
        T: Send + 'static,
        F: FnOnce(&Session) -> Result<T, SshError> + Send + 'static,
    {
        let _permit = self
            .sessions_limit
            .acquire()
            .await
            .map_err(|_| SshError::Timeout)?;
        let session = self.session.clone();
        tokio::task::spawn_blocking(move || {
            let guard = session.lock().unwrap_or_else(|e| e.into_inner());
            f(&guard)
        })
        .await
        .map_err(|e| SshError::Io(std::io::Error::other(e)))?
    }

    /// Execute a command and collect its output and exit status.
    pub async fn exec(&self, command: String) -> Result<ExecResult, SshError> {
        debug!(host = %self.host, command = %command, "exec");
        self.with_session(move |session| {
            let mut channel = session.channel_session()?;
            channel.exec(&command)?;
            let mut stdout = String::new();
            channel.read_to_string(&mut stdout)?;
            let mut stderr = String::new();
            channel.stderr().read_to_string(&mut stderr)?;
            channel.wait_close().ok();
            let exit_code = channel.exit_status()?;
            Ok(ExecResult {
                exit_code,
                stdout,
                stderr,
            })
        })
        .await
    }

    /// Start a command without waiting for completion. The caller is expected
    /// to have wrapped it so that it detaches from the session (nohup or
    /// Start-Process).
    pub async fn exec_detached(&self, command: String) -> Result<(), SshError> {
        debug!(host = %self.host, command = %command, "exec detached");
        self.with_session(move |session| {
            let mut channel = session.channel_session()?;
            channel.exec(&command)?;
            // Drain whatever the wrapper prints so the channel can close.
            let mut sink = String::new();
            channel.read_to_string(&mut sink).ok();
            channel.wait_close().ok();
            Ok(())
        })
        .await
    }

    /// Create a directory and all missing parents. Paths use the wire (`/`)
    /// separator.
    pub async fn sftp_makedirs(&self, path: String) -> Result<(), SshError> {
        self.with_session(move |session| {
            let sftp = session.sftp()?;
            let absolute = path.starts_with('/');
            let mut current = String::new();
            for part in path.split('/').filter(|p| !p.is_empty()) {
                current = if current.is_empty() {
                    if absolute {
                        format!("/{}", part)
                    } else {
                        part.to_string()
                    }
                } else {
                    format!("{}/{}", current, part)
                };
                let p = std::path::Path::new(&current);
                if sftp.stat(p).is_err() {
                    // Intermediate components (a Windows drive, an already
                    // racing sibling) may legitimately refuse mkdir.
                    sftp.mkdir(p, 0o755).ok();
                }
            }
            // Only the full path has to exist in the end.
            sftp.stat(std::path::Path::new(&current))?;
            Ok(())
        })
        .await
    }

    /// Write bytes to a remote file.
    pub async fn sftp_write(&self, path: String, data: Vec<u8>) -> Result<(), SshError> {
        self.with_session(move |session| {
            let sftp = session.sftp()?;
            let mut file = sftp.create(std::path::Path::new(&path))?;
            file.write_all(&data)?;
            Ok(())
        })
        .await
    }

    /// Upload a local file, preserving its permission bits.
    pub async fn sftp_upload(&self, local: PathBuf, remote: String) -> Result<(), SshError> {
        self.with_session(move |session| {
            let data = std::fs::read(&local)?;
            let mode = local_file_mode(&local);
            let sftp = session.sftp()?;
            let mut file = sftp.open_mode(
                std::path::Path::new(&remote),
                OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
                mode,
                OpenType::File,
            )?;
            file.write_all(&data)?;
            Ok(())
        })
        .await
    }

    /// Download a remote file to a local path.
    pub async fn sftp_download(&self, remote: String, local: PathBuf) -> Result<(), SshError> {
        self.with_session(move |session| {
            let sftp = session.sftp()?;
            let mut file = sftp.open(std::path::Path::new(&remote))?;
            let mut data = Vec::new();
            file.read_to_end(&mut data)?;
            std::fs::write(&local, data)?;
            Ok(())
        })
        .await
    }

    pub async fn sftp_remove_file(&self, remote: String) -> Result<(), SshError> {
        self.with_session(move |session| {
            let sftp = session.sftp()?;
            sftp.unlink(std::path::Path::new(&remote))?;
            Ok(())
        })
        .await
    }

    /// Recursively delete a remote directory tree.
    pub async fn sftp_remove_dir_all(&self, remote: String) -> Result<(), SshError> {
        self.with_session(move |session| {
            let sftp = session.sftp()?;
            remove_dir_all_blocking(&sftp, std::path::Path::new(&remote))
        })
        .await
    }

    /// Resolve a path on the remote (`realpath`).
    pub async fn sftp_realpath(&self, path: String) -> Result<String, SshError> {
        self.with_session(move |session| {
            let sftp = session.sftp()?;
            let resolved = sftp.realpath(std::path::Path::new(&path))?;
            Ok(resolved.to_string_lossy().into_owned())
        })
        .await
    }

    fn spawn_keepalive(&self) {
        let session = self.session.clone();
        let host = self.host.clone();
        let handle = tokio::spawn(async move {
            let mut missed = 0u32;
            let mut interval =
                tokio::time::interval(Duration::from_secs(KEEPALIVE_INTERVAL as u64));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                // Never block the runtime on a busy session; a held lock
                // means traffic is flowing anyway.
                let result = match session.try_lock() {
                    Ok(guard) => Some(guard.keepalive_send()),
                    Err(_) => None,
                };
                match result {
                    Some(Ok(_)) => missed = 0,
                    Some(Err(e)) => {
                        missed += 1;
                        debug!(host = %host, missed, "keepalive failed: {}", e);
                        if missed >= KEEPALIVE_MAX_MISSED {
                            warn!(host = %host, "connection lost: {} keepalives missed", missed);
                            break;
                        }
                    }
                    None => {}
                }
            }
        });
        *self.keepalive.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    /// Close the connection and stop the keepalive job.
    pub async fn close(&self) {
        if let Some(handle) = self
            .keepalive
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
        let session = self.session.clone();
        let _ = tokio::task::spawn_blocking(move || {
            let guard = session.lock().unwrap_or_else(|e| e.into_inner());
            guard.disconnect(None, "shutting down", None).ok();
        })
        .await;
    }
}

fn local_file_mode(path: &std::path::Path) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(meta) = std::fs::metadata(path) {
            return (meta.permissions().mode() & 0o777) as i32;
        }
    }
    0o644
}

fn remove_dir_all_blocking(sftp: &ssh2::Sftp, path: &std::path::Path) -> Result<(), SshError> {
    let entries = match sftp.readdir(path) {
        Ok(entries) => entries,
        // Nothing to do when the directory is already gone.
        Err(_) => return Ok(()),
    };
    for (entry, stat) in entries {
        if stat.is_dir() {
            remove_dir_all_blocking(sftp, &entry)?;
        } else {
            sftp.unlink(&entry)?;
        }
    }
    sftp.rmdir(path)?;
    Ok(())
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, SshError> {
    (host, port)
        .to_socket_addrs()
        .map_err(SshError::Io)?
        .next()
        .ok_or_else(|| SshError::Resolve(host.to_string()))
}

fn connect_blocking(
    opts: &ConnectOptions,
) -> Result<(Session, Option<JumpProxy>), SshError> {
    let (tcp, jump) = match (&opts.jump_host, &opts.jump_username) {
        (Some(jump_host), Some(jump_username)) => {
            let proxy = JumpProxy::start(
                jump_host,
                jump_username,
                &opts.key_paths,
                &opts.host,
                SSH_PORT,
                opts.connect_timeout,
            )?;
            let tcp = TcpStream::connect(proxy.local_addr)?;
            (tcp, Some(proxy))
        }
        _ => {
            let addr = resolve(&opts.host, SSH_PORT)?;
            let tcp = TcpStream::connect_timeout(&addr, opts.connect_timeout)?;
            (tcp, None)
        }
    };

    let session = handshake_and_auth(tcp, &opts.username, &opts.key_paths, opts.connect_timeout)
        .map_err(|e| match e {
            SshError::AuthFailed { username, .. } => SshError::AuthFailed {
                username,
                host: opts.host.clone(),
            },
            other => other,
        })?;
    Ok((session, jump))
}

fn handshake_and_auth(
    tcp: TcpStream,
    username: &str,
    key_paths: &[PathBuf],
    timeout: Duration,
) -> Result<Session, SshError> {
    let mut session = Session::new()?;
    session.set_tcp_stream(tcp);
    session.set_compress(false);
    session.set_timeout(timeout.as_millis() as u32);
    // Trust-on-first-use: the host key is accepted without verification.
    session.handshake()?;

    let mut last_err: Option<ssh2::Error> = None;
    for key in key_paths {
        match session.userauth_pubkey_file(username, None, key, None) {
            Ok(()) => break,
            Err(e) => last_err = Some(e),
        }
    }
    if !session.authenticated() {
        if let Some(e) = last_err {
            debug!("public key auth failed: {}", e);
        }
        return Err(SshError::AuthFailed {
            username: username.to_string(),
            host: String::new(),
        });
    }

    // Commands may legitimately run for a long time (package upgrades);
    // liveness is watched via keepalives instead of an I/O timeout.
    session.set_timeout(0);
    session.set_keepalive(false, KEEPALIVE_INTERVAL);
    Ok(session)
}

/// Loopback forwarder bridging the main session to a direct-tcpip channel on
/// the jump host.
struct JumpProxy {
    local_addr: SocketAddr,
    stop: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl JumpProxy {
    fn start(
        jump_host: &str,
        jump_username: &str,
        key_paths: &[PathBuf],
        target_host: &str,
        target_port: u16,
        timeout: Duration,
    ) -> Result<Self, SshError> {
        let addr = resolve(jump_host, SSH_PORT)?;
        let tcp = TcpStream::connect_timeout(&addr, timeout)?;
        let jump_session = handshake_and_auth(tcp, jump_username, key_paths, timeout)
            .map_err(|e| match e {
                SshError::AuthFailed { username, .. } => SshError::AuthFailed {
                    username,
                    host: jump_host.to_string(),
                },
                other => other,
            })?;

        let listener = TcpListener::bind(("127.0.0.1", 0))?;
        let local_addr = listener.local_addr()?;
        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = stop.clone();
        let target_host = target_host.to_string();

        let thread = std::thread::spawn(move || {
            let Ok((local, _)) = listener.accept() else {
                return;
            };
            let channel =
                match jump_session.channel_direct_tcpip(&target_host, target_port, None) {
                    Ok(c) => c,
                    Err(e) => {
                        warn!("jump tunnel to {} failed: {}", target_host, e);
                        return;
                    }
                };
            pump(local, channel, jump_session, stop_thread);
        });

        Ok(Self {
            local_addr,
            stop,
            thread: Some(thread),
        })
    }
}

impl Drop for JumpProxy {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        // Unblock a still-pending accept so the thread can observe the flag.
        TcpStream::connect(self.local_addr).ok();
        if let Some(thread) = self.thread.take() {
            thread.join().ok();
        }
    }
}

/// Shovel bytes between the local socket and the tunnel channel until either
/// side closes. Both ends are polled non-blocking with a small idle sleep.
fn pump(
    mut local: TcpStream,
    mut channel: ssh2::Channel,
    session: Session,
    stop: Arc<AtomicBool>,
) {
    let mut buf = [0u8; 16384];
    let mut local_open = true;
    let mut channel_open = true;
    local.set_nonblocking(true).ok();
    session.set_blocking(false);

    while !stop.load(Ordering::Relaxed) && (local_open || channel_open) {
        let mut progressed = false;

        if local_open {
            match local.read(&mut buf) {
                Ok(0) => {
                    local_open = false;
                    session.set_blocking(true);
                    channel.send_eof().ok();
                    session.set_blocking(false);
                }
                Ok(n) => {
                    session.set_blocking(true);
                    if channel.write_all(&buf[..n]).is_err() {
                        break;
                    }
                    session.set_blocking(false);
                    progressed = true;
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(_) => break,
            }
        }

        if channel_open {
            match channel.read(&mut buf) {
                Ok(0) => channel_open = false,
                Ok(n) => {
                    local.set_nonblocking(false).ok();
                    let write_failed = local.write_all(&buf[..n]).is_err();
                    local.set_nonblocking(true).ok();
                    if write_failed {
                        break;
                    }
                    progressed = true;
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(_) => break,
            }
            if channel.eof() {
                channel_open = false;
            }
        }

        if !progressed {
            std::thread::sleep(Duration::from_millis(10));
        }
    }
    session.set_blocking(true);
    channel.close().ok();
}
