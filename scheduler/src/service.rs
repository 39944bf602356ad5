//! Service installation and database bootstrap for `yainit`.
//!
//! Installs a systemd unit when systemd is running, a SysV script otherwise,
//! and creates the database schema. Everything is idempotent: existing unit
//! files are left alone and an initialized database produces a diagnostic
//! instead of an error.

use crate::store::Store;
use anyhow::{Context, Result};
use shared::config::DbConfig;
use std::path::Path;

const SYSTEMD_UNIT_PATH: &str = "/lib/systemd/system/yascheduler.service";
const SYSV_SCRIPT_PATH: &str = "/etc/init.d/yascheduler";

const SYSTEMD_UNIT_TMPL: &str = "\
[Unit]
Description=Compute job scheduler daemon
After=network-online.target postgresql.service
Wants=network-online.target

[Service]
Type=simple
ExecStart=%DAEMON%
Restart=on-failure
RestartSec=5

[Install]
WantedBy=multi-user.target
";

const SYSV_SCRIPT_TMPL: &str = "\
#!/bin/sh
### BEGIN INIT INFO
# Provides:          yascheduler
# Required-Start:    $network $remote_fs
# Required-Stop:     $network $remote_fs
# Default-Start:     2 3 4 5
# Default-Stop:      0 1 6
# Short-Description: Compute job scheduler daemon
### END INIT INFO

DAEMON=%DAEMON%
PIDFILE=${YASCHEDULER_PID_PATH:-/var/run/yascheduler.pid}

case \"$1\" in
  start)
    echo \"Starting yascheduler\"
    start-stop-daemon --start --background --make-pidfile --pidfile \"$PIDFILE\" --exec \"$DAEMON\"
    ;;
  stop)
    echo \"Stopping yascheduler\"
    start-stop-daemon --stop --pidfile \"$PIDFILE\" --retry 30
    rm -f \"$PIDFILE\"
    ;;
  restart)
    $0 stop
    $0 start
    ;;
  *)
    echo \"Usage: $0 {start|stop|restart}\"
    exit 1
    ;;
esac
";

/// Path of the daemon binary, assumed to sit next to the current executable.
fn daemon_path() -> Result<std::path::PathBuf> {
    let exe = std::env::current_exe().context("cannot locate current executable")?;
    Ok(exe
        .parent()
        .map(|dir| dir.join("yascheduler"))
        .unwrap_or(exe))
}

fn systemd_is_running() -> bool {
    std::process::Command::new("pidof")
        .arg("systemd")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

/// Install the appropriate service unit. Skips silently when the unit file
/// is already in place.
pub fn install_service() -> Result<()> {
    let daemon = daemon_path()?;
    let daemon = daemon.to_string_lossy();

    if systemd_is_running() {
        println!("Installing systemd service");
        let unit_file = Path::new(SYSTEMD_UNIT_PATH);
        if unit_file.is_file() {
            println!("Service unit already installed: {}", SYSTEMD_UNIT_PATH);
            return Ok(());
        }
        let contents = SYSTEMD_UNIT_TMPL.replace("%DAEMON%", &daemon);
        std::fs::write(unit_file, contents)
            .with_context(|| format!("cannot write to {}", SYSTEMD_UNIT_PATH))?;
    } else {
        println!("Installing SysV service");
        let script_file = Path::new(SYSV_SCRIPT_PATH);
        if script_file.is_file() {
            println!("Service script already installed: {}", SYSV_SCRIPT_PATH);
            return Ok(());
        }
        let contents = SYSV_SCRIPT_TMPL.replace("%DAEMON%", &daemon);
        std::fs::write(script_file, contents)
            .with_context(|| format!("cannot write to {}", SYSV_SCRIPT_PATH))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(script_file, std::fs::Permissions::from_mode(0o755))?;
        }
    }
    Ok(())
}

/// Create the database schema, tolerating an already-initialized database.
pub async fn init_db(db: &DbConfig) -> Result<()> {
    let store = Store::connect(db)
        .await
        .context("cannot connect to the database")?;
    if store.init_schema().await? {
        println!("Database schema initialized");
    } else {
        println!("Database already initialized!");
    }
    Ok(())
}
