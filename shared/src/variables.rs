//! Process-level environment variables and their fallbacks.

use std::path::PathBuf;

pub const CONF_PATH_ENV: &str = "YASCHEDULER_CONF_PATH";
pub const LOG_PATH_ENV: &str = "YASCHEDULER_LOG_PATH";
pub const PID_PATH_ENV: &str = "YASCHEDULER_PID_PATH";

pub const DEFAULT_CONF_PATH: &str = "/etc/yascheduler/yascheduler.conf";
pub const DEFAULT_PID_PATH: &str = "/var/run/yascheduler.pid";

/// Configuration file path: `YASCHEDULER_CONF_PATH` or the system default.
pub fn config_path() -> PathBuf {
    std::env::var(CONF_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONF_PATH))
}

/// Optional log file path from `YASCHEDULER_LOG_PATH`.
pub fn log_path() -> Option<PathBuf> {
    std::env::var(LOG_PATH_ENV).map(PathBuf::from).ok()
}

/// PID file path: `YASCHEDULER_PID_PATH` or the system default.
pub fn pid_path() -> PathBuf {
    std::env::var(PID_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_PID_PATH))
}
