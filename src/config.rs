//! Locations and environment knobs.
//!
//! Config file resolution (first hit wins):
//!   1) explicit path (CLI `--config`)
//!   2) ECHW_CONFIG
//!   3) Windows: %APPDATA%\ECHWorkersClient\config.json
//!      others:  $XDG_CONFIG_HOME/ech-workers-client/config.json, else ~/.config/...
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "config.json";
pub const LOCK_FILE_NAME: &str = "ech-workers-client.lock";

#[cfg(windows)]
const APP_DIR_NAME: &str = "ECHWorkersClient";
#[cfg(not(windows))]
const APP_DIR_NAME: &str = "ech-workers-client";

/// Grace interval between the polite termination request and the hard kill.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_millis(1000);

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Per-user application directory holding the config file and the instance lock.
pub fn app_config_dir() -> PathBuf {
    #[cfg(windows)]
    {
        if let Some(appdata) = non_empty_env("APPDATA") {
            return PathBuf::from(appdata).join(APP_DIR_NAME);
        }
    }
    #[cfg(not(windows))]
    {
        if let Some(xdg) = non_empty_env("XDG_CONFIG_HOME") {
            return PathBuf::from(xdg).join(APP_DIR_NAME);
        }
    }
    match home::home_dir() {
        Some(h) => h.join(".config").join(APP_DIR_NAME),
        None => env::temp_dir().join(APP_DIR_NAME),
    }
}

pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    if let Some(p) = non_empty_env("ECHW_CONFIG") {
        return PathBuf::from(p);
    }
    app_config_dir().join(CONFIG_FILE_NAME)
}

/// Lock file lives beside the config file so separate configs do not block each other.
pub fn lock_path_for(config: &Path) -> PathBuf {
    match config.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(LOCK_FILE_NAME),
        _ => PathBuf::from(LOCK_FILE_NAME),
    }
}

/// Worker executable name or absolute path (ECHW_WORKER_BIN overrides).
pub fn worker_name() -> String {
    non_empty_env("ECHW_WORKER_BIN").unwrap_or_else(crate::supervisor::default_worker_name)
}

/// ECHW_STOP_TIMEOUT_MS, falling back to DEFAULT_STOP_TIMEOUT on absence or garbage.
pub fn stop_timeout() -> Duration {
    non_empty_env("ECHW_STOP_TIMEOUT_MS")
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_STOP_TIMEOUT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_config_path_wins() {
        let p = Path::new("/tmp/some/config.json");
        assert_eq!(config_path(Some(p)), p.to_path_buf());
    }

    #[test]
    fn test_lock_path_is_next_to_config() {
        let p = Path::new("/tmp/echw/config.json");
        assert_eq!(
            lock_path_for(p),
            PathBuf::from("/tmp/echw").join(LOCK_FILE_NAME)
        );
        assert_eq!(
            lock_path_for(Path::new("config.json")),
            PathBuf::from(LOCK_FILE_NAME)
        );
    }

    #[test]
    fn test_stop_timeout_env() {
        let old = env::var("ECHW_STOP_TIMEOUT_MS").ok();
        env::set_var("ECHW_STOP_TIMEOUT_MS", "250");
        assert_eq!(stop_timeout(), Duration::from_millis(250));
        env::set_var("ECHW_STOP_TIMEOUT_MS", "soon");
        assert_eq!(stop_timeout(), DEFAULT_STOP_TIMEOUT);
        match old {
            Some(v) => env::set_var("ECHW_STOP_TIMEOUT_MS", v),
            None => env::remove_var("ECHW_STOP_TIMEOUT_MS"),
        }
    }
}
