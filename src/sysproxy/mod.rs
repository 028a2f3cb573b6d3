//! System proxy controller: OS-wide proxy settings for the current user.
//!
//! Backends implement [`SystemProxy`]. `enable` must leave the previous
//! settings in place when it fails part-way (each backend snapshots and
//! restores); `disable` must succeed when nothing was ever enabled and must
//! not leave a server string behind.
mod gnome;
mod macos;
mod memory;
mod windows;

pub use gnome::GnomeProxy;
pub use macos::NetworksetupProxy;
pub use memory::MemorySystemProxy;
pub use windows::RegistryProxy;

use std::sync::Arc;

use crate::errors::ControlError;

/// Hosts and ranges that always bypass the proxy (Windows ProxyOverride syntax).
pub const BYPASS_LIST: &[&str] = &[
    "localhost",
    "127.*",
    "10.*",
    "172.16.*",
    "172.17.*",
    "172.18.*",
    "172.19.*",
    "172.20.*",
    "172.21.*",
    "172.22.*",
    "172.23.*",
    "172.24.*",
    "172.25.*",
    "172.26.*",
    "172.27.*",
    "172.28.*",
    "172.29.*",
    "172.30.*",
    "172.31.*",
    "192.168.*",
    "<local>",
];

/// What the OS currently reports. Rollback writes these values back as read,
/// so `None` means "absent" and not "unknown".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxySnapshot {
    pub enabled: bool,
    /// Backend-native server string (e.g. `socks=127.0.0.1:30000`), if any.
    pub server: Option<String>,
    pub bypass: Option<String>,
    /// Backend-native proxy mode (GNOME `none`, `manual`, `auto`).
    pub mode: Option<String>,
}

pub trait SystemProxy: Send + Sync {
    /// Backend name for diagnostics.
    fn name(&self) -> &'static str;
    /// Route traffic through `listen_address` (`host:port`).
    fn enable(&self, listen_address: &str) -> Result<(), ControlError>;
    fn disable(&self) -> Result<(), ControlError>;
    /// Re-read the settings from the OS.
    fn snapshot(&self) -> Result<ProxySnapshot, ControlError>;
}

/// Backend for the current platform.
pub fn platform_system_proxy() -> Arc<dyn SystemProxy> {
    #[cfg(windows)]
    {
        Arc::new(RegistryProxy::new())
    }
    #[cfg(target_os = "macos")]
    {
        Arc::new(NetworksetupProxy::new())
    }
    #[cfg(not(any(windows, target_os = "macos")))]
    {
        Arc::new(GnomeProxy::new())
    }
}

/// Split `host:port`, accepting bracketed IPv6 (`[::1]:1080`).
pub fn split_host_port(addr: &str) -> Option<(String, u16)> {
    let addr = addr.trim();
    let (host, port) = addr.rsplit_once(':')?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if host.is_empty() {
        return None;
    }
    let port = port.parse::<u16>().ok().filter(|p| *p != 0)?;
    Some((host.to_string(), port))
}

pub(crate) fn proxy_err(e: anyhow::Error) -> ControlError {
    ControlError::ProxySettingFailed(format!("{e:#}"))
}

/// Run `apply`; on failure restore `before` best-effort and return the original error.
pub(crate) fn with_rollback<T, F, R>(before: &T, apply: F, restore: R) -> Result<(), ControlError>
where
    F: FnOnce() -> Result<(), ControlError>,
    R: FnOnce(&T) -> Result<(), ControlError>,
{
    match apply() {
        Ok(()) => Ok(()),
        Err(e) => {
            if let Err(re) = restore(before) {
                tracing::warn!("restoring previous proxy settings failed: {re}");
            }
            Err(e)
        }
    }
}
