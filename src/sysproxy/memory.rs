use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{ProxySnapshot, SystemProxy, BYPASS_LIST};
use crate::errors::ControlError;

/// In-process stand-in for OS proxy settings. Records calls and can be told
/// to fail, for exercising the controller without touching the host.
#[derive(Debug, Default)]
pub struct MemorySystemProxy {
    settings: Mutex<ProxySnapshot>,
    fail_enable: AtomicBool,
    fail_disable: AtomicBool,
    enable_calls: AtomicUsize,
    disable_calls: AtomicUsize,
}

impl MemorySystemProxy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_enable(&self, fail: bool) {
        self.fail_enable.store(fail, Ordering::SeqCst);
    }

    pub fn fail_disable(&self, fail: bool) {
        self.fail_disable.store(fail, Ordering::SeqCst);
    }

    pub fn enable_calls(&self) -> usize {
        self.enable_calls.load(Ordering::SeqCst)
    }

    pub fn disable_calls(&self) -> usize {
        self.disable_calls.load(Ordering::SeqCst)
    }

    pub fn is_enabled(&self) -> bool {
        self.settings
            .lock()
            .map(|s| s.enabled)
            .unwrap_or(false)
    }
}

impl SystemProxy for MemorySystemProxy {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn enable(&self, listen_address: &str) -> Result<(), ControlError> {
        self.enable_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_enable.load(Ordering::SeqCst) {
            return Err(ControlError::ProxySettingFailed(
                "simulated enable failure".to_string(),
            ));
        }
        let mut s = self
            .settings
            .lock()
            .map_err(|_| ControlError::ProxySettingFailed("state poisoned".to_string()))?;
        *s = ProxySnapshot {
            enabled: true,
            server: Some(format!("socks={listen_address}")),
            bypass: Some(BYPASS_LIST.join(";")),
            mode: None,
        };
        Ok(())
    }

    fn disable(&self) -> Result<(), ControlError> {
        self.disable_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_disable.load(Ordering::SeqCst) {
            return Err(ControlError::ProxySettingFailed(
                "simulated disable failure".to_string(),
            ));
        }
        let mut s = self
            .settings
            .lock()
            .map_err(|_| ControlError::ProxySettingFailed("state poisoned".to_string()))?;
        s.enabled = false;
        s.server = None;
        Ok(())
    }

    fn snapshot(&self) -> Result<ProxySnapshot, ControlError> {
        self.settings
            .lock()
            .map(|s| s.clone())
            .map_err(|_| ControlError::ProxySettingFailed("state poisoned".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enable_then_disable_leaves_no_server_string() {
        let p = MemorySystemProxy::new();
        p.enable("127.0.0.1:30000").unwrap();
        let on = p.snapshot().unwrap();
        assert!(on.enabled);
        assert_eq!(on.server.as_deref(), Some("socks=127.0.0.1:30000"));
        p.disable().unwrap();
        let off = p.snapshot().unwrap();
        assert!(!off.enabled);
        assert_eq!(off.server, None);
    }

    #[test]
    fn test_disable_without_enable_is_ok() {
        let p = MemorySystemProxy::new();
        p.disable().unwrap();
        assert!(!p.snapshot().unwrap().enabled);
    }

    #[test]
    fn test_failed_enable_changes_nothing() {
        let p = MemorySystemProxy::new();
        p.fail_enable(true);
        assert!(p.enable("127.0.0.1:1").is_err());
        assert_eq!(p.snapshot().unwrap(), ProxySnapshot::default());
        assert_eq!(p.enable_calls(), 1);
    }
}
