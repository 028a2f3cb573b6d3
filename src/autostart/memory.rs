use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::AutoStart;
use crate::errors::ControlError;

/// In-process autorun entry for tests.
#[derive(Debug, Default)]
pub struct MemoryAutoStart {
    entry: Mutex<Option<String>>,
    fail_writes: AtomicBool,
}

impl MemoryAutoStart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// The command line that would run at login, if registered.
    pub fn entry(&self) -> Option<String> {
        self.entry.lock().ok().and_then(|e| e.clone())
    }
}

impl AutoStart for MemoryAutoStart {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn is_enabled(&self) -> Result<bool, ControlError> {
        Ok(self.entry().is_some())
    }

    fn set_enabled(&self, enabled: bool) -> Result<(), ControlError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ControlError::AutoStartWriteFailed(
                "simulated write failure".to_string(),
            ));
        }
        let mut entry = self
            .entry
            .lock()
            .map_err(|_| ControlError::AutoStartWriteFailed("state poisoned".to_string()))?;
        *entry = enabled.then(|| super::launch_command(std::path::Path::new("ech-workers-client")));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_and_failure_leaves_state() {
        let a = MemoryAutoStart::new();
        assert!(!a.is_enabled().unwrap());
        a.set_enabled(true).unwrap();
        assert!(a.entry().unwrap().ends_with("--autostart"));
        a.fail_writes(true);
        assert!(a.set_enabled(false).is_err());
        assert!(a.is_enabled().unwrap());
    }
}
