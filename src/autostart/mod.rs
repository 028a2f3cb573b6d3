//! Per-user login autorun registration.
//!
//! Every backend registers the same invocation, [`launch_command`]: the
//! controller binary followed by [`AUTOSTART_FLAG`], which makes the next
//! login start the active profile headless.
mod launchd;
mod memory;
mod run_key;
mod xdg;

pub use launchd::LaunchAgent;
pub use memory::MemoryAutoStart;
pub use run_key::RunKeyAutoStart;
pub use xdg::XdgAutoStart;

use std::path::{Path, PathBuf};

use crate::errors::ControlError;

/// Flag the autorun entry passes back to the controller.
pub const AUTOSTART_FLAG: &str = "--autostart";
/// Single-dash spelling written by older releases.
pub const LEGACY_AUTOSTART_FLAG: &str = "-autostart";
/// Registry value / file stem of the autorun entry.
pub const ENTRY_NAME: &str = "ECHWorkersClient";

pub trait AutoStart: Send + Sync {
    fn name(&self) -> &'static str;
    fn is_enabled(&self) -> Result<bool, ControlError>;
    /// Create or remove the entry. Removing a missing entry is not an error.
    fn set_enabled(&self, enabled: bool) -> Result<(), ControlError>;
}

/// `"<exe>" --autostart`
pub fn launch_command(exe: &Path) -> String {
    format!("\"{}\" {AUTOSTART_FLAG}", exe.display())
}

/// Whether `args` (without argv[0]) carry either spelling of the launch flag.
pub fn is_autostart_launch<S: AsRef<str>>(args: &[S]) -> bool {
    args.iter()
        .any(|a| matches!(a.as_ref(), AUTOSTART_FLAG | LEGACY_AUTOSTART_FLAG))
}

/// Backend for the current platform, registering `exe`.
pub fn platform_autostart(exe: PathBuf) -> Box<dyn AutoStart> {
    #[cfg(windows)]
    {
        Box::new(RunKeyAutoStart::new(exe))
    }
    #[cfg(target_os = "macos")]
    {
        Box::new(LaunchAgent::for_current_user(exe))
    }
    #[cfg(not(any(windows, target_os = "macos")))]
    {
        Box::new(XdgAutoStart::for_current_user(exe))
    }
}

/// Path of the running controller binary.
pub fn current_exe() -> Result<PathBuf, ControlError> {
    std::env::current_exe()
        .map_err(|e| ControlError::AutoStartWriteFailed(format!("cannot locate own executable: {e}")))
}

pub(crate) fn write_err(what: &Path, e: impl std::fmt::Display) -> ControlError {
    ControlError::AutoStartWriteFailed(format!("{}: {e}", what.display()))
}
