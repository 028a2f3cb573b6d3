//! Error mapping guide:
//! - Map ExecutableNotFound (and io::ErrorKind::NotFound) to exit code 127; all others to 1.
//! - Every failure surfaces as one human-readable line via display_for_control_error.
//! - Recoverable kinds (config load/save, proxy, autostart) never tear down the session.
use std::fmt;
use std::io;

/// Map an io::Error to a process exit code:
/// - 127 for NotFound (command not found)
/// - 1 for all other errors
pub fn exit_code_for_io_error(e: &io::Error) -> u8 {
    if e.kind() == io::ErrorKind::NotFound {
        127
    } else {
        1
    }
}

/// Every failure the control-plane can report to its caller.
#[derive(Debug)]
pub enum ControlError {
    /// Config file unreadable or unparsable; the caller falls back to defaults.
    ConfigLoadFailed(String),
    /// Config file could not be written; in-memory state stays valid.
    ConfigSaveFailed(String),
    /// Worker binary not found in any search location (carries the searched name).
    ExecutableNotFound(String),
    /// Worker binary found but the OS refused to start it.
    SpawnFailed(String),
    /// OS proxy settings could not be changed; the toggle keeps its previous value.
    ProxySettingFailed(String),
    /// Autostart entry could not be written or removed.
    AutoStartWriteFailed(String),
    /// Deleting the only remaining profile.
    LastProfile,
    ProfileNotFound(String),
    /// Profiles must not change under a live worker.
    SelectWhileRunning,
    /// Operation needs a running worker.
    NotRunning,
    InvalidName,
    /// Another controller instance holds the instance lock.
    AlreadyRunningInstance,
    Io(io::Error),
}

impl fmt::Display for ControlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlError::ConfigLoadFailed(m) => write!(f, "failed to load config: {m}"),
            ControlError::ConfigSaveFailed(m) => write!(f, "failed to save config: {m}"),
            ControlError::ExecutableNotFound(name) => write!(
                f,
                "cannot find {name}; place it next to this program, in the current directory, or on PATH"
            ),
            ControlError::SpawnFailed(m) => write!(f, "failed to start worker: {m}"),
            ControlError::ProxySettingFailed(m) => {
                write!(f, "failed to change system proxy: {m}")
            }
            ControlError::AutoStartWriteFailed(m) => {
                write!(f, "failed to change autostart entry: {m}")
            }
            ControlError::LastProfile => write!(f, "at least one profile must be kept"),
            ControlError::ProfileNotFound(id) => write!(f, "no profile with id '{id}'"),
            ControlError::SelectWhileRunning => write!(
                f,
                "stop the running worker before switching or deleting the active profile"
            ),
            ControlError::NotRunning => write!(f, "the worker is not running"),
            ControlError::InvalidName => write!(f, "profile name must not be empty"),
            ControlError::AlreadyRunningInstance => write!(
                f,
                "another ech-workers-client instance is already running (lock held)"
            ),
            ControlError::Io(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ControlError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ControlError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ControlError {
    fn from(e: io::Error) -> Self {
        ControlError::Io(e)
    }
}

impl ControlError {
    /// True for the kinds the session recovers from without operator action.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ControlError::ConfigLoadFailed(_)
                | ControlError::ConfigSaveFailed(_)
                | ControlError::ProxySettingFailed(_)
                | ControlError::AutoStartWriteFailed(_)
        )
    }
}

/// Convert ControlError to exit code (parity with io::Error mapping).
pub fn exit_code_for_control_error(e: &ControlError) -> u8 {
    match e {
        ControlError::Io(ioe) => exit_code_for_io_error(ioe),
        ControlError::ExecutableNotFound(_) => 127,
        _ => 1,
    }
}

/// Render the single user-facing line for a ControlError.
pub fn display_for_control_error(e: &ControlError) -> String {
    e.to_string()
}
