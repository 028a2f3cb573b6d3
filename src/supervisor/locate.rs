use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::errors::ControlError;

pub const WORKER_BASENAME: &str = "ech-workers";

/// `ech-workers` plus the platform executable suffix.
pub fn default_worker_name() -> String {
    format!("{WORKER_BASENAME}{}", std::env::consts::EXE_SUFFIX)
}

/// Ordered search locations for the worker executable.
#[derive(Debug, Clone, Default)]
pub struct SearchPaths {
    /// Directory of the running controller binary.
    pub app_dir: Option<PathBuf>,
    pub cwd: Option<PathBuf>,
    /// Raw PATH value.
    pub path_env: Option<OsString>,
}

impl SearchPaths {
    pub fn from_env() -> Self {
        let app_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(Path::to_path_buf));
        SearchPaths {
            app_dir,
            cwd: std::env::current_dir().ok(),
            path_env: std::env::var_os("PATH"),
        }
    }
}

/// Resolve `name` against the application directory, then the working
/// directory, then every PATH entry. An absolute `name` is used as-is.
pub fn find_executable(name: &str, search: &SearchPaths) -> Result<PathBuf, ControlError> {
    let direct = Path::new(name);
    if direct.is_absolute() {
        if direct.is_file() {
            return Ok(direct.to_path_buf());
        }
        return Err(ControlError::ExecutableNotFound(name.to_string()));
    }

    for dir in [search.app_dir.as_ref(), search.cwd.as_ref()]
        .into_iter()
        .flatten()
    {
        let candidate = dir.join(name);
        if candidate.is_file() {
            debug!(path = %candidate.display(), "worker found");
            return Ok(candidate);
        }
    }

    if let Some(path_env) = search.path_env.as_ref() {
        let cwd = search
            .cwd
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        if let Ok(found) = which::which_in(name, Some(path_env), cwd) {
            debug!(path = %found.display(), "worker found on PATH");
            return Ok(found);
        }
    }

    Err(ControlError::ExecutableNotFound(name.to_string()))
}
