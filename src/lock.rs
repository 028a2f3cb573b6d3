use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use crate::errors::ControlError;

/// Single-instance guard; unlocks on drop.
///
/// The lock file stays on disk. Unlinking it would let a late opener lock the
/// orphaned inode while a newcomer locks a fresh file at the same path.
#[derive(Debug)]
pub struct InstanceLock {
    file: File,
    path: PathBuf,
}

impl InstanceLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            tracing::debug!(path = %self.path.display(), "instance unlock failed: {e}");
        }
    }
}

/// Take a non-blocking exclusive lock at `p`. A lock held by another
/// controller maps to [`ControlError::AlreadyRunningInstance`].
pub fn acquire_instance_lock(p: &Path) -> Result<InstanceLock, ControlError> {
    if let Some(parent) = p.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(p)?;
    match file.try_lock_exclusive() {
        Ok(()) => {
            tracing::debug!(path = %p.display(), "instance lock acquired");
            Ok(InstanceLock {
                file,
                path: p.to_path_buf(),
            })
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock || is_lock_contended(&e) => {
            Err(ControlError::AlreadyRunningInstance)
        }
        Err(e) => Err(ControlError::Io(e)),
    }
}

/// fs2 reports contention as the raw platform error on some targets.
fn is_lock_contended(e: &io::Error) -> bool {
    e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
