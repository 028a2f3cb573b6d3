//! XDG autostart `.desktop` entry (`~/.config/autostart`).
use std::path::{Path, PathBuf};

use tracing::info;

use super::{launch_command, write_err, AutoStart, ENTRY_NAME};
use crate::errors::ControlError;
use crate::util::fs::{remove_if_exists, write_atomic};

#[derive(Debug, Clone)]
pub struct XdgAutoStart {
    entry: PathBuf,
    exe: PathBuf,
}

impl XdgAutoStart {
    pub fn for_current_user(exe: PathBuf) -> Self {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| home::home_dir().map(|h| h.join(".config")))
            .unwrap_or_else(|| PathBuf::from(".config"));
        Self::at(base.join("autostart"), exe)
    }

    /// Entry inside an explicit autostart directory.
    pub fn at(dir: impl AsRef<Path>, exe: PathBuf) -> Self {
        XdgAutoStart {
            entry: dir.as_ref().join(format!("{ENTRY_NAME}.desktop")),
            exe,
        }
    }

    pub fn entry_path(&self) -> &Path {
        &self.entry
    }
}

fn desktop_entry(exe: &Path) -> String {
    format!(
        "[Desktop Entry]\nType=Application\nName=ECH Workers Client\nExec={}\nTerminal=false\nX-GNOME-Autostart-enabled=true\n",
        launch_command(exe)
    )
}

impl AutoStart for XdgAutoStart {
    fn name(&self) -> &'static str {
        "xdg-autostart"
    }

    fn is_enabled(&self) -> Result<bool, ControlError> {
        Ok(self.entry.is_file())
    }

    fn set_enabled(&self, enabled: bool) -> Result<(), ControlError> {
        if enabled {
            write_atomic(&self.entry, desktop_entry(&self.exe).as_bytes())
                .map_err(|e| write_err(&self.entry, e))?;
            info!(path = %self.entry.display(), "autostart entry written");
        } else if remove_if_exists(&self.entry).map_err(|e| write_err(&self.entry, e))? {
            info!(path = %self.entry.display(), "autostart entry removed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enable_writes_desktop_file_and_disable_removes_it() {
        let dir = tempfile::tempdir().unwrap();
        let a = XdgAutoStart::at(dir.path().join("autostart"), PathBuf::from("/usr/bin/echw"));
        assert!(!a.is_enabled().unwrap());

        a.set_enabled(true).unwrap();
        assert!(a.is_enabled().unwrap());
        let text = std::fs::read_to_string(a.entry_path()).unwrap();
        assert!(text.contains("Exec=\"/usr/bin/echw\" --autostart"), "{text}");

        a.set_enabled(false).unwrap();
        assert!(!a.is_enabled().unwrap());
        // Removing twice is fine.
        a.set_enabled(false).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_unwritable_dir_reports_autostart_failure() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("autostart");
        std::fs::write(&blocker, b"not a dir").unwrap();
        let a = XdgAutoStart::at(&blocker, PathBuf::from("/usr/bin/echw"));
        match a.set_enabled(true) {
            Err(ControlError::AutoStartWriteFailed(_)) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }
}
