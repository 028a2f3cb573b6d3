//! LaunchAgent plist in `~/Library/LaunchAgents`.
use std::path::{Path, PathBuf};

use tracing::info;

use super::{write_err, AutoStart, AUTOSTART_FLAG, ENTRY_NAME};
use crate::errors::ControlError;
use crate::util::fs::{remove_if_exists, write_atomic};

#[derive(Debug, Clone)]
pub struct LaunchAgent {
    plist: PathBuf,
    exe: PathBuf,
}

impl LaunchAgent {
    pub fn for_current_user(exe: PathBuf) -> Self {
        let dir = home::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Library")
            .join("LaunchAgents");
        Self::at(dir, exe)
    }

    pub fn at(dir: impl AsRef<Path>, exe: PathBuf) -> Self {
        LaunchAgent {
            plist: dir.as_ref().join(format!("{ENTRY_NAME}.plist")),
            exe,
        }
    }

    pub fn plist_path(&self) -> &Path {
        &self.plist
    }
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn plist(exe: &Path) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>Label</key>
    <string>{ENTRY_NAME}</string>
    <key>ProgramArguments</key>
    <array>
        <string>{}</string>
        <string>{AUTOSTART_FLAG}</string>
    </array>
    <key>RunAtLoad</key>
    <true/>
</dict>
</plist>
"#,
        xml_escape(&exe.display().to_string())
    )
}

impl AutoStart for LaunchAgent {
    fn name(&self) -> &'static str {
        "launch-agent"
    }

    fn is_enabled(&self) -> Result<bool, ControlError> {
        Ok(self.plist.is_file())
    }

    fn set_enabled(&self, enabled: bool) -> Result<(), ControlError> {
        if enabled {
            write_atomic(&self.plist, plist(&self.exe).as_bytes())
                .map_err(|e| write_err(&self.plist, e))?;
            info!(path = %self.plist.display(), "launch agent written");
        } else if remove_if_exists(&self.plist).map_err(|e| write_err(&self.plist, e))? {
            info!(path = %self.plist.display(), "launch agent removed");
        }
        Ok(())
    }
}
