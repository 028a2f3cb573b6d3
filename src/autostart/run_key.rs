//! `HKCU\...\CurrentVersion\Run` value via `reg.exe`.
use std::path::PathBuf;

use tracing::info;

use super::{launch_command, AutoStart, ENTRY_NAME};
use crate::errors::ControlError;
use crate::util::exec::ToolRequest;

const RUN_KEY: &str = r"HKCU\Software\Microsoft\Windows\CurrentVersion\Run";

#[derive(Debug, Clone)]
pub struct RunKeyAutoStart {
    exe: PathBuf,
    reg: String,
}

impl RunKeyAutoStart {
    pub fn new(exe: PathBuf) -> Self {
        RunKeyAutoStart {
            exe,
            reg: "reg".to_string(),
        }
    }

    fn fail(e: anyhow::Error) -> ControlError {
        ControlError::AutoStartWriteFailed(format!("{RUN_KEY}\\{ENTRY_NAME}: {e:#}"))
    }
}

impl AutoStart for RunKeyAutoStart {
    fn name(&self) -> &'static str {
        "windows-run-key"
    }

    fn is_enabled(&self) -> Result<bool, ControlError> {
        let out = ToolRequest::new(&self.reg)
            .args(["query", RUN_KEY, "/v", ENTRY_NAME])
            .output()
            .map_err(Self::fail)?;
        Ok(out.status.success())
    }

    fn set_enabled(&self, enabled: bool) -> Result<(), ControlError> {
        if enabled {
            let command = launch_command(&self.exe);
            ToolRequest::new(&self.reg)
                .args(["add", RUN_KEY, "/v", ENTRY_NAME, "/t", "REG_SZ", "/d"])
                .arg(&command)
                .arg("/f")
                .run()
                .map_err(Self::fail)?;
            info!(%command, "autostart registered");
        } else if self.is_enabled()? {
            ToolRequest::new(&self.reg)
                .args(["delete", RUN_KEY, "/v", ENTRY_NAME, "/f"])
                .run()
                .map_err(Self::fail)?;
            info!("autostart removed");
        }
        Ok(())
    }
}
