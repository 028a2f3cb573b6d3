//! Per-user WinINet proxy via `reg.exe` plus a settings-changed broadcast.
use anyhow::Context;
use tracing::debug;

use super::{proxy_err, with_rollback, ProxySnapshot, SystemProxy, BYPASS_LIST};
use crate::errors::ControlError;
use crate::util::exec::ToolRequest;

const INTERNET_SETTINGS_KEY: &str =
    r"HKCU\Software\Microsoft\Windows\CurrentVersion\Internet Settings";

#[derive(Debug, Clone)]
pub struct RegistryProxy {
    reg: String,
    key: String,
}

impl Default for RegistryProxy {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryProxy {
    pub fn new() -> Self {
        Self::with_tool("reg")
    }

    /// Drive a specific `reg` binary against the per-user Internet Settings key.
    pub fn with_tool(reg: impl Into<String>) -> Self {
        RegistryProxy {
            reg: reg.into(),
            key: INTERNET_SETTINGS_KEY.to_string(),
        }
    }

    fn query(&self, value: &str) -> anyhow::Result<Option<String>> {
        let out = ToolRequest::new(&self.reg)
            .args(["query", self.key.as_str(), "/v", value])
            .output()?;
        if !out.status.success() {
            // reg exits 1 when the value is absent.
            return Ok(None);
        }
        Ok(parse_reg_value(&out.stdout, value))
    }

    fn set_dword(&self, value: &str, data: u32) -> anyhow::Result<()> {
        ToolRequest::new(&self.reg)
            .args(["add", self.key.as_str(), "/v", value, "/t", "REG_DWORD", "/d"])
            .arg(data.to_string())
            .arg("/f")
            .run()
            .with_context(|| format!("setting {value}"))?;
        Ok(())
    }

    fn set_string(&self, value: &str, data: &str) -> anyhow::Result<()> {
        ToolRequest::new(&self.reg)
            .args(["add", self.key.as_str(), "/v", value, "/t", "REG_SZ", "/d", data, "/f"])
            .run()
            .with_context(|| format!("setting {value}"))?;
        Ok(())
    }

    fn delete_value(&self, value: &str) -> anyhow::Result<()> {
        if self.query(value)?.is_none() {
            return Ok(());
        }
        ToolRequest::new(&self.reg)
            .args(["delete", self.key.as_str(), "/v", value, "/f"])
            .run()
            .with_context(|| format!("deleting {value}"))?;
        Ok(())
    }

    fn apply(&self, snap: &ProxySnapshot) -> anyhow::Result<()> {
        match snap.server.as_deref() {
            Some(server) => self.set_string("ProxyServer", server)?,
            None => self.delete_value("ProxyServer")?,
        }
        match snap.bypass.as_deref() {
            Some(bypass) => self.set_string("ProxyOverride", bypass)?,
            None => self.delete_value("ProxyOverride")?,
        }
        self.set_dword("ProxyEnable", u32::from(snap.enabled))?;
        notify_settings_changed();
        Ok(())
    }
}

impl SystemProxy for RegistryProxy {
    fn name(&self) -> &'static str {
        "windows-registry"
    }

    fn enable(&self, listen_address: &str) -> Result<(), ControlError> {
        let before = self.snapshot()?;
        let wanted = ProxySnapshot {
            enabled: true,
            server: Some(server_string(listen_address)),
            bypass: Some(BYPASS_LIST.join(";")),
            mode: None,
        };
        debug!(server = ?wanted.server, "enabling WinINet proxy");
        with_rollback(
            &before,
            || self.apply(&wanted).map_err(proxy_err),
            |prev| self.apply(prev).map_err(proxy_err),
        )
    }

    fn disable(&self) -> Result<(), ControlError> {
        (|| -> anyhow::Result<()> {
            self.set_dword("ProxyEnable", 0)?;
            self.delete_value("ProxyServer")?;
            notify_settings_changed();
            Ok(())
        })()
        .map_err(proxy_err)
    }

    fn snapshot(&self) -> Result<ProxySnapshot, ControlError> {
        let enabled = self
            .query("ProxyEnable")
            .map_err(proxy_err)?
            .as_deref()
            .and_then(parse_dword)
            .unwrap_or(0);
        Ok(ProxySnapshot {
            enabled: enabled != 0,
            server: self.query("ProxyServer").map_err(proxy_err)?,
            bypass: self.query("ProxyOverride").map_err(proxy_err)?,
            mode: None,
        })
    }
}

pub(crate) fn server_string(listen_address: &str) -> String {
    format!("socks={}", listen_address.trim())
}

/// Pull `<data>` out of a `reg query` listing line `    <name>    <TYPE>    <data>`.
pub(crate) fn parse_reg_value(output: &str, name: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        if !parts.next()?.eq_ignore_ascii_case(name) {
            return None;
        }
        let ty = parts.next()?;
        if !ty.starts_with("REG_") {
            return None;
        }
        let data = parts.collect::<Vec<_>>().join(" ");
        Some(data)
    })
}

/// `0x1` or `1`.
pub(crate) fn parse_dword(s: &str) -> Option<u32> {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

#[cfg(windows)]
fn notify_settings_changed() {
    use std::ffi::c_void;
    use std::ptr::null_mut;

    const INTERNET_OPTION_REFRESH: u32 = 37;
    const INTERNET_OPTION_SETTINGS_CHANGED: u32 = 39;

    #[link(name = "wininet")]
    extern "system" {
        fn InternetSetOptionW(
            h_internet: *mut c_void,
            option: u32,
            buffer: *mut c_void,
            buffer_len: u32,
        ) -> i32;
    }

    // SAFETY: both options take no buffer and a null handle means "global".
    unsafe {
        InternetSetOptionW(null_mut(), INTERNET_OPTION_SETTINGS_CHANGED, null_mut(), 0);
        InternetSetOptionW(null_mut(), INTERNET_OPTION_REFRESH, null_mut(), 0);
    }
}

#[cfg(not(windows))]
fn notify_settings_changed() {}
