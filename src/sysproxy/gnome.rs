//! GNOME desktop proxy through `gsettings`.
use anyhow::Context;
use tracing::debug;

use super::{proxy_err, split_host_port, with_rollback, ProxySnapshot, SystemProxy, BYPASS_LIST};
use crate::errors::ControlError;
use crate::util::exec::{is_tool_missing, ToolRequest};
use crate::util::strip_outer_quotes;

const PROXY_SCHEMA: &str = "org.gnome.system.proxy";
const SOCKS_SCHEMA: &str = "org.gnome.system.proxy.socks";

#[derive(Debug, Clone)]
pub struct GnomeProxy {
    gsettings: String,
}

impl Default for GnomeProxy {
    fn default() -> Self {
        Self::new()
    }
}

impl GnomeProxy {
    pub fn new() -> Self {
        Self::with_tool("gsettings")
    }

    /// Drive a specific `gsettings` binary.
    pub fn with_tool(gsettings: impl Into<String>) -> Self {
        GnomeProxy {
            gsettings: gsettings.into(),
        }
    }

    fn get(&self, schema: &str, key: &str) -> anyhow::Result<String> {
        let out = ToolRequest::new(&self.gsettings)
            .args(["get", schema, key])
            .run()
            .with_context(|| format!("reading {schema} {key}"))?;
        Ok(out.stdout.trim().to_string())
    }

    fn set(&self, schema: &str, key: &str, value: &str) -> anyhow::Result<()> {
        ToolRequest::new(&self.gsettings)
            .args(["set", schema, key, value])
            .run()
            .with_context(|| format!("writing {schema} {key}"))?;
        Ok(())
    }

    fn set_socks(&self, host: &str, port: u16) -> anyhow::Result<()> {
        self.set(SOCKS_SCHEMA, "host", host)?;
        self.set(SOCKS_SCHEMA, "port", &port.to_string())
    }

    fn restore(&self, snap: &ProxySnapshot) -> anyhow::Result<()> {
        let (host, port) = snap
            .server
            .as_deref()
            .and_then(stored_endpoint)
            .unwrap_or_default();
        self.set_socks(&host, port)?;
        if let Some(ignore) = snap.bypass.as_deref() {
            self.set(PROXY_SCHEMA, "ignore-hosts", ignore)?;
        }
        let fallback = if snap.enabled { "manual" } else { "none" };
        self.set(PROXY_SCHEMA, "mode", snap.mode.as_deref().unwrap_or(fallback))
    }
}

impl SystemProxy for GnomeProxy {
    fn name(&self) -> &'static str {
        "gnome-gsettings"
    }

    fn enable(&self, listen_address: &str) -> Result<(), ControlError> {
        let (host, port) = split_host_port(listen_address).ok_or_else(|| {
            ControlError::ProxySettingFailed(format!(
                "listen address '{listen_address}' is not host:port"
            ))
        })?;
        let before = self.snapshot()?;
        debug!(%host, port, "enabling GNOME SOCKS proxy");
        with_rollback(
            &before,
            || {
                (|| -> anyhow::Result<()> {
                    self.set_socks(&host, port)?;
                    self.set(PROXY_SCHEMA, "ignore-hosts", &ignore_hosts_variant())?;
                    self.set(PROXY_SCHEMA, "mode", "manual")
                })()
                .map_err(proxy_err)
            },
            |prev| self.restore(prev).map_err(proxy_err),
        )
    }

    fn disable(&self) -> Result<(), ControlError> {
        if let Err(e) = self.set(PROXY_SCHEMA, "mode", "none") {
            if is_tool_missing(&e) {
                debug!("{} not available; no desktop proxy to disable", self.gsettings);
                return Ok(());
            }
            return Err(proxy_err(e));
        }
        self.set_socks("", 0).map_err(proxy_err)
    }

    fn snapshot(&self) -> Result<ProxySnapshot, ControlError> {
        let mode = self.get(PROXY_SCHEMA, "mode").map_err(proxy_err)?;
        let host = strip_outer_quotes(&self.get(SOCKS_SCHEMA, "host").map_err(proxy_err)?);
        let port = self
            .get(SOCKS_SCHEMA, "port")
            .map_err(proxy_err)?
            .trim_start_matches("uint32 ")
            .parse::<u16>()
            .unwrap_or(0);
        let bypass = self.get(PROXY_SCHEMA, "ignore-hosts").map_err(proxy_err)?;
        let mode = strip_outer_quotes(&mode);
        Ok(ProxySnapshot {
            enabled: mode == "manual" && !host.is_empty() && port != 0,
            server: (!host.is_empty()).then(|| format!("socks={host}:{port}")),
            bypass: Some(bypass),
            mode: Some(mode),
        })
    }
}

/// Host and port exactly as a snapshot recorded them; port 0 is kept.
fn stored_endpoint(server: &str) -> Option<(String, u16)> {
    let (host, port) = server
        .strip_prefix("socks=")
        .unwrap_or(server)
        .rsplit_once(':')?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    Some((host.to_string(), port.parse().ok()?))
}

/// `127.*` -> `127.0.0.0/8`; `<local>` has no GNOME equivalent and is dropped.
pub(crate) fn wildcard_to_cidr(entry: &str) -> Option<String> {
    if entry == "<local>" {
        return None;
    }
    let Some(prefix) = entry.strip_suffix(".*") else {
        return Some(entry.to_string());
    };
    let mut octets: Vec<&str> = prefix.split('.').collect();
    if octets.is_empty() || octets.len() > 3 || octets.iter().any(|o| o.parse::<u8>().is_err()) {
        return None;
    }
    let bits = octets.len() * 8;
    octets.resize(4, "0");
    Some(format!("{}/{bits}", octets.join(".")))
}

/// GVariant string array for `ignore-hosts`.
pub(crate) fn ignore_hosts_variant() -> String {
    let items: Vec<String> = BYPASS_LIST
        .iter()
        .filter_map(|e| wildcard_to_cidr(e))
        .chain(std::iter::once("::1".to_string()))
        .map(|e| format!("'{e}'"))
        .collect();
    format!("[{}]", items.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_to_cidr() {
        assert_eq!(wildcard_to_cidr("127.*").as_deref(), Some("127.0.0.0/8"));
        assert_eq!(wildcard_to_cidr("192.168.*").as_deref(), Some("192.168.0.0/16"));
        assert_eq!(wildcard_to_cidr("172.31.*").as_deref(), Some("172.31.0.0/16"));
        assert_eq!(wildcard_to_cidr("localhost").as_deref(), Some("localhost"));
        assert_eq!(wildcard_to_cidr("<local>"), None);
        assert_eq!(wildcard_to_cidr("a.*"), None);
    }

    #[test]
    fn test_ignore_hosts_variant_shape() {
        let v = ignore_hosts_variant();
        assert!(v.starts_with("['localhost', '127.0.0.0/8', '10.0.0.0/8'"), "{v}");
        assert!(v.ends_with("'::1']"), "{v}");
        assert!(!v.contains("<local>"));
    }

    #[test]
    fn test_stored_endpoint_keeps_what_was_read() {
        assert_eq!(
            stored_endpoint("socks=127.0.0.1:30000"),
            Some(("127.0.0.1".to_string(), 30000))
        );
        assert_eq!(
            stored_endpoint("socks=proxy.lan:0"),
            Some(("proxy.lan".to_string(), 0))
        );
        assert_eq!(stored_endpoint(""), None);
    }

    #[test]
    fn test_disable_without_gsettings_is_a_no_op() {
        let proxy = GnomeProxy::with_tool("/nonexistent/gsettings");
        proxy.disable().expect("nothing to disable");
        assert!(proxy.enable("127.0.0.1:30000").is_err());
    }

    /// A `gsettings` stand-in keeping one file per `<schema>.<key>` under
    /// `state/`. Writing `<key>=<value>` fails when `state/fail.<key>.<value>` exists.
    #[cfg(unix)]
    fn fake_gsettings(dir: &std::path::Path) -> std::path::PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let state = dir.join("state");
        std::fs::create_dir_all(&state).unwrap();
        let script = dir.join("gsettings");
        std::fs::write(
            &script,
            format!(
                r#"#!/bin/sh
state='{}'
case "$1" in
  get) cat "$state/$2.$3" ;;
  set)
    if [ -e "$state/fail.$3.$4" ]; then echo "permission denied" 1>&2; exit 1; fi
    printf '%s\n' "$4" > "$state/$2.$3" ;;
esac
"#,
                state.display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[cfg(unix)]
    fn put(dir: &std::path::Path, name: &str, value: &str) {
        std::fs::write(dir.join("state").join(name), format!("{value}\n")).unwrap();
    }

    #[cfg(unix)]
    fn read(dir: &std::path::Path, name: &str) -> String {
        std::fs::read_to_string(dir.join("state").join(name))
            .unwrap()
            .trim()
            .to_string()
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_enable_restores_previous_settings_verbatim() {
        let td = tempfile::tempdir().unwrap();
        let proxy = GnomeProxy::with_tool(fake_gsettings(td.path()).display().to_string());
        let p = td.path();
        // An HTTP-only manual setup: mode manual, no SOCKS host.
        put(p, "org.gnome.system.proxy.mode", "'manual'");
        put(p, "org.gnome.system.proxy.ignore-hosts", "['intranet.local']");
        put(p, "org.gnome.system.proxy.socks.host", "''");
        put(p, "org.gnome.system.proxy.socks.port", "0");
        put(p, "fail.port.30000", "");

        let before = proxy.snapshot().unwrap();
        assert!(!before.enabled);
        assert_eq!(before.mode.as_deref(), Some("manual"));

        assert!(proxy.enable("127.0.0.1:30000").is_err());
        assert_eq!(read(p, "org.gnome.system.proxy.mode"), "manual");
        assert_eq!(read(p, "org.gnome.system.proxy.ignore-hosts"), "['intranet.local']");
        assert_eq!(read(p, "org.gnome.system.proxy.socks.host"), "");
        assert_eq!(read(p, "org.gnome.system.proxy.socks.port"), "0");
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_enable_keeps_auto_mode_and_socks_host() {
        let td = tempfile::tempdir().unwrap();
        let proxy = GnomeProxy::with_tool(fake_gsettings(td.path()).display().to_string());
        let p = td.path();
        put(p, "org.gnome.system.proxy.mode", "'auto'");
        put(p, "org.gnome.system.proxy.ignore-hosts", "@as []");
        put(p, "org.gnome.system.proxy.socks.host", "'socks.corp'");
        put(p, "org.gnome.system.proxy.socks.port", "0");
        put(p, "fail.port.30000", "");

        assert!(proxy.enable("127.0.0.1:30000").is_err());
        assert_eq!(read(p, "org.gnome.system.proxy.mode"), "auto");
        assert_eq!(read(p, "org.gnome.system.proxy.ignore-hosts"), "@as []");
        assert_eq!(read(p, "org.gnome.system.proxy.socks.host"), "socks.corp");
        assert_eq!(read(p, "org.gnome.system.proxy.socks.port"), "0");
    }

    #[cfg(unix)]
    #[test]
    fn test_enable_then_disable_leaves_no_server() {
        let td = tempfile::tempdir().unwrap();
        let proxy = GnomeProxy::with_tool(fake_gsettings(td.path()).display().to_string());
        let p = td.path();
        put(p, "org.gnome.system.proxy.mode", "'none'");
        put(p, "org.gnome.system.proxy.ignore-hosts", "@as []");
        put(p, "org.gnome.system.proxy.socks.host", "''");
        put(p, "org.gnome.system.proxy.socks.port", "0");

        proxy.enable("127.0.0.1:30000").unwrap();
        let on = proxy.snapshot().unwrap();
        assert!(on.enabled);
        assert_eq!(on.server.as_deref(), Some("socks=127.0.0.1:30000"));

        proxy.disable().unwrap();
        let off = proxy.snapshot().unwrap();
        assert!(!off.enabled);
        assert_eq!(off.server, None);
        assert_eq!(off.mode.as_deref(), Some("none"));
    }
}
