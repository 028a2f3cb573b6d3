//! macOS SOCKS proxy on every enabled network service via `networksetup`.
use anyhow::Context;
use tracing::{debug, warn};

use super::{proxy_err, split_host_port, with_rollback, ProxySnapshot, SystemProxy, BYPASS_LIST};
use crate::errors::ControlError;
use crate::util::exec::{is_tool_missing, ToolRequest};

/// `-setproxybypassdomains` placeholder that clears the list.
const NO_BYPASS_DOMAINS: &str = "Empty";

#[derive(Debug, Clone)]
pub struct NetworksetupProxy {
    tool: String,
}

impl Default for NetworksetupProxy {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworksetupProxy {
    pub fn new() -> Self {
        Self::with_tool("networksetup")
    }

    /// Drive a specific `networksetup` binary.
    pub fn with_tool(tool: impl Into<String>) -> Self {
        NetworksetupProxy { tool: tool.into() }
    }

    fn run<I, S>(&self, args: I) -> anyhow::Result<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<std::ffi::OsString>,
    {
        Ok(ToolRequest::new(&self.tool).args(args).run()?.stdout)
    }

    fn services(&self) -> anyhow::Result<Vec<String>> {
        let out = self
            .run(["-listallnetworkservices"])
            .context("listing network services")?;
        Ok(parse_services(&out))
    }

    fn set_on(&self, service: &str, host: &str, port: u16) -> anyhow::Result<()> {
        let port = port.to_string();
        self.run(["-setsocksfirewallproxy", service, host, port.as_str()])?;
        let mut bypass = vec!["-setproxybypassdomains".to_string(), service.to_string()];
        bypass.extend(bypass_domains());
        self.run(bypass)?;
        self.run(["-setsocksfirewallproxystate", service, "on"])?;
        Ok(())
    }

    fn set_off(&self, service: &str) -> anyhow::Result<()> {
        self.run(["-setsocksfirewallproxystate", service, "off"])?;
        self.run(["-setsocksfirewallproxy", service, "", "0"])?;
        Ok(())
    }

    /// SOCKS endpoint, state and bypass domains of one service, as read.
    fn service_state(&self, service: &str) -> anyhow::Result<ProxySnapshot> {
        let mut snap = parse_socks_status(&self.run(["-getsocksfirewallproxy", service])?);
        snap.bypass = parse_bypass_domains(&self.run(["-getproxybypassdomains", service])?);
        Ok(snap)
    }

    /// Write back each service's recorded values, including a configured but
    /// disabled endpoint.
    fn restore(&self, before: &[(String, ProxySnapshot)]) -> anyhow::Result<()> {
        for (service, snap) in before {
            let (host, port) = snap
                .server
                .as_deref()
                .and_then(stored_endpoint)
                .unwrap_or_default();
            let port = port.to_string();
            self.run(["-setsocksfirewallproxy", service, host.as_str(), port.as_str()])?;
            let mut bypass = vec!["-setproxybypassdomains".to_string(), service.clone()];
            match snap.bypass.as_deref() {
                Some(domains) => bypass.extend(domains.lines().map(str::to_string)),
                None => bypass.push(NO_BYPASS_DOMAINS.to_string()),
            }
            self.run(bypass)?;
            let state = if snap.enabled { "on" } else { "off" };
            self.run(["-setsocksfirewallproxystate", service, state])?;
        }
        Ok(())
    }
}

impl SystemProxy for NetworksetupProxy {
    fn name(&self) -> &'static str {
        "macos-networksetup"
    }

    fn enable(&self, listen_address: &str) -> Result<(), ControlError> {
        let (host, port) = split_host_port(listen_address).ok_or_else(|| {
            ControlError::ProxySettingFailed(format!(
                "listen address '{listen_address}' is not host:port"
            ))
        })?;
        let services = self.services().map_err(proxy_err)?;
        if services.is_empty() {
            return Err(ControlError::ProxySettingFailed(
                "no enabled network services".to_string(),
            ));
        }
        let before = services
            .iter()
            .map(|s| -> anyhow::Result<(String, ProxySnapshot)> {
                Ok((s.clone(), self.service_state(s)?))
            })
            .collect::<anyhow::Result<Vec<_>>>()
            .map_err(proxy_err)?;
        debug!(?services, %host, port, "enabling SOCKS proxy");
        with_rollback(
            &before,
            || {
                services
                    .iter()
                    .try_for_each(|s| self.set_on(s, &host, port))
                    .map_err(proxy_err)
            },
            |prev| self.restore(prev).map_err(proxy_err),
        )
    }

    fn disable(&self) -> Result<(), ControlError> {
        let services = match self.services() {
            Ok(services) => services,
            Err(e) if is_tool_missing(&e) => {
                debug!("{} not available; no proxy to disable", self.tool);
                return Ok(());
            }
            Err(e) => return Err(proxy_err(e)),
        };
        let mut first_err = None;
        for service in &services {
            if let Err(e) = self.set_off(service) {
                warn!(%service, "disabling SOCKS proxy failed: {e:#}");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(proxy_err(e)),
            None => Ok(()),
        }
    }

    /// Reports the first service; they are always written together.
    fn snapshot(&self) -> Result<ProxySnapshot, ControlError> {
        let services = self.services().map_err(proxy_err)?;
        let Some(first) = services.first() else {
            return Ok(ProxySnapshot::default());
        };
        self.service_state(first).map_err(proxy_err)
    }
}

/// Service names from `-listallnetworkservices`, skipping the banner line and
/// disabled services (prefixed with `*`).
pub(crate) fn parse_services(out: &str) -> Vec<String> {
    out.lines()
        .skip(1)
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('*'))
        .map(str::to_string)
        .collect()
}

/// Parse `Enabled: Yes` / `Server: ...` / `Port: ...`.
pub(crate) fn parse_socks_status(out: &str) -> ProxySnapshot {
    let mut enabled = false;
    let mut server = String::new();
    let mut port = 0u16;
    for line in out.lines() {
        let Some((k, v)) = line.split_once(':') else {
            continue;
        };
        let v = v.trim();
        match k.trim() {
            "Enabled" => enabled = v.eq_ignore_ascii_case("yes"),
            "Server" => server = v.to_string(),
            "Port" => port = v.parse().unwrap_or(0),
            _ => {}
        }
    }
    ProxySnapshot {
        enabled: enabled && !server.is_empty() && port != 0,
        server: (!server.is_empty()).then(|| format!("socks={server}:{port}")),
        bypass: None,
        mode: None,
    }
}

/// One domain per line, or `None` for "There aren't any bypass domains set".
pub(crate) fn parse_bypass_domains(out: &str) -> Option<String> {
    if out.contains("aren't any bypass domains") {
        return None;
    }
    let domains: Vec<&str> = out.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    (!domains.is_empty()).then(|| domains.join("\n"))
}

fn stored_endpoint(server: &str) -> Option<(String, u16)> {
    let (host, port) = server.strip_prefix("socks=").unwrap_or(server).rsplit_once(':')?;
    Some((host.to_string(), port.parse().ok()?))
}

/// networksetup takes plain host patterns; `<local>` becomes the `*.local` domain.
pub(crate) fn bypass_domains() -> Vec<String> {
    BYPASS_LIST
        .iter()
        .map(|e| match *e {
            "<local>" => "*.local".to_string(),
            other => other.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_services_skips_banner_and_disabled() {
        let out = "An asterisk (*) denotes that a network service is disabled.\nWi-Fi\n*Bluetooth PAN\nThunderbolt Bridge\n\n";
        assert_eq!(parse_services(out), vec!["Wi-Fi", "Thunderbolt Bridge"]);
    }

    #[test]
    fn test_parse_socks_status() {
        let on = parse_socks_status("Enabled: Yes\nServer: 127.0.0.1\nPort: 30000\nAuthenticated Proxy Enabled: 0\n");
        assert!(on.enabled);
        assert_eq!(on.server.as_deref(), Some("socks=127.0.0.1:30000"));

        let off = parse_socks_status("Enabled: No\nServer: \nPort: 0\n");
        assert!(!off.enabled);
        assert_eq!(off.server, None);
    }

    #[test]
    fn test_parse_bypass_domains() {
        assert_eq!(
            parse_bypass_domains("There aren't any bypass domains set on Wi-Fi.\n"),
            None
        );
        assert_eq!(
            parse_bypass_domains("*.local\n169.254/16\n").as_deref(),
            Some("*.local\n169.254/16")
        );
    }

    #[test]
    fn test_disabled_endpoint_is_still_recorded() {
        let snap = parse_socks_status("Enabled: No\nServer: socks.corp\nPort: 1080\n");
        assert!(!snap.enabled);
        assert_eq!(snap.server.as_deref(), Some("socks=socks.corp:1080"));
        assert_eq!(
            stored_endpoint("socks=socks.corp:1080"),
            Some(("socks.corp".to_string(), 1080))
        );
    }

    #[test]
    fn test_disable_without_networksetup_is_a_no_op() {
        let proxy = NetworksetupProxy::with_tool("/nonexistent/networksetup");
        proxy.disable().expect("nothing to disable");
    }

    /// A `networksetup` stand-in with one Wi-Fi service whose settings live in
    /// files under `state/`. `-setsocksfirewallproxystate` fails when
    /// `state/fail.state.<on|off>` exists.
    #[cfg(unix)]
    fn fake_networksetup(dir: &std::path::Path) -> std::path::PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let state = dir.join("state");
        std::fs::create_dir_all(&state).unwrap();
        let script = dir.join("networksetup");
        std::fs::write(
            &script,
            format!(
                r#"#!/bin/sh
st='{}'
case "$1" in
  -listallnetworkservices)
    echo "An asterisk (*) denotes that a network service is disabled."
    echo "Wi-Fi" ;;
  -getsocksfirewallproxy)
    printf 'Enabled: %s\nServer: %s\nPort: %s\nAuthenticated Proxy Enabled: 0\n' \
      "$(cat "$st/enabled")" "$(cat "$st/host")" "$(cat "$st/port")" ;;
  -setsocksfirewallproxy)
    printf '%s' "$3" > "$st/host"; printf '%s' "$4" > "$st/port"; printf Yes > "$st/enabled" ;;
  -setsocksfirewallproxystate)
    if [ -e "$st/fail.state.$3" ]; then echo "** Error: denied" 1>&2; exit 1; fi
    if [ "$3" = on ]; then printf Yes > "$st/enabled"; else printf No > "$st/enabled"; fi ;;
  -getproxybypassdomains)
    if [ -s "$st/bypass" ]; then cat "$st/bypass"; else echo "There aren't any bypass domains set on $2."; fi ;;
  -setproxybypassdomains)
    shift 2
    if [ "$1" = Empty ]; then : > "$st/bypass"; else printf '%s\n' "$@" > "$st/bypass"; fi ;;
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
    #[test]
    fn test_failed_enable_restores_disabled_endpoint_and_bypass() {
        let td = tempfile::tempdir().unwrap();
        let proxy = NetworksetupProxy::with_tool(fake_networksetup(td.path()).display().to_string());
        let st = td.path().join("state");
        std::fs::write(st.join("enabled"), "No").unwrap();
        std::fs::write(st.join("host"), "socks.corp").unwrap();
        std::fs::write(st.join("port"), "1080").unwrap();
        std::fs::write(st.join("bypass"), "corp.example\n").unwrap();
        std::fs::write(st.join("fail.state.on"), "").unwrap();

        let before = proxy.snapshot().unwrap();
        assert!(proxy.enable("127.0.0.1:30000").is_err());
        assert_eq!(proxy.snapshot().unwrap(), before);
        assert_eq!(std::fs::read_to_string(st.join("host")).unwrap(), "socks.corp");
        assert_eq!(std::fs::read_to_string(st.join("enabled")).unwrap(), "No");
        assert_eq!(
            std::fs::read_to_string(st.join("bypass")).unwrap().trim(),
            "corp.example"
        );
    }

    #[test]
    fn test_bypass_domains_translate_local() {
        let d = bypass_domains();
        assert!(d.contains(&"*.local".to_string()));
        assert!(!d.iter().any(|s| s == "<local>"));
        assert_eq!(d.len(), BYPASS_LIST.len());
    }
}
