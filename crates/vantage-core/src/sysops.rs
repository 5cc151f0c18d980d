//! Host operations
//!
//! Service, Wi-Fi, and power management via the command dispatcher. Output
//! parsing is best effort: malformed lines are dropped, and every command
//! failure surfaces as [`Error::Command`] for the caller to report as a
//! channel notification.

use serde::Serialize;

use crate::dispatch;
use crate::error::{Error, Result};

/// Allowed service-control actions. Anything else is rejected before dispatch.
pub const SERVICE_ACTIONS: [&str; 3] = ["start", "stop", "restart"];

/// One systemd service unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceUnit {
    /// Unit name (e.g. `ssh.service`)
    pub name: String,
    /// Load state
    pub load: String,
    /// Active state
    pub active: String,
    /// Sub state
    pub sub: String,
    /// Human-readable description
    pub description: String,
}

/// One Wi-Fi network visible in a scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WifiNetwork {
    /// Network SSID
    pub ssid: String,
    /// Signal strength, 0-100
    pub signal: u8,
    /// Signal bars as rendered by nmcli
    pub bars: String,
    /// Security descriptor (e.g. `WPA2`)
    pub security: String,
    /// Whether this is the currently connected network
    pub connected: bool,
}

/// One saved wireless connection profile.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SavedConnection {
    /// Profile name
    pub name: String,
    /// Connection type as reported by nmcli
    pub kind: String,
    /// Device currently bound to the profile (empty if none)
    pub device: String,
}

/// Parse `systemctl list-units --no-legend` output.
pub fn parse_services(raw: &str) -> Vec<ServiceUnit> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        // systemctl prefixes failed units with a bullet glyph.
        .map(|line| line.trim_start_matches(['●', '*', ' ']))
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            Some(ServiceUnit {
                name: parts.next()?.to_string(),
                load: parts.next()?.to_string(),
                active: parts.next()?.to_string(),
                sub: parts.next()?.to_string(),
                description: parts.collect::<Vec<_>>().join(" "),
            })
        })
        .collect()
}

/// Parse `nmcli -t -f SSID,SIGNAL,BARS,SECURITY device wifi list` output,
/// marking the currently connected SSID and deduplicating by SSID with
/// preference for the connected entry.
pub fn parse_wifi_list(raw: &str, current: Option<&str>) -> Vec<WifiNetwork> {
    let mut seen: Vec<WifiNetwork> = Vec::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("--") {
            continue;
        }
        let parts: Vec<&str> = line.split(':').collect();
        if parts.len() < 4 || parts[0].is_empty() {
            continue;
        }
        let network = WifiNetwork {
            ssid: parts[0].to_string(),
            signal: parts[1].parse().unwrap_or(0),
            bars: parts[2].to_string(),
            security: parts[3].to_string(),
            connected: current.is_some_and(|c| c == parts[0]),
        };
        match seen.iter_mut().find(|n| n.ssid == network.ssid) {
            Some(existing) => {
                if network.connected {
                    *existing = network;
                }
            }
            None => seen.push(network),
        }
    }
    seen
}

/// Parse `nmcli -t -f NAME,TYPE,DEVICE connection show` output, keeping only
/// wireless profiles.
pub fn parse_saved_connections(raw: &str) -> Vec<SavedConnection> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let parts: Vec<&str> = line.split(':').collect();
            if parts.len() < 3 {
                return None;
            }
            Some(SavedConnection {
                name: parts[0].to_string(),
                kind: parts[1].to_string(),
                device: parts[2].to_string(),
            })
        })
        .filter(|c| c.kind.contains("wireless") || c.kind.contains("wifi"))
        .collect()
}

/// List service units on the host.
pub async fn list_services() -> Result<Vec<ServiceUnit>> {
    let out = dispatch::run(
        "systemctl",
        &[
            "list-units",
            "--type=service",
            "--state=running,stopped",
            "--no-pager",
            "--no-legend",
        ],
    )
    .await?;
    if !out.success() {
        return Err(Error::Command(format!(
            "systemctl list-units exited {}: {}",
            out.code,
            out.stderr.trim()
        )));
    }
    Ok(parse_services(&out.stdout))
}

/// Start, stop, or restart a service unit.
pub async fn control_service(action: &str, unit: &str) -> Result<()> {
    if !SERVICE_ACTIONS.contains(&action) {
        return Err(Error::Command(format!(
            "unsupported service action: {action}"
        )));
    }
    let out = dispatch::run("systemctl", &[action, unit]).await?;
    if !out.success() {
        return Err(Error::Command(format!(
            "systemctl {action} {unit} exited {}: {}",
            out.code,
            out.stderr.trim()
        )));
    }
    Ok(())
}

/// Rescan and list visible Wi-Fi networks.
pub async fn scan_wifi() -> Result<Vec<WifiNetwork>> {
    // A rescan may be rate-limited by the driver; stale results still list.
    let _ = dispatch::run("nmcli", &["device", "wifi", "rescan"]).await;

    let active = dispatch::run("nmcli", &["-t", "-f", "active,ssid", "device", "wifi"]).await?;
    let current = active
        .stdout
        .lines()
        .find_map(|line| line.strip_prefix("yes:"))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let out = dispatch::run(
        "nmcli",
        &["-t", "-f", "SSID,SIGNAL,BARS,SECURITY", "device", "wifi", "list"],
    )
    .await?;
    if !out.success() {
        return Err(Error::Command(format!(
            "wifi scan exited {}: {}",
            out.code,
            out.stderr.trim()
        )));
    }
    Ok(parse_wifi_list(&out.stdout, current.as_deref()))
}

/// List saved wireless connection profiles.
pub async fn saved_connections() -> Result<Vec<SavedConnection>> {
    let out = dispatch::run("nmcli", &["-t", "-f", "NAME,TYPE,DEVICE", "connection", "show"]).await?;
    if !out.success() {
        return Err(Error::Command(format!(
            "connection list exited {}: {}",
            out.code,
            out.stderr.trim()
        )));
    }
    Ok(parse_saved_connections(&out.stdout))
}

/// Connect to a Wi-Fi network, optionally with a password.
pub async fn connect_wifi(ssid: &str, password: Option<&str>) -> Result<()> {
    let mut args = vec!["device", "wifi", "connect", ssid];
    if let Some(pw) = password {
        args.push("password");
        args.push(pw);
    }
    let out = dispatch::run("nmcli", &args).await?;
    if !out.success() {
        return Err(Error::Command(format!(
            "connect to {ssid} exited {}: {}",
            out.code,
            out.stderr.trim()
        )));
    }
    Ok(())
}

/// Delete a saved connection profile by name.
pub async fn forget_network(name: &str) -> Result<()> {
    let out = dispatch::run("nmcli", &["connection", "delete", name]).await?;
    if !out.success() {
        return Err(Error::Command(format!(
            "delete {name} exited {}: {}",
            out.code,
            out.stderr.trim()
        )));
    }
    Ok(())
}

/// Host power actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerAction {
    /// Reboot the host
    Reboot,
    /// Power the host off
    Shutdown,
}

/// Reboot or shut down the host.
pub async fn power(action: PowerAction) -> Result<()> {
    let arg = match action {
        PowerAction::Reboot => "reboot",
        PowerAction::Shutdown => "poweroff",
    };
    let out = dispatch::run("systemctl", &[arg]).await?;
    if !out.success() {
        return Err(Error::Command(format!(
            "systemctl {arg} exited {}: {}",
            out.code,
            out.stderr.trim()
        )));
    }
    Ok(())
}
