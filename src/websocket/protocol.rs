//! Client protocol
//!
//! Messages a client may send over the channel. Events the agent sends back
//! are [`vantage_core::AgentEvent`]; both sides use the same tagged JSON
//! framing.

use serde::Deserialize;
use vantage_core::sysops::PowerAction;

/// Messages from client to agent.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start the interactive terminal (no-op if already running)
    TerminalStart {
        /// Terminal width; defaults applied when missing or zero
        cols: Option<u16>,
        /// Terminal height; defaults applied when missing or zero
        rows: Option<u16>,
    },
    /// Write to the terminal's stdin
    TerminalInput {
        /// Raw input, forwarded verbatim
        data: String,
    },
    /// Resize the terminal
    TerminalResize { cols: u16, rows: u16 },
    /// Start (or re-arm) periodic process snapshots
    ProcessesWatch {
        /// Seconds between snapshots (default 10, minimum 1)
        interval_secs: Option<u64>,
    },
    /// Stop periodic process snapshots
    ProcessesUnwatch,
    /// Kill a process by id
    ProcessKill { pid: u32 },
    /// List service units
    ServicesList,
    /// Start/stop/restart a service unit
    ServiceControl { service: String, action: String },
    /// Rescan and list Wi-Fi networks
    NetworkScan,
    /// List saved wireless profiles
    NetworkSaved,
    /// Connect to a Wi-Fi network
    NetworkConnect {
        ssid: String,
        password: Option<String>,
    },
    /// Delete a saved connection profile
    NetworkForget { name: String },
    /// Reboot or shut down the host
    SystemPower { action: PowerAction },
    /// Run a script, streaming its output
    ScriptRun { path: String },
    /// Keepalive
    Ping,
}
