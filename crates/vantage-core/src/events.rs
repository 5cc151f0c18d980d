//! Channel events
//!
//! Everything the agent sends to a client. One tagged enum so the wire shape
//! is obvious from the type; channel-scoped events go through a session's
//! sink, the telemetry broadcast goes to every registered sink.

use serde::Serialize;
use uuid::Uuid;

use crate::procs::ProcessEntry;
use crate::sysops::{SavedConnection, ServiceUnit, WifiNetwork};
use crate::telemetry::TelemetrySnapshot;

/// Notification severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Operation succeeded
    Success,
    /// Operation failed
    Error,
}

/// Events produced by the agent for a channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Channel accepted and registered
    Connected {
        /// The channel's identity for its lifetime
        channel_id: Uuid,
    },
    /// A chunk of terminal output
    TerminalOutput {
        /// Output bytes, lossy UTF-8
        data: String,
    },
    /// The terminal subprocess exited; a new start is now possible
    TerminalExit,
    /// Periodic process snapshot, CPU-descending, at most 15 entries
    Processes {
        /// Snapshot entries
        list: Vec<ProcessEntry>,
    },
    /// Service unit listing
    Services {
        /// Units found on the host
        list: Vec<ServiceUnit>,
    },
    /// The service list changed; clients should re-fetch
    ServicesRefresh,
    /// Wi-Fi scan results
    NetworkScanResults {
        /// Visible networks, deduplicated by SSID
        list: Vec<WifiNetwork>,
    },
    /// Saved wireless connection profiles
    NetworkSavedResults {
        /// Wireless profiles known to the host
        list: Vec<SavedConnection>,
    },
    /// Network state changed; clients should re-fetch
    NetworkRefresh,
    /// A chunk of script output
    ScriptOutput {
        /// Output text (stderr chunks arrive prefixed `[ERROR] `)
        data: String,
    },
    /// The script finished
    ScriptFinished {
        /// Exit code (-1 if terminated by a signal)
        code: i32,
    },
    /// Outcome of a one-shot operation
    Notification {
        /// Success or error
        severity: Severity,
        /// Human-readable message
        message: String,
    },
    /// Process-wide telemetry broadcast
    Telemetry {
        /// Merged fast+slow snapshot
        stats: TelemetrySnapshot,
    },
    /// Keepalive response
    Pong,
}

impl AgentEvent {
    /// Shorthand for a success notification.
    pub fn success(message: impl Into<String>) -> Self {
        Self::Notification {
            severity: Severity::Success,
            message: message.into(),
        }
    }

    /// Shorthand for an error notification.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Notification {
            severity: Severity::Error,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_serialization() {
        let event = AgentEvent::error("Failed to kill process 42");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"notification\""));
        assert!(json.contains("\"severity\":\"error\""));
        assert!(json.contains("Failed to kill process 42"));
    }

    #[test]
    fn test_terminal_output_serialization() {
        let event = AgentEvent::TerminalOutput {
            data: "hello\r\n".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"terminal_output\""));
    }

    #[test]
    fn test_unit_variant_serialization() {
        let json = serde_json::to_string(&AgentEvent::TerminalExit).unwrap();
        assert_eq!(json, r#"{"type":"terminal_exit"}"#);
    }

    #[test]
    fn test_processes_serialization() {
        let event = AgentEvent::Processes {
            list: vec![ProcessEntry {
                pid: 1,
                name: "init".into(),
                cpu: 0.1,
                mem: 0.5,
                user: "root".into(),
            }],
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"processes\""));
        assert!(json.contains("\"pid\":1"));
    }
}
