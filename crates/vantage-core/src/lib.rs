//! Vantage Core - Connection Session Engine
//!
//! This crate provides the core logic for the Vantage device agent,
//! including:
//! - Auth: bearer-token verification for channel-open attempts
//! - Registry: per-channel resource ownership and exactly-once teardown
//! - Pty: the interactive pseudo-terminal bridge (one subprocess per channel)
//! - Jobs: cancellable, non-overlapping repeating background actions
//! - Dispatch: one-shot and streaming OS command execution
//! - Telemetry: fast/slow system metric aggregation and broadcast
//! - Sysops: service, network, and power management on the host

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod jobs;
pub mod procs;
pub mod pty;
pub mod registry;
pub mod sysops;
pub mod telemetry;

pub use auth::{AuthError, Claims, Principal, TokenVerifier};
pub use dispatch::{CommandOutput, ScriptChunk};
pub use error::{Error, Result};
pub use events::{AgentEvent, Severity};
pub use jobs::{schedule, JobHandle};
pub use procs::ProcessEntry;
pub use pty::{TerminalConfig, TerminalHandle};
pub use registry::SessionRegistry;
pub use telemetry::{
    FastMetrics, MetricsProvider, NetInterface, SlowMetrics, SystemMetrics, TelemetryAggregator,
    TelemetrySnapshot,
};
