//! Error types for vantage-core
//!
//! One taxonomy for the whole subsystem. Nothing here is allowed to
//! terminate the agent process: spawn, command, and telemetry failures are
//! reported to the affected channel (or logged) and the agent keeps running.

use thiserror::Error;
use uuid::Uuid;

use crate::auth::AuthError;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// The interactive subprocess could not be started.
    /// Recoverable: the channel is notified and may retry.
    #[error("terminal spawn failed: {0}")]
    Spawn(String),

    /// A dispatched OS command could not run or exited non-zero.
    /// Reported to the requesting channel as a notification, never fatal.
    #[error("command failed: {0}")]
    Command(String),

    /// A metrics read failed. Logged; the previous cached values are served.
    #[error("telemetry read failed: {0}")]
    Telemetry(String),

    /// A terminal is already attached to this channel's session record.
    /// Callers treat a duplicate start request as a silent no-op.
    #[error("terminal already attached")]
    AlreadyAttached,

    /// The channel has no session record (never opened, or already closed).
    #[error("channel {0} is not registered")]
    NotRegistered(Uuid),

    /// Credential verification failed at channel-open time.
    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
