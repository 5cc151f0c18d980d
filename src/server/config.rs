//! Agent configuration
//!
//! Everything comes from the environment (a `.env` file is loaded in main),
//! with defaults that make a bare `vantage` useful on a dev box.

use std::time::Duration;

use anyhow::{bail, Result};

/// Runtime configuration for the agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Bind address (`VANTAGE_HOST`, default `0.0.0.0`)
    pub host: String,
    /// Bind port (`VANTAGE_PORT`, default `3000`)
    pub port: u16,
    /// Shared secret for bearer tokens (`JWT_SECRET`)
    pub jwt_secret: String,
    /// Password accepted by the login route (`ADMIN_PASSWORD`)
    pub admin_password: String,
    /// Fast telemetry interval (`TELEMETRY_FAST_SECS`, default 2)
    pub telemetry_fast_interval: Duration,
    /// Slow telemetry interval (`TELEMETRY_SLOW_SECS`, default 30)
    pub telemetry_slow_interval: Duration,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl AgentConfig {
    /// Load configuration from the environment.
    pub fn from_env() -> Result<Self> {
        let port = env_or("VANTAGE_PORT", "3000")
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid VANTAGE_PORT: {e}"))?;
        let fast_secs: u64 = env_or("TELEMETRY_FAST_SECS", "2")
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid TELEMETRY_FAST_SECS: {e}"))?;
        let slow_secs: u64 = env_or("TELEMETRY_SLOW_SECS", "30")
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid TELEMETRY_SLOW_SECS: {e}"))?;
        if fast_secs == 0 || slow_secs == 0 {
            bail!("telemetry intervals must be non-zero");
        }

        Ok(Self {
            host: env_or("VANTAGE_HOST", "0.0.0.0"),
            port,
            jwt_secret: env_or("JWT_SECRET", "fallback_secret"),
            admin_password: env_or("ADMIN_PASSWORD", "raspberry"),
            telemetry_fast_interval: Duration::from_secs(fast_secs),
            telemetry_slow_interval: Duration::from_secs(slow_secs),
        })
    }
}
