//! Command-line interface for the Vantage agent.

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::server::{self, AgentConfig};

/// Vantage - remote device dashboard agent
#[derive(Debug, Parser)]
#[command(name = "vantage", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the agent server (the default when no subcommand is given)
    Serve {
        /// Bind address, overriding VANTAGE_HOST
        #[arg(long)]
        host: Option<String>,
        /// Bind port, overriding VANTAGE_PORT
        #[arg(long)]
        port: Option<u16>,
    },
}

/// Dispatch the parsed command line. A bare `vantage` serves with
/// env-derived settings.
pub async fn run(cli: Cli) -> Result<()> {
    let mut config = AgentConfig::from_env()?;
    if let Some(Command::Serve { host, port }) = cli.command {
        if let Some(host) = host {
            config.host = host;
        }
        if let Some(port) = port {
            config.port = port;
        }
    }
    server::run(config).await
}
