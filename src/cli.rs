//! Command-line interface.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;

#[derive(Parser)]
#[command(name = "contentforge", about = "Agent-routed content generation server", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the HTTP server.
    Serve {
        /// Bind address, overriding the configured host and port.
        #[arg(long)]
        addr: Option<SocketAddr>,
    },
    /// Print a stored memory record as JSON.
    Memory {
        /// Record id.
        id: u64,
    },
}
