//! Command-line interface definitions using clap derive API.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;

/// Expert Relay CLI
#[derive(Parser)]
#[command(name = "expert-relay")]
#[command(about = "Live query/response relay over an expert catalog")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP/WebSocket server
    Serve {
        /// Bind address; overrides the configured host/port
        #[arg(long)]
        addr: Option<SocketAddr>,
    },
    /// Load and validate the configuration, then exit
    CheckConfig,
}
