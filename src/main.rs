//! Main entry point for the Expert Relay server.

use anyhow::Result;
use clap::Parser;
use expert_relay::{cli, server, settings::Settings, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    let settings = Settings::load()?;
    telemetry::init(&settings.logging)?;

    match args.command {
        cli::Commands::Serve { addr } => server::serve(&settings, addr).await,
        cli::Commands::CheckConfig => {
            println!("configuration OK");
            Ok(())
        }
    }
}
