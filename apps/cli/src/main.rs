//! perpcheck CLI: compares wallet perp account values between the Artemis
//! snapshot bucket and the Hyperliquid info API.

#![recursion_limit = "256"]

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
