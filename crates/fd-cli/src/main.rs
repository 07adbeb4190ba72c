// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only
#![allow(clippy::disallowed_methods)] // `config` prints to stdout

use anyhow::Result;
use fd_cli::{config, Cli, Commands, Parser};
use fd_logging::CliLogLevel;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let overrides = cli.flag_overrides()?;
    let (settings, resolved) = config::load(cli.config.as_deref(), &overrides)?;

    // The replay loop owns the terminal, so its logs go to a file.
    let to_file = matches!(cli.command, Commands::Replay(_));
    let default_level = settings.logging.level.unwrap_or(CliLogLevel::Info);
    cli.logging.clone().init("flightdeck", to_file, default_level)?;
    tracing::debug!(layers = ?resolved.layers, "configuration loaded");

    match cli.command {
        Commands::Check(args) => args.run(),
        Commands::Replay(args) => args.run(&settings).await,
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&resolved.json)?);
            Ok(())
        }
    }
}
