// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use clap::Subcommand;
use fd_logging::CliLoggingArgs;

pub use clap::Parser;

pub mod check;
pub mod config;
pub mod replay;

#[derive(clap::Parser)]
#[command(
    name = "flightdeck",
    about = "Step through server-driven UI protocol streams",
    version,
    propagate_version = true
)]
pub struct Cli {
    /// Extra configuration file, merged above the user file
    #[arg(long, global = true)]
    pub config: Option<String>,
    /// Override a configuration key (`section.key=value`), may be repeated
    #[arg(long = "set", value_name = "KEY=VALUE", global = true)]
    pub set: Vec<String>,
    #[command(flatten)]
    pub logging: CliLoggingArgs,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate directives and print the discovered actions and client manifest
    Check(check::CheckArgs),
    /// Replay captured protocol output one row at a time
    Replay(replay::ReplayArgs),
    /// Print the resolved configuration
    Config,
}

impl Cli {
    /// `--set` pairs, with the global `--log-level` folded in.
    pub fn flag_overrides(&self) -> anyhow::Result<Vec<(String, String)>> {
        let mut pairs = self
            .set
            .iter()
            .map(|raw| config::parse_override(raw))
            .collect::<anyhow::Result<Vec<_>>>()?;
        if let Some(level) = self.logging.log_level {
            pairs.push(("log-level".to_string(), level.to_string()));
        }
        Ok(pairs)
    }
}
