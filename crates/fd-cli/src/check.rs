// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only
#![allow(clippy::disallowed_methods)] // prints the report to stdout

//! `flightdeck check`: directive validation without running anything.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use fd_core::session::CLIENT_MODULE_ID;
use fd_core::{ClientManifest, Compiler, DirectiveScanner};
use serde::Serialize;

#[derive(Args, Clone, Debug)]
pub struct CheckArgs {
    /// Server module source
    #[arg(long)]
    pub server: PathBuf,
    /// Client module source
    #[arg(long)]
    pub client: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct CheckReport {
    pub actions: Vec<String>,
    pub exports: Vec<String>,
    pub manifest: ClientManifest,
}

/// Scan both sources the way a session would before deploying them.
pub fn check_sources(compiler: &dyn Compiler, server: &str, client: &str) -> Result<CheckReport> {
    let exports = compiler.parse_client_module(client)?;
    let manifest = compiler.build_manifest(CLIENT_MODULE_ID, &exports);
    let actions = compiler.parse_server_actions(server)?;
    Ok(CheckReport {
        actions,
        exports,
        manifest,
    })
}

impl CheckArgs {
    pub fn run(self) -> Result<()> {
        let server = std::fs::read_to_string(&self.server)
            .with_context(|| format!("reading {}", self.server.display()))?;
        let client = std::fs::read_to_string(&self.client)
            .with_context(|| format!("reading {}", self.client.display()))?;
        let report = check_sources(&DirectiveScanner::new(), &server, &client)?;
        tracing::info!(
            actions = report.actions.len(),
            exports = report.exports.len(),
            "sources check out"
        );
        println!("{}", serde_json::to_string_pretty(&report)?);
        Ok(())
    }
}
