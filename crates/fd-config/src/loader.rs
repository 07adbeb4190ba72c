// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! TOML loading

use anyhow::{Context, Result};
use serde_json::Value as J;
use std::path::Path;

/// Parse TOML string to a JSON value
pub fn parse_toml_to_json(toml_str: &str) -> Result<J> {
    let toml: toml::Value = toml_str.parse::<toml::Value>()?;
    serde_json::to_value(toml).context("converting TOML to JSON")
}

/// Represents a loaded configuration layer
#[derive(Debug, Clone)]
pub struct Layer {
    pub scope: crate::Scope,
    pub json: J,
}

/// Load a configuration layer from file
pub fn read_layer_from_file(path: &Path, scope: crate::Scope) -> Result<Layer> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading config file {:?}", path))?;

    let json = parse_toml_to_json(&content)
        .with_context(|| format!("parsing config file {:?}", path))?;

    Ok(Layer { scope, json })
}
