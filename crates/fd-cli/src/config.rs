// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Resolved `flightdeck` settings.

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use fd_config::{load_all, paths, Resolved};
use fd_core::{CaptureConfig, PlaybackConfig, WorkerConfig};
use fd_logging::logging_config::LoggingConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Settings {
    #[serde(flatten)]
    pub logging: LoggingConfig,
    pub playback: PlaybackConfig,
    pub capture: CaptureConfig,
    pub worker: WorkerConfig,
}

/// Split a `key=value` override.
pub fn parse_override(raw: &str) -> Result<(String, String)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("invalid override {:?}: expected KEY=VALUE", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(anyhow!("invalid override {:?}: empty key", raw));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Merge every configuration layer and extract the typed settings.
pub fn load(
    config_file: Option<&str>,
    overrides: &[(String, String)],
) -> Result<(Settings, Resolved)> {
    let paths = paths::discover_paths(config_file.map(PathBuf::from));
    let flag_sets: Vec<(&str, &str)> = overrides
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    let defaults = serde_json::to_value(Settings::default())?;
    let resolved = load_all(defaults, &paths, &flag_sets)?;
    let settings = resolved.settings()?;
    Ok((settings, resolved))
}
