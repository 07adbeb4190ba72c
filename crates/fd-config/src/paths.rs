// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Configuration file path discovery

use std::path::PathBuf;

/// Configuration file paths for the file-backed scopes
#[derive(Debug, Clone)]
pub struct Paths {
    pub user: PathBuf,
    pub cli_config: Option<PathBuf>,
}

/// Discover configuration file paths for the current environment
pub fn discover_paths(cli_config: Option<PathBuf>) -> Paths {
    Paths {
        user: get_user_config_path(),
        cli_config,
    }
}

/// Get user configuration path, honoring FD_HOME and XDG_CONFIG_HOME
fn get_user_config_path() -> PathBuf {
    if let Ok(fd_home) = std::env::var("FD_HOME") {
        return PathBuf::from(fd_home).join("config.toml");
    }

    if cfg!(target_os = "macos") {
        PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".into()))
            .join("Library")
            .join("Application Support")
            .join("flightdeck")
            .join("config.toml")
    } else if cfg!(target_os = "windows") {
        PathBuf::from(std::env::var("APPDATA").unwrap_or_else(|_| "C:\\".into()))
            .join("flightdeck")
            .join("config.toml")
    } else {
        std::env::var("XDG_CONFIG_HOME")
            .map(|p| PathBuf::from(p).join("flightdeck").join("config.toml"))
            .unwrap_or_else(|_| {
                PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".into()))
                    .join(".config")
                    .join("flightdeck")
                    .join("config.toml")
            })
    }
}
