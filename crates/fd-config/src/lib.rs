// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Layered configuration engine.
//!
//! Every source is lowered to `serde_json::Value` and merged in precedence
//! order, so the engine stays agnostic of the typed sections the front end
//! extracts afterwards.

pub mod env;
pub mod loader;
pub mod merge;
pub mod paths;

use anyhow::{anyhow, Result};
use serde::de::DeserializeOwned;
use serde_json::Value as J;

/// Origin of a configuration layer, ordered by precedence (lowest first)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Scope {
    Defaults,
    User,
    CliConfig,
    Env,
    Flags,
}

/// Final resolved configuration
#[derive(Debug)]
pub struct Resolved {
    /// Final merged JSON configuration
    pub json: J,
    /// Scopes that contributed a layer, in merge order
    pub layers: Vec<Scope>,
}

impl Resolved {
    /// Deserialize the whole merged tree into the front end's settings type.
    pub fn settings<T: DeserializeOwned>(&self) -> Result<T> {
        typed(&self.json, None)
    }

    /// Deserialize one top-level section, e.g. `worker` or `playback`.
    pub fn section<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self
            .json
            .get(key)
            .ok_or_else(|| anyhow!("configuration has no [{}] section", key))?;
        typed(value, Some(key))
    }
}

/// Errors name the offending key as a dotted path from the root.
fn typed<T: DeserializeOwned>(value: &J, section: Option<&str>) -> Result<T> {
    serde_path_to_error::deserialize(value).map_err(|err| {
        let inner = err.path().to_string();
        let at = match (section, inner.as_str()) {
            (Some(key), ".") => key.to_string(),
            (Some(key), path) => format!("{}.{}", key, path),
            (None, path) => path.to_string(),
        };
        anyhow!("invalid configuration at {}: {}", at, err.into_inner())
    })
}

/// Load and merge all configuration layers according to precedence rules
///
/// Precedence order: defaults < user < cli-config < env < flags
pub fn load_all(
    defaults: J,
    paths: &paths::Paths,
    flag_sets: &[(&str, &str)],
) -> Result<Resolved> {
    use Scope::*;

    let user_layer = if paths.user.exists() {
        match loader::read_layer_from_file(&paths.user, User) {
            Ok(layer) => Some(layer.json),
            Err(e) => {
                tracing::warn!(path = ?paths.user, error = %e, "ignoring unreadable user config");
                None
            }
        }
    } else {
        None
    };
    // An explicitly requested file must load
    let cli_config_layer = match &paths.cli_config {
        Some(p) => Some(loader::read_layer_from_file(p, CliConfig)?.json),
        None => None,
    };

    let layers = vec![
        (Some(defaults), Defaults),
        (user_layer, User),
        (cli_config_layer, CliConfig),
        (Some(env::env_overlay()?), Env),
        (Some(env::flags_overlay(flag_sets)), Flags),
    ];

    let mut json = serde_json::json!({});
    let mut applied = Vec::new();
    for (layer, scope) in layers {
        if let Some(layer) = layer {
            merge::merge_two_json(&mut json, layer);
            applied.push(scope);
        }
    }

    tracing::debug!(?applied, "configuration resolved");
    Ok(Resolved {
        json,
        layers: applied,
    })
}
