// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Environment variable and flag overlays

use anyhow::Result;
use serde_json::Value as J;

/// Prefix of environment variables that feed the configuration
pub const ENV_PREFIX: &str = "FD";

/// Create JSON overlay from FD_* environment variables
///
/// `FD_PLAYBACK_AUTO_PLAY` becomes `playback.auto-play`: the first segment is
/// the section, the remainder is kebab-cased.
pub fn env_overlay() -> Result<J> {
    let built = config::Config::builder()
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .convert_case(config::Case::Kebab),
        )
        .build()?;

    let flat = built.try_deserialize::<serde_json::Map<String, J>>()?;
    Ok(nest_sections(flat))
}

/// Split `section-key-name` into `{ section: { key-name: value } }`.
fn nest_sections(flat: serde_json::Map<String, J>) -> J {
    let mut root = serde_json::json!({});
    for (key, value) in flat {
        let dotted = match key.split_once('-') {
            Some((section, rest)) if is_section(section) => format!("{}.{}", section, rest),
            _ => key,
        };
        if !is_section(dotted.split('.').next().unwrap_or_default()) && dotted != "log-level" {
            continue;
        }
        let value = match value {
            J::String(s) => parse_scalar(&s),
            other => other,
        };
        crate::merge::insert_dotted(&mut root, &dotted, value);
    }
    root
}

fn is_section(name: &str) -> bool {
    matches!(name, "playback" | "capture" | "worker")
}

/// Interpret a textual override as a boolean or number when it reads as one.
pub fn parse_scalar(raw: &str) -> J {
    match raw {
        "true" => return J::Bool(true),
        "false" => return J::Bool(false),
        _ => {}
    }
    if let Ok(n) = raw.parse::<u64>() {
        return J::from(n);
    }
    if let Ok(n) = raw.parse::<i64>() {
        return J::from(n);
    }
    J::String(raw.to_string())
}

/// Create JSON overlay from CLI flag key=value pairs
pub fn flags_overlay(kv_pairs: &[(&str, &str)]) -> J {
    let mut root = serde_json::json!({});
    for (k, v) in kv_pairs {
        crate::merge::insert_dotted(&mut root, k, parse_scalar(v));
    }
    root
}
