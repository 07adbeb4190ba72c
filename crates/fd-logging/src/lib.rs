// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Centralized logging utilities for Flight Deck
//!
//! Every Flight Deck binary initializes `tracing` through this crate so that
//! console and file output, level filtering and JSON formatting behave the same
//! way everywhere.

pub mod logging_config;

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// Re-export clap for convenience when using CliLoggingArgs
pub use clap;

// Re-export Level for convenience
pub use tracing::Level;

const APP_DIR: &str = "flightdeck";

/// Output format for log messages
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable plaintext format
    #[default]
    Plaintext,
    /// Structured JSON format
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Plaintext => write!(f, "plaintext"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "plaintext" => Ok(LogFormat::Plaintext),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!(
                "Invalid log format: {}. Use 'plaintext' or 'json'",
                s
            )),
        }
    }
}

/// CLI log level enum for clap integration
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Default, clap::ValueEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum CliLogLevel {
    /// Only error conditions
    Error,
    /// Errors and warnings
    Warn,
    /// Errors, warnings, and informational messages
    #[default]
    Info,
    /// All above plus debug information
    Debug,
    /// All above plus detailed tracing
    Trace,
}

impl From<CliLogLevel> for Level {
    fn from(level: CliLogLevel) -> Self {
        match level {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}

impl std::fmt::Display for CliLogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliLogLevel::Error => write!(f, "error"),
            CliLogLevel::Warn => write!(f, "warn"),
            CliLogLevel::Info => write!(f, "info"),
            CliLogLevel::Debug => write!(f, "debug"),
            CliLogLevel::Trace => write!(f, "trace"),
        }
    }
}

/// Standardized CLI logging arguments for clap integration
///
/// Use with `#[command(flatten)]`. Binaries log to stderr by default and switch
/// to a file when `--log-file` or `--log-dir` is given. Interactive binaries that
/// own the terminal should pass `to_file = true` so log lines never interleave
/// with the stepping output.
#[derive(Clone, Debug, Default, clap::Args, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CliLoggingArgs {
    /// Log verbosity level
    #[arg(long, value_enum, global = true, help = "Log verbosity level (default: info)")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<CliLogLevel>,

    /// Log output format
    #[arg(long, value_enum, global = true, help = "Log output format (default: plaintext)")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_format: Option<LogFormat>,

    /// Directory for log files
    #[arg(long, global = true, help = "Directory for log files (default: platform specific)")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,

    /// Log filename
    #[arg(long, global = true, help = "Log filename")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,
}

impl CliLoggingArgs {
    /// Initialize logging based on the parsed CLI arguments
    ///
    /// # Arguments
    /// * `component` - The component name (e.g., "flightdeck")
    /// * `to_file` - Force file logging even without `--log-file`/`--log-dir`
    /// * `default_level` - Level used when neither `--log-level` nor `RUST_LOG` is set
    pub fn init(
        self,
        component: &str,
        to_file: bool,
        default_level: CliLogLevel,
    ) -> anyhow::Result<()> {
        let level = self.log_level.unwrap_or(default_level).into();
        let format = self.log_format.unwrap_or_default();

        if to_file || self.log_file.is_some() || self.log_dir.is_some() {
            let log_path = self.resolve_log_path(component);
            init_to_file(component, level, format, &log_path)
        } else {
            init(component, level, format)
        }
    }

    /// Resolve the complete log file path based on CLI arguments
    ///
    /// 1. An absolute `log_file` is used as is
    /// 2. A relative `log_file` is placed under `log_dir` when one is given
    /// 3. Otherwise the platform standard location is used
    pub fn resolve_log_path(&self, component: &str) -> PathBuf {
        match (&self.log_file, &self.log_dir) {
            (Some(file), _) if Path::new(file).is_absolute() => PathBuf::from(file),
            (Some(file), Some(dir)) => Path::new(dir).join(file),
            (Some(file), None) => PathBuf::from(file),
            (None, Some(dir)) => Path::new(dir).join(format!("{}.log", component)),
            (None, None) => get_standard_log_path_for_component(component),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.log_level.is_none()
            && self.log_format.is_none()
            && self.log_dir.is_none()
            && self.log_file.is_none()
    }
}

/// Get the standard log file path for a specific component
pub fn get_standard_log_path_for_component(component: &str) -> PathBuf {
    let base_path = get_standard_log_path();
    let parent = base_path.parent().unwrap_or(Path::new("/tmp"));
    parent.join(format!("{}.log", component))
}

/// Get the standard log file path for the current OS
///
/// - Windows: %APPDATA%\flightdeck\flightdeck.log
/// - macOS: ~/Library/Logs/flightdeck.log
/// - Linux: ~/.local/share/flightdeck/flightdeck.log
/// - Other: ~/flightdeck.log
pub fn get_standard_log_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let mut path = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("C:\\Users\\Default\\AppData\\Roaming"));
        path.push(APP_DIR);
        path.push("flightdeck.log");
        path
    }

    #[cfg(target_os = "macos")]
    {
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"));
        path.push("Library");
        path.push("Logs");
        path.push("flightdeck.log");
        path
    }

    #[cfg(target_os = "linux")]
    {
        let mut path = dirs::data_dir()
            .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp")));
        path.push(APP_DIR);
        path.push("flightdeck.log");
        path
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"));
        path.push("flightdeck.log");
        path
    }
}

/// Initialize logging to stderr
///
/// # Example
/// ```rust
/// use fd_logging::{init, Level, LogFormat};
///
/// fn main() -> anyhow::Result<()> {
///     init("flightdeck", Level::INFO, LogFormat::Plaintext)?;
///     tracing::info!("Application started");
///     Ok(())
/// }
/// ```
pub fn init(component: &str, default_level: Level, format: LogFormat) -> anyhow::Result<()> {
    init_with_writer(component, default_level, format, io::stderr)
}

/// Initialize logging to a file, creating parent directories as needed
pub fn init_to_file(
    component: &str,
    default_level: Level,
    format: LogFormat,
    log_path: &Path,
) -> anyhow::Result<()> {
    use std::fs;

    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let log_file = fs::OpenOptions::new().create(true).append(true).open(log_path)?;

    init_with_writer(component, default_level, format, log_file)
}

/// Initialize logging with a custom writer
///
/// `RUST_LOG` takes precedence over `default_level` when it is set.
pub fn init_with_writer<W>(
    component: &str,
    default_level: Level,
    format: LogFormat,
    writer: W,
) -> anyhow::Result<()>
where
    W: for<'writer> tracing_subscriber::fmt::MakeWriter<'writer> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(component, default_level)));

    match format {
        LogFormat::Json => {
            let layer = tracing_subscriber::fmt::layer().with_writer(writer).json();
            #[cfg(debug_assertions)]
            let layer = layer.with_file(true).with_line_number(true);

            tracing_subscriber::registry().with(filter).with(layer).try_init()?;
        }
        LogFormat::Plaintext => {
            let layer = tracing_subscriber::fmt::layer().with_writer(writer);
            #[cfg(debug_assertions)]
            let layer = layer.with_file(true).with_line_number(true);

            tracing_subscriber::registry().with(filter).with(layer).try_init()?;
        }
    }

    Ok(())
}

/// Filter directive used when `RUST_LOG` is absent. Crate targets use
/// underscores, so `fd-cli` becomes `fd_cli`.
fn default_directive(component: &str, level: Level) -> String {
    format!("{},{}={}", level, component.replace('-', "_"), level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_log_level_conversion() {
        assert_eq!(Level::from(CliLogLevel::Error), Level::ERROR);
        assert_eq!(Level::from(CliLogLevel::Warn), Level::WARN);
        assert_eq!(Level::from(CliLogLevel::Info), Level::INFO);
        assert_eq!(Level::from(CliLogLevel::Debug), Level::DEBUG);
        assert_eq!(Level::from(CliLogLevel::Trace), Level::TRACE);
    }

    #[test]
    fn test_cli_log_level_display_and_default() {
        assert_eq!(format!("{}", CliLogLevel::Warn), "warn");
        assert_eq!(format!("{}", CliLogLevel::Trace), "trace");
        assert_eq!(CliLogLevel::default(), CliLogLevel::Info);
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("plaintext".parse::<LogFormat>().unwrap(), LogFormat::Plaintext);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_resolve_log_path() {
        let args = CliLoggingArgs {
            log_dir: Some("/var/log/fd".to_string()),
            ..Default::default()
        };
        assert_eq!(
            args.resolve_log_path("flightdeck"),
            PathBuf::from("/var/log/fd/flightdeck.log")
        );

        let args = CliLoggingArgs {
            log_dir: Some("/var/log/fd".to_string()),
            log_file: Some("replay.log".to_string()),
            ..Default::default()
        };
        assert_eq!(
            args.resolve_log_path("flightdeck"),
            PathBuf::from("/var/log/fd/replay.log")
        );

        let args = CliLoggingArgs {
            log_dir: Some("/var/log/fd".to_string()),
            log_file: Some("/tmp/abs.log".to_string()),
            ..Default::default()
        };
        assert_eq!(args.resolve_log_path("flightdeck"), PathBuf::from("/tmp/abs.log"));
    }

    #[test]
    fn test_standard_log_path_for_component() {
        let path = get_standard_log_path_for_component("replay");
        assert!(path.to_string_lossy().ends_with("replay.log"));
    }

    #[test]
    fn test_default_directive_uses_crate_target_names() {
        assert_eq!(
            default_directive("fd-cli", Level::DEBUG),
            "DEBUG,fd_cli=DEBUG"
        );
    }

    #[test]
    fn test_logging_config_deserializes_level() {
        let config: logging_config::LoggingConfig =
            serde_json::from_value(serde_json::json!({ "log-level": "debug" })).unwrap();
        assert_eq!(config.level, Some(CliLogLevel::Debug));

        let empty: logging_config::LoggingConfig =
            serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(empty.level.is_none());
    }
}
