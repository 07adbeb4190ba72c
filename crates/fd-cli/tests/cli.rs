// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use std::io::Write;
use std::path::PathBuf;

use fd_cli::{config, Cli, Commands, Parser};
use fd_logging::CliLogLevel;

#[test]
fn replay_arguments_parse() {
    let cli = Cli::try_parse_from([
        "flightdeck",
        "replay",
        "--render",
        "render.rsc",
        "--action",
        "like=like.rsc",
        "--action",
        "save=save.rsc",
        "--auto",
        "--set",
        "playback.step-interval-ms=10",
    ])
    .unwrap();

    assert_eq!(cli.set, vec!["playback.step-interval-ms=10"]);
    let Commands::Replay(args) = cli.command else {
        panic!("expected replay");
    };
    assert_eq!(args.render, PathBuf::from("render.rsc"));
    assert_eq!(
        args.actions,
        vec![
            ("like".to_string(), PathBuf::from("like.rsc")),
            ("save".to_string(), PathBuf::from("save.rsc")),
        ]
    );
    assert!(args.auto);
    assert!(args.server.is_none());
}

#[test]
fn malformed_action_flag_is_rejected() {
    let result = Cli::try_parse_from([
        "flightdeck",
        "replay",
        "--render",
        "render.rsc",
        "--action",
        "like",
    ]);
    assert!(result.is_err());
}

#[test]
fn log_level_flag_becomes_an_override() {
    let cli = Cli::try_parse_from(["flightdeck", "--log-level", "debug", "config"]).unwrap();
    assert_eq!(cli.logging.log_level, Some(CliLogLevel::Debug));
    let overrides = cli.flag_overrides().unwrap();
    assert_eq!(overrides, vec![("log-level".to_string(), "debug".to_string())]);
}

#[test]
fn config_file_and_overrides_reach_the_settings() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "log-level = \"warn\"\n\n[playback]\nstep-interval-ms = 40\n\n[capture]\nchunk-size = 8\n"
    )
    .unwrap();

    let overrides = vec![("playback.auto-play".to_string(), "true".to_string())];
    let (settings, resolved) =
        config::load(file.path().to_str(), &overrides).unwrap();

    assert_eq!(settings.playback.step_interval_ms, 40);
    assert!(settings.playback.auto_play);
    assert_eq!(settings.capture.chunk_size, 8);
    assert_eq!(settings.worker.ready_timeout_ms, 5000);
    assert_eq!(settings.logging.level, Some(CliLogLevel::Warn));
    assert!(resolved.layers.contains(&fd_config::Scope::CliConfig));
}

#[test]
fn missing_config_file_is_an_error() {
    assert!(config::load(Some("/definitely/not/here.toml"), &[]).is_err());
}
