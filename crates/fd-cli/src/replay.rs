// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only
#![allow(clippy::disallowed_methods)] // the replay loop talks to the terminal

//! `flightdeck replay`: interactive stepping over captured protocol output.
//!
//! Each session runs against a worker-hosted [`CaptureSandbox`] that replays
//! the captured render and action output. Commands are read line by line from
//! stdin, so the loop works equally well interactively and from a script.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use fd_core::{
    render_decoded, Capture, CaptureConfig, CaptureSandbox, DirectiveScanner, EntryKind,
    EntryView, Playback, RowDecoder, Sandbox, SessionStatus, SourceSessionFactory,
    TimelineSnapshot, WorkerConfig, WorkerSandbox,
};
use futures::FutureExt;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Settings;

const HELP: &str = "\
commands:
  s                   step one row
  k                   skip to the end of the current entry
  t                   decoded tree of every started entry
  l                   raw rows per entry
  a <name> <payload>  call an action with a raw form-data payload
  c <row> [json]      call the server reference at <row> (hex) of the latest entry
  d <index>           delete an entry the cursor has not reached
  r                   reset to a fresh session
  q                   quit";

const DEFAULT_CLIENT: &str = "\"use client\";\n";

#[derive(Args, Clone, Debug)]
pub struct ReplayArgs {
    /// Captured render output (one protocol row per line)
    #[arg(long)]
    pub render: PathBuf,
    /// Captured output of an action, may be repeated
    #[arg(long = "action", value_name = "NAME=FILE", value_parser = parse_action)]
    pub actions: Vec<(String, PathBuf)>,
    /// Server module source; defaults to a stub exporting every captured action
    #[arg(long)]
    pub server: Option<PathBuf>,
    /// Client module source
    #[arg(long)]
    pub client: Option<PathBuf>,
    /// Step automatically until the timeline is fully revealed
    #[arg(long)]
    pub auto: bool,
}

fn parse_action(raw: &str) -> Result<(String, PathBuf), String> {
    match raw.split_once('=') {
        Some((name, file)) if !name.is_empty() && !file.is_empty() => {
            Ok((name.to_string(), PathBuf::from(file)))
        }
        _ => Err(format!("expected NAME=FILE, got {:?}", raw)),
    }
}

/// A parsed replay command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Step,
    Skip,
    Tree,
    Log,
    Action { name: String, payload: String },
    Call { row: u32, args: Vec<Value> },
    Delete(usize),
    Reset,
    Help,
    Quit,
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();
    let command = match word {
        "" => return Ok(None),
        "s" | "step" => Command::Step,
        "k" | "skip" => Command::Skip,
        "t" | "tree" => Command::Tree,
        "l" | "log" => Command::Log,
        "a" | "action" => {
            let (name, payload) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            if name.is_empty() {
                return Err("usage: a <name> <payload>".into());
            }
            Command::Action {
                name: name.to_string(),
                payload: payload.trim().to_string(),
            }
        }
        "c" | "call" => {
            let (row, args) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            let row =
                u32::from_str_radix(row, 16).map_err(|_| "usage: c <row> [json]".to_string())?;
            let args = match args.trim() {
                "" => Vec::new(),
                json => match serde_json::from_str::<Value>(json).map_err(|e| e.to_string())? {
                    Value::Array(items) => items,
                    other => vec![other],
                },
            };
            Command::Call { row, args }
        }
        "d" | "delete" => Command::Delete(
            rest.parse()
                .map_err(|_| "usage: d <index>".to_string())?,
        ),
        "r" | "reset" => Command::Reset,
        "h" | "help" | "?" => Command::Help,
        "q" | "quit" => Command::Quit,
        other => return Err(format!("unknown command {:?} (h for help)", other)),
    };
    Ok(Some(command))
}

fn entry_label(entry: &EntryView) -> String {
    match &entry.kind {
        EntryKind::Render => "render".to_string(),
        EntryKind::Action { name, args } if args.is_empty() => format!("action {}", name),
        EntryKind::Action { name, args } => format!("action {} {}", name, args),
    }
}

/// One-line summary of the cursor position.
pub fn format_status(snapshot: &TimelineSnapshot) -> String {
    let mut status = format!("cursor {}/{}", snapshot.cursor, snapshot.total_chunks);
    if snapshot.is_streaming {
        status.push_str(" (streaming)");
    }
    status
}

/// Raw rows of every entry; rows past the cursor are only counted.
pub fn format_log(snapshot: &TimelineSnapshot) -> String {
    let mut out = String::new();
    for (index, entry) in snapshot.entries.iter().enumerate() {
        let revealed = entry.revealed(snapshot.cursor);
        let _ = write!(
            out,
            "[{}] {}  {}/{}",
            index,
            entry_label(entry),
            revealed,
            entry.chunk_count
        );
        if entry.is_streaming {
            out.push_str(" streaming");
        }
        if let Some(err) = &entry.error {
            let _ = write!(out, " error: {}", err);
        }
        out.push('\n');
        for row in &entry.rows[..revealed] {
            let _ = writeln!(out, "  {}", row);
        }
        let pending = entry.chunk_count - revealed;
        if pending > 0 {
            let _ = writeln!(out, "  ... {} more buffered", pending);
        }
    }
    out
}

/// Decoded tree of every entry the cursor has reached.
pub fn format_tree(snapshot: &TimelineSnapshot) -> String {
    let mut out = String::new();
    for (index, entry) in snapshot.entries.iter().enumerate() {
        if entry.revealed(snapshot.cursor) == 0 && !entry.is_done {
            continue;
        }
        let _ = writeln!(out, "[{}] {}", index, entry_label(entry));
        let _ = writeln!(out, "{}", render_decoded(&entry.decoded));
    }
    out
}

/// The row revealed by the most recent step.
fn last_revealed(snapshot: &TimelineSnapshot) -> Option<(usize, &str)> {
    let index = snapshot.cursor.checked_sub(1)?;
    snapshot
        .entries
        .iter()
        .enumerate()
        .find(|(_, e)| index >= e.chunk_start && index < e.chunk_end())
        .map(|(i, e)| (i, &*e.rows[index - e.chunk_start]))
}

struct Sources {
    server: String,
    client: String,
    render: Capture,
    actions: Vec<(String, Capture)>,
}

fn read(path: &PathBuf) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn stub_server(actions: &[(String, Capture)]) -> String {
    let mut code = String::from("\"use server\";\n");
    for (name, _) in actions {
        let _ = writeln!(code, "export async function {}() {{}}", name);
    }
    code
}

fn session_factory(
    sources: Sources,
    capture: CaptureConfig,
    worker: WorkerConfig,
) -> SourceSessionFactory {
    let Sources {
        server,
        client,
        render,
        actions,
    } = sources;
    SourceSessionFactory {
        server_source: server,
        client_source: client,
        compiler: Arc::new(DirectiveScanner::new()),
        decoder: Arc::new(RowDecoder::new()),
        sandbox: Box::new(move || {
            let runtime = actions.iter().fold(
                CaptureSandbox::new(render.clone()).with_config(capture.clone()),
                |runtime, (name, capture)| runtime.with_action(name.clone(), capture.clone()),
            );
            Arc::new(WorkerSandbox::spawn(Arc::new(runtime), worker.clone())) as Arc<dyn Sandbox>
        }),
    }
}

fn print_session(playback: &Playback) {
    let session = playback.session();
    match session.status() {
        SessionStatus::Ready { available_actions } => println!(
            "session {} ready, actions: {}",
            session.id(),
            available_actions.join(", ")
        ),
        SessionStatus::Error { message } => {
            println!("session {} failed: {}", session.id(), message)
        }
    }
}

impl ReplayArgs {
    fn load(&self) -> Result<Sources> {
        let actions = self
            .actions
            .iter()
            .map(|(name, path)| Ok((name.clone(), Capture::new(read(path)?))))
            .collect::<Result<Vec<_>>>()?;
        let server = match &self.server {
            Some(path) => read(path)?,
            None => stub_server(&actions),
        };
        let client = match &self.client {
            Some(path) => read(path)?,
            None => DEFAULT_CLIENT.to_string(),
        };
        Ok(Sources {
            server,
            client,
            render: Capture::new(read(&self.render)?),
            actions,
        })
    }

    pub async fn run(self, settings: &Settings) -> Result<()> {
        let sources = self.load()?;
        let factory = session_factory(sources, settings.capture.clone(), settings.worker.clone());
        let mut playback = Playback::start(Arc::new(factory), settings.playback.clone()).await;
        print_session(&playback);

        if self.auto || settings.playback.auto_play {
            auto_play(&playback).await;
        }

        println!("{}", HELP);
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            match parse_command(&line) {
                Ok(None) => continue,
                Ok(Some(Command::Quit)) => break,
                Ok(Some(command)) => execute(&mut playback, command).await,
                Err(message) => println!("{}", message),
            }
        }
        info!("replay finished");
        Ok(())
    }
}

async fn auto_play(playback: &Playback) {
    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };
    let revealed = playback.play(&cancel).await;
    interrupt.abort();
    println!("auto-play revealed {} rows", revealed);
    print!("{}", format_log(&playback.session().timeline().snapshot()));
}

async fn execute(playback: &mut Playback, command: Command) {
    match command {
        Command::Step => {
            if playback.step() {
                let snapshot = playback.session().timeline().snapshot();
                if let Some((entry, row)) = last_revealed(&snapshot) {
                    println!("[{}] {}", entry, row);
                }
            } else {
                println!("nothing to reveal");
            }
        }
        Command::Skip => println!("revealed {} rows", playback.skip()),
        Command::Tree => print!("{}", format_tree(&playback.session().timeline().snapshot())),
        Command::Log => print!("{}", format_log(&playback.session().timeline().snapshot())),
        Command::Action { name, payload } => {
            match playback.session().add_raw_action(&name, &payload).await {
                Ok(_) => println!("added entry {}", playback.session().timeline().len() - 1),
                Err(err) => println!("{}", err),
            }
        }
        Command::Call { row, args } => call_reference(playback, row, args),
        Command::Delete(index) => {
            if playback.session().timeline().delete_entry(index) {
                println!("deleted entry {}", index);
            } else {
                println!("entry {} cannot be deleted", index);
            }
        }
        Command::Reset => {
            playback.reset().await;
            print_session(playback);
        }
        Command::Help => println!("{}", HELP),
        Command::Quit => {}
    }
    println!("{}", format_status(&playback.session().timeline().snapshot()));
}

/// Invoke a server reference from the newest decoded entry that has it. The
/// call resolves once its own entry is stepped through, so it runs detached.
fn call_reference(playback: &Playback, row: u32, args: Vec<Value>) {
    let snapshot = playback.session().timeline().snapshot();
    let target = snapshot.entries.iter().rev().find_map(|entry| {
        let model = entry.decoded.clone().now_or_never()?.ok()?;
        let reference = model.server_reference(row)?;
        Some((model, reference))
    });
    let Some((model, reference)) = target else {
        println!("no server reference at row {:x}", row);
        return;
    };
    println!("calling {}", reference.name());
    tokio::spawn(async move {
        match model.call_server_reference(row, args).await {
            Ok(_) => info!(action = %reference.id, "server reference resolved"),
            Err(err) => warn!(action = %reference.id, error = %err, "server reference failed"),
        }
    });
}
