// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Flight Deck core: a stepping/playback engine for server-driven UI
//! protocol streams.
//!
//! The engine buffers each protocol stream in a [`ChunkBuffer`] that releases
//! rows to the decoder only on demand, stitches the buffers of one session
//! into a single [`Timeline`] with a global cursor, and lets a
//! [`WorkspaceSession`] grow that timeline whenever the decoded UI invokes a
//! server action.
//!
//! Collaborators sit behind traits: [`Compiler`] (with the lexical
//! [`DirectiveScanner`]), [`Sandbox`] (with the in-process [`CaptureSandbox`]
//! and the channel-hosted [`WorkerSandbox`]) and [`FlightDecoder`] (with the
//! [`RowDecoder`]).

pub mod capture;
pub mod chunk_buffer;
pub mod compiler;
pub mod config;
pub mod decoder;
pub mod error;
pub mod model;
pub mod playback;
pub mod registry;
pub mod sandbox;
pub mod session;
pub mod stream;
pub mod timeline;
pub mod tree;
pub mod worker;

pub use capture::{Capture, CaptureSandbox, RecordedCall};
pub use chunk_buffer::{ChunkBuffer, Progress};
pub use compiler::{build_manifest, ClientManifest, Compiler, DirectiveScanner, ManifestEntry};
pub use config::{CaptureConfig, PlaybackConfig, WorkerConfig};
pub use decoder::{
    CallServer, DecodeOptions, DecodeResult, DecodedHandle, FlightDecoder, RowDecoder,
};
pub use error::{
    CompileError, DecodeError, DirectiveError, SandboxError, SessionError, StreamError,
    TimelineError,
};
pub use model::{FlightElement, FlightModel, FlightValue, Row, ServerReference};
pub use playback::{Playback, SessionFactory, SourceSessionFactory};
pub use registry::ClientModuleRegistry;
pub use sandbox::{EncodedArgs, Sandbox};
pub use session::{SessionParts, SessionStatus, WorkspaceSession};
pub use stream::ByteStream;
pub use timeline::{EntryKind, EntryView, Subscription, Timeline, TimelinePhase, TimelineSnapshot};
pub use tree::{render_decoded, render_tree};
pub use worker::{WorkerRequest, WorkerResponse, WorkerSandbox};
