// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fd_core::decoder::{DecodeOptions, DecodedHandle, FlightDecoder};
use fd_core::error::{SandboxError, StreamError};
use fd_core::stream::ByteStream;
use fd_core::ChunkBuffer;
use futures::channel::mpsc;
use futures::{FutureExt, StreamExt};

pub type SourceTx = mpsc::UnboundedSender<Result<Vec<u8>, StreamError>>;

/// A source the test pushes bytes into by hand.
pub fn channel_source() -> (SourceTx, ByteStream) {
    let (tx, rx) = mpsc::unbounded();
    (tx, rx.boxed())
}

pub fn push(tx: &SourceTx, text: &str) {
    tx.unbounded_send(Ok(text.as_bytes().to_vec()))
        .expect("source receiver alive");
}

/// What one decode call has seen of its input so far.
#[derive(Debug, Default, Clone)]
pub struct Captured {
    pub bytes: Vec<u8>,
    /// `Some(Ok)` once closed, `Some(Err)` once errored.
    pub end: Option<Result<(), StreamError>>,
}

impl Captured {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Decoder double that records its input instead of decoding it.
#[derive(Default, Clone)]
pub struct CapturingDecoder {
    calls: Arc<Mutex<Vec<Arc<Mutex<Captured>>>>>,
}

impl CapturingDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn captured(&self, index: usize) -> Captured {
        let calls = self.calls.lock().unwrap();
        let captured = calls[index].lock().unwrap().clone();
        captured
    }

    pub fn decode_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl FlightDecoder for CapturingDecoder {
    fn decode(&self, mut output: ByteStream, _options: DecodeOptions) -> DecodedHandle {
        let captured = Arc::new(Mutex::new(Captured::default()));
        self.calls.lock().unwrap().push(captured.clone());
        tokio::spawn(async move {
            while let Some(item) = output.next().await {
                match item {
                    Ok(bytes) => captured.lock().unwrap().bytes.extend(bytes),
                    Err(err) => {
                        captured.lock().unwrap().end = Some(Err(err));
                        return;
                    }
                }
            }
            captured.lock().unwrap().end = Some(Ok(()));
        });
        futures::future::pending::<fd_core::DecodeResult>().boxed().shared()
    }
}

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Buffer over a closed source holding exactly `body`.
pub async fn drained_buffer(body: &str, decoder: &CapturingDecoder) -> Arc<ChunkBuffer> {
    let source = fd_core::stream::from_chunks(vec![body.as_bytes().to_vec()]);
    let buffer = ChunkBuffer::new(source, decoder, DecodeOptions::default());
    buffer.wait_done().await;
    buffer
}

pub const SERVER_SOURCE: &str = r#"import { Button } from "./client";

export default function App() {
  return <div><Button action={like}>Like</Button></div>;
}

export async function like(count) {
  "use server";
  return count + 1;
}
"#;

pub const CLIENT_SOURCE: &str = r#""use client";

export function Button({ action, children }) {
  return <button onClick={() => action(1)}>{children}</button>;
}
"#;

/// Render output of [`SERVER_SOURCE`], as rows.
pub const RENDER_ROWS: &str = concat!(
    "1:I[\"client\",[],\"Button\"]\n",
    "2:{\"id\":\"like\",\"bound\":[]}\n",
    "0:[\"$\",\"div\",null,{\"children\":",
    "[\"$\",\"$L1\",null,{\"action\":\"$h2\",\"children\":\"Like\"}]}]\n",
);

pub const RENDERED_TREE: &str = "<div>\n  <Button action={[Function: like]}>Like</Button>\n</div>";

pub fn capture_sandbox() -> Arc<fd_core::CaptureSandbox> {
    Arc::new(
        fd_core::CaptureSandbox::new(fd_core::Capture::new(RENDER_ROWS))
            .with_action("like", fd_core::Capture::new("0:{\"count\":6}\n")),
    )
}

pub fn session_parts(sandbox: Arc<fd_core::CaptureSandbox>) -> fd_core::SessionParts {
    fd_core::SessionParts {
        compiler: Arc::new(fd_core::DirectiveScanner::new()),
        sandbox,
        decoder: Arc::new(fd_core::RowDecoder::new()),
    }
}

pub fn parts_with(sandbox: Arc<dyn fd_core::Sandbox>) -> fd_core::SessionParts {
    fd_core::SessionParts {
        compiler: Arc::new(fd_core::DirectiveScanner::new()),
        sandbox,
        decoder: Arc::new(fd_core::RowDecoder::new()),
    }
}

/// How [`ScriptedSandbox`] answers a render request.
#[derive(Debug, Clone, Copy)]
pub enum RenderScript {
    Reject(&'static str),
    /// Never answer.
    Stall,
}

/// Sandbox double that accepts any deployment and scripts the render reply.
pub struct ScriptedSandbox {
    script: RenderScript,
    rendering: AtomicBool,
    terminated: AtomicBool,
}

impl ScriptedSandbox {
    pub fn new(script: RenderScript) -> Arc<Self> {
        Arc::new(Self {
            script,
            rendering: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
        })
    }

    pub fn is_rendering(&self) -> bool {
        self.rendering.load(Ordering::SeqCst)
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl fd_core::Sandbox for ScriptedSandbox {
    async fn deploy(
        &self,
        _code: &str,
        _manifest: &fd_core::ClientManifest,
        _action_names: &[String],
    ) -> Result<(), SandboxError> {
        Ok(())
    }

    async fn render(&self) -> Result<ByteStream, SandboxError> {
        self.rendering.store(true, Ordering::SeqCst);
        match self.script {
            RenderScript::Reject(message) => Err(SandboxError::new(message)),
            RenderScript::Stall => futures::future::pending().await,
        }
    }

    async fn call_action(
        &self,
        action_id: &str,
        _args: fd_core::EncodedArgs,
    ) -> Result<ByteStream, SandboxError> {
        Err(SandboxError::new(format!("unexpected call to {}", action_id)))
    }

    fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
    }
}
