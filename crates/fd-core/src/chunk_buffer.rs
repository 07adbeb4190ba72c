// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Buffered, step-controlled view of one protocol stream.
//!
//! A [`ChunkBuffer`] drains its raw source eagerly in a background task and
//! splits it into newline-delimited rows, but forwards rows to the decoder
//! only when [`ChunkBuffer::release`] asks for them. Row appends, the `done`
//! flip and releases all happen under one lock, so the decode-facing output
//! is closed exactly once and never before every row has been forwarded.

use std::sync::{Arc, Mutex, MutexGuard};

use futures::channel::mpsc;
use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::decoder::{DecodeOptions, DecodedHandle, FlightDecoder};
use crate::error::StreamError;
use crate::stream::ByteStream;

type OutputSender = mpsc::UnboundedSender<Result<Vec<u8>, StreamError>>;

/// Observable drain progress of a buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub rows: usize,
    pub done: bool,
}

#[derive(Debug)]
struct State {
    rows: Vec<Arc<str>>,
    released: usize,
    done: bool,
    error: Option<StreamError>,
    /// Present until the output stream has been closed or errored.
    output: Option<OutputSender>,
}

impl State {
    fn maybe_close(&mut self) {
        if !self.done || self.released < self.rows.len() {
            return;
        }
        if let Some(output) = self.output.take() {
            match &self.error {
                Some(err) => {
                    debug!(error = %err, rows = self.rows.len(), "erroring decoder output");
                    let _ = output.unbounded_send(Err(err.clone()));
                }
                None => debug!(rows = self.rows.len(), "closing decoder output"),
            }
        }
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    progress: watch::Sender<Progress>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn append(&self, rows: Vec<String>) {
        if rows.is_empty() {
            return;
        }
        let total = {
            let mut state = self.lock();
            state.rows.extend(rows.into_iter().map(Arc::from));
            state.rows.len()
        };
        trace!(rows = total, "rows buffered");
        self.progress.send_modify(|p| p.rows = total);
    }

    fn finish(&self, error: Option<StreamError>) {
        let total = {
            let mut state = self.lock();
            state.done = true;
            state.error = error;
            state.maybe_close();
            state.rows.len()
        };
        self.progress.send_replace(Progress {
            rows: total,
            done: true,
        });
    }
}

/// One protocol stream segment with caller-controlled release.
pub struct ChunkBuffer {
    shared: Arc<Shared>,
    decoded: DecodedHandle,
}

impl std::fmt::Debug for ChunkBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("ChunkBuffer")
            .field("rows", &state.rows.len())
            .field("released", &state.released)
            .field("done", &state.done)
            .field("error", &state.error)
            .finish()
    }
}

impl ChunkBuffer {
    /// Wrap `source`, hand the decode-facing output to `decoder`, and start
    /// draining in the background. Must be called within a tokio runtime.
    pub fn new(
        source: ByteStream,
        decoder: &dyn FlightDecoder,
        options: DecodeOptions,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded();
        let (progress, _) = watch::channel(Progress::default());
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                rows: Vec::new(),
                released: 0,
                done: false,
                error: None,
                output: Some(tx),
            }),
            progress,
        });
        let decoded = decoder.decode(rx.boxed(), options);
        tokio::spawn(drain(source, shared.clone()));
        Arc::new(Self { shared, decoded })
    }

    /// Forward rows up to `count` (exclusive) to the decoder.
    ///
    /// Idempotent and monotonic: counts at or below the released count do
    /// nothing, and rows that have not arrived yet are left for later calls.
    pub fn release(&self, count: usize) {
        let mut state = self.shared.lock();
        let Some(output) = state.output.clone() else {
            return;
        };
        let target = count.min(state.rows.len());
        while state.released < target {
            let row = &state.rows[state.released];
            let mut bytes = Vec::with_capacity(row.len() + 1);
            bytes.extend_from_slice(row.as_bytes());
            bytes.push(b'\n');
            let _ = output.unbounded_send(Ok(bytes));
            state.released += 1;
        }
        trace!(released = state.released, "rows released");
        state.maybe_close();
    }

    /// Decoder's view of everything released so far.
    pub fn decoded(&self) -> DecodedHandle {
        self.decoded.clone()
    }

    pub fn rows(&self) -> Vec<Arc<str>> {
        self.shared.lock().rows.clone()
    }

    pub fn row_count(&self) -> usize {
        self.shared.lock().rows.len()
    }

    pub fn released(&self) -> usize {
        self.shared.lock().released
    }

    pub fn is_done(&self) -> bool {
        self.shared.lock().done
    }

    pub fn error(&self) -> Option<StreamError> {
        self.shared.lock().error.clone()
    }

    /// Whether the decode-facing output has been closed or errored.
    pub fn is_closed(&self) -> bool {
        self.shared.lock().output.is_none()
    }

    /// Consistent `(rows, done)` pair.
    pub fn progress_now(&self) -> Progress {
        let state = self.shared.lock();
        Progress {
            rows: state.rows.len(),
            done: state.done,
        }
    }

    /// Receiver signalled whenever rows arrive or draining finishes.
    pub fn progress(&self) -> watch::Receiver<Progress> {
        self.shared.progress.subscribe()
    }

    /// Wait until at least `rows` rows are buffered or the source is done.
    pub async fn wait_for_rows(&self, rows: usize) -> Progress {
        let mut rx = self.progress();
        let reached = rx.wait_for(|p| p.rows >= rows || p.done).await.map(|p| *p);
        reached.unwrap_or_else(|_| self.progress_now())
    }

    /// Wait until the raw source has been fully drained.
    pub async fn wait_done(&self) -> Progress {
        let mut rx = self.progress();
        let reached = rx.wait_for(|p| p.done).await.map(|p| *p);
        reached.unwrap_or_else(|_| self.progress_now())
    }
}

/// Split complete rows off the front of `partial`, dropping blank ones.
fn take_rows(partial: &mut Vec<u8>) -> Vec<String> {
    let Some(last) = partial.iter().rposition(|b| *b == b'\n') else {
        return Vec::new();
    };
    let complete: Vec<u8> = partial.drain(..=last).collect();
    complete
        .split(|b| *b == b'\n')
        .map(|line| String::from_utf8_lossy(line).into_owned())
        .filter(|line| !line.trim().is_empty())
        .collect()
}

async fn drain(mut source: ByteStream, shared: Arc<Shared>) {
    let mut partial = Vec::new();
    let error = loop {
        match source.next().await {
            Some(Ok(bytes)) => {
                partial.extend_from_slice(&bytes);
                shared.append(take_rows(&mut partial));
            }
            Some(Err(err)) => break Some(err),
            None => break None,
        }
    };

    // A trailing fragment only becomes a row when the source closes cleanly.
    if error.is_none() {
        let tail = String::from_utf8_lossy(&partial).into_owned();
        if !tail.trim().is_empty() {
            shared.append(vec![tail]);
        }
    }
    debug!(error = ?error, "source drained");
    shared.finish(error);
}
