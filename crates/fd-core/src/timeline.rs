// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! One global step index over a sequence of independently growing buffers.
//!
//! The timeline owns a render entry followed by any number of action entries
//! and a single cursor counting the rows revealed across all of them. Derived
//! state is exposed through an immutable [`TimelineSnapshot`] that is cached
//! until the next mutation, so repeated reads return the same `Arc`.
//!
//! Rows are always revealed in entry order: while an entry is still streaming
//! and every row it has produced so far is released, stepping waits for it
//! instead of moving on to the next entry.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::chunk_buffer::ChunkBuffer;
use crate::decoder::DecodedHandle;
use crate::error::{StreamError, TimelineError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    Render,
    Action { name: String, args: String },
}

/// Derived view of one entry.
#[derive(Clone)]
pub struct EntryView {
    pub kind: EntryKind,
    pub rows: Vec<Arc<str>>,
    pub decoded: DecodedHandle,
    pub error: Option<StreamError>,
    pub chunk_start: usize,
    pub chunk_count: usize,
    pub can_delete: bool,
    pub is_active: bool,
    pub is_done: bool,
    pub is_streaming: bool,
}

impl EntryView {
    pub fn chunk_end(&self) -> usize {
        self.chunk_start + self.chunk_count
    }

    /// Rows of this entry already revealed by the global cursor.
    pub fn revealed(&self, cursor: usize) -> usize {
        cursor.saturating_sub(self.chunk_start).min(self.chunk_count)
    }
}

impl std::fmt::Debug for EntryView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryView")
            .field("kind", &self.kind)
            .field("chunk_start", &self.chunk_start)
            .field("chunk_count", &self.chunk_count)
            .field("can_delete", &self.can_delete)
            .field("is_active", &self.is_active)
            .field("is_done", &self.is_done)
            .field("is_streaming", &self.is_streaming)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct TimelineSnapshot {
    pub entries: Vec<EntryView>,
    pub cursor: usize,
    pub total_chunks: usize,
    pub is_at_start: bool,
    pub is_at_end: bool,
    pub is_streaming: bool,
}

/// Coarse lifecycle of a timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelinePhase {
    Empty,
    Rendering,
    Interactive,
}

struct Entry {
    kind: EntryKind,
    buffer: Arc<ChunkBuffer>,
    watcher: JoinHandle<()>,
}

impl Drop for Entry {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

#[derive(Default)]
struct State {
    entries: Vec<Entry>,
    cursor: usize,
    cached: Option<Arc<TimelineSnapshot>>,
}

/// Where the cursor sits relative to the entries.
enum Position {
    /// Inside entry `index`, `local` rows into it, `count` rows buffered.
    Within {
        index: usize,
        local: usize,
        count: usize,
    },
    /// Every buffered row up to a still-streaming entry is revealed.
    Waiting,
    End,
}

impl State {
    fn position(&self) -> Position {
        let mut remaining = self.cursor;
        for (index, entry) in self.entries.iter().enumerate() {
            let progress = entry.buffer.progress_now();
            if remaining < progress.rows {
                return Position::Within {
                    index,
                    local: remaining,
                    count: progress.rows,
                };
            }
            if !progress.done {
                return Position::Waiting;
            }
            remaining -= progress.rows;
        }
        Position::End
    }

    fn chunk_start(&self, index: usize) -> usize {
        self.entries[..index]
            .iter()
            .map(|e| e.buffer.row_count())
            .sum()
    }

    fn compute(&self) -> TimelineSnapshot {
        let cursor = self.cursor;
        let mut chunk_start = 0;
        let mut is_streaming = false;
        let entries = self
            .entries
            .iter()
            .map(|entry| {
                let buffer = &entry.buffer;
                let rows = buffer.rows();
                let done = buffer.is_done();
                let chunk_count = rows.len();
                let chunk_end = chunk_start + chunk_count;
                is_streaming |= !done;
                let view = EntryView {
                    kind: entry.kind.clone(),
                    rows,
                    decoded: buffer.decoded(),
                    error: buffer.error(),
                    chunk_start,
                    chunk_count,
                    can_delete: cursor <= chunk_start,
                    is_active: cursor >= chunk_start && cursor < chunk_end,
                    is_done: cursor >= chunk_end,
                    is_streaming: !done,
                };
                chunk_start = chunk_end;
                view
            })
            .collect();
        TimelineSnapshot {
            entries,
            cursor,
            total_chunks: chunk_start,
            is_at_start: cursor == 0,
            is_at_end: cursor >= chunk_start,
            is_streaming,
        }
    }
}

type Listener = Arc<dyn Fn() + Send + Sync>;

/// Handle returned by [`Timeline::subscribe`]; dropping it unsubscribes.
pub struct Subscription {
    timeline: Weak<Timeline>,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(timeline) = self.timeline.upgrade() {
            let mut listeners = timeline.listeners.lock().unwrap_or_else(|e| e.into_inner());
            listeners.entries.remove(&self.id);
        }
    }
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: BTreeMap<u64, Listener>,
}

pub struct Timeline {
    state: Mutex<State>,
    listeners: Mutex<Listeners>,
    changes: watch::Sender<u64>,
    weak_self: Weak<Timeline>,
}

impl std::fmt::Debug for Timeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Timeline")
            .field("entries", &state.entries.len())
            .field("cursor", &state.cursor)
            .finish()
    }
}

impl Timeline {
    pub fn new() -> Arc<Self> {
        let (changes, _) = watch::channel(0);
        Arc::new_cyclic(|weak_self| Self {
            state: Mutex::new(State::default()),
            listeners: Mutex::new(Listeners::default()),
            changes,
            weak_self: weak_self.clone(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Drop the cached snapshot and tell everyone who is listening.
    fn notify(&self) {
        self.lock().cached = None;
        self.changes.send_modify(|revision| *revision += 1);
        let listeners: Vec<Listener> = {
            let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
            listeners.entries.values().cloned().collect()
        };
        for listener in listeners {
            listener();
        }
    }

    /// Register a change listener. Listeners may read the snapshot.
    pub fn subscribe(&self, listener: impl Fn() + Send + Sync + 'static) -> Subscription {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.entries.insert(id, Arc::new(listener));
        Subscription {
            timeline: self.weak_self.clone(),
            id,
        }
    }

    /// Change counter, bumped on every mutation or buffer progress.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    pub fn snapshot(&self) -> Arc<TimelineSnapshot> {
        let mut state = self.lock();
        if let Some(cached) = &state.cached {
            return cached.clone();
        }
        let snapshot = Arc::new(state.compute());
        state.cached = Some(snapshot.clone());
        snapshot
    }

    pub fn cursor(&self) -> usize {
        self.lock().cursor
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn buffer(&self, index: usize) -> Option<Arc<ChunkBuffer>> {
        self.lock().entries.get(index).map(|e| e.buffer.clone())
    }

    pub fn phase(&self) -> TimelinePhase {
        let state = self.lock();
        match state.entries.first() {
            None => TimelinePhase::Empty,
            Some(render) => {
                let progress = render.buffer.progress_now();
                if progress.done && state.cursor >= progress.rows {
                    TimelinePhase::Interactive
                } else {
                    TimelinePhase::Rendering
                }
            }
        }
    }

    fn watch(&self, buffer: &Arc<ChunkBuffer>) -> JoinHandle<()> {
        let mut progress = buffer.progress();
        let timeline = self.weak_self.clone();
        tokio::spawn(async move {
            while progress.changed().await.is_ok() {
                let Some(timeline) = timeline.upgrade() else {
                    break;
                };
                timeline.notify();
                if progress.borrow().done {
                    break;
                }
            }
        })
    }

    /// Install the render entry. Only valid while the timeline is empty.
    pub fn set_render(&self, buffer: Arc<ChunkBuffer>) -> Result<(), TimelineError> {
        {
            let mut state = self.lock();
            if !state.entries.is_empty() {
                return Err(TimelineError::RenderAlreadySet);
            }
            let watcher = self.watch(&buffer);
            state.entries.push(Entry {
                kind: EntryKind::Render,
                buffer,
                watcher,
            });
            state.cursor = 0;
        }
        debug!("render entry set");
        self.notify();
        Ok(())
    }

    /// Append an action entry. The cursor does not move.
    pub fn add_action(
        &self,
        name: impl Into<String>,
        args: impl Into<String>,
        buffer: Arc<ChunkBuffer>,
    ) {
        let index = {
            let mut state = self.lock();
            let watcher = self.watch(&buffer);
            state.entries.push(Entry {
                kind: EntryKind::Action {
                    name: name.into(),
                    args: args.into(),
                },
                buffer,
                watcher,
            });
            state.entries.len() - 1
        };
        debug!(entry = index, "action entry added");
        self.notify();
    }

    /// Remove an entry the cursor has not reached yet.
    ///
    /// Returns `false` (and changes nothing) for an unknown index or an entry
    /// whose first row is already revealed.
    pub fn delete_entry(&self, index: usize) -> bool {
        let removed = {
            let mut state = self.lock();
            if index >= state.entries.len() || state.cursor > state.chunk_start(index) {
                return false;
            }
            state.entries.remove(index)
        };
        debug!(entry = index, "entry deleted");
        drop(removed);
        self.notify();
        true
    }

    /// Reveal exactly one more row. Returns whether a row was revealed.
    pub fn step_forward(&self) -> bool {
        {
            let mut state = self.lock();
            let Position::Within { index, local, .. } = state.position() else {
                return false;
            };
            state.entries[index].buffer.release(local + 1);
            state.cursor += 1;
            trace!(entry = index, cursor = state.cursor, "stepped");
        }
        self.notify();
        true
    }

    /// Reveal every buffered row of the entry under the cursor. Returns the
    /// number of rows revealed.
    pub fn skip_to_entry_end(&self) -> usize {
        let revealed = {
            let mut state = self.lock();
            let Position::Within { index, local, count } = state.position() else {
                return 0;
            };
            state.entries[index].buffer.release(count);
            state.cursor += count - local;
            trace!(entry = index, cursor = state.cursor, "skipped to entry end");
            count - local
        };
        self.notify();
        revealed
    }

    /// Remove every entry and rewind the cursor.
    pub fn clear(&self) {
        let removed = {
            let mut state = self.lock();
            state.cursor = 0;
            std::mem::take(&mut state.entries)
        };
        drop(removed);
        self.notify();
    }
}
