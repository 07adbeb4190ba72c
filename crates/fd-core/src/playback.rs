// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Step, skip and reset controls over the current session.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::compiler::Compiler;
use crate::config::PlaybackConfig;
use crate::decoder::FlightDecoder;
use crate::sandbox::Sandbox;
use crate::session::{SessionParts, WorkspaceSession};

/// Produces fresh sessions for the same sources.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(&self, cancel: CancellationToken) -> Arc<WorkspaceSession>;
}

/// Builds each session from fixed sources with a brand-new sandbox.
pub struct SourceSessionFactory {
    pub server_source: String,
    pub client_source: String,
    pub compiler: Arc<dyn Compiler>,
    pub decoder: Arc<dyn FlightDecoder>,
    pub sandbox: Box<dyn Fn() -> Arc<dyn Sandbox> + Send + Sync>,
}

#[async_trait]
impl SessionFactory for SourceSessionFactory {
    async fn create(&self, cancel: CancellationToken) -> Arc<WorkspaceSession> {
        let parts = SessionParts {
            compiler: self.compiler.clone(),
            sandbox: (self.sandbox)(),
            decoder: self.decoder.clone(),
        };
        WorkspaceSession::create(&self.server_source, &self.client_source, parts, cancel).await
    }
}

/// Thin controls; all state lives in the session's timeline.
pub struct Playback {
    factory: Arc<dyn SessionFactory>,
    session: Arc<WorkspaceSession>,
    config: PlaybackConfig,
}

impl Playback {
    pub async fn start(factory: Arc<dyn SessionFactory>, config: PlaybackConfig) -> Self {
        let session = factory.create(CancellationToken::new()).await;
        Self {
            factory,
            session,
            config,
        }
    }

    pub fn session(&self) -> &Arc<WorkspaceSession> {
        &self.session
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    /// Reveal one row.
    pub fn step(&self) -> bool {
        self.session.timeline().step_forward()
    }

    /// Reveal the rest of the current entry.
    pub fn skip(&self) -> usize {
        self.session.timeline().skip_to_entry_end()
    }

    /// Replace the session with a fresh one; the old one (and its sandbox)
    /// is released.
    pub async fn reset(&mut self) {
        let fresh = self.factory.create(CancellationToken::new()).await;
        info!(old = self.session.id(), new = fresh.id(), "playback reset");
        self.session = fresh;
    }

    /// Step on the configured interval until everything is revealed and no
    /// entry is still streaming, or until `cancel` fires. Returns the number
    /// of rows revealed.
    pub async fn play(&self, cancel: &CancellationToken) -> usize {
        let timeline = self.session.timeline().clone();
        let mut changes = timeline.changes();
        let mut revealed = 0;
        loop {
            if cancel.is_cancelled() {
                break;
            }
            if timeline.step_forward() {
                revealed += 1;
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.config.step_interval()) => {}
                }
                continue;
            }
            let snapshot = timeline.snapshot();
            if snapshot.is_at_end && !snapshot.is_streaming {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = changes.changed() => if changed.is_err() { break },
            }
        }
        debug!(revealed, "playback stopped");
        revealed
    }
}
