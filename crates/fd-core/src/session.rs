// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Binds a timeline to the compiler, sandbox and decoder collaborators.
//!
//! A session is built once per pair of sources. Creation compiles both
//! snippets, deploys the server code, requests the initial render and installs
//! it as the timeline's render entry. After that the session only grows: each
//! server action invoked from the decoded UI (or injected by hand) appends a
//! new action entry. Dropping the session terminates its sandbox.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::FutureExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chunk_buffer::ChunkBuffer;
use crate::compiler::{ClientManifest, Compiler};
use crate::decoder::{CallServer, DecodeOptions, FlightDecoder};
use crate::error::{DecodeError, SessionError};
use crate::registry::ClientModuleRegistry;
use crate::sandbox::{EncodedArgs, Sandbox};
use crate::stream::{self, ByteStream};
use crate::timeline::Timeline;

/// Module id under which the client snippet is registered.
pub const CLIENT_MODULE_ID: &str = "client";

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Ready { available_actions: Vec<String> },
    Error { message: String },
}

/// The collaborators a session is built from.
#[derive(Clone)]
pub struct SessionParts {
    pub compiler: Arc<dyn Compiler>,
    pub sandbox: Arc<dyn Sandbox>,
    pub decoder: Arc<dyn FlightDecoder>,
}

struct Prepared {
    actions: Vec<String>,
    manifest: ClientManifest,
    modules: ClientModuleRegistry,
    render: ByteStream,
}

pub struct WorkspaceSession {
    id: u64,
    status: SessionStatus,
    timeline: Arc<Timeline>,
    sandbox: Arc<dyn Sandbox>,
    decoder: Arc<dyn FlightDecoder>,
    modules: ClientModuleRegistry,
    manifest: ClientManifest,
    weak_self: Weak<WorkspaceSession>,
}

impl std::fmt::Debug for WorkspaceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceSession")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("timeline", &self.timeline)
            .finish()
    }
}

impl WorkspaceSession {
    /// Build a session. Failures never escape: they produce a session in the
    /// error state whose sandbox is still released on drop.
    pub async fn create(
        server_source: &str,
        client_source: &str,
        parts: SessionParts,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let SessionParts {
            compiler,
            sandbox,
            decoder,
        } = parts;

        let prepared = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SessionError::Cancelled),
            prepared = prepare(
                compiler.as_ref(),
                sandbox.as_ref(),
                server_source,
                client_source,
            ) => prepared,
        };
        let prepared = match prepared {
            Ok(_) if cancel.is_cancelled() => Err(SessionError::Cancelled),
            other => other,
        };

        let Prepared {
            actions,
            manifest,
            modules,
            render,
        } = match prepared {
            Ok(prepared) => prepared,
            Err(err) => {
                if matches!(err, SessionError::Cancelled) {
                    sandbox.terminate();
                }
                warn!(error = %err, "session creation failed");
                return Arc::new_cyclic(|weak_self| Self {
                    id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
                    status: SessionStatus::Error {
                        message: err.to_string(),
                    },
                    timeline: Timeline::new(),
                    sandbox,
                    decoder,
                    modules: ClientModuleRegistry::new(),
                    manifest: ClientManifest::new(),
                    weak_self: weak_self.clone(),
                });
            }
        };

        let session = Arc::new_cyclic(|weak_self| Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            status: SessionStatus::Ready {
                available_actions: actions,
            },
            timeline: Timeline::new(),
            sandbox,
            decoder,
            modules,
            manifest,
            weak_self: weak_self.clone(),
        });
        let buffer = ChunkBuffer::new(render, session.decoder.as_ref(), session.decode_options());
        if let Err(err) = session.timeline.set_render(buffer) {
            // A fresh timeline is always empty.
            warn!(error = %err, "render entry rejected");
        }
        info!(session = session.id, "session ready");
        session
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.status, SessionStatus::Ready { .. })
    }

    pub fn available_actions(&self) -> &[String] {
        match &self.status {
            SessionStatus::Ready { available_actions } => available_actions,
            SessionStatus::Error { .. } => &[],
        }
    }

    pub fn timeline(&self) -> &Arc<Timeline> {
        &self.timeline
    }

    pub fn manifest(&self) -> &ClientManifest {
        &self.manifest
    }

    pub fn modules(&self) -> &ClientModuleRegistry {
        &self.modules
    }

    fn decode_options(&self) -> DecodeOptions {
        DecodeOptions {
            call_server: Some(call_server_callback(self.weak_self.clone())),
            modules: Some(self.modules.clone()),
        }
    }

    /// Invoke an action and append its stream to the timeline. A rejected
    /// call becomes an entry whose stream errors immediately. A session in the
    /// error state has no render entry, so it refuses actions outright.
    async fn run_action(
        &self,
        action_name: &str,
        args: EncodedArgs,
        args_display: String,
    ) -> Result<Arc<ChunkBuffer>, SessionError> {
        if let SessionStatus::Error { message } = &self.status {
            return Err(SessionError::NotReady(message.clone()));
        }
        let source = match self.sandbox.call_action(action_name, args).await {
            Ok(source) => source,
            Err(err) => {
                warn!(action = action_name, error = %err, "action call rejected");
                stream::failed(err.into())
            }
        };
        let buffer = ChunkBuffer::new(source, self.decoder.as_ref(), self.decode_options());
        self.timeline.add_action(action_name, args_display, buffer.clone());
        Ok(buffer)
    }

    /// Decoder-facing callback: invoke the action named by `action_id`
    /// (`<name>#<export>`) with real arguments.
    pub async fn call_server(
        &self,
        action_id: &str,
        args: Vec<Value>,
    ) -> Result<Arc<ChunkBuffer>, SessionError> {
        let action_name = action_id.split('#').next().unwrap_or(action_id);
        let encoded = EncodedArgs::encode(&args);
        let display = encoded.display();
        debug!(action = action_name, "calling server action");
        self.run_action(action_name, encoded, display).await
    }

    /// Invoke an action with a hand-written form-data payload.
    pub async fn add_raw_action(
        &self,
        action_name: &str,
        raw_payload: &str,
    ) -> Result<Arc<ChunkBuffer>, SessionError> {
        self.run_action(
            action_name,
            EncodedArgs::FormData(raw_payload.to_string()),
            raw_payload.to_string(),
        )
        .await
    }
}

impl Drop for WorkspaceSession {
    fn drop(&mut self) {
        debug!(session = self.id, "session dropped");
        self.sandbox.terminate();
    }
}

fn call_server_callback(session: Weak<WorkspaceSession>) -> CallServer {
    Arc::new(move |action_id: String, args: Vec<Value>| {
        let session = session.clone();
        async move {
            let decoded = {
                let session = session
                    .upgrade()
                    .ok_or_else(|| DecodeError::Action("session closed".into()))?;
                session
                    .call_server(&action_id, args)
                    .await
                    .map_err(|err| DecodeError::Action(err.to_string()))?
                    .decoded()
            };
            decoded.await
        }
        .boxed()
    })
}

async fn prepare(
    compiler: &dyn Compiler,
    sandbox: &dyn Sandbox,
    server_source: &str,
    client_source: &str,
) -> Result<Prepared, SessionError> {
    let exports = compiler.parse_client_module(client_source)?;
    let manifest = compiler.build_manifest(CLIENT_MODULE_ID, &exports);
    compiler.compile_to_executable(client_source)?;
    let modules = ClientModuleRegistry::new();
    modules.register(CLIENT_MODULE_ID, exports);

    let actions = compiler.parse_server_actions(server_source)?;
    let compiled_server = compiler.compile_to_executable(server_source)?;

    sandbox.deploy(&compiled_server, &manifest, &actions).await?;
    let render = sandbox.render().await?;
    debug!(actions = actions.len(), "server deployed and rendered");
    Ok(Prepared {
        actions,
        manifest,
        modules,
        render,
    })
}
