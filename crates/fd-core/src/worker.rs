// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Sandbox hosted in a dedicated background task.
//!
//! The worker and its client exchange serde messages over channels: every
//! request carries a fresh `request_id`, and the worker answers with a stream
//! of `next` responses terminated by `done` or `throw`. The worker announces
//! itself with `ready`; calls made before that wait for it, up to the
//! configured timeout.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::channel::mpsc as stream_mpsc;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::compiler::ClientManifest;
use crate::config::WorkerConfig;
use crate::error::{SandboxError, StreamError};
use crate::sandbox::{EncodedArgs, Sandbox};
use crate::stream::ByteStream;

const TERMINATED: &str = "Worker terminated";

/// Message sent to the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum WorkerRequest {
    Deploy {
        request_id: Uuid,
        code: String,
        manifest: ClientManifest,
        action_names: Vec<String>,
    },
    Render {
        request_id: Uuid,
    },
    Action {
        request_id: Uuid,
        action_id: String,
        args: EncodedArgs,
    },
}

impl WorkerRequest {
    pub fn request_id(&self) -> Uuid {
        match self {
            WorkerRequest::Deploy { request_id, .. }
            | WorkerRequest::Render { request_id }
            | WorkerRequest::Action { request_id, .. } => *request_id,
        }
    }
}

/// Message sent back by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerResponse {
    Ready,
    Next {
        request_id: Uuid,
        value: Vec<u8>,
    },
    Done {
        request_id: Uuid,
    },
    Throw {
        request_id: Uuid,
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stack: Option<String>,
    },
}

type StreamSender = stream_mpsc::UnboundedSender<Result<Vec<u8>, StreamError>>;

enum PendingCall {
    /// No data yet; the call itself is still unresolved.
    Waiting(oneshot::Sender<Result<ByteStream, SandboxError>>),
    Streaming(StreamSender),
}

type PendingMap = Arc<Mutex<HashMap<Uuid, PendingCall>>>;

fn lock(pending: &PendingMap) -> MutexGuard<'_, HashMap<Uuid, PendingCall>> {
    pending.lock().unwrap_or_else(|e| e.into_inner())
}

/// Client side of a worker-hosted sandbox runtime.
pub struct WorkerSandbox {
    requests: mpsc::UnboundedSender<WorkerRequest>,
    pending: PendingMap,
    ready: watch::Receiver<bool>,
    cancel: CancellationToken,
    config: WorkerConfig,
}

impl std::fmt::Debug for WorkerSandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerSandbox")
            .field("ready", &*self.ready.borrow())
            .field("terminated", &self.cancel.is_cancelled())
            .field("pending", &lock(&self.pending).len())
            .finish()
    }
}

impl WorkerSandbox {
    /// Start a worker hosting `runtime`.
    pub fn spawn(runtime: Arc<dyn Sandbox>, config: WorkerConfig) -> Self {
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (resp_tx, resp_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        tokio::spawn(run_worker(runtime, req_rx, resp_tx, cancel.clone()));
        Self::connect(req_tx, resp_rx, config, cancel)
    }

    /// Attach to a worker through raw message channels.
    pub fn connect(
        requests: mpsc::UnboundedSender<WorkerRequest>,
        responses: mpsc::UnboundedReceiver<WorkerResponse>,
        config: WorkerConfig,
        cancel: CancellationToken,
    ) -> Self {
        let pending: PendingMap = Arc::default();
        let (ready_tx, ready) = watch::channel(false);
        tokio::spawn(dispatch(responses, pending.clone(), ready_tx, cancel.clone()));
        Self {
            requests,
            pending,
            ready,
            cancel,
            config,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.cancel.is_cancelled()
    }

    async fn call(&self, request: WorkerRequest) -> Result<ByteStream, SandboxError> {
        if self.cancel.is_cancelled() {
            return Err(SandboxError::new(TERMINATED));
        }

        let mut ready = self.ready.clone();
        let became_ready = async move {
            let outcome = ready.wait_for(|r| *r).await;
            outcome.is_ok()
        };
        let ready_timeout = self.config.ready_timeout();
        tokio::select! {
            _ = self.cancel.cancelled() => return Err(SandboxError::new(TERMINATED)),
            waited = tokio::time::timeout(ready_timeout, became_ready) => match waited {
                Ok(true) => {}
                Ok(false) => return Err(SandboxError::new(TERMINATED)),
                Err(_) => {
                    return Err(SandboxError::new(format!(
                        "Worker did not become ready within {} ms",
                        self.config.ready_timeout_ms
                    )))
                }
            },
        }

        let request_id = request.request_id();
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(request_id, PendingCall::Waiting(tx));
        if self.requests.send(request).is_err() {
            lock(&self.pending).remove(&request_id);
            return Err(SandboxError::new(TERMINATED));
        }
        rx.await
            .unwrap_or_else(|_| Err(SandboxError::new(TERMINATED)))
    }
}

#[async_trait]
impl Sandbox for WorkerSandbox {
    async fn deploy(
        &self,
        code: &str,
        manifest: &ClientManifest,
        action_names: &[String],
    ) -> Result<(), SandboxError> {
        let mut ack = self
            .call(WorkerRequest::Deploy {
                request_id: Uuid::new_v4(),
                code: code.to_string(),
                manifest: manifest.clone(),
                action_names: action_names.to_vec(),
            })
            .await?;
        while let Some(item) = ack.next().await {
            item.map_err(|e| SandboxError::new(e.message))?;
        }
        Ok(())
    }

    async fn render(&self) -> Result<ByteStream, SandboxError> {
        self.call(WorkerRequest::Render {
            request_id: Uuid::new_v4(),
        })
        .await
    }

    async fn call_action(
        &self,
        action_id: &str,
        args: EncodedArgs,
    ) -> Result<ByteStream, SandboxError> {
        self.call(WorkerRequest::Action {
            request_id: Uuid::new_v4(),
            action_id: action_id.to_string(),
            args,
        })
        .await
    }

    fn terminate(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        info!("terminating sandbox worker");
        self.cancel.cancel();
        fail_pending(&self.pending);
    }
}

impl Drop for WorkerSandbox {
    fn drop(&mut self) {
        self.cancel.cancel();
        fail_pending(&self.pending);
    }
}

fn fail_pending(pending: &PendingMap) {
    let calls: Vec<PendingCall> = lock(pending).drain().map(|(_, call)| call).collect();
    for call in calls {
        match call {
            PendingCall::Waiting(tx) => {
                let _ = tx.send(Err(SandboxError::new(TERMINATED)));
            }
            PendingCall::Streaming(tx) => {
                let _ = tx.unbounded_send(Err(StreamError::new(TERMINATED)));
            }
        }
    }
}

/// Route worker responses to the calls waiting for them.
async fn dispatch(
    mut responses: mpsc::UnboundedReceiver<WorkerResponse>,
    pending: PendingMap,
    ready: watch::Sender<bool>,
    cancel: CancellationToken,
) {
    loop {
        let response = tokio::select! {
            _ = cancel.cancelled() => break,
            response = responses.recv() => match response {
                Some(response) => response,
                None => break,
            },
        };
        match response {
            WorkerResponse::Ready => {
                debug!("sandbox worker ready");
                ready.send_replace(true);
            }
            WorkerResponse::Next { request_id, value } => {
                let mut calls = lock(&pending);
                match calls.remove(&request_id) {
                    Some(PendingCall::Waiting(tx)) => {
                        let (stream_tx, stream_rx) = stream_mpsc::unbounded();
                        let _ = stream_tx.unbounded_send(Ok(value));
                        let _ = tx.send(Ok(stream_rx.boxed()));
                        calls.insert(request_id, PendingCall::Streaming(stream_tx));
                    }
                    Some(PendingCall::Streaming(stream_tx)) => {
                        let _ = stream_tx.unbounded_send(Ok(value));
                        calls.insert(request_id, PendingCall::Streaming(stream_tx));
                    }
                    None => warn!(%request_id, "data for unknown request"),
                }
            }
            WorkerResponse::Done { request_id } => match lock(&pending).remove(&request_id) {
                Some(PendingCall::Waiting(tx)) => {
                    let _ = tx.send(Ok(crate::stream::empty()));
                }
                Some(PendingCall::Streaming(_)) => {}
                None => warn!(%request_id, "completion for unknown request"),
            },
            WorkerResponse::Throw {
                request_id,
                error,
                stack,
            } => match lock(&pending).remove(&request_id) {
                Some(PendingCall::Waiting(tx)) => {
                    let mut err = SandboxError::new(error);
                    err.stack = stack;
                    let _ = tx.send(Err(err));
                }
                Some(PendingCall::Streaming(stream_tx)) => {
                    let _ = stream_tx.unbounded_send(Err(StreamError::new(error)));
                }
                None => warn!(%request_id, "error for unknown request"),
            },
        }
    }
    fail_pending(&pending);
}

/// Worker loop: serve requests against `runtime` until cancelled.
async fn run_worker(
    runtime: Arc<dyn Sandbox>,
    mut requests: mpsc::UnboundedReceiver<WorkerRequest>,
    responses: mpsc::UnboundedSender<WorkerResponse>,
    cancel: CancellationToken,
) {
    let _ = responses.send(WorkerResponse::Ready);
    loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => break,
            request = requests.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };
        let runtime = runtime.clone();
        let responses = responses.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = serve(runtime, request, responses) => {}
            }
        });
    }
    runtime.terminate();
    debug!("sandbox worker stopped");
}

async fn serve(
    runtime: Arc<dyn Sandbox>,
    request: WorkerRequest,
    responses: mpsc::UnboundedSender<WorkerResponse>,
) {
    let request_id = request.request_id();
    let outcome = match request {
        WorkerRequest::Deploy {
            code,
            manifest,
            action_names,
            ..
        } => runtime
            .deploy(&code, &manifest, &action_names)
            .await
            .map(|_| crate::stream::empty()),
        WorkerRequest::Render { .. } => runtime.render().await,
        WorkerRequest::Action {
            action_id, args, ..
        } => runtime.call_action(&action_id, args).await,
    };

    let mut stream = match outcome {
        Ok(stream) => stream,
        Err(err) => {
            let _ = responses.send(WorkerResponse::Throw {
                request_id,
                error: err.message,
                stack: err.stack,
            });
            return;
        }
    };
    while let Some(item) = stream.next().await {
        let response = match item {
            Ok(value) => WorkerResponse::Next { request_id, value },
            Err(err) => {
                let _ = responses.send(WorkerResponse::Throw {
                    request_id,
                    error: err.message,
                    stack: None,
                });
                return;
            }
        };
        let _ = responses.send(response);
    }
    let _ = responses.send(WorkerResponse::Done { request_id });
}
