// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! In-process sandbox runtime that replays captured protocol output.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::compiler::ClientManifest;
use crate::config::CaptureConfig;
use crate::error::{SandboxError, StreamError};
use crate::sandbox::{EncodedArgs, Sandbox};
use crate::stream::ByteStream;

const PAYLOAD_HINT: &str = "couldn't parse the request payload. \
    Try triggering a real action first and copying its payload format.";

/// Protocol text recorded from one render or action call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
    pub body: String,
    /// Error to raise after the body has been emitted
    pub error: Option<String>,
}

impl Capture {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            error: None,
        }
    }

    /// End the replayed stream with an error instead of closing it.
    pub fn failing_with(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }
}

/// An action call as the runtime decoded it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub action: String,
    pub args: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct Deployment {
    pub code: String,
    pub manifest: ClientManifest,
    pub action_names: Vec<String>,
}

#[derive(Debug, Default)]
struct State {
    deployed: Option<Deployment>,
    calls: Vec<RecordedCall>,
    terminated: bool,
}

#[derive(Debug)]
pub struct CaptureSandbox {
    render: Capture,
    actions: HashMap<String, Capture>,
    config: CaptureConfig,
    state: Mutex<State>,
}

impl CaptureSandbox {
    pub fn new(render: Capture) -> Self {
        Self {
            render,
            actions: HashMap::new(),
            config: CaptureConfig::default(),
            state: Mutex::new(State::default()),
        }
    }

    pub fn with_action(mut self, name: impl Into<String>, capture: Capture) -> Self {
        self.actions.insert(name.into(), capture);
        self
    }

    pub fn with_config(mut self, config: CaptureConfig) -> Self {
        self.config = config;
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn deployment(&self) -> Option<Deployment> {
        self.lock().deployed.clone()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    pub fn is_terminated(&self) -> bool {
        self.lock().terminated
    }

    fn ensure_deployed(&self) -> Result<(), SandboxError> {
        let state = self.lock();
        if state.terminated {
            return Err(SandboxError::new("Worker terminated"));
        }
        if state.deployed.is_none() {
            return Err(SandboxError::new("No code deployed"));
        }
        Ok(())
    }

    fn replay(&self, capture: &Capture) -> ByteStream {
        let chunks = split_chunks(&capture.body, self.config.chunk_size);
        let delay = self.config.chunk_delay();
        let error = capture.error.clone();
        Box::pin(async_stream::stream! {
            for chunk in chunks {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(chunk);
            }
            if let Some(message) = error {
                yield Err(StreamError::new(message));
            }
        })
    }
}

/// One chunk per row when `chunk_size` is 0, otherwise fixed-size byte chunks.
fn split_chunks(body: &str, chunk_size: usize) -> Vec<Vec<u8>> {
    if chunk_size == 0 {
        body.split_inclusive('\n')
            .map(|row| row.as_bytes().to_vec())
            .collect()
    } else {
        body.as_bytes()
            .chunks(chunk_size)
            .map(<[u8]>::to_vec)
            .collect()
    }
}

/// Decode action arguments the way a server reply decoder would.
pub fn decode_args(args: &EncodedArgs) -> Result<Vec<Value>, SandboxError> {
    let hint = |detail: Option<String>| {
        let mut message = PAYLOAD_HINT.to_string();
        if let Some(detail) = detail {
            message.push_str("\n\n");
            message.push_str(&detail);
        }
        SandboxError::new(message)
    };

    let root = match args {
        EncodedArgs::String(data) => data.clone(),
        EncodedArgs::FormData(data) => url::form_urlencoded::parse(data.as_bytes())
            .find(|(key, _)| key == "0")
            .map(|(_, value)| value.into_owned())
            .ok_or_else(|| hint(None))?,
    };
    let decoded: Value =
        serde_json::from_str(&root).map_err(|e| hint(Some(format!("SyntaxError: {}", e))))?;
    Ok(match decoded {
        Value::Array(items) => items,
        other => vec![other],
    })
}

#[async_trait]
impl Sandbox for CaptureSandbox {
    async fn deploy(
        &self,
        code: &str,
        manifest: &ClientManifest,
        action_names: &[String],
    ) -> Result<(), SandboxError> {
        let mut state = self.lock();
        if state.terminated {
            return Err(SandboxError::new("Worker terminated"));
        }
        info!(actions = action_names.len(), "deploying captured runtime");
        state.deployed = Some(Deployment {
            code: code.to_string(),
            manifest: manifest.clone(),
            action_names: action_names.to_vec(),
        });
        Ok(())
    }

    async fn render(&self) -> Result<ByteStream, SandboxError> {
        self.ensure_deployed()?;
        Ok(self.replay(&self.render))
    }

    async fn call_action(
        &self,
        action_id: &str,
        args: EncodedArgs,
    ) -> Result<ByteStream, SandboxError> {
        self.ensure_deployed()?;
        let capture = self
            .actions
            .get(action_id)
            .ok_or_else(|| SandboxError::new(format!("Action \"{}\" not found", action_id)))?;
        let args = decode_args(&args)?;
        debug!(action = action_id, args = args.len(), "replaying action");
        self.lock().calls.push(RecordedCall {
            action: action_id.to_string(),
            args,
        });
        Ok(self.replay(capture))
    }

    fn terminate(&self) {
        let mut state = self.lock();
        if !state.terminated {
            debug!("capture sandbox terminated");
            state.terminated = true;
        }
    }
}
