// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Execution sandbox collaborator.
//!
//! A sandbox evaluates deployed server code and answers render and action
//! calls with protocol byte streams. Each `WorkspaceSession` owns exactly one
//! sandbox instance and terminates it when the session goes away.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::compiler::ClientManifest;
use crate::error::SandboxError;
use crate::stream::ByteStream;

/// Action arguments in a form that can cross an execution-context boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum EncodedArgs {
    /// URL-encoded `key=value` pairs of a form-data payload
    FormData(String),
    /// An already-encoded reply string
    String(String),
}

impl EncodedArgs {
    /// Encode real call arguments as a JSON reply string.
    pub fn encode(args: &[Value]) -> Self {
        EncodedArgs::String(Value::Array(args.to_vec()).to_string())
    }

    /// Human-readable form shown next to the timeline entry.
    pub fn display(&self) -> String {
        match self {
            EncodedArgs::String(data) => format!("0={}", data),
            EncodedArgs::FormData(data) => data.clone(),
        }
    }
}

#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Load compiled server code and the client manifest.
    async fn deploy(
        &self,
        code: &str,
        manifest: &ClientManifest,
        action_names: &[String],
    ) -> Result<(), SandboxError>;

    /// Render the deployed root component.
    async fn render(&self) -> Result<ByteStream, SandboxError>;

    /// Invoke a deployed server action.
    async fn call_action(&self, action_id: &str, args: EncodedArgs)
        -> Result<ByteStream, SandboxError>;

    /// Tear the instance down. Pending and later calls fail.
    fn terminate(&self);
}
