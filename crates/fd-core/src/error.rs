// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error taxonomy shared by the engine and its collaborators.

use thiserror::Error;

/// Source violates the directive rules for its side of the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DirectiveError {
    pub message: String,
}

impl DirectiveError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Failure reported by the compiler collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error(transparent)]
    Directive(#[from] DirectiveError),
    #[error("{message} (line {line})")]
    Syntax { message: String, line: usize },
}

/// A rejected sandbox RPC (deploy, render or action).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SandboxError {
    pub message: String,
    pub stack: Option<String>,
}

impl SandboxError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

/// A raw byte stream that terminated abnormally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct StreamError {
    pub message: String,
}

impl StreamError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<SandboxError> for StreamError {
    fn from(err: SandboxError) -> Self {
        Self {
            message: err.message,
        }
    }
}

/// Rejection of a decoded-result handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("{0}")]
    Stream(StreamError),
    #[error("Connection closed.")]
    ConnectionClosed,
    #[error("{0}")]
    Server(String),
    #[error("malformed row {row:?}: {reason}")]
    MalformedRow { row: String, reason: String },
    #[error("{0}")]
    Action(String),
}

impl From<StreamError> for DecodeError {
    fn from(err: StreamError) -> Self {
        Self::Stream(err)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimelineError {
    #[error("timeline already has a render entry")]
    RenderAlreadySet,
}

/// Reasons a session ends up in the error state.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
    #[error("Session creation cancelled")]
    Cancelled,
    /// An action was requested on a session that failed to build.
    #[error("Session is not ready: {0}")]
    NotReady(String),
}

impl From<DirectiveError> for SessionError {
    fn from(err: DirectiveError) -> Self {
        Self::Compile(CompileError::Directive(err))
    }
}
