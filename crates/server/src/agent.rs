// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The agent-session capability boundary.
//!
//! The actual agent implementation (message history, model invocation, tool
//! execution) is a black box behind [`AgentSession`]. The server composes
//! against this interface and an injected [`SessionFactory`]; tests plug in
//! mocks from `test_support`.

use std::path::PathBuf;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::command::{AbortKind, CommandKind};

/// Typed failure taxonomy from the downstream capability.
///
/// The circuit breaker classifies failures from these variants instead of
/// substring-matching error messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// The downstream call exceeded its own deadline.
    Timeout(String),
    /// The model provider failed (5xx, overloaded, connection reset).
    Provider(String),
    /// Anything else the session rejected or could not do.
    Failed(String),
}

impl AgentError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Timeout(m) | Self::Provider(m) | Self::Failed(m) => m,
        }
    }
}

impl std::fmt::Display for AgentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout(m) => write!(f, "provider timeout: {m}"),
            Self::Provider(m) => write!(f, "provider error: {m}"),
            Self::Failed(m) => f.write_str(m),
        }
    }
}

/// One dispatched command, as the session sees it.
#[derive(Debug, Clone)]
pub struct AgentCall {
    pub kind: CommandKind,
    pub payload: serde_json::Map<String, Value>,
}

/// Parameters for constructing a session.
#[derive(Debug, Clone)]
pub struct CreateSpec {
    pub session_id: String,
    pub working_dir: Option<PathBuf>,
    /// Remaining creation payload (model, name, agent settings).
    pub payload: serde_json::Map<String, Value>,
    /// True when re-hydrating a stored session (`load_session`).
    pub resume: bool,
}

/// Capability handle for one live agent session.
pub trait AgentSession: Send + Sync {
    /// The model provider currently backing this session; keys the circuit
    /// breaker for model-adjacent commands.
    fn provider(&self) -> String;

    /// Execute one session-scoped command.
    fn dispatch(&self, call: AgentCall) -> BoxFuture<'_, Result<Value, AgentError>>;

    /// Subscribe to the session's event stream (passed through to clients).
    fn subscribe(&self) -> broadcast::Receiver<Value>;

    /// Best-effort cancellation hook fired on command timeout.
    fn abort(&self, kind: AbortKind) -> BoxFuture<'_, ()>;

    /// Tear the session down and release its resources.
    fn dispose(&self) -> BoxFuture<'_, ()>;
}

/// Injected constructor for agent sessions.
pub trait SessionFactory: Send + Sync {
    fn create(&self, spec: &CreateSpec) -> BoxFuture<'_, Result<Arc<dyn AgentSession>, String>>;
}
